//! JSON runtime configuration for the demo binaries.

pub mod reconstruct;
pub mod study;
