//! Reports produced by reconstruction runs and their supporting demos.
//!
//! [`RunReport`] is the main entry point returned by the cycle orchestrator:
//! it bundles the initialization summary, one [`CycleReport`] per completed
//! two-step cycle and, for failed runs, the component at fault. Slice
//! transforms are exported separately as [`TransformRecord`]s.

pub mod run;
pub mod timing;
pub mod transforms;

pub use run::{CycleReport, CycleState, FailureReport, InitializationReport, RunReport};
pub use timing::{elapsed_ms, StageTiming, TimingBreakdown};
pub use transforms::{transform_records, TransformRecord};
