//! Rigid slice-to-volume (S2V) and volume-to-volume registration.
//!
//! - [`register`] / [`register_slice`] align one slice to a volume.
//! - [`register_volume`] aligns two volumes (stack pre-alignment,
//!   segmentation propagation).
//! - [`register_stacks`] runs a parallel pass over all slices.

mod metric;
mod optimizer;
pub mod params;
pub mod pass;
pub mod rigid;

pub(crate) use metric::correlation;
pub use optimizer::StopReason;
pub use params::{Initializer, Metric, RegistrationConfig};
pub use pass::{register_stacks, PassReport, SliceRegistration, SliceStatus};
pub use rigid::{
    register, register_slice, register_volume, register_volume_from, FixedPyramid, LevelReport,
    RegistrationOutcome,
};
