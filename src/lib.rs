#![doc = include_str!("../README.md")]

// Core model
pub mod error;
pub mod image;
pub mod psf;
pub mod stack;
pub mod transform;

// Forward model and inverse problem
pub mod loss;
pub mod operator;
pub mod regularizer;
pub mod solver;

// Registration
pub mod pyramid;
pub mod registration;

// Pipeline
pub mod cancel;
pub mod cycle;
pub mod diagnostics;
pub mod sda;

// Auxiliary tools
pub mod config;
pub mod propagation;
pub mod study;
pub mod synthetic;

// --- High-level re-exports -------------------------------------------------

pub use crate::cancel::CancellationToken;
pub use crate::cycle::{CycleConfig, CycleOrchestrator};
pub use crate::diagnostics::{CycleReport, CycleState, RunReport, TransformRecord};
pub use crate::error::{Component, CycleFailure, Result, SrrError};
pub use crate::image::{Geometry, Plane, Volume};
pub use crate::stack::{Slice, Stack};
pub use crate::transform::{Transform, TransformKind};

// --- Prelude ---------------------------------------------------------------

/// Small prelude for quick experiments.
///
/// ```no_run
/// use slice_srr::prelude::*;
/// use slice_srr::synthetic::{phantom, simulate_stack, PhantomConfig, StackSimulation};
///
/// # fn main() -> Result<(), SrrError> {
/// let truth = phantom(&PhantomConfig::default())?;
/// let (stack, _) = simulate_stack("axial", &truth, &StackSimulation::default(), &Default::default())?;
///
/// let mut orchestrator = CycleOrchestrator::new(vec![stack], CycleConfig::default())?;
/// match orchestrator.run() {
///     Ok(report) => println!("{}", report.summary()),
///     Err(failure) => eprintln!("{failure}"),
/// }
/// # Ok(())
/// # }
/// ```
pub mod prelude {
    pub use crate::loss::{DataLossConfig, DataLossKind};
    pub use crate::regularizer::RegularizationKind;
    pub use crate::registration::RegistrationConfig;
    pub use crate::solver::{RegularizationConfig, SolverChoice};
    pub use crate::{
        CancellationToken, CycleConfig, CycleOrchestrator, CycleState, SrrError, Stack, Transform,
        Volume,
    };
}
