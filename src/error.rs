//! Error taxonomy shared by the registration, solver and cycle stages.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SrrError {
    /// Invalid or incompatible parameter combination, detected before any
    /// image processing starts.
    #[error("invalid configuration `{field}`: {reason}")]
    Configuration { field: String, reason: String },
    /// Degenerate transform or grid geometry.
    #[error("geometry error: {0}")]
    Geometry(String),
    /// A slice did not converge across its multiresolution chain.
    #[error("registration of slice {slice} failed: {reason}")]
    RegistrationFailure { slice: String, reason: String },
    /// The regularized objective kept increasing from the first iteration.
    #[error("solver diverged at iteration {iteration} (objective {objective:.6e})")]
    SolverDivergence { iteration: usize, objective: f64 },
    #[error("operation cancelled")]
    Cancelled,
}

impl SrrError {
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        SrrError::Configuration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn geometry(reason: impl Into<String>) -> Self {
        SrrError::Geometry(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, SrrError>;

/// Pipeline stage at fault in a [`CycleFailure`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum Component {
    Initialization,
    Registration,
    Reconstruction,
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Component::Initialization => "initialization",
            Component::Registration => "registration",
            Component::Reconstruction => "reconstruction",
        };
        f.write_str(name)
    }
}

/// Failure surfaced by the cycle orchestrator.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("cycle {cycle}: {component} failed: {source}")]
pub struct CycleFailure {
    pub cycle: usize,
    pub component: Component,
    #[source]
    pub source: SrrError,
}
