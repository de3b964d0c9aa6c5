use crate::error::{Result, SrrError};
use crate::loss::DataLossConfig;
use crate::psf::PsfConfig;
use crate::registration::{Initializer, RegistrationConfig};
use crate::sda::{SdaConfig, SpaceConfig};
use crate::solver::RegularizationConfig;
use serde::{Deserialize, Serialize};

/// All options of a reconstruction run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    /// Index of the stack defining the reconstruction space.
    pub target_stack: usize,
    pub two_step_cycles: usize,
    pub regularization: RegularizationConfig,
    pub data_loss: DataLossConfig,
    pub registration: RegistrationConfig,
    /// Registration parameters for the first cycle (e.g. coarser search).
    pub registration_first: Option<RegistrationConfig>,
    pub psf: PsfConfig,
    pub space: SpaceConfig,
    pub sda: SdaConfig,
    /// Rigidly align every stack volume to the target before the first cycle.
    pub prealign_stacks: bool,
    /// Stop early once `‖x_n − x_{n−1}‖ / ‖x_{n−1}‖` drops below this.
    pub convergence_tolerance: Option<f64>,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            target_stack: 0,
            two_step_cycles: 3,
            regularization: RegularizationConfig::default(),
            data_loss: DataLossConfig::default(),
            registration: RegistrationConfig::default(),
            registration_first: None,
            psf: PsfConfig::default(),
            space: SpaceConfig::default(),
            sda: SdaConfig::default(),
            prealign_stacks: false,
            convergence_tolerance: None,
        }
    }
}

impl CycleConfig {
    pub fn validate(&self, n_stacks: usize) -> Result<()> {
        if n_stacks == 0 {
            return Err(SrrError::config("stacks", "at least one stack is required"));
        }
        if self.target_stack >= n_stacks {
            return Err(SrrError::config(
                "target_stack",
                format!("index {} but only {n_stacks} stacks", self.target_stack),
            ));
        }
        if self.two_step_cycles == 0 {
            return Err(SrrError::config("two_step_cycles", "must be at least 1"));
        }
        self.regularization.validate(&self.data_loss)?;
        self.registration.validate()?;
        if let Some(first) = &self.registration_first {
            first.validate()?;
        }
        if self.psf.cutoff.is_nan() || self.psf.cutoff <= 0.0 {
            return Err(SrrError::config("psf.cutoff", "must be positive"));
        }
        if self.sda.sigma.is_nan() || self.sda.sigma < 0.0 {
            return Err(SrrError::config("sda.sigma", "must be >= 0"));
        }
        if let Some(tol) = self.convergence_tolerance {
            if tol.is_nan() || tol <= 0.0 {
                return Err(SrrError::config("convergence_tolerance", "must be positive"));
            }
        }
        Ok(())
    }

    /// Registration parameters for `cycle` (1-based), with the
    /// reconstruction PSF filled in.
    pub fn registration_for(&self, cycle: usize) -> RegistrationConfig {
        let mut cfg = match (&self.registration_first, cycle) {
            (Some(first), 1) => first.clone(),
            _ => self.registration.clone(),
        };
        cfg.psf = self.psf;
        cfg
    }

    /// Volume-to-volume parameters used for stack pre-alignment.
    pub fn prealignment(&self) -> RegistrationConfig {
        RegistrationConfig {
            initializer: Initializer::Moments,
            psf_aware: false,
            ..self.registration.clone()
        }
    }
}
