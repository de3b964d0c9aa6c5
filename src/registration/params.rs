use crate::error::{Result, SrrError};
use crate::psf::PsfConfig;
use crate::pyramid::LevelSchedule;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Initializer {
    Identity,
    /// Align intensity centers of mass before optimizing.
    Moments,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    MeanSquares,
    /// Negative normalized cross-correlation.
    Correlation,
}

/// Parameters for rigid slice-to-volume and volume-to-volume registration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    pub initializer: Initializer,
    pub metric: Metric,
    /// Initial step length in scaled parameter units (mm).
    pub learning_rate: f64,
    pub min_step: f64,
    /// Step factor applied when the gradient direction reverses.
    pub relaxation: f64,
    pub iterations: usize,
    pub gradient_tolerance: f64,
    /// Central-difference step in scaled parameter units.
    pub finite_difference_step: f64,
    pub levels: LevelSchedule,
    /// Bound on each rotation angle relative to the start, in degrees.
    pub search_angle_deg: f64,
    /// Predict slice pixels through the acquisition PSF instead of
    /// trilinear point sampling.
    pub psf_aware: bool,
    /// A level that hits its iteration cap is accepted when its last step
    /// moved less than this (mm).
    pub displacement_tolerance: f64,
    /// A pass fails when more than this fraction of slices fails.
    pub max_failed_fraction: f64,
    /// Cap on moving samples used for volume-to-volume registration.
    pub max_volume_samples: usize,
    /// PSF used when `psf_aware` is set; filled in from the reconstruction.
    #[serde(skip)]
    pub psf: PsfConfig,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            initializer: Initializer::Identity,
            metric: Metric::Correlation,
            learning_rate: 1.0,
            min_step: 1e-6,
            relaxation: 0.5,
            iterations: 200,
            gradient_tolerance: 1e-8,
            finite_difference_step: 0.05,
            levels: LevelSchedule::default(),
            search_angle_deg: 180.0,
            psf_aware: false,
            displacement_tolerance: 0.5,
            max_failed_fraction: 0.5,
            max_volume_samples: 20_000,
            psf: PsfConfig::default(),
        }
    }
}

impl RegistrationConfig {
    pub fn validate(&self) -> Result<()> {
        self.levels.levels()?;
        let positive = [
            ("learning_rate", self.learning_rate),
            ("min_step", self.min_step),
            ("finite_difference_step", self.finite_difference_step),
            ("search_angle_deg", self.search_angle_deg),
        ];
        for (field, value) in positive {
            if value.is_nan() || value <= 0.0 {
                return Err(SrrError::config(field, format!("must be positive, got {value}")));
            }
        }
        if self.relaxation.is_nan() || self.relaxation <= 0.0 || self.relaxation >= 1.0 {
            return Err(SrrError::config("relaxation", "must lie in (0, 1)"));
        }
        if self.iterations == 0 {
            return Err(SrrError::config("iterations", "must be at least 1"));
        }
        if self.max_volume_samples == 0 {
            return Err(SrrError::config("max_volume_samples", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.max_failed_fraction) {
            return Err(SrrError::config("max_failed_fraction", "must lie in [0, 1]"));
        }
        if self.displacement_tolerance.is_nan() || self.displacement_tolerance < 0.0 {
            return Err(SrrError::config("displacement_tolerance", "must be >= 0"));
        }
        Ok(())
    }

    pub fn search_angle(&self) -> f64 {
        self.search_angle_deg.to_radians()
    }
}
