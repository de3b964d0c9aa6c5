use crate::error::{Result, SrrError};
use serde::{Deserialize, Serialize};

/// One multiresolution level: integer decimation plus pre-smoothing (in
/// samples of the full-resolution grid).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub shrink: usize,
    pub sigma: f64,
}

impl Level {
    pub const FULL: Level = Level {
        shrink: 1,
        sigma: 0.0,
    };

    pub fn is_full_resolution(&self) -> bool {
        self.shrink == 1 && self.sigma <= 0.0
    }
}

/// Coarse-to-fine schedule given as parallel lists.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelSchedule {
    pub shrink_factors: Vec<usize>,
    pub smoothing_sigmas: Vec<f64>,
}

impl Default for LevelSchedule {
    fn default() -> Self {
        Self {
            shrink_factors: vec![2, 1],
            smoothing_sigmas: vec![1.0, 0.0],
        }
    }
}

impl LevelSchedule {
    /// Single full-resolution level.
    pub fn single() -> Self {
        Self {
            shrink_factors: vec![1],
            smoothing_sigmas: vec![0.0],
        }
    }

    pub fn levels(&self) -> Result<Vec<Level>> {
        if self.shrink_factors.len() != self.smoothing_sigmas.len() {
            return Err(SrrError::config(
                "smoothing_sigmas",
                format!(
                    "{} sigmas for {} shrink factors",
                    self.smoothing_sigmas.len(),
                    self.shrink_factors.len()
                ),
            ));
        }
        if self.shrink_factors.is_empty() {
            return Err(SrrError::config("shrink_factors", "needs at least one level"));
        }
        self.shrink_factors
            .iter()
            .zip(&self.smoothing_sigmas)
            .map(|(&shrink, &sigma)| {
                if shrink == 0 {
                    Err(SrrError::config("shrink_factors", "must be >= 1"))
                } else if sigma.is_nan() || sigma < 0.0 {
                    Err(SrrError::config("smoothing_sigmas", "must be >= 0"))
                } else {
                    Ok(Level { shrink, sigma })
                }
            })
            .collect()
    }
}
