//! Robust data losses applied element-wise to squared residuals.
//!
//! With scale `C` the loss of a squared residual `f2` is
//! `C² · ρ(f2 / C²)`; its derivative with respect to `f2` is `ρ'(f2 / C²)`,
//! which doubles as the IRLS weight of that residual.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataLossKind {
    Linear,
    SoftL1,
    Huber,
    Arctan,
    Cauchy,
}

impl DataLossKind {
    pub const ALL: [DataLossKind; 5] = [
        DataLossKind::Linear,
        DataLossKind::SoftL1,
        DataLossKind::Huber,
        DataLossKind::Arctan,
        DataLossKind::Cauchy,
    ];

    pub fn is_linear(self) -> bool {
        matches!(self, DataLossKind::Linear)
    }

    pub fn name(self) -> &'static str {
        match self {
            DataLossKind::Linear => "linear",
            DataLossKind::SoftL1 => "soft_l1",
            DataLossKind::Huber => "huber",
            DataLossKind::Arctan => "arctan",
            DataLossKind::Cauchy => "cauchy",
        }
    }

    /// `ρ(z)` for `z ≥ 0`.
    pub fn rho(self, z: f64) -> f64 {
        match self {
            DataLossKind::Linear => z,
            DataLossKind::SoftL1 => 2.0 * ((1.0 + z).sqrt() - 1.0),
            DataLossKind::Huber => {
                if z <= 1.0 {
                    z
                } else {
                    2.0 * z.sqrt() - 1.0
                }
            }
            DataLossKind::Arctan => z.atan(),
            DataLossKind::Cauchy => z.ln_1p(),
        }
    }

    /// `ρ'(z)` for `z ≥ 0`.
    pub fn rho_prime(self, z: f64) -> f64 {
        match self {
            DataLossKind::Linear => 1.0,
            DataLossKind::SoftL1 => 1.0 / (1.0 + z).sqrt(),
            DataLossKind::Huber => {
                if z <= 1.0 {
                    1.0
                } else {
                    1.0 / z.sqrt()
                }
            }
            DataLossKind::Arctan => 1.0 / (1.0 + z * z),
            DataLossKind::Cauchy => 1.0 / (1.0 + z),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataLossConfig {
    pub kind: DataLossKind,
    /// Soft margin `C` between inlier and outlier residuals.
    pub scale: f64,
}

impl Default for DataLossConfig {
    fn default() -> Self {
        Self {
            kind: DataLossKind::Linear,
            scale: 1.0,
        }
    }
}

impl DataLossConfig {
    /// `C² ρ(f2 / C²)`
    #[inline]
    pub fn value(&self, f2: f64) -> f64 {
        let c2 = self.scale * self.scale;
        c2 * self.kind.rho(f2 / c2)
    }

    /// IRLS weight `ρ'(f2 / C²)`.
    #[inline]
    pub fn weight(&self, f2: f64) -> f64 {
        self.kind.rho_prime(f2 / (self.scale * self.scale))
    }

    /// `0.5 Σ C² ρ(r_i² / C²)`
    pub fn total(&self, residuals: &[f64]) -> f64 {
        0.5 * residuals.iter().map(|r| self.value(r * r)).sum::<f64>()
    }
}
