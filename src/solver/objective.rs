//! The regularized objective `Φ(x) = ½ Σ ρ_C(r_i²) + α R(K x)` with
//! `r = y − A x`.

use super::system::SliceSystem;
use crate::loss::DataLossConfig;
use crate::regularizer::Regularizer;
use serde::Serialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectiveValue {
    pub data: f64,
    pub regularization: f64,
    pub total: f64,
}

/// Everything needed to evaluate `Φ` for one reconstruction pass.
pub struct Problem<'a> {
    pub system: &'a SliceSystem,
    pub regularizer: &'a Regularizer,
    pub loss: DataLossConfig,
    pub alpha: f64,
}

impl Problem<'_> {
    pub fn evaluate(&self, x: &[f64]) -> ObjectiveValue {
        let residual = self.system.residual(x);
        self.evaluate_with_residual(x, &residual)
    }

    pub fn evaluate_with_residual(&self, x: &[f64], residual: &[f64]) -> ObjectiveValue {
        let data = self.loss.total(residual);
        let regularization = if self.alpha > 0.0 {
            let mut kx = vec![0.0; self.regularizer.dual_len()];
            self.regularizer.apply_k(x, &mut kx);
            self.alpha * self.regularizer.value(&kx)
        } else {
            0.0
        };
        ObjectiveValue {
            data,
            regularization,
            total: data + regularization,
        }
    }

    /// Square roots of the IRLS weights at `residual`, or `None` for the
    /// linear loss.
    pub fn sqrt_weights(&self, residual: &[f64]) -> Option<Vec<f64>> {
        if self.loss.kind.is_linear() {
            return None;
        }
        Some(
            residual
                .iter()
                .map(|r| self.loss.weight(r * r).max(0.0).sqrt())
                .collect(),
        )
    }
}

pub(crate) fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// `‖a − b‖ / max(‖b‖, ε)`
pub(crate) fn relative_step(a: &[f64], b: &[f64]) -> f64 {
    let diff = a
        .iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt();
    diff / norm(b).max(1e-12)
}
