//! Parameter study: sweep α, data loss, loss scale and optionally the
//! regularizer, one independent reconstruction per combination.
//!
//! Combinations run concurrently; each owns a copy of the input stacks, so
//! runs never share mutable state. Records are appended under a lock and
//! returned in combination order.

use crate::cancel::CancellationToken;
use crate::cycle::{CycleConfig, CycleOrchestrator};
use crate::diagnostics::elapsed_ms;
use crate::error::{Result, SrrError};
use crate::image::Volume;
use crate::loss::DataLossKind;
use crate::registration::correlation;
use crate::regularizer::RegularizationKind;
use crate::stack::Stack;
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudyConfig {
    /// Replaces both `alpha` and `alpha_first` of the base configuration.
    pub alphas: Vec<f64>,
    pub data_losses: Vec<DataLossKind>,
    pub loss_scales: Vec<f64>,
    /// Sweep these regularizers instead of the base configuration's.
    pub regularizers: Option<Vec<RegularizationKind>>,
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            alphas: vec![0.01, 0.03, 0.1],
            data_losses: vec![DataLossKind::Linear],
            loss_scales: vec![1.0],
            regularizers: None,
        }
    }
}

/// One point of the sweep.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Combination {
    pub index: usize,
    pub alpha: f64,
    pub data_loss: DataLossKind,
    pub loss_scale: f64,
    pub regularization: RegularizationKind,
}

impl StudyConfig {
    pub fn combinations(&self, base: &CycleConfig) -> Result<Vec<Combination>> {
        if self.alphas.is_empty() || self.data_losses.is_empty() || self.loss_scales.is_empty() {
            return Err(SrrError::config("study", "every swept list needs at least one value"));
        }
        let regularizers = match &self.regularizers {
            Some(list) if list.is_empty() => {
                return Err(SrrError::config("study.regularizers", "must not be empty"))
            }
            Some(list) => list.clone(),
            None => vec![base.regularization.kind],
        };
        let mut out = Vec::new();
        for &regularization in &regularizers {
            for &data_loss in &self.data_losses {
                for &loss_scale in &self.loss_scales {
                    for &alpha in &self.alphas {
                        out.push(Combination {
                            index: out.len(),
                            alpha,
                            data_loss,
                            loss_scale,
                            regularization,
                        });
                    }
                }
            }
        }
        Ok(out)
    }
}

impl Combination {
    /// `base` with the swept values in place. The swept `α` drives every
    /// cycle, the first one included.
    pub fn apply(&self, base: &CycleConfig) -> CycleConfig {
        let mut config = base.clone();
        config.regularization.alpha = self.alpha;
        config.regularization.alpha_first = self.alpha;
        config.regularization.kind = self.regularization;
        config.data_loss.kind = self.data_loss;
        config.data_loss.scale = self.loss_scale;
        config
    }

    pub fn label(&self) -> String {
        format!(
            "{}_{}_scale{}_alpha{}",
            self.regularization.name(),
            self.data_loss.name(),
            self.loss_scale,
            self.alpha
        )
    }
}

/// Similarity of a reconstruction to the reference volume.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityMetrics {
    pub mae: f64,
    pub rmse: f64,
    pub psnr: f64,
    pub ncc: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyRecord {
    #[serde(flatten)]
    pub combination: Combination,
    pub cycles: usize,
    pub objective: Option<f64>,
    pub metrics: Option<SimilarityMetrics>,
    /// Set when the combination was rejected or its run failed.
    pub error: Option<String>,
    pub elapsed_ms: f64,
}

/// Compare `volume` with `reference` on `volume`'s grid, resampling the
/// reference when the grids differ.
pub fn similarity(volume: &Volume, reference: &Volume) -> SimilarityMetrics {
    let same_grid = volume.size == reference.size && volume.geometry == reference.geometry;
    let [nx, ny, _] = volume.size;
    let truth: Vec<f64> = if same_grid {
        reference.data.clone()
    } else {
        (0..volume.len())
            .map(|n| {
                let (i, j, k) = (n % nx, (n / nx) % ny, n / (nx * ny));
                reference.sample_physical(&volume.voxel_center(i, j, k))
            })
            .collect()
    };

    let n = truth.len().max(1) as f64;
    let mut abs = 0.0;
    let mut sq = 0.0;
    for (a, b) in volume.data.iter().zip(&truth) {
        abs += (a - b).abs();
        sq += (a - b) * (a - b);
    }
    let mae = abs / n;
    let rmse = (sq / n).sqrt();
    let (lo, hi) = truth
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = hi - lo;
    let psnr = if rmse > 0.0 && range > 0.0 {
        20.0 * (range / rmse).log10()
    } else {
        f64::INFINITY
    };
    SimilarityMetrics {
        mae,
        rmse,
        psnr,
        ncc: correlation(&volume.data, &truth),
    }
}

/// Run every combination against `reference`. Invalid combinations and
/// failed runs are recorded, not propagated; only an empty sweep or a
/// cancellation aborts the study.
pub fn run_study(
    stacks: &[Stack],
    reference: &Volume,
    base: &CycleConfig,
    study: &StudyConfig,
    cancel: &CancellationToken,
) -> Result<Vec<StudyRecord>> {
    let combinations = study.combinations(base)?;
    info!("parameter study: {} combination(s)", combinations.len());
    let records = Mutex::new(Vec::with_capacity(combinations.len()));

    combinations.par_iter().for_each(|combo| {
        let record = run_combination(stacks, reference, base, combo, cancel);
        records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    });
    cancel.check()?;

    let mut records = records.into_inner().unwrap_or_else(PoisonError::into_inner);
    records.sort_by_key(|r| r.combination.index);
    Ok(records)
}

fn run_combination(
    stacks: &[Stack],
    reference: &Volume,
    base: &CycleConfig,
    combo: &Combination,
    cancel: &CancellationToken,
) -> StudyRecord {
    let start = Instant::now();
    let mut record = StudyRecord {
        combination: *combo,
        cycles: 0,
        objective: None,
        metrics: None,
        error: None,
        elapsed_ms: 0.0,
    };
    let outcome = CycleOrchestrator::new(stacks.to_vec(), combo.apply(base))
        .map(|o| o.with_cancellation(cancel.clone()))
        .and_then(|mut orch| {
            let run = orch.run();
            record.cycles = orch.reports().len();
            record.objective = orch.reports().last().map(|c| c.objective);
            run.map_err(|f| f.source)?;
            Ok(orch)
        });
    match outcome {
        Ok(orch) => {
            record.metrics = orch.volume().map(|v| similarity(v, reference));
            if let Some(m) = &record.metrics {
                info!("{}: rmse {:.4e}, ncc {:.4}", combo.label(), m.rmse, m.ncc);
            }
        }
        Err(err) => {
            warn!("{}: {err}", combo.label());
            record.error = Some(err.to_string());
        }
    }
    record.elapsed_ms = elapsed_ms(start);
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Geometry;

    #[test]
    fn combinations_cover_the_grid_in_order() {
        let study = StudyConfig {
            alphas: vec![0.01, 0.1],
            data_losses: vec![DataLossKind::Linear, DataLossKind::Huber],
            loss_scales: vec![0.5, 1.0, 2.0],
            regularizers: None,
        };
        let combos = study.combinations(&CycleConfig::default()).unwrap();
        assert_eq!(combos.len(), 12);
        assert!(combos.iter().enumerate().all(|(i, c)| c.index == i));
        assert_eq!(combos[1].alpha, 0.1);
        assert_eq!(combos[0].regularization, RegularizationKind::Tk1L2);
    }

    #[test]
    fn swept_alpha_reaches_every_cycle() {
        let base = CycleConfig {
            two_step_cycles: 1,
            ..CycleConfig::default()
        };
        let study = StudyConfig {
            alphas: vec![0.003, 0.03],
            ..StudyConfig::default()
        };
        let combos = study.combinations(&base).unwrap();
        let first: Vec<f64> = combos
            .iter()
            .map(|c| c.apply(&base).regularization.settings(true).alpha)
            .collect();
        let later: Vec<f64> = combos
            .iter()
            .map(|c| c.apply(&base).regularization.settings(false).alpha)
            .collect();
        assert_eq!(first, vec![0.003, 0.03]);
        assert_eq!(later, vec![0.003, 0.03]);
    }

    #[test]
    fn identical_volumes_are_perfectly_similar() {
        let mut v: Volume = Volume::new([4, 4, 4], Geometry::default());
        for (n, x) in v.data.iter_mut().enumerate() {
            *x = (n % 7) as f64;
        }
        let m = similarity(&v, &v);
        assert_eq!(m.mae, 0.0);
        assert!(m.psnr.is_infinite());
        assert!((m.ncc - 1.0).abs() < 1e-12);
    }
}
