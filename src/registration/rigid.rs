//! Multiresolution rigid registration driver.
//!
//! Each level refines the parameters left by the previous, coarser one. The
//! candidate transform is `Δ(θ) ∘ T_prior`, with `Δ` an Euler transform about
//! the centroid of the prior-mapped moving samples. A final full-resolution
//! check only accepts the result when it does not score worse than the
//! prior.

use super::metric::SampleSet;
use super::optimizer::{descend, DescentOptions, StopReason, PARAMS};
use super::params::{Initializer, RegistrationConfig};
use crate::error::{Result, SrrError};
use crate::image::{Volume, VolumeMask};
use crate::pyramid::{shrink_slice, shrink_volume, Level};
use crate::stack::Slice;
use crate::transform::Transform;
use log::{debug, warn};
use nalgebra::Vector3;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelReport {
    pub shrink: usize,
    pub sigma: f64,
    pub samples: usize,
    pub iterations: usize,
    pub initial_metric: f64,
    pub final_metric: f64,
    pub last_step: f64,
    pub stop: StopReason,
    pub converged: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationOutcome {
    pub transform: Transform,
    pub levels: Vec<LevelReport>,
    /// Full-resolution metric at the prior transform.
    pub initial_metric: f64,
    pub final_metric: f64,
    /// `false` when the optimized transform was rejected in favour of the
    /// prior, or when nothing was registered.
    pub improved: bool,
    pub skipped: bool,
}

impl RegistrationOutcome {
    fn unchanged(prior: Transform) -> Self {
        Self {
            transform: prior,
            levels: Vec::new(),
            initial_metric: 0.0,
            final_metric: 0.0,
            improved: false,
            skipped: true,
        }
    }
}

/// Fixed volume resampled once per level, shared by every slice of a pass.
#[derive(Clone, Debug)]
pub struct FixedPyramid {
    levels: Vec<Level>,
    volumes: Vec<Volume>,
    full: Volume,
}

impl FixedPyramid {
    pub fn new(volume: &Volume, config: &RegistrationConfig) -> Result<Self> {
        let levels = config.levels.levels()?;
        let volumes = levels.iter().map(|l| shrink_volume(volume, *l)).collect();
        Ok(Self {
            levels,
            volumes,
            full: volume.clone(),
        })
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn full(&self) -> &Volume {
        &self.full
    }
}

/// Register one slice against `volume`.
pub fn register(slice: &Slice, volume: &Volume, config: &RegistrationConfig) -> Result<RegistrationOutcome> {
    let pyramid = FixedPyramid::new(volume, config)?;
    register_slice(slice, &pyramid, config)
}

/// Register one slice against a prebuilt fixed pyramid. A slice without
/// mask support is skipped and keeps its transform.
pub fn register_slice(
    slice: &Slice,
    fixed: &FixedPyramid,
    config: &RegistrationConfig,
) -> Result<RegistrationOutcome> {
    if !slice.has_mask_support() {
        return Ok(RegistrationOutcome::unchanged(*slice.transform()));
    }
    let full = SampleSet::from_slice(slice);
    let label = slice.index().to_string();
    let per_level = |level: Level| SampleSet::from_slice(&shrink_slice(slice, level));
    run_chain(&label, &full, per_level, fixed, None, config)
}

/// Register `moving` to `fixed`; the result maps moving physical points into
/// fixed physical space.
pub fn register_volume(
    moving: &Volume,
    moving_mask: Option<&VolumeMask>,
    fixed: &Volume,
    fixed_mask: Option<&VolumeMask>,
    config: &RegistrationConfig,
) -> Result<RegistrationOutcome> {
    register_volume_from(moving, moving_mask, fixed, fixed_mask, &Transform::default(), config)
}

pub fn register_volume_from(
    moving: &Volume,
    moving_mask: Option<&VolumeMask>,
    fixed: &Volume,
    fixed_mask: Option<&VolumeMask>,
    prior: &Transform,
    config: &RegistrationConfig,
) -> Result<RegistrationOutcome> {
    let pyramid = FixedPyramid::new(fixed, config)?;
    let cap = config.max_volume_samples;
    let full = SampleSet::from_volume(moving, moving_mask, prior, cap);
    if full.is_empty() {
        return Ok(RegistrationOutcome::unchanged(*prior));
    }
    let per_level = |level: Level| {
        let m = shrink_volume(moving, level);
        let mask = moving_mask.map(|mask| shrink_mask(mask, level));
        SampleSet::from_volume(&m, mask.as_ref(), prior, cap)
    };
    run_chain("volume", &full, per_level, &pyramid, fixed_mask, config)
}

fn shrink_mask(mask: &VolumeMask, level: Level) -> VolumeMask {
    let as_f64: Vec<f64> = mask.data.iter().map(|&m| f64::from(u8::from(m != 0))).collect();
    let coarse = shrink_volume(
        &mask.with_data(as_f64),
        Level {
            shrink: level.shrink,
            sigma: 0.0,
        },
    );
    let data = coarse.data.iter().map(|&v| u8::from(v > 0.5)).collect();
    coarse.with_data(data)
}

fn delta(theta: &[f64; PARAMS], center: Vector3<f64>) -> Transform {
    Transform::from_euler_parameters(theta, center)
}

fn run_chain<F>(
    label: &str,
    full: &SampleSet,
    samples_at: F,
    fixed: &FixedPyramid,
    fixed_mask: Option<&VolumeMask>,
    config: &RegistrationConfig,
) -> Result<RegistrationOutcome>
where
    F: Fn(Level) -> SampleSet,
{
    let failure = |reason: String| SrrError::RegistrationFailure {
        slice: label.to_string(),
        reason,
    };
    let center = full.centroid();
    let radius = full.radius(&center);
    let scales = [radius, radius, radius, 1.0, 1.0, 1.0];
    let to_scaled = |theta: &[f64; PARAMS]| -> [f64; PARAMS] {
        std::array::from_fn(|i| theta[i] * scales[i])
    };
    let to_theta = |q: &[f64; PARAMS]| -> [f64; PARAMS] {
        std::array::from_fn(|i| q[i] / scales[i])
    };

    let mut theta = [0.0; PARAMS];
    if config.initializer == Initializer::Moments {
        if let Some(offset) = full.moments_offset(fixed.full(), fixed_mask) {
            theta[3..].copy_from_slice(offset.as_slice());
        }
    }
    let anchor = to_scaled(&theta);
    let angle_bound = config.search_angle() * radius;
    let opts = DescentOptions {
        learning_rate: config.learning_rate,
        min_step: config.min_step,
        relaxation: config.relaxation,
        iterations: config.iterations,
        gradient_tolerance: config.gradient_tolerance,
        fd_step: config.finite_difference_step,
        bounds: [
            angle_bound,
            angle_bound,
            angle_bound,
            f64::INFINITY,
            f64::INFINITY,
            f64::INFINITY,
        ],
        anchor,
    };

    let n_levels = fixed.levels.len();
    let mut reports = Vec::with_capacity(n_levels);
    for (l, (level, volume)) in fixed.levels.iter().zip(&fixed.volumes).enumerate() {
        let finest = l + 1 == n_levels;
        let samples = if level.is_full_resolution() {
            full.clone()
        } else {
            samples_at(*level)
        };
        if samples.is_empty() {
            debug!("registration {label}: level {l} has no samples, skipped");
            continue;
        }
        let objective = |q: &[f64; PARAMS]| samples.evaluate(volume, &delta(&to_theta(q), center), config);
        let res = descend(to_scaled(&theta), &opts, objective)?;
        let converged = match res.stop {
            StopReason::StepTooSmall | StopReason::GradientTolerance => true,
            StopReason::IterationLimit => res.last_step <= config.displacement_tolerance,
            StopReason::NonFinite => false,
        };
        theta = to_theta(&res.best);
        debug!(
            "registration {label}: level {l} (shrink {}, sigma {}) {:?} after {} its, metric {:.5e} -> {:.5e}",
            level.shrink, level.sigma, res.stop, res.iterations, res.initial_value, res.best_value
        );
        reports.push(LevelReport {
            shrink: level.shrink,
            sigma: level.sigma,
            samples: samples.len(),
            iterations: res.iterations,
            initial_metric: res.initial_value,
            final_metric: res.best_value,
            last_step: res.last_step,
            stop: res.stop,
            converged,
        });
        if !converged {
            if finest {
                return Err(failure(format!(
                    "finest level stopped with {:?}, last step {:.3} mm",
                    res.stop, res.last_step
                )));
            }
            warn!("registration {label}: level {l} did not converge, refining anyway");
        }
    }

    let prior = *full.prior();
    let initial_metric = full.evaluate(fixed.full(), &Transform::default(), config)?;
    let candidate = delta(&theta, center);
    let final_metric = full.evaluate(fixed.full(), &candidate, config)?;
    if !final_metric.is_finite() {
        return Err(failure("metric is not finite".to_string()));
    }
    let improved = final_metric <= initial_metric;
    let transform = if improved {
        candidate.compose(&prior)
    } else {
        debug!("registration {label}: result scores worse than prior, kept prior");
        prior
    };
    Ok(RegistrationOutcome {
        transform,
        levels: reports,
        initial_metric,
        final_metric: final_metric.min(initial_metric),
        improved,
        skipped: false,
    })
}
