//! Inverse problem solver for super-resolution reconstruction.
//!
//! Minimizes `½ Σ ρ_C(r_i²) + α R(K x)` over the masked pixels of every
//! prepared slice. Three drivers are available:
//!
//! - [`SolverChoice::Lsmr`] solves the Tikhonov normal equations directly as
//!   the stacked least-squares system `[A; √α K] x ≈ [y; 0]`.
//! - [`SolverChoice::Admm`] splits `z = K x` and alternates a (reweighted)
//!   LSMR x-update, a proximal z-update and dual ascent.
//! - [`SolverChoice::PrimalDual`] runs one of the Chambolle–Pock variants in
//!   [`PrimalDualVariant`].
//!
//! Every driver warm-starts from the current volume, reports its objective
//! history and returns the best iterate it has seen.

pub mod lsmr;
pub mod monitor;
pub mod objective;
pub mod system;

mod admm;
mod primal_dual;
mod tikhonov;

pub use lsmr::{lsmr, LsmrOptions, LsmrOutcome, LsmrStop};
pub use monitor::{DivergenceConfig, ObjectiveMonitor, Verdict};
pub use objective::{ObjectiveValue, Problem};
pub use system::{AugmentedOperator, LinearOperator, SliceSystem};

use crate::cancel::CancellationToken;
use crate::error::{Result, SrrError};
use crate::image::Volume;
use crate::loss::DataLossConfig;
use crate::regularizer::{RegularizationKind, Regularizer};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SolverChoice {
    #[serde(rename = "lsmr")]
    Lsmr,
    #[serde(rename = "ADMM")]
    Admm,
    #[serde(rename = "PD", alias = "PrimalDual")]
    PrimalDual,
}

/// Chambolle–Pock (2011) algorithm variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimalDualVariant {
    /// Extrapolated scheme; constant steps for `γ = 0`, accelerated for `γ > 0`.
    #[serde(rename = "ALG2")]
    Alg2,
    /// Arrow–Hurwicz steps without extrapolation.
    #[serde(rename = "ALG2_AHMOD")]
    Alg2Ahmod,
    /// Linear-rate scheme for a strongly convex data term and conjugate.
    #[serde(rename = "ALG3")]
    Alg3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolverKind {
    Lsmr,
    Admm,
    PrimalDual(PrimalDualVariant),
}

impl SolverKind {
    pub fn name(self) -> &'static str {
        match self {
            SolverKind::Lsmr => "lsmr",
            SolverKind::Admm => "ADMM",
            SolverKind::PrimalDual(PrimalDualVariant::Alg2) => "PD/ALG2",
            SolverKind::PrimalDual(PrimalDualVariant::Alg2Ahmod) => "PD/ALG2_AHMOD",
            SolverKind::PrimalDual(PrimalDualVariant::Alg3) => "PD/ALG3",
        }
    }
}

struct Compatibility {
    solver: SolverChoice,
    regularizers: &'static [RegularizationKind],
    nonlinear_loss: bool,
}

const ANY_REGULARIZER: &[RegularizationKind] = &[
    RegularizationKind::Tk0L2,
    RegularizationKind::Tk1L2,
    RegularizationKind::TvL2,
    RegularizationKind::HuberL2,
];

const COMPATIBILITY: [Compatibility; 3] = [
    Compatibility {
        solver: SolverChoice::Lsmr,
        regularizers: &[RegularizationKind::Tk0L2, RegularizationKind::Tk1L2],
        nonlinear_loss: false,
    },
    Compatibility {
        solver: SolverChoice::Admm,
        regularizers: ANY_REGULARIZER,
        nonlinear_loss: true,
    },
    Compatibility {
        solver: SolverChoice::PrimalDual,
        regularizers: ANY_REGULARIZER,
        nonlinear_loss: true,
    },
];

/// Regularization and solver parameters of the SRR step.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegularizationConfig {
    pub kind: RegularizationKind,
    pub alpha: f64,
    /// `α` used on the first cycle.
    pub alpha_first: f64,
    pub solver: SolverChoice,
    pub pd_variant: PrimalDualVariant,
    /// ADMM augmented-Lagrangian parameter.
    pub rho: f64,
    /// LSMR iteration cap (inner cap for ADMM / primal-dual).
    pub iter_max: usize,
    pub iter_max_first: usize,
    /// Outer ADMM / primal-dual iterations.
    pub iterations: usize,
    pub huber_gamma: f64,
    /// Strong-convexity modulus of the data term for the accelerated
    /// primal-dual variants; `0` disables acceleration.
    pub pd_gamma: f64,
    pub tolerance: f64,
    pub clip_negative: bool,
    pub divergence: DivergenceConfig,
}

impl Default for RegularizationConfig {
    fn default() -> Self {
        Self {
            kind: RegularizationKind::Tk1L2,
            alpha: 0.03,
            alpha_first: 0.1,
            solver: SolverChoice::Lsmr,
            pd_variant: PrimalDualVariant::Alg2,
            rho: 0.5,
            iter_max: 10,
            iter_max_first: 5,
            iterations: 10,
            huber_gamma: 0.05,
            pd_gamma: 0.0,
            tolerance: 1e-6,
            clip_negative: false,
            divergence: DivergenceConfig::default(),
        }
    }
}

impl RegularizationConfig {
    pub fn solver_kind(&self) -> SolverKind {
        match self.solver {
            SolverChoice::Lsmr => SolverKind::Lsmr,
            SolverChoice::Admm => SolverKind::Admm,
            SolverChoice::PrimalDual => SolverKind::PrimalDual(self.pd_variant),
        }
    }

    /// Reject incompatible combinations before any processing.
    pub fn validate(&self, loss: &DataLossConfig) -> Result<()> {
        for (field, value) in [("alpha", self.alpha), ("alpha_first", self.alpha_first)] {
            if !value.is_finite() || value < 0.0 {
                return Err(SrrError::config(field, format!("must be >= 0, got {value}")));
            }
        }
        if loss.scale.is_nan() || loss.scale <= 0.0 {
            return Err(SrrError::config("data_loss.scale", "must be positive"));
        }
        if self.iter_max == 0 || self.iter_max_first == 0 {
            return Err(SrrError::config("iter_max", "must be at least 1"));
        }
        if self.tolerance.is_nan() || self.tolerance < 0.0 {
            return Err(SrrError::config("tolerance", "must be >= 0"));
        }
        if self.divergence.rel_tolerance.is_nan() || self.divergence.rel_tolerance < 0.0 {
            return Err(SrrError::config("divergence.rel_tolerance", "must be >= 0"));
        }

        let row = COMPATIBILITY
            .iter()
            .find(|c| c.solver == self.solver)
            .ok_or_else(|| SrrError::config("solver", "unknown solver"))?;
        if !row.regularizers.contains(&self.kind) {
            return Err(SrrError::config(
                "solver",
                format!(
                    "{} cannot minimize {} regularization",
                    self.solver_kind().name(),
                    self.kind.name()
                ),
            ));
        }
        if !loss.kind.is_linear() && !row.nonlinear_loss {
            return Err(SrrError::config(
                "data_loss",
                format!(
                    "{} loss needs a solver with residual reweighting, not {}",
                    loss.kind.name(),
                    self.solver_kind().name()
                ),
            ));
        }

        match self.solver {
            SolverChoice::Lsmr => {}
            SolverChoice::Admm => {
                if self.rho.is_nan() || self.rho <= 0.0 {
                    return Err(SrrError::config("rho", "must be positive"));
                }
            }
            SolverChoice::PrimalDual => {
                if self.pd_gamma.is_nan() || self.pd_gamma < 0.0 {
                    return Err(SrrError::config("pd_gamma", "must be >= 0"));
                }
                if self.pd_variant == PrimalDualVariant::Alg3 {
                    if self.pd_gamma <= 0.0 {
                        return Err(SrrError::config("pd_gamma", "ALG3 needs a positive value"));
                    }
                    if self.kind == RegularizationKind::TvL2 {
                        return Err(SrrError::config(
                            "pd_variant",
                            "ALG3 needs a strongly convex regularizer conjugate, TVL2 has none",
                        ));
                    }
                    if self.alpha <= 0.0 || self.alpha_first <= 0.0 {
                        return Err(SrrError::config("alpha", "ALG3 needs a positive value"));
                    }
                }
            }
        }
        if self.solver != SolverChoice::Lsmr && self.iterations == 0 {
            return Err(SrrError::config("iterations", "must be at least 1"));
        }
        if self.kind == RegularizationKind::HuberL2 && (self.huber_gamma.is_nan() || self.huber_gamma <= 0.0) {
            return Err(SrrError::config("huber_gamma", "must be positive"));
        }
        Ok(())
    }

    /// Settings of one SRR pass; `first_cycle` selects `alpha_first` and
    /// `iter_max_first`.
    pub fn settings(&self, first_cycle: bool) -> SolveSettings {
        SolveSettings {
            solver: self.solver_kind(),
            kind: self.kind,
            alpha: if first_cycle { self.alpha_first } else { self.alpha },
            inner_iterations: if first_cycle {
                self.iter_max_first
            } else {
                self.iter_max
            },
            iterations: self.iterations,
            rho: self.rho,
            huber_gamma: self.huber_gamma,
            pd_gamma: self.pd_gamma,
            tolerance: self.tolerance,
            clip_negative: self.clip_negative,
            divergence: self.divergence,
        }
    }
}

/// Resolved parameters of a single solve.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SolveSettings {
    pub solver: SolverKind,
    pub kind: RegularizationKind,
    pub alpha: f64,
    pub inner_iterations: usize,
    pub iterations: usize,
    pub rho: f64,
    pub huber_gamma: f64,
    pub pd_gamma: f64,
    pub tolerance: f64,
    pub clip_negative: bool,
    pub divergence: DivergenceConfig,
}

impl SolveSettings {
    fn lsmr_options(&self, damp: f64) -> LsmrOptions {
        LsmrOptions {
            damp,
            atol: self.tolerance,
            btol: self.tolerance,
            max_iter: self.inner_iterations,
            ..LsmrOptions::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SolveReport {
    pub solver: String,
    pub regularization: String,
    pub alpha: f64,
    pub iterations: usize,
    pub converged: bool,
    pub diverged: bool,
    pub initial: ObjectiveValue,
    #[serde(rename = "final")]
    pub final_value: ObjectiveValue,
    pub history: Vec<f64>,
}

#[derive(Clone, Debug)]
pub struct SolveOutcome {
    pub volume: Volume,
    pub report: SolveReport,
}

/// Raw result of one driver.
pub(crate) struct DriverRun {
    pub x: Vec<f64>,
    pub iterations: usize,
    pub converged: bool,
    pub diverged: bool,
    pub history: Vec<f64>,
}

/// Keeps the best iterate seen by an iterative driver.
pub(crate) struct BestIterate {
    monitor: ObjectiveMonitor,
    x: Vec<f64>,
    pub diverged: bool,
}

impl BestIterate {
    pub fn new(config: DivergenceConfig, x0: &[f64], initial: f64) -> Self {
        Self {
            monitor: ObjectiveMonitor::new(config, initial),
            x: x0.to_vec(),
            diverged: false,
        }
    }

    /// Record iteration `it`; `Ok(true)` means stop.
    pub fn record(&mut self, it: usize, objective: f64, x: &[f64]) -> Result<bool> {
        match self.monitor.record(it, objective) {
            Verdict::Improved => {
                self.x.copy_from_slice(x);
                Ok(false)
            }
            Verdict::Continue => Ok(false),
            Verdict::Diverged { fatal: true } => Err(SrrError::SolverDivergence {
                iteration: it,
                objective,
            }),
            Verdict::Diverged { fatal: false } => {
                warn!(
                    "solver: objective increasing since iteration {}, keeping iterate {} ({:.6e})",
                    it,
                    self.monitor.best_iteration(),
                    self.monitor.best()
                );
                self.diverged = true;
                Ok(true)
            }
        }
    }

    pub fn finish(self, iterations: usize, converged: bool) -> DriverRun {
        DriverRun {
            x: self.x,
            iterations,
            converged,
            diverged: self.diverged,
            history: self.monitor.into_history(),
        }
    }
}

/// Solve one SRR pass warm-started from `x0`.
pub fn reconstruct(
    system: &SliceSystem,
    x0: &Volume,
    settings: &SolveSettings,
    loss: &DataLossConfig,
    cancel: &CancellationToken,
) -> Result<SolveOutcome> {
    if system.voxels() != x0.len() {
        return Err(SrrError::geometry(format!(
            "system has {} unknowns, volume has {} voxels",
            system.voxels(),
            x0.len()
        )));
    }
    if system.is_empty() {
        return Err(SrrError::geometry("no masked slice pixel observes the volume"));
    }
    cancel.check()?;

    let regularizer = Regularizer::new(settings.kind, x0.size, &x0.geometry, settings.huber_gamma);
    let problem = Problem {
        system,
        regularizer: &regularizer,
        loss: *loss,
        alpha: settings.alpha,
    };
    let initial = problem.evaluate(&x0.data);

    let run = match settings.solver {
        SolverKind::Lsmr => tikhonov::solve(&problem, &x0.data, settings, cancel)?,
        SolverKind::Admm => admm::solve(&problem, &x0.data, settings, initial.total, cancel)?,
        SolverKind::PrimalDual(variant) => {
            primal_dual::solve(&problem, &x0.data, settings, variant, initial.total, cancel)?
        }
    };

    let mut x = run.x;
    if settings.clip_negative {
        x.iter_mut().for_each(|v| *v = v.max(0.0));
    }
    let final_value = problem.evaluate(&x);
    debug!(
        "solver {}: {} iterations, objective {:.6e} -> {:.6e}",
        settings.solver.name(),
        run.iterations,
        initial.total,
        final_value.total
    );

    Ok(SolveOutcome {
        volume: x0.with_data(x),
        report: SolveReport {
            solver: settings.solver.name().to_string(),
            regularization: settings.kind.name().to_string(),
            alpha: settings.alpha,
            iterations: run.iterations,
            converged: run.converged,
            diverged: run.diverged,
            initial,
            final_value,
            history: run.history,
        },
    })
}
