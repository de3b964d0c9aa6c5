//! Objective tracking and divergence detection for iterative solvers.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DivergenceConfig {
    /// Consecutive increasing iterations tolerated before stopping.
    pub patience: usize,
    /// Relative increase treated as noise.
    pub rel_tolerance: f64,
}

impl Default for DivergenceConfig {
    fn default() -> Self {
        Self {
            patience: 5,
            rel_tolerance: 1e-3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    /// The current iterate is the best seen so far.
    Improved,
    /// Sustained increase; `fatal` when the increasing run began at the first
    /// iteration.
    Diverged { fatal: bool },
}

#[derive(Clone, Debug)]
pub struct ObjectiveMonitor {
    config: DivergenceConfig,
    history: Vec<f64>,
    best: f64,
    best_iteration: usize,
    run_start: usize,
    run_len: usize,
}

impl ObjectiveMonitor {
    /// `initial` is the objective at the warm start (iteration 0).
    pub fn new(config: DivergenceConfig, initial: f64) -> Self {
        Self {
            config,
            history: vec![initial],
            best: initial,
            best_iteration: 0,
            run_start: 0,
            run_len: 0,
        }
    }

    pub fn record(&mut self, iteration: usize, objective: f64) -> Verdict {
        let prev = self.history.last().copied().unwrap_or(objective);
        self.history.push(objective);

        if !objective.is_finite() {
            return Verdict::Diverged {
                fatal: iteration <= 1,
            };
        }

        let increased = objective > prev + self.config.rel_tolerance * prev.abs().max(f64::MIN_POSITIVE);
        if increased {
            if self.run_len == 0 {
                self.run_start = iteration;
            }
            self.run_len += 1;
        } else {
            self.run_len = 0;
        }

        if self.run_len >= self.config.patience.max(1) {
            return Verdict::Diverged {
                fatal: self.run_start <= 1,
            };
        }
        if objective < self.best {
            self.best = objective;
            self.best_iteration = iteration;
            Verdict::Improved
        } else {
            Verdict::Continue
        }
    }

    pub fn history(&self) -> &[f64] {
        &self.history
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    pub fn best_iteration(&self) -> usize {
        self.best_iteration
    }

    pub fn into_history(self) -> Vec<f64> {
        self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steady_decrease_never_diverges() {
        let mut m = ObjectiveMonitor::new(DivergenceConfig::default(), 10.0);
        for it in 1..=20 {
            assert_eq!(m.record(it, 10.0 / (it as f64 + 1.0)), Verdict::Improved);
        }
        assert_eq!(m.best_iteration(), 20);
    }

    #[test]
    fn late_increase_is_not_fatal() {
        let cfg = DivergenceConfig {
            patience: 3,
            rel_tolerance: 1e-3,
        };
        let mut m = ObjectiveMonitor::new(cfg, 10.0);
        m.record(1, 5.0);
        m.record(2, 4.0);
        assert_eq!(m.record(3, 6.0), Verdict::Continue);
        assert_eq!(m.record(4, 7.0), Verdict::Continue);
        assert_eq!(m.record(5, 8.0), Verdict::Diverged { fatal: false });
        assert_eq!(m.best(), 4.0);
    }

    #[test]
    fn increase_from_the_start_is_fatal() {
        let cfg = DivergenceConfig {
            patience: 2,
            rel_tolerance: 1e-3,
        };
        let mut m = ObjectiveMonitor::new(cfg, 1.0);
        m.record(1, 2.0);
        assert_eq!(m.record(2, 3.0), Verdict::Diverged { fatal: true });
    }

    #[test]
    fn noise_below_tolerance_is_ignored() {
        let cfg = DivergenceConfig {
            patience: 1,
            rel_tolerance: 1e-2,
        };
        let mut m = ObjectiveMonitor::new(cfg, 100.0);
        assert_eq!(m.record(1, 100.5), Verdict::Continue);
    }
}
