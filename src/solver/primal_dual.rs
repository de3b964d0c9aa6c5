//! First-order primal-dual iterations (Chambolle & Pock, 2011) for
//! `min_x G(x) + F(K x)` with `G` the data term and `F = α R`.
//!
//! The dual step uses the closed-form prox of `F*`; the primal prox of `τ G`
//! is a damped least-squares problem solved by LSMR.

use super::lsmr::lsmr;
use super::objective::{relative_step, Problem};
use super::system::AugmentedOperator;
use super::{BestIterate, DriverRun, PrimalDualVariant, SolveSettings};
use crate::cancel::CancellationToken;
use crate::error::Result;
use log::debug;

/// Step sizes and extrapolation weight of one iteration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Steps {
    pub tau: f64,
    pub sigma: f64,
    pub theta: f64,
}

impl Steps {
    /// Initial steps; `l2` bounds `‖K‖²`, `delta` is the strong-convexity
    /// modulus of `F*`.
    pub fn initial(variant: PrimalDualVariant, l2: f64, gamma: f64, delta: f64) -> Self {
        let l = l2.sqrt();
        match variant {
            PrimalDualVariant::Alg2 => Self {
                tau: 1.0 / l,
                sigma: 1.0 / l,
                theta: 1.0,
            },
            PrimalDualVariant::Alg2Ahmod => {
                if gamma > 0.0 {
                    let tau = 0.02;
                    Self {
                        tau,
                        sigma: 4.0 / (l2 * tau),
                        theta: 0.0,
                    }
                } else {
                    Self {
                        tau: 1.0 / l,
                        sigma: 1.0 / l,
                        theta: 0.0,
                    }
                }
            }
            PrimalDualVariant::Alg3 => {
                let mu = 2.0 * (gamma * delta).sqrt() / l;
                Self {
                    tau: mu / (2.0 * gamma),
                    sigma: mu / (2.0 * delta),
                    theta: 1.0 / (1.0 + mu),
                }
            }
        }
    }

    /// Step adaptation after a primal update.
    pub fn advance(&mut self, variant: PrimalDualVariant, gamma: f64) {
        if variant == PrimalDualVariant::Alg3 || gamma <= 0.0 {
            return;
        }
        let theta = 1.0 / (1.0 + 2.0 * gamma * self.tau).sqrt();
        self.tau *= theta;
        self.sigma /= theta;
        self.theta = match variant {
            PrimalDualVariant::Alg2Ahmod => 0.0,
            _ => theta,
        };
    }
}

pub(super) fn solve(
    problem: &Problem<'_>,
    x0: &[f64],
    settings: &SolveSettings,
    variant: PrimalDualVariant,
    initial: f64,
    cancel: &CancellationToken,
) -> Result<DriverRun> {
    let reg = problem.regularizer;
    let gamma = settings.pd_gamma;
    let mut steps = Steps::initial(
        variant,
        reg.k_norm_sq(),
        gamma,
        reg.conjugate_convexity(problem.alpha),
    );

    let n = x0.len();
    let mut x = x0.to_vec();
    let mut x_bar = x.clone();
    let mut p = vec![0.0; reg.dual_len()];
    let mut k_buf = vec![0.0; reg.dual_len()];
    let mut kt_buf = vec![0.0; n];
    let mut residual = problem.system.residual(&x);

    let mut best = BestIterate::new(settings.divergence, x0, initial);
    let mut converged = false;
    let mut iterations = 0;

    for it in 1..=settings.iterations {
        cancel.check()?;
        iterations = it;

        // dual: p ← prox_{σF*}(p + σ K x̄)
        reg.apply_k(&x_bar, &mut k_buf);
        p.iter_mut()
            .zip(&k_buf)
            .for_each(|(pi, k)| *pi += steps.sigma * k);
        reg.prox_conjugate(&mut p, steps.sigma, problem.alpha);

        // primal: x ← prox_{τG}(x − τ Kᵀ p)
        reg.apply_kt(&p, &mut kt_buf);
        let v: Vec<f64> = x
            .iter()
            .zip(&kt_buf)
            .map(|(xi, k)| xi - steps.tau * k)
            .collect();
        let sqrt_w = problem.sqrt_weights(&residual);
        let op = AugmentedOperator::new(problem.system).with_weights(sqrt_w.as_deref());
        let mut rhs = problem.system.residual(&v);
        op.weigh(&mut rhs);
        let damp = 1.0 / steps.tau.sqrt();
        let dx = lsmr(&op, &rhs, &settings.lsmr_options(damp)).x;
        let x_new: Vec<f64> = v.iter().zip(&dx).map(|(a, d)| a + d).collect();

        steps.advance(variant, gamma);
        for i in 0..n {
            x_bar[i] = x_new[i] + steps.theta * (x_new[i] - x[i]);
        }
        let change = relative_step(&x_new, &x);
        x = x_new;

        residual = problem.system.residual(&x);
        let objective = problem.evaluate_with_residual(&x, &residual).total;
        debug!(
            "PD it {it}: objective {objective:.6e}, step {change:.3e}, tau {:.3e}, sigma {:.3e}",
            steps.tau, steps.sigma
        );

        if best.record(it, objective, &x)? {
            break;
        }
        if change < settings.tolerance {
            converged = true;
            break;
        }
    }

    Ok(best.finish(iterations, converged))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alg2_steps_satisfy_the_coupling_bound() {
        let l2 = 12.0;
        let mut s = Steps::initial(PrimalDualVariant::Alg2, l2, 0.0, 0.0);
        assert!((s.tau * s.sigma * l2 - 1.0).abs() < 1e-12);
        s.advance(PrimalDualVariant::Alg2, 0.0);
        assert_eq!(s.theta, 1.0);

        let mut acc = Steps::initial(PrimalDualVariant::Alg2, l2, 0.7, 0.0);
        let product = acc.tau * acc.sigma;
        acc.advance(PrimalDualVariant::Alg2, 0.7);
        assert!(acc.theta < 1.0);
        assert!((acc.tau * acc.sigma - product).abs() < 1e-12);
    }

    #[test]
    fn alg3_uses_constant_extrapolation() {
        let mut s = Steps::initial(PrimalDualVariant::Alg3, 4.0, 0.5, 2.0);
        let before = s;
        s.advance(PrimalDualVariant::Alg3, 0.5);
        assert_eq!(s, before);
        assert!(s.theta > 0.0 && s.theta < 1.0);
        assert!(s.tau * s.sigma * 4.0 <= 1.0 + 1e-12);
    }

    #[test]
    fn ahmod_never_extrapolates() {
        let mut s = Steps::initial(PrimalDualVariant::Alg2Ahmod, 4.0, 0.3, 0.0);
        assert_eq!(s.theta, 0.0);
        s.advance(PrimalDualVariant::Alg2Ahmod, 0.3);
        assert_eq!(s.theta, 0.0);
    }
}
