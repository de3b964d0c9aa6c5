//! Scaled-form ADMM with `z = K x`.

use super::lsmr::lsmr;
use super::objective::{relative_step, Problem};
use super::system::AugmentedOperator;
use super::{BestIterate, DriverRun, SolveSettings};
use crate::cancel::CancellationToken;
use crate::error::Result;
use log::debug;

pub(super) fn solve(
    problem: &Problem<'_>,
    x0: &[f64],
    settings: &SolveSettings,
    initial: f64,
    cancel: &CancellationToken,
) -> Result<DriverRun> {
    let reg = problem.regularizer;
    let rho = settings.rho;
    let sqrt_rho = rho.sqrt();
    let dual_len = reg.dual_len();

    let mut x = x0.to_vec();
    let mut kx = vec![0.0; dual_len];
    reg.apply_k(&x, &mut kx);
    let mut z = kx.clone();
    let mut u = vec![0.0; dual_len];
    let mut residual = problem.system.residual(&x);

    let mut best = BestIterate::new(settings.divergence, x0, initial);
    let mut converged = false;
    let mut iterations = 0;

    for it in 1..=settings.iterations {
        cancel.check()?;
        iterations = it;

        // x-update: min ½ Σ w r² + ρ/2 ‖K x − z + u‖²
        let sqrt_w = problem.sqrt_weights(&residual);
        let op = AugmentedOperator::new(problem.system)
            .with_weights(sqrt_w.as_deref())
            .with_penalty(reg, sqrt_rho);
        let mut rhs = residual.clone();
        op.weigh(&mut rhs);
        rhs.extend((0..dual_len).map(|n| sqrt_rho * (z[n] - u[n] - kx[n])));
        let step = lsmr(&op, &rhs, &settings.lsmr_options(0.0));
        let x_prev = x.clone();
        x.iter_mut().zip(&step.x).for_each(|(a, d)| *a += d);

        // z-update and dual ascent
        reg.apply_k(&x, &mut kx);
        for n in 0..dual_len {
            z[n] = kx[n] + u[n];
        }
        u.copy_from_slice(&z);
        reg.prox(&mut z, problem.alpha / rho);
        u.iter_mut().zip(&z).for_each(|(un, zn)| *un -= zn);

        residual = problem.system.residual(&x);
        let objective = problem.evaluate_with_residual(&x, &residual).total;
        let change = relative_step(&x, &x_prev);
        debug!("ADMM it {it}: objective {objective:.6e}, step {change:.3e}");

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
