//! Direct LSMR solve of the Tikhonov-regularized stacked system.
//!
//! From a warm start `x0` the update `dx` solves
//! `[A; √α K] dx ≈ [y − A x0; −√α K x0]`, so `x0 + dx` minimizes
//! `½‖y − A x‖² + α ½‖K x‖²` over the LSMR Krylov space.

use super::lsmr::lsmr;
use super::objective::Problem;
use super::system::AugmentedOperator;
use super::{DriverRun, SolveSettings};
use crate::cancel::CancellationToken;
use crate::error::Result;

pub(super) fn solve(
    problem: &Problem<'_>,
    x0: &[f64],
    settings: &SolveSettings,
    cancel: &CancellationToken,
) -> Result<DriverRun> {
    cancel.check()?;
    let initial = problem.evaluate(x0).total;

    let mut rhs = problem.system.residual(x0);
    let mut op = AugmentedOperator::new(problem.system);
    if problem.alpha > 0.0 {
        let scale = problem.alpha.sqrt();
        let reg = problem.regularizer;
        let mut kx = vec![0.0; reg.dual_len()];
        reg.apply_k(x0, &mut kx);
        rhs.extend(kx.iter().map(|v| -scale * v));
        op = op.with_penalty(reg, scale);
    }

    let out = lsmr(&op, &rhs, &settings.lsmr_options(0.0));
    let x: Vec<f64> = x0.iter().zip(&out.x).map(|(a, d)| a + d).collect();
    let objective = problem.evaluate(&x).total;

    Ok(DriverRun {
        x,
        iterations: out.iterations,
        converged: out.stop.converged(),
        diverged: false,
        history: vec![initial, objective],
    })
}
