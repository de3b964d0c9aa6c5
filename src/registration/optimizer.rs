//! Regular-step gradient descent on a 6-parameter rigid transform.
//!
//! Parameters are optimized in scaled units `q_i = θ_i s_i` so that a unit
//! change moves the samples by roughly one millimetre along every axis. The
//! step length starts at the learning rate and is relaxed whenever the
//! gradient direction reverses.

use serde::Serialize;

pub(crate) const PARAMS: usize = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    StepTooSmall,
    GradientTolerance,
    IterationLimit,
    NonFinite,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct DescentOptions {
    pub learning_rate: f64,
    pub min_step: f64,
    pub relaxation: f64,
    pub iterations: usize,
    pub gradient_tolerance: f64,
    pub fd_step: f64,
    /// Per-parameter bound `|q_i − anchor_i| <= bound_i` in scaled units.
    pub bounds: [f64; PARAMS],
    pub anchor: [f64; PARAMS],
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct DescentResult {
    pub best: [f64; PARAMS],
    pub best_value: f64,
    pub initial_value: f64,
    pub iterations: usize,
    pub last_step: f64,
    pub stop: StopReason,
}

fn clamp_to_bounds(q: &mut [f64; PARAMS], anchor: &[f64; PARAMS], bounds: &[f64; PARAMS]) {
    for i in 0..PARAMS {
        q[i] = q[i].clamp(anchor[i] - bounds[i], anchor[i] + bounds[i]);
    }
}

/// Minimize `f` from `q0`; `f` may fail, which aborts the descent.
pub(crate) fn descend<F, E>(
    q0: [f64; PARAMS],
    opts: &DescentOptions,
    mut f: F,
) -> Result<DescentResult, E>
where
    F: FnMut(&[f64; PARAMS]) -> Result<f64, E>,
{
    let initial_value = f(&q0)?;
    let mut result = DescentResult {
        best: q0,
        best_value: initial_value,
        initial_value,
        iterations: 0,
        last_step: 0.0,
        stop: StopReason::IterationLimit,
    };
    if !initial_value.is_finite() {
        result.stop = StopReason::NonFinite;
        return Ok(result);
    }

    let mut q = q0;
    let mut step = opts.learning_rate;
    let mut prev_grad: Option<[f64; PARAMS]> = None;

    for it in 0..opts.iterations {
        let mut grad = [0.0; PARAMS];
        for i in 0..PARAMS {
            let mut hi = q;
            let mut lo = q;
            hi[i] += opts.fd_step;
            lo[i] -= opts.fd_step;
            grad[i] = (f(&hi)? - f(&lo)?) / (2.0 * opts.fd_step);
        }
        let norm = grad.iter().map(|g| g * g).sum::<f64>().sqrt();
        if !norm.is_finite() {
            result.stop = StopReason::NonFinite;
            break;
        }
        if norm <= opts.gradient_tolerance {
            result.stop = StopReason::GradientTolerance;
            break;
        }
        if let Some(prev) = prev_grad {
            let dot: f64 = prev.iter().zip(&grad).map(|(a, b)| a * b).sum();
            if dot < 0.0 {
                step *= opts.relaxation;
            }
        }
        if step < opts.min_step {
            result.stop = StopReason::StepTooSmall;
            break;
        }

        let before = q;
        for i in 0..PARAMS {
            q[i] -= step * grad[i] / norm;
        }
        clamp_to_bounds(&mut q, &opts.anchor, &opts.bounds);
        result.last_step = before
            .iter()
            .zip(&q)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt();
        result.iterations = it + 1;

        let value = f(&q)?;
        if value.is_finite() && value < result.best_value {
            result.best_value = value;
            result.best = q;
        }
        prev_grad = Some(grad);
    }
    Ok(result)
}
