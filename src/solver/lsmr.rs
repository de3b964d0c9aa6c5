//! LSMR (Fong & Saunders, 2011) for `min ‖M x − b‖² + d² ‖x‖²`.
//!
//! Stopping rules follow the reference implementation: `atol`/`btol` bound the
//! relative residual and the normal-equation residual, `conlim` bounds the
//! condition estimate.

use super::system::LinearOperator;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LsmrOptions {
    pub damp: f64,
    pub atol: f64,
    pub btol: f64,
    pub conlim: f64,
    pub max_iter: usize,
}

impl Default for LsmrOptions {
    fn default() -> Self {
        Self {
            damp: 0.0,
            atol: 1e-6,
            btol: 1e-6,
            conlim: 1e8,
            max_iter: 10,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LsmrStop {
    /// `b = 0`, `x = 0` is exact.
    ZeroRhs,
    /// `‖r‖` small relative to `‖b‖`.
    Compatible,
    /// Least-squares optimality reached.
    LeastSquares,
    /// Condition estimate exceeded `conlim`.
    IllConditioned,
    /// Hit machine precision on one of the tests.
    Precision,
    IterationLimit,
}

impl LsmrStop {
    pub fn converged(self) -> bool {
        !matches!(self, LsmrStop::IterationLimit | LsmrStop::IllConditioned)
    }
}

#[derive(Clone, Debug)]
pub struct LsmrOutcome {
    pub x: Vec<f64>,
    pub iterations: usize,
    pub stop: LsmrStop,
    /// Estimate of `‖[M; d I] x − [b; 0]‖`.
    pub residual_norm: f64,
}

fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Stable Givens rotation `(c, s, r)` with `r = √(a² + b²)`.
fn sym_ortho(a: f64, b: f64) -> (f64, f64, f64) {
    if b == 0.0 {
        (sign(a), 0.0, a.abs())
    } else if a == 0.0 {
        (0.0, sign(b), b.abs())
    } else if b.abs() > a.abs() {
        let tau = a / b;
        let s = sign(b) / (1.0 + tau * tau).sqrt();
        let c = s * tau;
        (c, s, b / s)
    } else {
        let tau = b / a;
        let c = sign(a) / (1.0 + tau * tau).sqrt();
        let s = c * tau;
        (c, s, a / c)
    }
}

fn sign(v: f64) -> f64 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

pub fn lsmr<M: LinearOperator + ?Sized>(op: &M, b: &[f64], opts: &LsmrOptions) -> LsmrOutcome {
    let n = op.cols();
    let damp = opts.damp;
    let mut x = vec![0.0; n];

    let mut u = b.to_vec();
    let norm_b = norm(&u);
    let mut beta = norm_b;
    let mut v = vec![0.0; n];
    let mut alpha = 0.0;
    if beta > 0.0 {
        u.iter_mut().for_each(|e| *e /= beta);
        op.apply_adjoint(&u, &mut v);
        alpha = norm(&v);
    }
    if alpha > 0.0 {
        v.iter_mut().for_each(|e| *e /= alpha);
    }

    if alpha * beta == 0.0 {
        return LsmrOutcome {
            x,
            iterations: 0,
            stop: LsmrStop::ZeroRhs,
            residual_norm: beta,
        };
    }

    let mut zetabar = alpha * beta;
    let mut alphabar = alpha;
    let mut rho = 1.0;
    let mut rhobar = 1.0;
    let mut cbar = 1.0;
    let mut sbar = 0.0;
    let mut h = v.clone();
    let mut hbar = vec![0.0; n];

    let mut betadd = beta;
    let mut betad = 0.0;
    let mut rhodold = 1.0;
    let mut tautildeold = 0.0;
    let mut thetatilde = 0.0;
    let mut zeta = 0.0;
    let mut d = 0.0;

    let mut norm_a2 = alpha * alpha;
    let mut maxrbar = 0.0f64;
    let mut minrbar = 1e100f64;
    let ctol = if opts.conlim > 0.0 { 1.0 / opts.conlim } else { 0.0 };
    let mut norm_r = beta;

    let mut av = vec![0.0; op.rows()];
    let mut atu = vec![0.0; n];
    let mut itn = 0;
    let mut stop = LsmrStop::IterationLimit;

    while itn < opts.max_iter {
        itn += 1;

        op.apply(&v, &mut av);
        u.iter_mut().zip(&av).for_each(|(ui, a)| *ui = a - alpha * *ui);
        beta = norm(&u);
        if beta > 0.0 {
            u.iter_mut().for_each(|e| *e /= beta);
            op.apply_adjoint(&u, &mut atu);
            v.iter_mut().zip(&atu).for_each(|(vi, a)| *vi = a - beta * *vi);
            alpha = norm(&v);
            if alpha > 0.0 {
                v.iter_mut().for_each(|e| *e /= alpha);
            }
        }

        let (chat, shat, alphahat) = sym_ortho(alphabar, damp);

        let rhoold = rho;
        let (c, s, r) = sym_ortho(alphahat, beta);
        rho = r;
        let thetanew = s * alpha;
        alphabar = c * alpha;

        let rhobarold = rhobar;
        let zetaold = zeta;
        let thetabar = sbar * rho;
        let rhotemp = cbar * rho;
        let (cb, sb, rb) = sym_ortho(cbar * rho, thetanew);
        cbar = cb;
        sbar = sb;
        rhobar = rb;
        zeta = cbar * zetabar;
        zetabar *= -sbar;

        let hbar_scale = thetabar * rho / (rhoold * rhobarold);
        let x_scale = zeta / (rho * rhobar);
        let h_scale = thetanew / rho;
        for i in 0..n {
            hbar[i] = h[i] - hbar_scale * hbar[i];
            x[i] += x_scale * hbar[i];
            h[i] = v[i] - h_scale * h[i];
        }

        // ‖r‖ estimate
        let betaacute = chat * betadd;
        let betacheck = -shat * betadd;
        let betahat = c * betaacute;
        betadd = -s * betaacute;

        let thetatildeold = thetatilde;
        let (ctildeold, stildeold, rhotildeold) = sym_ortho(rhodold, thetabar);
        thetatilde = stildeold * rhobar;
        rhodold = ctildeold * rhobar;
        betad = -stildeold * betad + ctildeold * betahat;

        tautildeold = (zetaold - thetatildeold * tautildeold) / rhotildeold;
        let taud = (zeta - thetatilde * tautildeold) / rhodold;
        d += betacheck * betacheck;
        norm_r = (d + (betad - taud).powi(2) + betadd * betadd).sqrt();

        // ‖M‖ and cond(M) estimates
        norm_a2 += beta * beta;
        let norm_a = norm_a2.sqrt();
        norm_a2 += alpha * alpha;

        maxrbar = maxrbar.max(rhobarold);
        if itn > 1 {
            minrbar = minrbar.min(rhobarold);
        }
        let cond_a = maxrbar.max(rhotemp) / minrbar.min(rhotemp);

        let norm_ar = zetabar.abs();
        let norm_x = norm(&x);
        let test1 = norm_r / norm_b;
        let test2 = if norm_a * norm_r != 0.0 {
            norm_ar / (norm_a * norm_r)
        } else {
            f64::INFINITY
        };
        let test3 = 1.0 / cond_a;
        let t1 = test1 / (1.0 + norm_a * norm_x / norm_b);
        let rtol = opts.btol + opts.atol * norm_a * norm_x / norm_b;

        let mut verdict = None;
        if 1.0 + test3 <= 1.0 || 1.0 + test2 <= 1.0 || 1.0 + t1 <= 1.0 {
            verdict = Some(LsmrStop::Precision);
        }
        if test3 <= ctol {
            verdict = Some(LsmrStop::IllConditioned);
        }
        if test2 <= opts.atol {
            verdict = Some(LsmrStop::LeastSquares);
        }
        if test1 <= rtol {
            verdict = Some(LsmrStop::Compatible);
        }
        if let Some(v) = verdict {
            stop = v;
            break;
        }
    }

    LsmrOutcome {
        x,
        iterations: itn,
        stop,
        residual_norm: norm_r,
    }
}
