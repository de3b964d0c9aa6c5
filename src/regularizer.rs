//! Regularization terms `α R(K x)` and their proximal maps.
//!
//! | kind    | K        | R(v)                      |
//! |---------|----------|---------------------------|
//! | TK0L2   | identity | ½ ‖v‖²                    |
//! | TK1L2   | ∇        | ½ ‖v‖²                    |
//! | TVL2    | ∇        | Σ_n ‖v_n‖₂ (isotropic)    |
//! | HuberL2 | ∇        | Σ_n h_ε(‖v_n‖₂)           |
//!
//! `∇` uses forward differences in physical units with a Neumann boundary
//! (the last difference along each axis is zero). Gradient components are
//! stored axis-major: `v[a · N + n]`.

use crate::image::Geometry;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegularizationKind {
    #[serde(rename = "TK0L2", alias = "TK0")]
    Tk0L2,
    #[serde(rename = "TK1L2", alias = "TK1")]
    Tk1L2,
    #[serde(rename = "TVL2", alias = "TV")]
    TvL2,
    #[serde(rename = "HuberL2", alias = "huber")]
    HuberL2,
}

impl RegularizationKind {
    pub fn name(self) -> &'static str {
        match self {
            RegularizationKind::Tk0L2 => "TK0L2",
            RegularizationKind::Tk1L2 => "TK1L2",
            RegularizationKind::TvL2 => "TVL2",
            RegularizationKind::HuberL2 => "HuberL2",
        }
    }
}

/// Forward-difference gradient on a 3D grid.
#[derive(Clone, Debug)]
pub struct GradientOperator {
    size: [usize; 3],
    inv_spacing: [f64; 3],
}

impl GradientOperator {
    pub fn new(size: [usize; 3], geometry: &Geometry) -> Self {
        Self {
            size,
            inv_spacing: [
                1.0 / geometry.spacing[0],
                1.0 / geometry.spacing[1],
                1.0 / geometry.spacing[2],
            ],
        }
    }

    fn voxels(&self) -> usize {
        self.size.iter().product()
    }

    fn strides(&self) -> [usize; 3] {
        [1, self.size[0], self.size[0] * self.size[1]]
    }

    /// `out = ∇x`, `out.len() == 3 N`.
    pub fn apply(&self, x: &[f64], out: &mut [f64]) {
        let n_vox = self.voxels();
        let strides = self.strides();
        let [nx, ny, nz] = self.size;
        for a in 0..3 {
            let h = self.inv_spacing[a];
            let s = strides[a];
            let dst = &mut out[a * n_vox..(a + 1) * n_vox];
            for k in 0..nz {
                for j in 0..ny {
                    for i in 0..nx {
                        let n = i + nx * (j + ny * k);
                        let last = match a {
                            0 => i + 1 == nx,
                            1 => j + 1 == ny,
                            _ => k + 1 == nz,
                        };
                        dst[n] = if last { 0.0 } else { (x[n + s] - x[n]) * h };
                    }
                }
            }
        }
    }

    /// `out = ∇ᵀ p` (negative divergence).
    pub fn adjoint(&self, p: &[f64], out: &mut [f64]) {
        let n_vox = self.voxels();
        let strides = self.strides();
        let [nx, ny, nz] = self.size;
        out.iter_mut().for_each(|v| *v = 0.0);
        for a in 0..3 {
            let h = self.inv_spacing[a];
            let s = strides[a];
            let src = &p[a * n_vox..(a + 1) * n_vox];
            for k in 0..nz {
                for j in 0..ny {
                    for i in 0..nx {
                        let n = i + nx * (j + ny * k);
                        let last = match a {
                            0 => i + 1 == nx,
                            1 => j + 1 == ny,
                            _ => k + 1 == nz,
                        };
                        if !last {
                            out[n] -= src[n] * h;
                            out[n + s] += src[n] * h;
                        }
                    }
                }
            }
        }
    }

    /// Upper bound of `‖∇‖²`.
    pub fn norm_sq_bound(&self) -> f64 {
        4.0 * self.inv_spacing.iter().map(|h| h * h).sum::<f64>()
    }
}

#[derive(Clone, Debug)]
enum PenaltyOperator {
    Identity(usize),
    Gradient(GradientOperator),
}

/// A regularizer bound to a reconstruction grid.
#[derive(Clone, Debug)]
pub struct Regularizer {
    kind: RegularizationKind,
    op: PenaltyOperator,
    huber_gamma: f64,
}

impl Regularizer {
    pub fn new(
        kind: RegularizationKind,
        size: [usize; 3],
        geometry: &Geometry,
        huber_gamma: f64,
    ) -> Self {
        let op = match kind {
            RegularizationKind::Tk0L2 => PenaltyOperator::Identity(size.iter().product()),
            _ => PenaltyOperator::Gradient(GradientOperator::new(size, geometry)),
        };
        Self {
            kind,
            op,
            huber_gamma,
        }
    }

    pub fn kind(&self) -> RegularizationKind {
        self.kind
    }

    /// Length of `K x`.
    pub fn dual_len(&self) -> usize {
        match &self.op {
            PenaltyOperator::Identity(n) => *n,
            PenaltyOperator::Gradient(g) => 3 * g.voxels(),
        }
    }

    pub fn apply_k(&self, x: &[f64], out: &mut [f64]) {
        match &self.op {
            PenaltyOperator::Identity(_) => out.copy_from_slice(x),
            PenaltyOperator::Gradient(g) => g.apply(x, out),
        }
    }

    pub fn apply_kt(&self, p: &[f64], out: &mut [f64]) {
        match &self.op {
            PenaltyOperator::Identity(_) => out.copy_from_slice(p),
            PenaltyOperator::Gradient(g) => g.adjoint(p, out),
        }
    }

    /// Upper bound of `‖K‖²`.
    pub fn k_norm_sq(&self) -> f64 {
        match &self.op {
            PenaltyOperator::Identity(_) => 1.0,
            PenaltyOperator::Gradient(g) => g.norm_sq_bound(),
        }
    }

    fn group_len(&self) -> usize {
        match &self.op {
            PenaltyOperator::Identity(n) => *n,
            PenaltyOperator::Gradient(g) => g.voxels(),
        }
    }

    /// Euclidean norm of group `n` of `v` (one voxel's gradient vector).
    #[inline]
    fn group_norm(&self, v: &[f64], n: usize, groups: usize) -> f64 {
        (0..3)
            .map(|a| v[a * groups + n] * v[a * groups + n])
            .sum::<f64>()
            .sqrt()
    }

    fn scale_group(v: &mut [f64], n: usize, groups: usize, factor: f64) {
        for a in 0..3 {
            v[a * groups + n] *= factor;
        }
    }

    /// `R(v)` for `v = K x`.
    pub fn value(&self, kx: &[f64]) -> f64 {
        match self.kind {
            RegularizationKind::Tk0L2 | RegularizationKind::Tk1L2 => {
                0.5 * kx.iter().map(|v| v * v).sum::<f64>()
            }
            RegularizationKind::TvL2 => {
                let groups = self.group_len();
                (0..groups).map(|n| self.group_norm(kx, n, groups)).sum()
            }
            RegularizationKind::HuberL2 => {
                let groups = self.group_len();
                let eps = self.huber_gamma;
                (0..groups)
                    .map(|n| {
                        let t = self.group_norm(kx, n, groups);
                        if t <= eps {
                            t * t / (2.0 * eps)
                        } else {
                            t - 0.5 * eps
                        }
                    })
                    .sum()
            }
        }
    }

    /// In-place `p ← prox_{σ (α R)*}(p)`.
    pub fn prox_conjugate(&self, p: &mut [f64], sigma: f64, alpha: f64) {
        if alpha <= 0.0 {
            p.iter_mut().for_each(|v| *v = 0.0);
            return;
        }
        match self.kind {
            RegularizationKind::Tk0L2 | RegularizationKind::Tk1L2 => {
                let f = 1.0 / (1.0 + sigma / alpha);
                p.iter_mut().for_each(|v| *v *= f);
            }
            RegularizationKind::TvL2 | RegularizationKind::HuberL2 => {
                let shrink = if self.kind == RegularizationKind::HuberL2 {
                    1.0 / (1.0 + sigma * self.huber_gamma / alpha)
                } else {
                    1.0
                };
                let groups = self.group_len();
                for n in 0..groups {
                    let m = self.group_norm(p, n, groups) * shrink;
                    let factor = shrink / (m / alpha).max(1.0);
                    Self::scale_group(p, n, groups, factor);
                }
            }
        }
    }

    /// In-place `v ← prox_{λ R}(v)`.
    pub fn prox(&self, v: &mut [f64], lambda: f64) {
        if lambda <= 0.0 {
            return;
        }
        match self.kind {
            RegularizationKind::Tk0L2 | RegularizationKind::Tk1L2 => {
                let f = 1.0 / (1.0 + lambda);
                v.iter_mut().for_each(|x| *x *= f);
            }
            RegularizationKind::TvL2 => {
                let groups = self.group_len();
                for n in 0..groups {
                    let m = self.group_norm(v, n, groups);
                    let factor = if m > lambda { 1.0 - lambda / m } else { 0.0 };
                    Self::scale_group(v, n, groups, factor);
                }
            }
            RegularizationKind::HuberL2 => {
                let eps = self.huber_gamma;
                let groups = self.group_len();
                for n in 0..groups {
                    let m = self.group_norm(v, n, groups);
                    let factor = if m > eps + lambda {
                        1.0 - lambda / m
                    } else {
                        eps / (eps + lambda)
                    };
                    Self::scale_group(v, n, groups, factor);
                }
            }
        }
    }

    /// Strong-convexity modulus of `(α R)*`; zero for TV.
    pub fn conjugate_convexity(&self, alpha: f64) -> f64 {
        if alpha <= 0.0 {
            return 0.0;
        }
        match self.kind {
            RegularizationKind::Tk0L2 | RegularizationKind::Tk1L2 => 1.0 / alpha,
            RegularizationKind::HuberL2 => self.huber_gamma / alpha,
            RegularizationKind::TvL2 => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn grid() -> ([usize; 3], Geometry) {
        (
            [4, 3, 5],
            Geometry::new(
                Vector3::zeros(),
                Vector3::new(1.0, 2.0, 0.5),
                nalgebra::Matrix3::identity(),
            ),
        )
    }

    #[test]
    fn gradient_adjoint_identity() {
        let (size, geometry) = grid();
        let g = GradientOperator::new(size, &geometry);
        let n = 60;
        let x: Vec<f64> = (0..n).map(|i| ((i * 13) % 7) as f64 - 2.0).collect();
        let p: Vec<f64> = (0..3 * n).map(|i| ((i * 5) % 9) as f64 * 0.25 - 1.0).collect();
        let mut gx = vec![0.0; 3 * n];
        g.apply(&x, &mut gx);
        let mut gtp = vec![0.0; n];
        g.adjoint(&p, &mut gtp);
        let lhs: f64 = gx.iter().zip(&p).map(|(a, b)| a * b).sum();
        let rhs: f64 = x.iter().zip(&gtp).map(|(a, b)| a * b).sum();
        assert!((lhs - rhs).abs() < 1e-10);
    }

    #[test]
    fn tv_prox_shrinks_small_gradients_to_zero() {
        let (size, geometry) = grid();
        let reg = Regularizer::new(RegularizationKind::TvL2, size, &geometry, 0.1);
        let mut v = vec![0.05; reg.dual_len()];
        v[0] = 3.0;
        reg.prox(&mut v, 0.5);
        assert!(v[1].abs() < 1e-12);
        assert!((v[0] - 3.0 * (1.0 - 0.5 / (9.0f64 + 0.05 * 0.05 * 2.0).sqrt())).abs() < 1e-9);
    }

    #[test]
    fn conjugate_prox_projects_onto_alpha_ball() {
        let (size, geometry) = grid();
        let reg = Regularizer::new(RegularizationKind::TvL2, size, &geometry, 0.1);
        let mut p = vec![2.0; reg.dual_len()];
        reg.prox_conjugate(&mut p, 1.0, 0.3);
        let groups = 60;
        for n in 0..groups {
            assert!(reg.group_norm(&p, n, groups) <= 0.3 + 1e-12);
        }
    }
}
