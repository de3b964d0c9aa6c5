//! Stacked slice system `A = [A_1; …; A_K]` and its augmented variants.
//!
//! Forward sweeps write each slice's rows into a disjoint chunk of the output
//! in parallel; adjoint sweeps accumulate per-thread partial volumes that are
//! merged by summation.

use crate::operator::SliceOperator;
use crate::regularizer::Regularizer;
use rayon::prelude::*;

/// Matrix-free linear map used by the least-squares kernels.
pub trait LinearOperator: Sync {
    fn rows(&self) -> usize;
    fn cols(&self) -> usize;
    /// `out = M x`
    fn apply(&self, x: &[f64], out: &mut [f64]);
    /// `out = Mᵀ y`
    fn apply_adjoint(&self, y: &[f64], out: &mut [f64]);
}

/// All prepared slices of one reconstruction pass.
#[derive(Clone, Debug)]
pub struct SliceSystem {
    ops: Vec<SliceOperator>,
    offsets: Vec<usize>,
    voxels: usize,
    observed: Vec<f64>,
}

impl SliceSystem {
    pub fn new(ops: Vec<SliceOperator>, voxels: usize) -> Self {
        let mut offsets = Vec::with_capacity(ops.len() + 1);
        offsets.push(0);
        let mut observed = Vec::new();
        for op in &ops {
            observed.extend_from_slice(op.observed());
            offsets.push(observed.len());
        }
        Self {
            ops,
            offsets,
            voxels,
            observed,
        }
    }

    pub fn operators(&self) -> &[SliceOperator] {
        &self.ops
    }

    pub fn voxels(&self) -> usize {
        self.voxels
    }

    /// Stacked observations `y` over all masked pixels.
    pub fn observed(&self) -> &[f64] {
        &self.observed
    }

    pub fn is_empty(&self) -> bool {
        self.observed.is_empty()
    }

    pub fn forward(&self, x: &[f64], out: &mut [f64]) {
        debug_assert_eq!(out.len(), self.observed.len());
        let mut chunks = Vec::with_capacity(self.ops.len());
        let mut rest: &mut [f64] = out;
        for op in &self.ops {
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(op.rows());
            chunks.push(head);
            rest = tail;
        }
        self.ops
            .par_iter()
            .zip(chunks.into_par_iter())
            .for_each(|(op, chunk)| op.forward(x, chunk));
    }

    pub fn adjoint(&self, r: &[f64], out: &mut [f64]) {
        debug_assert_eq!(r.len(), self.observed.len());
        let n = self.voxels;
        let sum = self
            .ops
            .par_iter()
            .enumerate()
            .fold(
                || vec![0.0; n],
                |mut acc, (i, op)| {
                    op.adjoint_accumulate(&r[self.offsets[i]..self.offsets[i + 1]], &mut acc);
                    acc
                },
            )
            .reduce(
                || vec![0.0; n],
                |mut a, b| {
                    a.iter_mut().zip(&b).for_each(|(x, y)| *x += y);
                    a
                },
            );
        out.copy_from_slice(&sum);
    }

    /// `y − A x`
    pub fn residual(&self, x: &[f64]) -> Vec<f64> {
        let mut ax = vec![0.0; self.observed.len()];
        self.forward(x, &mut ax);
        self.observed
            .iter()
            .zip(&ax)
            .map(|(y, a)| y - a)
            .collect()
    }
}

impl LinearOperator for SliceSystem {
    fn rows(&self) -> usize {
        self.observed.len()
    }

    fn cols(&self) -> usize {
        self.voxels
    }

    fn apply(&self, x: &[f64], out: &mut [f64]) {
        self.forward(x, out)
    }

    fn apply_adjoint(&self, y: &[f64], out: &mut [f64]) {
        self.adjoint(y, out)
    }
}

/// `[diag(√w) A; s K]`, the row-weighted data block optionally stacked on a
/// scaled penalty block.
pub struct AugmentedOperator<'a> {
    system: &'a SliceSystem,
    sqrt_weights: Option<&'a [f64]>,
    penalty: Option<(&'a Regularizer, f64)>,
}

impl<'a> AugmentedOperator<'a> {
    pub fn new(system: &'a SliceSystem) -> Self {
        Self {
            system,
            sqrt_weights: None,
            penalty: None,
        }
    }

    pub fn with_weights(mut self, sqrt_weights: Option<&'a [f64]>) -> Self {
        self.sqrt_weights = sqrt_weights;
        self
    }

    pub fn with_penalty(mut self, regularizer: &'a Regularizer, scale: f64) -> Self {
        self.penalty = Some((regularizer, scale));
        self
    }

    fn data_rows(&self) -> usize {
        self.system.observed.len()
    }

    /// Apply the row weights to a data-space vector in place.
    pub fn weigh(&self, v: &mut [f64]) {
        if let Some(w) = self.sqrt_weights {
            v.iter_mut().zip(w).for_each(|(x, s)| *x *= s);
        }
    }
}

impl LinearOperator for AugmentedOperator<'_> {
    fn rows(&self) -> usize {
        self.data_rows() + self.penalty.map_or(0, |(r, _)| r.dual_len())
    }

    fn cols(&self) -> usize {
        self.system.voxels
    }

    fn apply(&self, x: &[f64], out: &mut [f64]) {
        let (data, pen) = out.split_at_mut(self.data_rows());
        self.system.forward(x, data);
        self.weigh(data);
        if let Some((reg, s)) = self.penalty {
            reg.apply_k(x, pen);
            pen.iter_mut().for_each(|v| *v *= s);
        }
    }

    fn apply_adjoint(&self, y: &[f64], out: &mut [f64]) {
        let (data, pen) = y.split_at(self.data_rows());
        match self.sqrt_weights {
            Some(_) => {
                let mut weighted = data.to_vec();
                self.weigh(&mut weighted);
                self.system.adjoint(&weighted, out);
            }
            None => self.system.adjoint(data, out),
        }
        if let Some((reg, s)) = self.penalty {
            let mut kt = vec![0.0; out.len()];
            reg.apply_kt(pen, &mut kt);
            out.iter_mut().zip(&kt).for_each(|(o, v)| *o += s * v);
        }
    }
}
