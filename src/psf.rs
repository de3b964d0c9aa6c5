//! Oriented Gaussian point-spread function of a slice acquisition.
//!
//! In the slice frame the PSF is an axis-aligned Gaussian whose FWHM equals
//! the in-plane spacing along x/y and the slice thickness along z. It is
//! rotated into reconstruction space by the slice transform and expressed in
//! voxel-index units of the target volume, where it becomes a set of
//! normalized resampling weights around each slice pixel.

use crate::error::{Result, SrrError};
use crate::image::Geometry;
use crate::transform::Transform;
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// `FWHM = 2 sqrt(2 ln 2) σ`
const FWHM_TO_SIGMA: f64 = 0.424_660_900_144_009_5;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PsfConfig {
    /// Kernel truncation radius in standard deviations.
    pub cutoff: f64,
}

impl Default for PsfConfig {
    fn default() -> Self {
        Self { cutoff: 3.0 }
    }
}

/// PSF covariance in reconstruction (physical) space.
pub fn physical_covariance(slice_geometry: &Geometry, transform: &Transform) -> Matrix3<f64> {
    let sigma = slice_geometry.spacing * FWHM_TO_SIGMA;
    let cov_slice = Matrix3::from_diagonal(&sigma.component_mul(&sigma));
    let r = transform.linear() * slice_geometry.direction;
    r * cov_slice * r.transpose()
}

/// Truncated Gaussian kernel in voxel-index coordinates of a target grid.
#[derive(Clone, Debug)]
pub struct PsfKernel {
    precision: Matrix3<f64>,
    half_extent: Vector3<f64>,
    cutoff_sq: f64,
}

impl PsfKernel {
    pub fn new(
        slice_geometry: &Geometry,
        transform: &Transform,
        volume_geometry: &Geometry,
        config: &PsfConfig,
    ) -> Result<Self> {
        let cov = physical_covariance(slice_geometry, transform);
        let m = Matrix3::from_diagonal(&volume_geometry.spacing.map(|s| 1.0 / s))
            * volume_geometry.direction.transpose();
        Self::from_index_covariance(m * cov * m.transpose(), config.cutoff)
    }

    pub fn from_index_covariance(cov: Matrix3<f64>, cutoff: f64) -> Result<Self> {
        if cutoff.is_nan() || cutoff <= 0.0 {
            return Err(SrrError::config("psf.cutoff", "must be positive"));
        }
        let precision = cov
            .try_inverse()
            .ok_or_else(|| SrrError::geometry("PSF covariance is singular"))?;
        let half_extent = Vector3::new(
            cutoff * cov[(0, 0)].max(0.0).sqrt(),
            cutoff * cov[(1, 1)].max(0.0).sqrt(),
            cutoff * cov[(2, 2)].max(0.0).sqrt(),
        );
        Ok(Self {
            precision,
            half_extent,
            cutoff_sq: cutoff * cutoff,
        })
    }

    /// Fill `out` with `(voxel index, weight)` pairs for a kernel centered at
    /// the continuous index `center`. Weights are normalized over the voxels
    /// inside the grid; `out` stays empty when the kernel misses the grid.
    pub fn weights(&self, center: &Vector3<f64>, size: [usize; 3], out: &mut Vec<(u32, f64)>) {
        out.clear();
        let mut lo = [0isize; 3];
        let mut hi = [0isize; 3];
        let mut fallback = false;
        for a in 0..3 {
            let l = (center[a] - self.half_extent[a]).ceil();
            let h = (center[a] + self.half_extent[a]).floor();
            if l > h {
                fallback = true;
                lo[a] = center[a].round() as isize;
                hi[a] = lo[a];
            } else {
                lo[a] = l as isize;
                hi[a] = h as isize;
            }
            lo[a] = lo[a].max(0);
            hi[a] = hi[a].min(size[a] as isize - 1);
            if lo[a] > hi[a] {
                return;
            }
        }

        let mut total = 0.0;
        for k in lo[2]..=hi[2] {
            for j in lo[1]..=hi[1] {
                for i in lo[0]..=hi[0] {
                    let d = Vector3::new(i as f64, j as f64, k as f64) - center;
                    let q = d.dot(&(self.precision * d));
                    if q > self.cutoff_sq && !fallback {
                        continue;
                    }
                    let w = (-0.5 * q).exp();
                    if w <= 0.0 {
                        continue;
                    }
                    let n = i as usize + size[0] * (j as usize + size[1] * k as usize);
                    out.push((n as u32, w));
                    total += w;
                }
            }
        }
        if total <= 0.0 {
            out.clear();
            return;
        }
        for (_, w) in out.iter_mut() {
            *w /= total;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covariance_follows_thickness_and_rotation() {
        let slice = Geometry::new(
            Vector3::zeros(),
            Vector3::new(1.0, 1.0, 4.0),
            Matrix3::identity(),
        );
        let cov = physical_covariance(&slice, &Transform::default());
        let sz = 4.0 * FWHM_TO_SIGMA;
        assert!((cov[(2, 2)] - sz * sz).abs() < 1e-12);

        let quarter = Transform::euler_3d(
            [std::f64::consts::FRAC_PI_2, 0.0, 0.0],
            [0.0; 3],
            Vector3::zeros(),
        );
        let rotated = physical_covariance(&slice, &quarter);
        assert!((rotated[(1, 1)] - sz * sz).abs() < 1e-9);
    }

    #[test]
    fn weights_are_normalized_inside_the_grid() {
        let kernel = PsfKernel::from_index_covariance(Matrix3::identity() * 0.5, 3.0).unwrap();
        let mut out = Vec::new();
        kernel.weights(&Vector3::new(0.2, 3.0, 3.0), [8, 8, 8], &mut out);
        let total: f64 = out.iter().map(|(_, w)| w).sum();
        assert!((total - 1.0).abs() < 1e-12);
        kernel.weights(&Vector3::new(-20.0, 3.0, 3.0), [8, 8, 8], &mut out);
        assert!(out.is_empty());
    }
}
