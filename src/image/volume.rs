//! 3D voxel grids positioned in physical space.
//!
//! A [`Geometry`] maps continuous voxel indices `i` to physical points via
//! `x = origin + D · diag(spacing) · i`. The direction matrix `D` is expected
//! to be orthonormal. Voxel storage is x-fastest (`i + nx (j + ny k)`).

use crate::error::{Result, SrrError};
use crate::image::Plane;
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub origin: Vector3<f64>,
    pub spacing: Vector3<f64>,
    pub direction: Matrix3<f64>,
}

impl Default for Geometry {
    fn default() -> Self {
        Self::isotropic(Vector3::zeros(), 1.0)
    }
}

impl Geometry {
    pub fn new(origin: Vector3<f64>, spacing: Vector3<f64>, direction: Matrix3<f64>) -> Self {
        Self {
            origin,
            spacing,
            direction,
        }
    }

    pub fn isotropic(origin: Vector3<f64>, spacing: f64) -> Self {
        Self::new(origin, Vector3::repeat(spacing), Matrix3::identity())
    }

    /// Rejects non-positive or non-finite spacing and degenerate directions.
    pub fn validate(&self) -> Result<()> {
        if self.spacing.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(SrrError::geometry(format!(
                "spacing must be positive, got ({:.4}, {:.4}, {:.4})",
                self.spacing[0], self.spacing[1], self.spacing[2]
            )));
        }
        if self.direction.determinant().abs() < 1e-6 {
            return Err(SrrError::geometry("direction matrix is singular"));
        }
        Ok(())
    }

    /// `D · diag(spacing)`
    pub fn index_to_physical_matrix(&self) -> Matrix3<f64> {
        self.direction * Matrix3::from_diagonal(&self.spacing)
    }

    #[inline]
    pub fn index_to_physical(&self, idx: &Vector3<f64>) -> Vector3<f64> {
        self.origin + self.direction * idx.component_mul(&self.spacing)
    }

    #[inline]
    pub fn physical_to_index(&self, p: &Vector3<f64>) -> Vector3<f64> {
        (self.direction.transpose() * (p - self.origin)).component_div(&self.spacing)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Volume<T = f64> {
    pub size: [usize; 3],
    pub geometry: Geometry,
    pub data: Vec<T>,
}

pub type VolumeMask = Volume<u8>;

impl<T: Copy + Default> Volume<T> {
    pub fn new(size: [usize; 3], geometry: Geometry) -> Self {
        Self {
            size,
            geometry,
            data: vec![T::default(); size[0] * size[1] * size[2]],
        }
    }

    pub fn from_vec(size: [usize; 3], geometry: Geometry, data: Vec<T>) -> Result<Self> {
        if data.len() != size[0] * size[1] * size[2] {
            return Err(SrrError::geometry(format!(
                "buffer of {} voxels does not match size {:?}",
                data.len(),
                size
            )));
        }
        Ok(Self {
            size,
            geometry,
            data,
        })
    }

    /// Same size and geometry, new contents.
    pub fn with_data<U: Copy + Default>(&self, data: Vec<U>) -> Volume<U> {
        debug_assert_eq!(data.len(), self.len());
        Volume {
            size: self.size,
            geometry: self.geometry,
            data,
        }
    }

    #[inline]
    pub fn idx(&self, i: usize, j: usize, k: usize) -> usize {
        i + self.size[0] * (j + self.size[1] * k)
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize) -> T {
        self.data[self.idx(i, j, k)]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, k: usize, v: T) {
        let n = self.idx(i, j, k);
        self.data[n] = v;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn contains_index(&self, i: isize, j: isize, k: isize) -> bool {
        i >= 0
            && j >= 0
            && k >= 0
            && (i as usize) < self.size[0]
            && (j as usize) < self.size[1]
            && (k as usize) < self.size[2]
    }

    /// Physical position of the voxel center `(i, j, k)`.
    pub fn voxel_center(&self, i: usize, j: usize, k: usize) -> Vector3<f64> {
        self.geometry
            .index_to_physical(&Vector3::new(i as f64, j as f64, k as f64))
    }

    /// Physical center of the grid.
    pub fn physical_center(&self) -> Vector3<f64> {
        let half = Vector3::new(
            (self.size[0] as f64 - 1.0) * 0.5,
            (self.size[1] as f64 - 1.0) * 0.5,
            (self.size[2] as f64 - 1.0) * 0.5,
        );
        self.geometry.index_to_physical(&half)
    }

    /// Extract the in-plane grid at z-index `k`.
    pub fn plane_z(&self, k: usize) -> Plane<T> {
        let (nx, ny) = (self.size[0], self.size[1]);
        let start = nx * ny * k;
        Plane {
            w: nx,
            h: ny,
            stride: nx,
            data: self.data[start..start + nx * ny].to_vec(),
        }
    }
}

impl Volume<f64> {
    /// Trilinear interpolation at a continuous index. Voxels outside the
    /// grid count as zero background.
    pub fn sample_linear(&self, idx: &Vector3<f64>) -> f64 {
        let [nx, ny, nz] = self.size;
        if idx[0] <= -1.0
            || idx[1] <= -1.0
            || idx[2] <= -1.0
            || idx[0] >= nx as f64
            || idx[1] >= ny as f64
            || idx[2] >= nz as f64
        {
            return 0.0;
        }
        let x0 = idx[0].floor();
        let y0 = idx[1].floor();
        let z0 = idx[2].floor();
        let (fx, fy, fz) = (idx[0] - x0, idx[1] - y0, idx[2] - z0);
        let (x0, y0, z0) = (x0 as isize, y0 as isize, z0 as isize);
        let mut acc = 0.0;
        for dz in 0..2isize {
            let wz = if dz == 0 { 1.0 - fz } else { fz };
            for dy in 0..2isize {
                let wy = if dy == 0 { 1.0 - fy } else { fy };
                for dx in 0..2isize {
                    let wx = if dx == 0 { 1.0 - fx } else { fx };
                    let (i, j, k) = (x0 + dx, y0 + dy, z0 + dz);
                    if self.contains_index(i, j, k) {
                        acc += wx * wy * wz * self.get(i as usize, j as usize, k as usize);
                    }
                }
            }
        }
        acc
    }

    pub fn sample_physical(&self, p: &Vector3<f64>) -> f64 {
        self.sample_linear(&self.geometry.physical_to_index(p))
    }

    /// Intensity-weighted center of mass in physical space, restricted to
    /// `mask` when given. `None` when the total weight vanishes.
    pub fn center_of_mass(&self, mask: Option<&VolumeMask>) -> Option<Vector3<f64>> {
        let mut acc = Vector3::zeros();
        let mut total = 0.0;
        for k in 0..self.size[2] {
            for j in 0..self.size[1] {
                for i in 0..self.size[0] {
                    let n = self.idx(i, j, k);
                    if mask.is_some_and(|m| m.data[n] == 0) {
                        continue;
                    }
                    let v = self.data[n].max(0.0);
                    if v > 0.0 {
                        acc += self.voxel_center(i, j, k) * v;
                        total += v;
                    }
                }
            }
        }
        (total > 0.0).then(|| acc / total)
    }

    /// `‖self − other‖ / ‖other‖` over matching grids.
    pub fn relative_change(&self, other: &Volume) -> f64 {
        let mut diff = 0.0;
        let mut norm = 0.0;
        for (a, b) in self.data.iter().zip(&other.data) {
            diff += (a - b) * (a - b);
            norm += b * b;
        }
        if norm <= 0.0 {
            diff.sqrt()
        } else {
            (diff / norm).sqrt()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_physical_round_trip() {
        let geometry = Geometry::new(
            Vector3::new(1.0, -2.0, 3.0),
            Vector3::new(0.5, 0.75, 2.0),
            crate::transform::euler_matrix(0.3, -0.2, 0.1),
        );
        let idx = Vector3::new(4.0, 5.5, -1.0);
        let back = geometry.physical_to_index(&geometry.index_to_physical(&idx));
        assert!((back - idx).norm() < 1e-12);
    }

    #[test]
    fn trilinear_sampling_interpolates_and_zero_pads() {
        let mut v: Volume = Volume::new([2, 2, 2], Geometry::default());
        v.set(1, 0, 0, 4.0);
        assert!((v.sample_linear(&Vector3::new(0.5, 0.0, 0.0)) - 2.0).abs() < 1e-12);
        assert!((v.sample_linear(&Vector3::new(1.5, 0.0, 0.0)) - 2.0).abs() < 1e-12);
        assert_eq!(v.sample_linear(&Vector3::new(5.0, 0.0, 0.0)), 0.0);
    }

    #[test]
    fn non_positive_spacing_is_rejected() {
        let g = Geometry::new(Vector3::zeros(), Vector3::new(1.0, 0.0, 1.0), Matrix3::identity());
        assert!(g.validate().is_err());
    }
}
