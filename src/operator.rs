//! Slice acquisition model `A_k` and its adjoint.
//!
//! For a fixed slice transform each masked pixel becomes one sparse row of
//! PSF weights over the reconstruction grid. Rows are cached in a
//! [`SliceOperator`] and only rebuilt when the transform changes, i.e. once
//! per reconstruction pass after registration. Every masked pixel keeps its
//! row, even when its PSF misses the grid, so the data term always counts the
//! same pixel set; unmasked pixels never appear.

use crate::error::{Result, SrrError};
use crate::image::{Geometry, Plane, Volume};
use crate::psf::{PsfConfig, PsfKernel};
use crate::stack::{Slice, Stack};
use rayon::prelude::*;

/// Reconstruction grid plus PSF model shared by every slice.
#[derive(Clone, Debug)]
pub struct ImagingOperator {
    geometry: Geometry,
    size: [usize; 3],
    psf: PsfConfig,
}

impl ImagingOperator {
    pub fn new(geometry: Geometry, size: [usize; 3], psf: PsfConfig) -> Result<Self> {
        geometry.validate()?;
        if size.iter().any(|&n| n == 0) {
            return Err(SrrError::geometry(format!("volume size {size:?} is empty")));
        }
        if size.iter().product::<usize>() > u32::MAX as usize {
            return Err(SrrError::geometry(format!("volume size {size:?} is too large")));
        }
        Ok(Self {
            geometry,
            size,
            psf,
        })
    }

    pub fn for_volume(volume: &Volume, psf: PsfConfig) -> Result<Self> {
        Self::new(volume.geometry, volume.size, psf)
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn size(&self) -> [usize; 3] {
        self.size
    }

    pub fn psf(&self) -> &PsfConfig {
        &self.psf
    }

    pub fn voxel_count(&self) -> usize {
        self.size.iter().product()
    }

    /// Build the cached rows of `slice` at its current transform.
    ///
    /// Fails with a geometry error when no masked pixel sees the grid.
    pub fn prepare(&self, slice: &Slice) -> Result<SliceOperator> {
        let kernel = PsfKernel::new(slice.geometry(), slice.transform(), &self.geometry, &self.psf)?;
        let image = slice.image();
        let mut op = SliceOperator {
            slice: slice.index(),
            width: image.w,
            height: image.h,
            pixels: Vec::new(),
            row_ptr: vec![0],
            cols: Vec::new(),
            vals: Vec::new(),
            observed: Vec::new(),
        };
        let mut scratch = Vec::new();
        for (x, y, value) in slice.masked_pixels() {
            let center = self.geometry.physical_to_index(&slice.world_point(x, y));
            kernel.weights(&center, self.size, &mut scratch);
            for &(col, w) in &scratch {
                op.cols.push(col);
                op.vals.push(w);
            }
            op.row_ptr.push(op.cols.len());
            op.pixels.push(image.idx(x, y) as u32);
            op.observed.push(value);
        }
        if op.cols.is_empty() {
            return Err(SrrError::geometry(format!(
                "slice {} lies entirely outside the reconstruction grid",
                slice.index()
            )));
        }
        Ok(op)
    }

    /// Prepare every slice with mask support, in parallel. Slices whose mask
    /// is empty are skipped.
    pub fn prepare_stacks(&self, stacks: &[Stack]) -> Result<Vec<SliceOperator>> {
        let slices: Vec<&Slice> = stacks
            .iter()
            .flat_map(|s| s.slices().iter())
            .filter(|s| s.has_mask_support())
            .collect();
        slices.par_iter().map(|s| self.prepare(s)).collect()
    }
}

/// Cached CSR rows of `A_k` for one slice at one transform.
#[derive(Clone, Debug)]
pub struct SliceOperator {
    slice: usize,
    width: usize,
    height: usize,
    /// Plane index of the pixel behind each row.
    pixels: Vec<u32>,
    row_ptr: Vec<usize>,
    cols: Vec<u32>,
    vals: Vec<f64>,
    observed: Vec<f64>,
}

impl SliceOperator {
    pub fn slice_index(&self) -> usize {
        self.slice
    }

    pub fn rows(&self) -> usize {
        self.pixels.len()
    }

    pub fn nnz(&self) -> usize {
        self.vals.len()
    }

    /// Observed intensities `y_k` of the masked pixels, row order.
    pub fn observed(&self) -> &[f64] {
        &self.observed
    }

    #[inline]
    pub fn row(&self, r: usize) -> (&[u32], &[f64]) {
        let (a, b) = (self.row_ptr[r], self.row_ptr[r + 1]);
        (&self.cols[a..b], &self.vals[a..b])
    }

    /// `out = A_k x`
    pub fn forward(&self, x: &[f64], out: &mut [f64]) {
        debug_assert_eq!(out.len(), self.rows());
        for (r, o) in out.iter_mut().enumerate() {
            let (cols, vals) = self.row(r);
            *o = cols
                .iter()
                .zip(vals)
                .map(|(&c, &w)| w * x[c as usize])
                .sum();
        }
    }

    /// `out += A_kᵀ r`
    pub fn adjoint_accumulate(&self, r: &[f64], out: &mut [f64]) {
        debug_assert_eq!(r.len(), self.rows());
        for (row, &value) in r.iter().enumerate() {
            if value == 0.0 {
                continue;
            }
            let (cols, vals) = self.row(row);
            for (&c, &w) in cols.iter().zip(vals) {
                out[c as usize] += w * value;
            }
        }
    }

    /// Scatter per-row values back onto the slice plane (unmasked pixels 0).
    pub fn to_plane(&self, values: &[f64]) -> Plane<f64> {
        let mut plane = Plane::new(self.width, self.height);
        for (&p, &v) in self.pixels.iter().zip(values) {
            plane.data[p as usize] = v;
        }
        plane
    }

    /// Gather per-row values from a plane of the slice's size.
    pub fn from_plane(&self, plane: &Plane<f64>) -> Vec<f64> {
        self.pixels.iter().map(|&p| plane.data[p as usize]).collect()
    }
}

/// Predicted slice pixels `A_k x` for `slice` at its current transform.
pub fn forward(volume: &Volume, slice: &Slice, psf: &PsfConfig) -> Result<Plane<f64>> {
    let op = ImagingOperator::for_volume(volume, *psf)?.prepare(slice)?;
    let mut out = vec![0.0; op.rows()];
    op.forward(&volume.data, &mut out);
    Ok(op.to_plane(&out))
}

/// Back-projection `A_kᵀ r` of a slice-space residual onto the grid
/// described by `geometry` and `size`.
pub fn adjoint(
    residual: &Plane<f64>,
    slice: &Slice,
    psf: &PsfConfig,
    geometry: &Geometry,
    size: [usize; 3],
) -> Result<Volume> {
    if residual.w != slice.image().w || residual.h != slice.image().h {
        return Err(SrrError::geometry("residual plane does not match slice size"));
    }
    let op = ImagingOperator::new(*geometry, size, *psf)?.prepare(slice)?;
    let mut out = Volume::new(size, *geometry);
    op.adjoint_accumulate(&op.from_plane(residual), &mut out.data);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Mask;
    use crate::transform::Transform;
    use nalgebra::{Matrix3, Vector3};

    fn slice_through(volume: &Volume, k: usize, thickness: f64) -> Slice {
        let geometry = Geometry::new(
            volume.voxel_center(0, 0, k),
            Vector3::new(1.0, 1.0, thickness),
            Matrix3::identity(),
        );
        let image = Plane::filled(volume.size[0], volume.size[1], 1.0);
        let mask = Mask::filled(volume.size[0], volume.size[1], 1);
        Slice::new(k, image, mask, geometry).unwrap()
    }

    #[test]
    fn forward_and_adjoint_are_transposes() {
        let mut volume: Volume = Volume::new([6, 5, 4], Geometry::default());
        for (n, v) in volume.data.iter_mut().enumerate() {
            *v = ((n * 7) % 11) as f64 - 3.0;
        }
        let mut slice = slice_through(&volume, 2, 2.0);
        slice.set_transform(Transform::euler_3d(
            [0.05, -0.1, 0.2],
            [0.3, -0.2, 0.1],
            Vector3::new(2.5, 2.0, 2.0),
        ));
        let op = ImagingOperator::for_volume(&volume, PsfConfig::default())
            .unwrap()
            .prepare(&slice)
            .unwrap();
        let mut ax = vec![0.0; op.rows()];
        op.forward(&volume.data, &mut ax);
        let r: Vec<f64> = (0..op.rows()).map(|i| (i % 5) as f64 * 0.5 - 1.0).collect();
        let mut atr = vec![0.0; volume.len()];
        op.adjoint_accumulate(&r, &mut atr);
        let lhs: f64 = ax.iter().zip(&r).map(|(a, b)| a * b).sum();
        let rhs: f64 = volume.data.iter().zip(&atr).map(|(a, b)| a * b).sum();
        assert!((lhs - rhs).abs() < 1e-9 * lhs.abs().max(1.0));
    }

    #[test]
    fn constant_volume_is_reproduced() {
        let mut volume: Volume = Volume::new([6, 6, 6], Geometry::default());
        volume.data.iter_mut().for_each(|v| *v = 2.0);
        let slice = slice_through(&volume, 3, 3.0);
        let predicted = forward(&volume, &slice, &PsfConfig::default()).unwrap();
        assert!(predicted.data.iter().all(|&v| (v - 2.0).abs() < 1e-12));
    }

    #[test]
    fn slice_outside_the_grid_is_a_geometry_error() {
        let volume: Volume = Volume::new([4, 4, 4], Geometry::default());
        let mut slice = slice_through(&volume, 1, 1.0);
        slice.set_transform(Transform::euler_3d(
            [0.0; 3],
            [0.0, 0.0, 100.0],
            Vector3::zeros(),
        ));
        let err = ImagingOperator::for_volume(&volume, PsfConfig::default())
            .unwrap()
            .prepare(&slice)
            .unwrap_err();
        assert!(matches!(err, SrrError::Geometry(_)));
    }
}
