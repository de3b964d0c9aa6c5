//! Moving sample sets and the similarity metrics evaluated over them.
//!
//! Samples are stored already mapped by the prior transform, so a candidate
//! only needs the incremental transform `Δ` applied on top. Samples that land
//! outside the fixed volume predict zero.

use super::params::{Metric, RegistrationConfig};
use crate::error::Result;
use crate::image::{Geometry, Volume, VolumeMask};
use crate::psf::PsfKernel;
use crate::stack::Slice;
use crate::transform::Transform;
use nalgebra::Vector3;
use rayon::prelude::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SampleOrigin {
    Slice,
    Volume,
}

#[derive(Clone, Debug)]
pub(crate) struct SampleSet {
    origin: SampleOrigin,
    points: Vec<Vector3<f64>>,
    values: Vec<f64>,
    prior: Transform,
    /// Native geometry of the slice, needed for PSF-aware prediction.
    slice_geometry: Option<Geometry>,
}

impl SampleSet {
    pub fn from_slice(slice: &Slice) -> Self {
        let prior = *slice.transform();
        let (points, values) = slice
            .masked_pixels()
            .map(|(x, y, v)| (slice.world_point(x, y), v))
            .unzip();
        Self {
            origin: SampleOrigin::Slice,
            points,
            values,
            prior,
            slice_geometry: Some(*slice.geometry()),
        }
    }

    /// Voxels of `volume` (inside `mask` when given), regularly thinned to at
    /// most `max_samples`.
    pub fn from_volume(
        volume: &Volume,
        mask: Option<&VolumeMask>,
        prior: &Transform,
        max_samples: usize,
    ) -> Self {
        let selected: Vec<usize> = (0..volume.len())
            .filter(|&n| mask.map_or(true, |m| m.data[n] != 0))
            .collect();
        let stride = selected.len().div_ceil(max_samples.max(1)).max(1);
        let [nx, ny, _] = volume.size;
        let (points, values) = selected
            .iter()
            .step_by(stride)
            .map(|&n| {
                let (i, j, k) = (n % nx, (n / nx) % ny, n / (nx * ny));
                (prior.apply_point(&volume.voxel_center(i, j, k)), volume.data[n])
            })
            .unzip();
        Self {
            origin: SampleOrigin::Volume,
            points,
            values,
            prior: *prior,
            slice_geometry: None,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn prior(&self) -> &Transform {
        &self.prior
    }

    /// Unweighted centroid of the mapped samples.
    pub fn centroid(&self) -> Vector3<f64> {
        if self.points.is_empty() {
            return Vector3::zeros();
        }
        self.points.iter().sum::<Vector3<f64>>() / self.points.len() as f64
    }

    /// RMS distance of the samples from `center`, at least 1.
    pub fn radius(&self, center: &Vector3<f64>) -> f64 {
        if self.points.is_empty() {
            return 1.0;
        }
        let ms = self
            .points
            .iter()
            .map(|p| (p - center).norm_squared())
            .sum::<f64>()
            / self.points.len() as f64;
        ms.sqrt().max(1.0)
    }

    pub fn points(&self) -> &[Vector3<f64>] {
        &self.points
    }

    fn weighted_centroid(&self, weights: &[f64]) -> Option<Vector3<f64>> {
        let mut acc = Vector3::zeros();
        let mut total = 0.0;
        for (p, &w) in self.points.iter().zip(weights) {
            if w > 0.0 {
                acc += p * w;
                total += w;
            }
        }
        (total > 0.0).then(|| acc / total)
    }

    /// Translation aligning intensity centers of mass. For slices the fixed
    /// center is taken over the volume resampled on the slice itself, which
    /// keeps the shift in-plane.
    pub fn moments_offset(
        &self,
        fixed: &Volume,
        fixed_mask: Option<&VolumeMask>,
    ) -> Option<Vector3<f64>> {
        let moving = self.weighted_centroid(&self.values)?;
        let target = match self.origin {
            SampleOrigin::Slice => {
                let predicted = self.predict(fixed, &Transform::default(), None);
                self.weighted_centroid(&predicted)?
            }
            SampleOrigin::Volume => fixed.center_of_mass(fixed_mask)?,
        };
        Some(target - moving)
    }

    fn predict(&self, fixed: &Volume, delta: &Transform, kernel: Option<&PsfKernel>) -> Vec<f64> {
        self.points
            .par_iter()
            .map_init(Vec::new, |scratch, p| {
                let idx = fixed.geometry.physical_to_index(&delta.apply_point(p));
                match kernel {
                    None => fixed.sample_linear(&idx),
                    Some(k) => {
                        k.weights(&idx, fixed.size, scratch);
                        scratch
                            .iter()
                            .map(|&(n, w)| w * fixed.data[n as usize])
                            .sum()
                    }
                }
            })
            .collect()
    }

    /// Metric value of the candidate `delta ∘ prior`; lower is better.
    pub fn evaluate(
        &self,
        fixed: &Volume,
        delta: &Transform,
        config: &RegistrationConfig,
    ) -> Result<f64> {
        let kernel = match (&self.slice_geometry, config.psf_aware) {
            (Some(g), true) => Some(PsfKernel::new(
                g,
                &delta.compose(&self.prior),
                &fixed.geometry,
                &config.psf,
            )?),
            _ => None,
        };
        let predicted = self.predict(fixed, delta, kernel.as_ref());
        Ok(match config.metric {
            Metric::MeanSquares => mean_squares(&predicted, &self.values),
            Metric::Correlation => -correlation(&predicted, &self.values),
        })
    }
}

pub(crate) fn mean_squares(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f64>() / a.len() as f64
}

/// Normalized cross-correlation; 0 when either signal is constant.
pub(crate) fn correlation(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    if a.is_empty() {
        return 0.0;
    }
    let ma = a.iter().sum::<f64>() / n;
    let mb = b.iter().sum::<f64>() / n;
    let (mut sab, mut saa, mut sbb) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b) {
        let (dx, dy) = (x - ma, y - mb);
        sab += dx * dy;
        saa += dx * dx;
        sbb += dy * dy;
    }
    let denom = (saa * sbb).sqrt();
    if denom <= f64::EPSILON {
        0.0
    } else {
        sab / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_is_scale_invariant() {
        let a = [1.0, 2.0, 4.0, 3.0];
        let b: Vec<f64> = a.iter().map(|v| 3.0 * v + 1.0).collect();
        assert!((correlation(&a, &b) - 1.0).abs() < 1e-12);
        assert_eq!(correlation(&a, &[2.0; 4]), 0.0);
    }

    #[test]
    fn mean_squares_of_identical_signals_is_zero() {
        let a = [0.5, -1.0, 2.0];
        assert_eq!(mean_squares(&a, &a), 0.0);
        assert!((mean_squares(&a, &[0.0; 3]) - (0.25 + 1.0 + 4.0) / 3.0).abs() < 1e-12);
    }
}
