//! Reconstruction space and scattered-data approximation (SDA).
//!
//! The reconstruction grid is aligned with the target stack, isotropic, and
//! spans the target's masked pixels plus an optional extra frame. The SDA
//! seed splats every masked slice pixel onto its nearest voxel and normalizes
//! a Gaussian-smoothed intensity sum by the equally smoothed sample density.

use crate::error::{Result, SrrError};
use crate::image::{Geometry, Volume};
use crate::pyramid::{filter_separable, GaussianFilter};
use crate::stack::Stack;
use log::debug;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpaceConfig {
    /// Voxel size in mm; defaults to the finest in-plane spacing of the target.
    pub isotropic_resolution: Option<f64>,
    /// Margin in mm added around the target's masked region.
    pub extra_frame: f64,
}

impl Default for SpaceConfig {
    fn default() -> Self {
        Self {
            isotropic_resolution: None,
            extra_frame: 0.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SdaConfig {
    /// Gaussian standard deviation in mm.
    pub sigma: f64,
}

impl Default for SdaConfig {
    fn default() -> Self {
        Self { sigma: 0.9 }
    }
}

/// Isotropic grid aligned with `target`.
pub fn reconstruction_space(target: &Stack, config: &SpaceConfig) -> Result<Volume> {
    if let Some(r) = config.isotropic_resolution {
        if r.is_nan() || r <= 0.0 {
            return Err(SrrError::config("isotropic_resolution", "must be positive"));
        }
    }
    if config.extra_frame.is_nan() || config.extra_frame < 0.0 {
        return Err(SrrError::config("extra_frame", "must be >= 0"));
    }
    let first = target
        .slices()
        .first()
        .ok_or_else(|| SrrError::config("target_stack", "target stack is empty"))?;
    let direction = first.transform().linear() * first.geometry().direction;
    let resolution = config.isotropic_resolution.unwrap_or_else(|| {
        target
            .slices()
            .iter()
            .map(|s| s.geometry().spacing[0].min(s.geometry().spacing[1]))
            .fold(f64::INFINITY, f64::min)
    });

    let to_local = direction.transpose();
    let mut lo = Vector3::repeat(f64::INFINITY);
    let mut hi = Vector3::repeat(f64::NEG_INFINITY);
    for slice in target.slices() {
        for (x, y, _) in slice.masked_pixels() {
            let q = to_local * slice.world_point(x, y);
            lo = lo.inf(&q);
            hi = hi.sup(&q);
        }
    }
    if lo[0] > hi[0] {
        return Err(SrrError::config(
            "target_stack",
            format!("stack `{}` has no masked pixels", target.name()),
        ));
    }
    // Half a slice thickness on either side of the outermost slices.
    let half_thickness = 0.5 * first.thickness();
    let margin = Vector3::new(config.extra_frame, config.extra_frame, config.extra_frame + half_thickness);
    lo -= margin;
    hi += margin;

    let extent = hi - lo;
    let size = [
        (extent[0] / resolution).floor() as usize + 1,
        (extent[1] / resolution).floor() as usize + 1,
        (extent[2] / resolution).floor() as usize + 1,
    ];
    let geometry = Geometry::new(direction * lo, Vector3::repeat(resolution), direction);
    geometry.validate()?;
    debug!("reconstruction space {size:?} at {resolution} mm");
    Ok(Volume::new(size, geometry))
}

/// SDA seed of `stacks` on the grid of `space`.
pub fn scattered_data_approximation(stacks: &[Stack], space: &Volume, config: &SdaConfig) -> Volume {
    let mut num = vec![0.0; space.len()];
    let mut den = vec![0.0; space.len()];
    for slice in stacks.iter().flat_map(|s| s.slices()) {
        for (x, y, v) in slice.masked_pixels() {
            let idx = space.geometry.physical_to_index(&slice.world_point(x, y));
            let (i, j, k) = (idx[0].round(), idx[1].round(), idx[2].round());
            if !space.contains_index(i as isize, j as isize, k as isize) {
                continue;
            }
            let n = space.idx(i as usize, j as usize, k as usize);
            num[n] += v;
            den[n] += 1.0;
        }
    }
    if config.sigma > 0.0 {
        let filters = [0usize, 1, 2].map(|a| GaussianFilter::new(config.sigma / space.geometry.spacing[a]));
        filter_separable(&mut num, &space.size, &filters);
        filter_separable(&mut den, &space.size, &filters);
    }
    let data = num
        .iter()
        .zip(&den)
        .map(|(n, d)| if *d > 1e-8 { n / d } else { 0.0 })
        .collect();
    space.with_data(data)
}
