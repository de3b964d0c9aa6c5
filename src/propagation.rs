//! Template-based segmentation propagation.
//!
//! A template volume with a known mask is rigidly registered to a stack
//! volume; the template mask is then carried into the stack's voxel grid
//! and dilated so it safely covers the anatomy.

use crate::error::Result;
use crate::image::{Volume, VolumeMask};
use crate::registration::{register_volume, Initializer, RegistrationConfig};
use crate::transform::Transform;
use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagationConfig {
    /// Ball radius of the final dilation in voxels.
    pub dilation_radius: usize,
    pub registration: RegistrationConfig,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            dilation_radius: 3,
            registration: RegistrationConfig {
                initializer: Initializer::Moments,
                ..RegistrationConfig::default()
            },
        }
    }
}

#[derive(Clone, Debug)]
pub struct Propagation {
    /// Mask on the grid of the stack volume.
    pub mask: VolumeMask,
    /// Maps template physical points into stack physical space.
    pub transform: Transform,
}

pub fn propagate_mask(
    template: &Volume,
    template_mask: &VolumeMask,
    stack: &Volume,
    config: &PropagationConfig,
) -> Result<Propagation> {
    let mut reg = config.registration.clone();
    reg.psf_aware = false;
    reg.validate()?;
    let outcome = register_volume(template, Some(template_mask), stack, None, &reg)?;
    let warped = warp_mask(template_mask, &outcome.transform, stack)?;
    let mask = dilate_ball(&warped, config.dilation_radius);
    debug!(
        "propagated mask: {} voxels after warp, {} after dilation",
        count(&warped),
        count(&mask)
    );
    Ok(Propagation {
        mask,
        transform: outcome.transform,
    })
}

/// Nearest-neighbour resampling of `mask` onto the grid of `target`, where
/// `transform` maps mask space into target space.
pub fn warp_mask(mask: &VolumeMask, transform: &Transform, target: &Volume) -> Result<VolumeMask> {
    let inverse = transform.inverse()?;
    let [nx, ny, _] = target.size;
    let mut out: VolumeMask = target.with_data(vec![0u8; target.len()]);
    out.data
        .par_chunks_mut(nx * ny)
        .enumerate()
        .for_each(|(k, plane)| {
            for j in 0..ny {
                for i in 0..nx {
                    let p = inverse.apply_point(&target.voxel_center(i, j, k));
                    let idx = mask.geometry.physical_to_index(&p);
                    let (a, b, c) = (
                        idx[0].round() as isize,
                        idx[1].round() as isize,
                        idx[2].round() as isize,
                    );
                    if mask.contains_index(a, b, c) && mask.get(a as usize, b as usize, c as usize) != 0 {
                        plane[i + nx * j] = 1;
                    }
                }
            }
        });
    Ok(out)
}

/// Binary dilation with a ball of `radius` voxels.
pub fn dilate_ball(mask: &VolumeMask, radius: usize) -> VolumeMask {
    if radius == 0 {
        return mask.clone();
    }
    let r = radius as isize;
    let offsets: Vec<[isize; 3]> = (-r..=r)
        .flat_map(|dk| (-r..=r).flat_map(move |dj| (-r..=r).map(move |di| [di, dj, dk])))
        .filter(|[a, b, c]| a * a + b * b + c * c <= r * r)
        .collect();
    let [nx, ny, _] = mask.size;
    let mut out = mask.clone();
    out.data
        .par_chunks_mut(nx * ny)
        .enumerate()
        .for_each(|(k, plane)| {
            for j in 0..ny {
                for i in 0..nx {
                    let hit = offsets.iter().any(|[di, dj, dk]| {
                        let (a, b, c) = (i as isize + di, j as isize + dj, k as isize + dk);
                        mask.contains_index(a, b, c) && mask.get(a as usize, b as usize, c as usize) != 0
                    });
                    if hit {
                        plane[i + nx * j] = 1;
                    }
                }
            }
        });
    out
}

fn count(mask: &VolumeMask) -> usize {
    mask.data.iter().filter(|&&m| m != 0).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Geometry;
    use nalgebra::Vector3;

    #[test]
    fn dilation_grows_a_point_into_a_ball() {
        let mut mask: VolumeMask = Volume::new([9, 9, 9], Geometry::default());
        mask.set(4, 4, 4, 1);
        let out = dilate_ball(&mask, 2);
        assert_eq!(out.get(6, 4, 4), 1);
        assert_eq!(out.get(5, 5, 5), 1);
        assert_eq!(out.get(6, 6, 4), 0);
        assert_eq!(count(&out), 33);
    }

    #[test]
    fn warp_follows_a_translation() {
        let mut mask: VolumeMask = Volume::new([8, 8, 8], Geometry::default());
        mask.set(2, 3, 4, 1);
        let target: Volume = Volume::new([8, 8, 8], Geometry::default());
        let shift = Transform::euler_3d([0.0; 3], [2.0, 0.0, -1.0], Vector3::zeros());
        let out = warp_mask(&mask, &shift, &target).unwrap();
        assert_eq!(out.get(4, 3, 3), 1);
        assert_eq!(count(&out), 1);
    }
}
