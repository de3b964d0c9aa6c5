//! Multiresolution levels for registration.
//!
//! A level smooths with a separable Gaussian and then decimates by an integer
//! factor, keeping the first sample of every block. Geometry follows the
//! samples: the origin is unchanged and the spacing of decimated axes is
//! multiplied by the factor. Slices are only decimated in-plane; their
//! thickness stays as acquired.

pub mod filters;
pub mod options;

pub use filters::{filter_separable, GaussianFilter, SeparableFilter};
pub use options::{Level, LevelSchedule};

use crate::image::{Geometry, Mask, Plane, Volume};
use crate::stack::Slice;
use nalgebra::Vector3;

fn decimate(data: &[f64], dims: &[usize], out_dims: &[usize], shrink: &[usize]) -> Vec<f64> {
    let total: usize = out_dims.iter().product();
    let mut out = Vec::with_capacity(total);
    let mut idx = vec![0usize; out_dims.len()];
    for _ in 0..total {
        let mut src = 0;
        let mut stride = 1;
        for a in 0..dims.len() {
            src += (idx[a] * shrink[a]).min(dims[a] - 1) * stride;
            stride *= dims[a];
        }
        out.push(data[src]);
        for a in 0..idx.len() {
            idx[a] += 1;
            if idx[a] < out_dims[a] {
                break;
            }
            idx[a] = 0;
        }
    }
    out
}

/// Smoothed and decimated copy of `plane` with its mask.
pub fn shrink_plane(plane: &Plane<f64>, mask: &Mask, level: Level) -> (Plane<f64>, Mask) {
    let mut data = plane.data.clone();
    if level.sigma > 0.0 {
        let g = GaussianFilter::new(level.sigma);
        filter_separable(&mut data, &[plane.w, plane.h], &[g.clone(), g]);
    }
    if level.shrink <= 1 {
        return (
            Plane {
                w: plane.w,
                h: plane.h,
                stride: plane.w,
                data,
            },
            mask.clone(),
        );
    }
    let s = level.shrink;
    let (w, h) = (plane.w.div_ceil(s), plane.h.div_ceil(s));
    let data = decimate(&data, &[plane.w, plane.h], &[w, h], &[s, s]);
    let mut coarse_mask = Mask::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let m = mask.get((x * s).min(mask.w - 1), (y * s).min(mask.h - 1));
            coarse_mask.set(x, y, m);
        }
    }
    (
        Plane {
            w,
            h,
            stride: w,
            data,
        },
        coarse_mask,
    )
}

/// A slice at a registration level, same index and transform.
pub fn shrink_slice(slice: &Slice, level: Level) -> Slice {
    if level.is_full_resolution() {
        return slice.clone();
    }
    let (image, mask) = shrink_plane(slice.image(), slice.mask(), level);
    let g = slice.geometry();
    let s = level.shrink as f64;
    let geometry = Geometry::new(
        g.origin,
        Vector3::new(g.spacing[0] * s, g.spacing[1] * s, g.spacing[2]),
        g.direction,
    );
    slice.resampled(image, mask, geometry)
}

/// Smoothed and decimated copy of `volume` along all three axes.
pub fn shrink_volume(volume: &Volume, level: Level) -> Volume {
    if level.is_full_resolution() {
        return volume.clone();
    }
    let mut data = volume.data.clone();
    if level.sigma > 0.0 {
        let g = GaussianFilter::new(level.sigma);
        filter_separable(&mut data, &volume.size, &[g.clone(), g.clone(), g]);
    }
    let s = level.shrink.max(1);
    let size = volume.size.map(|n| n.div_ceil(s));
    let data = decimate(&data, &volume.size, &size, &[s, s, s]);
    let geometry = Geometry::new(
        volume.geometry.origin,
        volume.geometry.spacing * s as f64,
        volume.geometry.direction,
    );
    Volume {
        size,
        geometry,
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_shrink_keeps_physical_extent() {
        let mut volume: Volume = Volume::new([9, 8, 5], Geometry::default());
        volume.set(4, 4, 2, 1.0);
        let coarse = shrink_volume(&volume, Level { shrink: 2, sigma: 0.0 });
        assert_eq!(coarse.size, [5, 4, 3]);
        assert_eq!(coarse.geometry.spacing, Vector3::new(2.0, 2.0, 2.0));
        assert_eq!(coarse.get(2, 2, 1), 1.0);
        let p = coarse.voxel_center(2, 2, 1);
        assert!((p - volume.voxel_center(4, 4, 2)).norm() < 1e-12);
    }

    #[test]
    fn plane_shrink_decimates_mask_with_image() {
        let mut plane = Plane::filled(5, 4, 2.0);
        plane.set(2, 2, 8.0);
        let mut mask = Mask::new(5, 4);
        mask.set(2, 2, 1);
        let (p, m) = shrink_plane(&plane, &mask, Level { shrink: 2, sigma: 0.0 });
        assert_eq!((p.w, p.h), (3, 2));
        assert_eq!(p.get(1, 1), 8.0);
        assert_eq!(m.count_set(), 1);
        assert_eq!(m.get(1, 1), 1);
    }
}
