//! Synthetic phantoms and simulated motion-corrupted stacks.
//!
//! Used by the demo binaries and the integration tests. Slices are simulated
//! through the same PSF forward model the reconstruction inverts, so a
//! motion-free simulation is exactly consistent with the phantom.

use crate::error::{Result, SrrError};
use crate::image::{Geometry, Mask, Plane, Volume};
use crate::operator::ImagingOperator;
use crate::psf::PsfConfig;
use crate::stack::{Slice, Stack};
use crate::transform::Transform;
use log::debug;
use nalgebra::{Matrix3, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Smooth Gaussian blob; center and radii are fractions of the grid extent.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Blob {
    pub center: [f64; 3],
    pub radii: [f64; 3],
    pub amplitude: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhantomConfig {
    pub size: [usize; 3],
    pub spacing: f64,
    pub blobs: Vec<Blob>,
}

impl Default for PhantomConfig {
    fn default() -> Self {
        let blob = |center, radii, amplitude| Blob {
            center,
            radii,
            amplitude,
        };
        Self {
            size: [32, 32, 32],
            spacing: 1.0,
            blobs: vec![
                blob([0.5, 0.5, 0.5], [0.30, 0.25, 0.28], 1.0),
                blob([0.38, 0.45, 0.55], [0.08, 0.10, 0.07], 0.8),
                blob([0.62, 0.58, 0.42], [0.06, 0.05, 0.09], -0.5),
                blob([0.55, 0.35, 0.62], [0.05, 0.07, 0.05], 0.6),
            ],
        }
    }
}

/// Phantom volume centered on the physical origin.
pub fn phantom(config: &PhantomConfig) -> Result<Volume> {
    if config.size.iter().any(|&n| n == 0) {
        return Err(SrrError::config("phantom.size", "must be non-empty"));
    }
    if config.spacing.is_nan() || config.spacing <= 0.0 {
        return Err(SrrError::config("phantom.spacing", "must be positive"));
    }
    let extent = config.size.map(|n| n as f64 * config.spacing);
    let origin = Vector3::from_fn(|a, _| -0.5 * (config.size[a] as f64 - 1.0) * config.spacing);
    let mut volume = Volume::new(config.size, Geometry::isotropic(origin, config.spacing));
    let [nx, ny, _] = config.size;
    let geometry = volume.geometry;
    volume
        .data
        .par_chunks_mut(nx * ny)
        .enumerate()
        .for_each(|(k, plane)| {
            for j in 0..ny {
                for i in 0..nx {
                    let p = geometry.index_to_physical(&Vector3::new(i as f64, j as f64, k as f64));
                    plane[i + nx * j] = config
                        .blobs
                        .iter()
                        .map(|b| {
                            let q: f64 = (0..3)
                                .map(|a| {
                                    let c = (b.center[a] - 0.5) * extent[a];
                                    let r = b.radii[a] * extent[a];
                                    ((p[a] - c) / r).powi(2)
                                })
                                .sum();
                            b.amplitude * (-0.5 * q).exp()
                        })
                        .sum();
                }
            }
        });
    Ok(volume)
}

/// Slice normal of a simulated stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    Axial,
    Coronal,
    Sagittal,
}

impl Orientation {
    /// Right-handed direction matrix whose third column is the slice normal.
    pub fn direction(self) -> Matrix3<f64> {
        let (x, y, z) = (Vector3::x(), Vector3::y(), Vector3::z());
        match self {
            Orientation::Axial => Matrix3::identity(),
            Orientation::Coronal => Matrix3::from_columns(&[x, z, -y]),
            Orientation::Sagittal => Matrix3::from_columns(&[y, z, x]),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Orientation::Axial => "axial",
            Orientation::Coronal => "coronal",
            Orientation::Sagittal => "sagittal",
        }
    }
}

/// Deterministic per-slice rigid motion.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Peak rotation about each axis, degrees.
    pub rotation_deg: f64,
    /// Peak translation along each axis, mm.
    pub translation: f64,
    /// Varies the motion pattern between stacks.
    pub phase: f64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            rotation_deg: 0.0,
            translation: 0.0,
            phase: 0.0,
        }
    }
}

impl MotionConfig {
    pub fn is_static(&self) -> bool {
        self.rotation_deg == 0.0 && self.translation == 0.0
    }

    /// Motion of slice `k`, rotating about `center`.
    pub fn slice_motion(&self, k: usize, center: Vector3<f64>) -> Transform {
        let s = k as f64 + self.phase;
        let wave = |f: f64, p: f64| (f * s + p).sin();
        let rot = self.rotation_deg.to_radians();
        Transform::euler_3d(
            [rot * wave(1.3, 0.5), rot * wave(0.7, 1.9), rot * wave(2.1, 0.3)],
            [
                self.translation * wave(0.9, 1.2),
                self.translation * wave(1.7, 0.2),
                0.5 * self.translation * wave(0.4, 2.4),
            ],
            center,
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackSimulation {
    pub orientation: Orientation,
    pub in_plane_spacing: f64,
    pub thickness: f64,
    pub motion: MotionConfig,
}

impl Default for StackSimulation {
    fn default() -> Self {
        Self {
            orientation: Orientation::Axial,
            in_plane_spacing: 1.0,
            thickness: 2.0,
            motion: MotionConfig::default(),
        }
    }
}

/// Stack grid covering `volume`'s bounding box in the given orientation.
pub fn stack_geometry(volume: &Volume, sim: &StackSimulation) -> Result<([usize; 3], Geometry)> {
    let direction = sim.orientation.direction();
    let spacing = Vector3::new(sim.in_plane_spacing, sim.in_plane_spacing, sim.thickness);
    Geometry::new(Vector3::zeros(), spacing, direction).validate()?;
    let center = volume.physical_center();
    let mut lo = Vector3::repeat(f64::INFINITY);
    let mut hi = Vector3::repeat(f64::NEG_INFINITY);
    for corner in 0..8 {
        let idx = Vector3::from_fn(|a, _| {
            let n = volume.size[a] as f64;
            if corner >> a & 1 == 1 {
                n - 0.5
            } else {
                -0.5
            }
        });
        let p = direction.transpose() * (volume.geometry.index_to_physical(&idx) - center);
        lo = lo.inf(&p);
        hi = hi.sup(&p);
    }
    let size = [0usize, 1, 2].map(|a| (((hi[a] - lo[a]) / spacing[a]).round() as usize).max(1));
    let half = Vector3::from_fn(|a, _| (size[a] as f64 - 1.0) * 0.5);
    let origin = center - direction * half.component_mul(&spacing);
    Ok((size, Geometry::new(origin, spacing, direction)))
}

/// Simulate a stack of `volume` with per-slice motion. The returned stack has
/// identity transforms; the true correction of slice `k` is the second value.
pub fn simulate_stack(
    name: &str,
    volume: &Volume,
    sim: &StackSimulation,
    psf: &PsfConfig,
) -> Result<(Stack, Vec<Transform>)> {
    let (size, geometry) = stack_geometry(volume, sim)?;
    let [nx, ny, nz] = size;
    let op = ImagingOperator::for_volume(volume, *psf)?;
    let planes: Vec<(Plane<f64>, Transform)> = (0..nz)
        .into_par_iter()
        .map(|k| -> Result<(Plane<f64>, Transform)> {
            let slice_geometry = Geometry::new(
                geometry.index_to_physical(&Vector3::new(0.0, 0.0, k as f64)),
                geometry.spacing,
                geometry.direction,
            );
            let mut slice = Slice::new(k, Plane::new(nx, ny), Mask::filled(nx, ny, 1), slice_geometry)?;
            let motion = sim.motion.slice_motion(k, slice.native_center());
            slice.set_transform(motion);
            let prepared = op.prepare(&slice)?;
            let mut values = vec![0.0; prepared.rows()];
            prepared.forward(&volume.data, &mut values);
            Ok((prepared.to_plane(&values), motion))
        })
        .collect::<Result<_>>()?;

    let mut acquired: Volume = Volume::new(size, geometry);
    let mut truth = Vec::with_capacity(nz);
    for (k, (plane, motion)) in planes.into_iter().enumerate() {
        acquired.data[k * nx * ny..(k + 1) * nx * ny].copy_from_slice(&plane.data);
        truth.push(motion);
    }
    debug!("simulated {} stack `{name}`: {size:?}", sim.orientation.name());
    Ok((Stack::from_volume(name, acquired, None)?, truth))
}
