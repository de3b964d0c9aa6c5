//! Slices and the stacks that own them.
//!
//! A [`Slice`] keeps its acquired pixels, mask and native geometry immutable;
//! only its [`Transform`] changes, once per registration pass. The transform
//! maps the slice's native physical space into the reconstruction space, so a
//! slice pixel at native point `q` observes the volume around `T(q)`.

use crate::error::{Result, SrrError};
use crate::image::{Geometry, Mask, Plane, Volume, VolumeMask};
use crate::transform::Transform;
use nalgebra::Vector3;

#[derive(Clone, Debug)]
pub struct Slice {
    index: usize,
    image: Plane<f64>,
    mask: Mask,
    geometry: Geometry,
    transform: Transform,
}

impl Slice {
    /// `geometry.spacing[2]` is the slice thickness.
    pub fn new(index: usize, image: Plane<f64>, mask: Mask, geometry: Geometry) -> Result<Self> {
        if image.w != mask.w || image.h != mask.h {
            return Err(SrrError::geometry(format!(
                "slice {index}: image {}x{} and mask {}x{} differ",
                image.w, image.h, mask.w, mask.h
            )));
        }
        if image.is_empty() {
            return Err(SrrError::geometry(format!("slice {index} has no pixels")));
        }
        geometry.validate()?;
        Ok(Self {
            index,
            image,
            mask,
            geometry,
            transform: Transform::default(),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn image(&self) -> &Plane<f64> {
        &self.image
    }

    pub fn mask(&self) -> &Mask {
        &self.mask
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
    }

    pub fn thickness(&self) -> f64 {
        self.geometry.spacing[2]
    }

    /// `false` when the mask excludes every pixel.
    pub fn has_mask_support(&self) -> bool {
        self.mask.data.iter().any(|&m| m != 0)
    }

    #[inline]
    pub fn native_point(&self, x: usize, y: usize) -> Vector3<f64> {
        self.geometry
            .index_to_physical(&Vector3::new(x as f64, y as f64, 0.0))
    }

    /// Pixel center mapped into reconstruction space.
    #[inline]
    pub fn world_point(&self, x: usize, y: usize) -> Vector3<f64> {
        self.transform.apply_point(&self.native_point(x, y))
    }

    /// `(x, y, intensity)` of every masked pixel in row-major order.
    pub fn masked_pixels(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        (0..self.image.h).flat_map(move |y| {
            (0..self.image.w).filter_map(move |x| {
                (self.mask.get(x, y) != 0).then(|| (x, y, self.image.get(x, y)))
            })
        })
    }

    /// Same slice resampled onto another pixel grid (multiresolution levels).
    pub fn resampled(&self, image: Plane<f64>, mask: Mask, geometry: Geometry) -> Self {
        Self {
            index: self.index,
            image,
            mask,
            geometry,
            transform: self.transform,
        }
    }

    /// Native physical center of the slice plane.
    pub fn native_center(&self) -> Vector3<f64> {
        let half = Vector3::new(
            (self.image.w as f64 - 1.0) * 0.5,
            (self.image.h as f64 - 1.0) * 0.5,
            0.0,
        );
        self.geometry.index_to_physical(&half)
    }
}

#[derive(Clone, Debug)]
pub struct Stack {
    name: String,
    slices: Vec<Slice>,
    transform: Transform,
    mask: Option<VolumeMask>,
    source: Option<Volume>,
}

impl Stack {
    pub fn from_slices(name: impl Into<String>, slices: Vec<Slice>) -> Result<Self> {
        let name = name.into();
        if slices.is_empty() {
            return Err(SrrError::config("stacks", format!("stack `{name}` has no slices")));
        }
        Ok(Self {
            name,
            slices,
            transform: Transform::default(),
            mask: None,
            source: None,
        })
    }

    /// Split a 3D acquisition along its third index axis. The z spacing of
    /// `volume` becomes the slice thickness. Without a mask every pixel is
    /// part of the objective.
    pub fn from_volume(
        name: impl Into<String>,
        volume: Volume,
        mask: Option<VolumeMask>,
    ) -> Result<Self> {
        volume.geometry.validate()?;
        if let Some(m) = &mask {
            if m.size != volume.size {
                return Err(SrrError::geometry(format!(
                    "stack mask size {:?} differs from image size {:?}",
                    m.size, volume.size
                )));
            }
        }
        let [nx, ny, nz] = volume.size;
        let mut slices = Vec::with_capacity(nz);
        for k in 0..nz {
            let image = volume.plane_z(k);
            let slice_mask = match &mask {
                Some(m) => m.plane_z(k),
                None => Plane::filled(nx, ny, 1u8),
            };
            let geometry = Geometry::new(
                volume.voxel_center(0, 0, k),
                volume.geometry.spacing,
                volume.geometry.direction,
            );
            slices.push(Slice::new(k, image, slice_mask, geometry)?);
        }
        let mut stack = Self::from_slices(name, slices)?;
        stack.mask = mask;
        stack.source = Some(volume);
        Ok(stack)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slices(&self) -> &[Slice] {
        &self.slices
    }

    pub fn slices_mut(&mut self) -> &mut [Slice] {
        &mut self.slices
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn mask(&self) -> Option<&VolumeMask> {
        self.mask.as_ref()
    }

    /// The 3D acquisition the stack was sliced from, if any.
    pub fn source_volume(&self) -> Option<&Volume> {
        self.source.as_ref()
    }

    /// Compose `t` onto the stack and every slice it owns.
    pub fn apply_transform(&mut self, t: &Transform) {
        self.transform = t.compose(&self.transform);
        for slice in &mut self.slices {
            let updated = t.compose(slice.transform());
            slice.set_transform(updated);
        }
    }

    pub fn slice_transforms(&self) -> Vec<Transform> {
        self.slices.iter().map(|s| *s.transform()).collect()
    }

    /// Stack transform plus every slice transform.
    pub fn snapshot(&self) -> TransformSnapshot {
        TransformSnapshot {
            stack: self.transform,
            slices: self.slice_transforms(),
        }
    }

    pub fn restore(&mut self, snapshot: &TransformSnapshot) {
        self.transform = snapshot.stack;
        for (slice, t) in self.slices.iter_mut().zip(&snapshot.slices) {
            slice.set_transform(*t);
        }
    }
}

/// Transforms of one stack at a point in time, see [`Stack::snapshot`].
#[derive(Clone, Debug, PartialEq)]
pub struct TransformSnapshot {
    pub stack: Transform,
    pub slices: Vec<Transform>,
}
