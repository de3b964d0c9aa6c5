//! Rigid and affine transforms in a single tagged representation.
//!
//! Every transform maps a physical point `x` to `A (x - c) + t + c`, where `A`
//! is the linear part, `t` the translation and `c` the center of rotation.
//! Rigid 2D transforms are embedded in 3D as rotations about the z axis.
//! Composition and inversion work on the matrix/vector representation only,
//! so they are implemented once for all kinds.

use crate::error::{Result, SrrError};
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

const SINGULAR_EPS: f64 = 1e-12;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransformKind {
    Rigid2D,
    Rigid3D,
    Affine,
}

impl TransformKind {
    /// Kind of `outer ∘ inner`: the "widest" of the two.
    fn widest(self, other: TransformKind) -> TransformKind {
        use TransformKind::*;
        match (self, other) {
            (Affine, _) | (_, Affine) => Affine,
            (Rigid3D, _) | (_, Rigid3D) => Rigid3D,
            _ => Rigid2D,
        }
    }

    pub fn is_rigid(self) -> bool {
        !matches!(self, TransformKind::Affine)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    kind: TransformKind,
    linear: Matrix3<f64>,
    translation: Vector3<f64>,
    center: Vector3<f64>,
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity(TransformKind::Rigid3D)
    }
}

impl Transform {
    pub fn identity(kind: TransformKind) -> Self {
        Self {
            kind,
            linear: Matrix3::identity(),
            translation: Vector3::zeros(),
            center: Vector3::zeros(),
        }
    }

    /// In-plane rotation by `angle` (radians) about `center`, followed by a
    /// translation.
    pub fn rigid_2d(angle: f64, translation: [f64; 2], center: [f64; 2]) -> Self {
        let (s, c) = angle.sin_cos();
        Self {
            kind: TransformKind::Rigid2D,
            linear: Matrix3::new(c, -s, 0.0, s, c, 0.0, 0.0, 0.0, 1.0),
            translation: Vector3::new(translation[0], translation[1], 0.0),
            center: Vector3::new(center[0], center[1], 0.0),
        }
    }

    /// Euler rotation `Rz · Rx · Ry` with angles `(ax, ay, az)` in radians.
    pub fn euler_3d(angles: [f64; 3], translation: [f64; 3], center: Vector3<f64>) -> Self {
        Self {
            kind: TransformKind::Rigid3D,
            linear: euler_matrix(angles[0], angles[1], angles[2]),
            translation: Vector3::from(translation),
            center,
        }
    }

    /// Rigid transform from the 6-vector `(ax, ay, az, tx, ty, tz)`.
    pub fn from_euler_parameters(params: &[f64; 6], center: Vector3<f64>) -> Self {
        Self::euler_3d(
            [params[0], params[1], params[2]],
            [params[3], params[4], params[5]],
            center,
        )
    }

    pub fn affine(linear: Matrix3<f64>, translation: Vector3<f64>, center: Vector3<f64>) -> Self {
        Self {
            kind: TransformKind::Affine,
            linear,
            translation,
            center,
        }
    }

    pub fn kind(&self) -> TransformKind {
        self.kind
    }

    pub fn linear(&self) -> &Matrix3<f64> {
        &self.linear
    }

    pub fn translation(&self) -> &Vector3<f64> {
        &self.translation
    }

    pub fn center(&self) -> &Vector3<f64> {
        &self.center
    }

    /// Constant term `b` of the equivalent `x ↦ A x + b` form.
    pub fn offset(&self) -> Vector3<f64> {
        self.translation + self.center - self.linear * self.center
    }

    #[inline]
    pub fn apply_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.linear * (p - self.center) + self.translation + self.center
    }

    #[inline]
    pub fn apply_vector(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.linear * v
    }

    /// Returns `self ∘ inner`, i.e. `inner` is applied first.
    pub fn compose(&self, inner: &Transform) -> Transform {
        let (a_o, t_o, c_o) = (&self.linear, &self.translation, &self.center);
        let (a_i, t_i, c_i) = (&inner.linear, &inner.translation, &inner.center);
        Transform {
            kind: self.kind.widest(inner.kind),
            linear: a_o * a_i,
            translation: a_o * (t_i + c_i - c_o) + t_o + c_o - c_i,
            center: *c_i,
        }
    }

    /// Inverse about the same center. Rigid transforms are always
    /// invertible; affine ones fail on a singular linear part.
    pub fn inverse(&self) -> Result<Transform> {
        let inv = if self.kind.is_rigid() {
            self.linear.transpose()
        } else {
            if self.linear.determinant().abs() <= SINGULAR_EPS {
                return Err(SrrError::geometry("affine linear part is singular"));
            }
            self.linear
                .try_inverse()
                .ok_or_else(|| SrrError::geometry("affine linear part is singular"))?
        };
        Ok(Transform {
            kind: self.kind,
            linear: inv,
            translation: -(inv * self.translation),
            center: self.center,
        })
    }

    /// The same mapping expressed about a different center of rotation.
    pub fn recentered(&self, center: Vector3<f64>) -> Transform {
        let translation = self.offset() + self.linear * center - center;
        Transform {
            kind: self.kind,
            linear: self.linear,
            translation,
            center,
        }
    }

    /// Euler angles `(ax, ay, az)` of the linear part (`Rz · Rx · Ry`).
    pub fn euler_angles(&self) -> [f64; 3] {
        let m = &self.linear;
        let ax = m[(2, 1)].clamp(-1.0, 1.0).asin();
        let a = ax.cos();
        if a.abs() > 1e-5 {
            let ay = (-m[(2, 0)] / a).atan2(m[(2, 2)] / a);
            let az = (-m[(0, 1)] / a).atan2(m[(1, 1)] / a);
            [ax, ay, az]
        } else {
            let ay = m[(1, 0)].atan2(m[(0, 0)]);
            [ax, ay, 0.0]
        }
    }

    /// Kind-specific parameter vector: `(θ, tx, ty)` for rigid 2D,
    /// `(ax, ay, az, tx, ty, tz)` for rigid 3D, and the row-major matrix
    /// followed by the translation for affine transforms.
    pub fn parameters(&self) -> Vec<f64> {
        let t = &self.translation;
        match self.kind {
            TransformKind::Rigid2D => {
                vec![self.linear[(1, 0)].atan2(self.linear[(0, 0)]), t[0], t[1]]
            }
            TransformKind::Rigid3D => {
                let [ax, ay, az] = self.euler_angles();
                vec![ax, ay, az, t[0], t[1], t[2]]
            }
            TransformKind::Affine => {
                let mut out = Vec::with_capacity(12);
                for r in 0..3 {
                    for c in 0..3 {
                        out.push(self.linear[(r, c)]);
                    }
                }
                out.extend_from_slice(&[t[0], t[1], t[2]]);
                out
            }
        }
    }

    pub fn is_identity(&self, tol: f64) -> bool {
        (self.linear - Matrix3::identity()).abs().max() <= tol && self.offset().abs().max() <= tol
    }

    /// Largest distance between the images of `points` under `self` and
    /// `other`.
    pub fn max_displacement(&self, other: &Transform, points: &[Vector3<f64>]) -> f64 {
        points
            .iter()
            .map(|p| (self.apply_point(p) - other.apply_point(p)).norm())
            .fold(0.0, f64::max)
    }
}

pub(crate) fn euler_matrix(ax: f64, ay: f64, az: f64) -> Matrix3<f64> {
    let (sx, cx) = ax.sin_cos();
    let (sy, cy) = ay.sin_cos();
    let (sz, cz) = az.sin_cos();
    let rx = Matrix3::new(1.0, 0.0, 0.0, 0.0, cx, -sx, 0.0, sx, cx);
    let ry = Matrix3::new(cy, 0.0, sy, 0.0, 1.0, 0.0, -sy, 0.0, cy);
    let rz = Matrix3::new(cz, -sz, 0.0, sz, cz, 0.0, 0.0, 0.0, 1.0);
    rz * rx * ry
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Transform {
        Transform::euler_3d(
            [0.1, 0.2, -0.3],
            [0.0, -4.0, 10.0],
            Vector3::new(3.0, -2.0, 5.0),
        )
    }

    #[test]
    fn compose_with_inverse_is_identity() {
        let t = sample();
        let inv = t.inverse().unwrap();
        assert!(t.compose(&inv).is_identity(1e-12));
        assert!(inv.compose(&t).is_identity(1e-12));
    }

    #[test]
    fn composition_matches_sequential_application() {
        let outer = sample();
        let inner = Transform::rigid_2d(0.4, [1.5, -2.0], [10.0, 4.0]);
        let composite = outer.compose(&inner);
        assert_eq!(composite.kind(), TransformKind::Rigid3D);
        let p = Vector3::new(7.0, -1.0, 2.5);
        let expected = outer.apply_point(&inner.apply_point(&p));
        assert!((composite.apply_point(&p) - expected).norm() < 1e-12);
        assert_eq!(composite.center(), inner.center());
    }

    #[test]
    fn euler_parameters_round_trip() {
        let params = sample().recentered(Vector3::zeros()).parameters();
        let rebuilt = Transform::from_euler_parameters(
            &[params[0], params[1], params[2], params[3], params[4], params[5]],
            Vector3::zeros(),
        );
        let [ax, ay, az] = rebuilt.euler_angles();
        assert!((ax - 0.1).abs() < 1e-12);
        assert!((ay - 0.2).abs() < 1e-12);
        assert!((az + 0.3).abs() < 1e-12);
    }

    #[test]
    fn recentering_preserves_the_mapping() {
        let t = sample();
        let moved = t.recentered(Vector3::new(-8.0, 1.0, 0.5));
        let p = Vector3::new(1.0, 2.0, 3.0);
        assert!((t.apply_point(&p) - moved.apply_point(&p)).norm() < 1e-12);
    }

    #[test]
    fn singular_affine_is_not_invertible() {
        let t = Transform::affine(
            Matrix3::new(1.0, 2.0, 3.0, 2.0, 4.0, 6.0, 0.0, 0.0, 1.0),
            Vector3::zeros(),
            Vector3::zeros(),
        );
        assert!(matches!(t.inverse(), Err(SrrError::Geometry(_))));
    }

    #[test]
    fn rigid_2d_parameters() {
        let t = Transform::rigid_2d(-0.25, [3.0, 4.0], [0.0, 0.0]);
        let p = t.parameters();
        assert_eq!(p.len(), 3);
        assert!((p[0] + 0.25).abs() < 1e-12);
        assert!((p[1] - 3.0).abs() < 1e-12 && (p[2] - 4.0).abs() < 1e-12);
    }
}
