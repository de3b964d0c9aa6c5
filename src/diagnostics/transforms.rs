use crate::stack::Stack;
use crate::transform::{Transform, TransformKind};
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// Motion-correction result of one slice, as written to disk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformRecord {
    pub stack: String,
    pub slice: usize,
    pub kind: TransformKind,
    /// Euler `(αx, αy, αz, tx, ty, tz)` about `center`, or the 12 affine
    /// coefficients.
    pub parameters: Vec<f64>,
    pub center: [f64; 3],
    pub matrix: Matrix3<f64>,
    pub translation: Vector3<f64>,
}

impl TransformRecord {
    pub fn new(stack: &str, slice: usize, t: &Transform) -> Self {
        Self {
            stack: stack.to_string(),
            slice,
            kind: t.kind(),
            parameters: t.parameters(),
            center: [t.center()[0], t.center()[1], t.center()[2]],
            matrix: *t.linear(),
            translation: *t.translation(),
        }
    }
}

pub fn transform_records(stacks: &[Stack]) -> Vec<TransformRecord> {
    stacks
        .iter()
        .flat_map(|stack| {
            stack
                .slices()
                .iter()
                .map(move |s| TransformRecord::new(stack.name(), s.index(), s.transform()))
        })
        .collect()
}
