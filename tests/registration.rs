mod common;

use common::init_logger;
use common::phantom::{compact_phantom, resample_through};
use nalgebra::Vector3;
use slice_srr::image::{Geometry, Mask, Plane};
use slice_srr::psf::PsfConfig;
use slice_srr::registration::{
    register, register_stacks, register_volume, Initializer, Metric, RegistrationConfig, SliceStatus,
};
use slice_srr::synthetic::{simulate_stack, MotionConfig, Orientation, StackSimulation};
use slice_srr::{CancellationToken, Slice, SrrError, Stack, Transform};

#[test]
fn volume_self_registration_recovers_euler_motion() {
    init_logger();
    let fixed = compact_phantom(40, 1.5);
    let center = fixed.physical_center();
    let truth = Transform::euler_3d([0.1, 0.2, -0.3], [0.0, -4.0, 10.0], center);
    let moving = resample_through(&fixed, &truth);

    let config = RegistrationConfig {
        initializer: Initializer::Moments,
        metric: Metric::MeanSquares,
        ..RegistrationConfig::default()
    };
    let outcome = register_volume(&moving, None, &fixed, None, &config).unwrap();
    assert!(outcome.improved);

    let found = outcome.transform.recentered(center).parameters();
    let expected = truth.parameters();
    let err: f64 = found
        .iter()
        .zip(&expected)
        .map(|(a, b)| (a - b) * (a - b))
        .sum::<f64>()
        .sqrt();
    assert!(err < 0.5, "parameter error {err}: {found:?} vs {expected:?}");
}

fn moving_axial_stack() -> (slice_srr::Volume, Stack, Vec<Transform>) {
    let truth = compact_phantom(24, 1.0);
    let sim = StackSimulation {
        orientation: Orientation::Axial,
        thickness: 2.0,
        motion: MotionConfig {
            rotation_deg: 3.0,
            translation: 1.5,
            phase: 0.0,
        },
        ..StackSimulation::default()
    };
    let (stack, motion) = simulate_stack("axial", &truth, &sim, &PsfConfig::default()).unwrap();
    (truth, stack, motion)
}

fn center_errors(stack: &Stack, motion: &[Transform]) -> Vec<f64> {
    stack
        .slices()
        .iter()
        .zip(motion)
        .map(|(s, t)| {
            let c = s.native_center();
            (s.transform().apply_point(&c) - t.apply_point(&c)).norm()
        })
        .collect()
}

#[test]
fn psf_aware_slice_pass_reduces_motion_error() {
    init_logger();
    let (truth, stack, motion) = moving_axial_stack();
    // Border slices see almost no signal; judge the central ones.
    let central = |errors: Vec<f64>| -> f64 {
        let n = errors.len();
        errors[n / 4..n - n / 4].iter().sum()
    };
    let before = central(center_errors(&stack, &motion));

    let config = RegistrationConfig {
        metric: Metric::MeanSquares,
        psf_aware: true,
        search_angle_deg: 10.0,
        ..RegistrationConfig::default()
    };
    let mut stacks = vec![stack];
    let report = register_stacks(&mut stacks, &truth, &config, &CancellationToken::new()).unwrap();
    assert_eq!(report.slices.len(), stacks[0].len());
    assert!(report.registered > 0);

    let after = central(center_errors(&stacks[0], &motion));
    assert!(after < 0.5 * before, "error {before:.3} -> {after:.3}");
}

#[test]
fn slice_without_mask_keeps_its_transform() {
    let truth = compact_phantom(12, 1.0);
    let geometry = Geometry::new(
        truth.voxel_center(0, 0, 6),
        Vector3::new(1.0, 1.0, 2.0),
        nalgebra::Matrix3::identity(),
    );
    let mut slice = Slice::new(0, Plane::filled(12, 12, 0.5), Mask::filled(12, 12, 0), geometry).unwrap();
    let prior = Transform::euler_3d([0.02, 0.0, -0.01], [0.3, 0.0, 0.0], slice.native_center());
    slice.set_transform(prior);
    let mut stacks = vec![Stack::from_slices("empty", vec![slice]).unwrap()];

    let report = register_stacks(
        &mut stacks,
        &truth,
        &RegistrationConfig::default(),
        &CancellationToken::new(),
    )
    .unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.slices[0].status, SliceStatus::Skipped);
    assert_eq!(*stacks[0].slices()[0].transform(), prior);
}

#[test]
fn cancelled_pass_leaves_transforms_untouched() {
    let (truth, stack, _) = moving_axial_stack();
    let token = CancellationToken::new();
    token.cancel();
    let mut stacks = vec![stack];
    let err = register_stacks(&mut stacks, &truth, &RegistrationConfig::default(), &token).unwrap_err();
    assert_eq!(err, SrrError::Cancelled);
    assert!(stacks[0].slices().iter().all(|s| s.transform().is_identity(0.0)));
}

#[test]
fn single_slice_registration_walks_the_level_chain() {
    let (truth, stack, motion) = moving_axial_stack();
    let k = stack.len() / 2;
    let slice = &stack.slices()[k];
    let config = RegistrationConfig {
        metric: Metric::MeanSquares,
        psf_aware: true,
        search_angle_deg: 10.0,
        ..RegistrationConfig::default()
    };
    let outcome = register(slice, &truth, &config).unwrap();
    assert!(!outcome.skipped);
    assert_eq!(outcome.levels.len(), config.levels.shrink_factors.len());
    assert!(outcome.final_metric <= outcome.initial_metric);

    let corners = [slice.native_point(0, 0), slice.native_point(23, 23), slice.native_center()];
    let before = slice.transform().max_displacement(&motion[k], &corners);
    let after = outcome.transform.max_displacement(&motion[k], &corners);
    assert!(after < before, "{before:.3} -> {after:.3}");
}

/// One descent step per level and no displacement tolerance: no level can
/// report convergence.
fn exhausted_config(max_failed_fraction: f64) -> RegistrationConfig {
    RegistrationConfig {
        metric: Metric::MeanSquares,
        iterations: 1,
        gradient_tolerance: 0.0,
        displacement_tolerance: 0.0,
        max_failed_fraction,
        ..RegistrationConfig::default()
    }
}

#[test]
fn finest_level_without_convergence_is_a_registration_failure() {
    let (truth, stack, _) = moving_axial_stack();
    let slice = &stack.slices()[stack.len() / 2];
    match register(slice, &truth, &exhausted_config(0.5)) {
        Err(SrrError::RegistrationFailure { reason, .. }) => {
            assert!(reason.contains("finest level"), "{reason}");
        }
        Err(other) => panic!("unexpected error {other}"),
        Ok(outcome) => panic!("converged after one step: {:?}", outcome.levels),
    }
}

#[test]
fn unconverged_slices_are_flagged_and_keep_their_transforms() {
    init_logger();
    let (truth, stack, _) = moving_axial_stack();
    let before = stack.slice_transforms();
    let mut stacks = vec![stack];
    let report = register_stacks(&mut stacks, &truth, &exhausted_config(1.0), &CancellationToken::new()).unwrap();

    // Central slices carry signal, so their first step always moves.
    let n = stacks[0].len();
    for entry in &report.slices[n / 4..n - n / 4] {
        assert!(matches!(entry.status, SliceStatus::Failed(_)), "{entry:?}");
    }
    assert!(report.failed >= n / 2);
    for (entry, prior) in report.slices.iter().zip(&before) {
        if matches!(entry.status, SliceStatus::Failed(_)) {
            assert_eq!(stacks[0].slices()[entry.slice].transform(), prior);
        }
    }
}

#[test]
fn too_many_failed_slices_abort_the_pass() {
    let (truth, stack, _) = moving_axial_stack();
    let before = stack.snapshot();
    let mut stacks = vec![stack];
    let err = register_stacks(&mut stacks, &truth, &exhausted_config(0.25), &CancellationToken::new()).unwrap_err();
    assert!(matches!(err, SrrError::RegistrationFailure { .. }), "{err}");
    assert_eq!(stacks[0].snapshot(), before);
}
