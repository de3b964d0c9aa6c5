mod common;

use common::init_logger;
use common::phantom::{compact_phantom, resample_through};
use slice_srr::cycle::{CycleConfig, CycleOrchestrator};
use slice_srr::loss::{DataLossConfig, DataLossKind};
use slice_srr::propagation::{propagate_mask, PropagationConfig};
use slice_srr::psf::PsfConfig;
use slice_srr::registration::{Metric, RegistrationConfig};
use slice_srr::study::similarity;
use slice_srr::solver::{RegularizationConfig, SolverChoice};
use slice_srr::stack::TransformSnapshot;
use slice_srr::synthetic::{simulate_stack, MotionConfig, Orientation, StackSimulation};
use slice_srr::{CancellationToken, Component, CycleState, SrrError, Stack, Transform};

fn moving_stacks(n: usize) -> (slice_srr::Volume, Vec<Stack>) {
    let truth = compact_phantom(n, 1.0);
    let stacks = [
        (Orientation::Axial, 0.0),
        (Orientation::Coronal, 3.0),
        (Orientation::Sagittal, 7.0),
    ]
    .into_iter()
    .map(|(orientation, phase)| {
        let sim = StackSimulation {
            orientation,
            thickness: 2.0,
            motion: MotionConfig {
                rotation_deg: 2.0,
                translation: 1.0,
                phase,
            },
            ..StackSimulation::default()
        };
        simulate_stack(orientation.name(), &truth, &sim, &PsfConfig::default())
            .unwrap()
            .0
    })
    .collect();
    (truth, stacks)
}

/// Registration metric equal to the SRR data term, and identical solver
/// settings on every cycle.
fn consistent_config(cycles: usize) -> CycleConfig {
    CycleConfig {
        two_step_cycles: cycles,
        regularization: RegularizationConfig {
            alpha: 0.03,
            alpha_first: 0.03,
            iter_max: 10,
            iter_max_first: 10,
            ..RegularizationConfig::default()
        },
        registration: RegistrationConfig {
            metric: Metric::MeanSquares,
            psf_aware: true,
            search_angle_deg: 10.0,
            ..RegistrationConfig::default()
        },
        ..CycleConfig::default()
    }
}

#[test]
fn objective_does_not_increase_across_cycles() {
    init_logger();
    let (_, stacks) = moving_stacks(16);
    let mut orchestrator = CycleOrchestrator::new(stacks, consistent_config(3)).unwrap();
    let report = orchestrator.run().unwrap();
    assert_eq!(report.state, CycleState::Converged);
    assert_eq!(report.cycles_completed, 3);

    let objectives = report.objectives();
    for pair in objectives.windows(2) {
        assert!(pair[1] <= pair[0] * (1.0 + 1e-9), "objective rose: {objectives:?}");
    }
    for cycle in &report.cycles {
        assert!(cycle.solver.final_value.total <= cycle.solver.initial.total * (1.0 + 1e-9));
    }
}

#[test]
fn reconstruction_approaches_the_phantom() {
    init_logger();
    let (truth, stacks) = moving_stacks(16);
    let mut orchestrator = CycleOrchestrator::new(stacks, consistent_config(2)).unwrap();
    orchestrator.run().unwrap();
    let volume = orchestrator.volume().unwrap();
    let m = similarity(volume, &truth);
    assert!(m.ncc > 0.9, "ncc {:.4}, rmse {:.4}", m.ncc, m.rmse);
}

#[test]
fn cauchy_loss_with_lsmr_is_a_configuration_error() {
    let (_, stacks) = moving_stacks(8);
    let config = CycleConfig {
        data_loss: DataLossConfig {
            kind: DataLossKind::Cauchy,
            scale: 1.0,
        },
        regularization: RegularizationConfig {
            solver: SolverChoice::Lsmr,
            ..RegularizationConfig::default()
        },
        ..CycleConfig::default()
    };
    match CycleOrchestrator::new(stacks, config) {
        Err(SrrError::Configuration { field, .. }) => assert_eq!(field, "data_loss"),
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("cauchy + lsmr accepted"),
    }
}

#[test]
fn cancellation_mid_run_rolls_back_to_the_last_cycle() {
    init_logger();
    let (_, stacks) = moving_stacks(12);
    let token = CancellationToken::new();
    let mut orchestrator = CycleOrchestrator::new(stacks, consistent_config(3))
        .unwrap()
        .with_cancellation(token.clone());

    // Initialization, then the first full cycle.
    for _ in 0..3 {
        orchestrator.step().unwrap();
    }
    assert_eq!(orchestrator.state(), CycleState::Registering);
    assert_eq!(orchestrator.cycle(), 2);
    let committed: Vec<TransformSnapshot> = orchestrator.stacks().iter().map(Stack::snapshot).collect();
    let volume = orchestrator.volume().unwrap().clone();

    token.cancel();
    let failure = orchestrator.step().unwrap_err();
    assert_eq!(failure.cycle, 2);
    assert_eq!(failure.component, Component::Registration);
    assert_eq!(failure.source, SrrError::Cancelled);
    assert_eq!(orchestrator.state(), CycleState::Failed);
    assert_eq!(orchestrator.volume(), Some(&volume));
    let after: Vec<TransformSnapshot> = orchestrator.stacks().iter().map(Stack::snapshot).collect();
    assert_eq!(after, committed);
    assert!(orchestrator.report().failure.is_some());
}

#[test]
fn template_mask_follows_the_anatomy() {
    init_logger();
    let template = compact_phantom(24, 1.5);
    let template_mask = template.with_data(template.data.iter().map(|&v| u8::from(v > 0.3)).collect());
    let center = template.physical_center();
    let motion = Transform::euler_3d([0.0, 0.0, 0.15], [3.0, -2.0, 1.5], center);
    let subject = resample_through(&template, &motion.inverse().unwrap());
    let subject_mask = subject.with_data(subject.data.iter().map(|&v| u8::from(v > 0.3)).collect());

    let config = PropagationConfig {
        dilation_radius: 0,
        registration: RegistrationConfig {
            metric: Metric::MeanSquares,
            ..PropagationConfig::default().registration
        },
    };
    let out = propagate_mask(&template, &template_mask, &subject, &config).unwrap();

    let (mut both, mut either) = (0usize, 0usize);
    for (a, b) in out.mask.data.iter().zip(&subject_mask.data) {
        both += usize::from(*a != 0 && *b != 0);
        either += usize::from(*a != 0 || *b != 0);
    }
    let dice_like = both as f64 / either.max(1) as f64;
    assert!(dice_like > 0.8, "overlap {dice_like:.3}");
}

#[test]
fn warm_start_volume_defines_the_grid() {
    init_logger();
    let (truth, stacks) = moving_stacks(12);
    let config = CycleConfig {
        two_step_cycles: 1,
        ..consistent_config(1)
    };
    let mut orchestrator = CycleOrchestrator::new(stacks, config)
        .unwrap()
        .with_initial_volume(truth.clone())
        .unwrap();
    let report = orchestrator.run().unwrap();
    assert_eq!(report.initialization.unwrap().volume_size, truth.size);
    assert_eq!(orchestrator.transform_records().len(), 3 * 6);

    let (stacks, volume) = orchestrator.into_parts();
    assert_eq!(stacks.len(), 3);
    let volume = volume.unwrap();
    assert_eq!(volume.geometry, truth.geometry);
    assert!(similarity(&volume, &truth).ncc > 0.9);
}
