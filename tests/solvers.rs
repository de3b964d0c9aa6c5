mod common;

use common::init_logger;
use common::phantom::{compact_phantom, rmse};
use nalgebra::{DMatrix, DVector};
use slice_srr::loss::{DataLossConfig, DataLossKind};
use slice_srr::operator::ImagingOperator;
use slice_srr::psf::PsfConfig;
use slice_srr::regularizer::{RegularizationKind, Regularizer};
use slice_srr::solver::{
    reconstruct, DivergenceConfig, LinearOperator, PrimalDualVariant, Problem, RegularizationConfig, SliceSystem,
    SolverChoice,
};
use slice_srr::synthetic::{simulate_stack, Orientation, StackSimulation};
use slice_srr::{CancellationToken, SrrError, Stack, Volume};

/// Three orthogonal stacks sampling `truth` at its own resolution.
fn orthogonal_stacks(truth: &Volume, thickness: f64) -> Vec<Stack> {
    [Orientation::Axial, Orientation::Coronal, Orientation::Sagittal]
        .into_iter()
        .map(|orientation| {
            let sim = StackSimulation {
                orientation,
                thickness,
                ..StackSimulation::default()
            };
            simulate_stack(orientation.name(), truth, &sim, &PsfConfig::default())
                .unwrap()
                .0
        })
        .collect()
}

fn system_for(volume: &Volume, stacks: &[Stack]) -> SliceSystem {
    let op = ImagingOperator::for_volume(volume, PsfConfig::default()).unwrap();
    SliceSystem::new(op.prepare_stacks(stacks).unwrap(), op.voxel_count())
}

fn dense(system: &SliceSystem) -> DMatrix<f64> {
    let (m, n) = (system.rows(), system.cols());
    let mut a = DMatrix::zeros(m, n);
    let mut e = vec![0.0; n];
    let mut col = vec![0.0; m];
    for j in 0..n {
        e[j] = 1.0;
        system.apply(&e, &mut col);
        a.set_column(j, &DVector::from_column_slice(&col));
        e[j] = 0.0;
    }
    a
}

#[test]
fn unregularized_lsmr_matches_dense_least_squares() {
    init_logger();
    let truth = compact_phantom(5, 1.0);
    let stacks = orthogonal_stacks(&truth, 1.0);
    let system = system_for(&truth, &stacks);

    let a = dense(&system);
    let y = DVector::from_column_slice(system.observed());
    let ata = a.transpose() * &a;
    let expected = ata.lu().solve(&(a.transpose() * y)).expect("full column rank");

    for kind in [RegularizationKind::Tk0L2, RegularizationKind::Tk1L2] {
        let config = RegularizationConfig {
            kind,
            alpha: 0.0,
            alpha_first: 0.0,
            iter_max: 500,
            iter_max_first: 500,
            tolerance: 1e-14,
            ..RegularizationConfig::default()
        };
        let x0 = truth.with_data(vec![0.0; truth.len()]);
        let out = reconstruct(
            &system,
            &x0,
            &config.settings(false),
            &DataLossConfig::default(),
            &CancellationToken::new(),
        )
        .unwrap();
        let err = out
            .volume
            .data
            .iter()
            .zip(expected.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        assert!(err < 1e-6, "{}: max deviation {err}", kind.name());
        assert!(out.report.final_value.data < 1e-10);
    }
}

#[test]
fn admm_and_primal_dual_agree_on_tv() {
    init_logger();
    let truth = compact_phantom(8, 1.0);
    let stacks = orthogonal_stacks(&truth, 2.0);
    let system = system_for(&truth, &stacks);
    let x0 = truth.with_data(vec![0.0; truth.len()]);
    let loss = DataLossConfig::default();

    let solve = |solver: SolverChoice, iterations: usize| {
        let config = RegularizationConfig {
            kind: RegularizationKind::TvL2,
            solver,
            alpha: 0.01,
            alpha_first: 0.01,
            iterations,
            iter_max: 20,
            iter_max_first: 20,
            tolerance: 0.0,
            ..RegularizationConfig::default()
        };
        config.validate(&loss).unwrap();
        reconstruct(&system, &x0, &config.settings(false), &loss, &CancellationToken::new()).unwrap()
    };
    let admm = solve(SolverChoice::Admm, 60);
    let pd = solve(SolverChoice::PrimalDual, 200);

    let (fa, fp) = (admm.report.final_value.total, pd.report.final_value.total);
    assert!(fa < admm.report.initial.total);
    assert!(fp < pd.report.initial.total);
    let gap = (fa - fp).abs() / fa.max(fp);
    assert!(gap < 0.05, "ADMM {fa:.6e} vs PD {fp:.6e}");
}

#[test]
fn robust_loss_discounts_a_corrupted_slice() {
    init_logger();
    let truth = compact_phantom(8, 1.0);
    let clean = orthogonal_stacks(&truth, 2.0);

    // Replace the central axial slice by a bright artefact.
    let axial = clean[0].source_volume().unwrap().clone();
    let mut corrupted = axial.clone();
    let [nx, ny, nz] = axial.size;
    let k = nz / 2;
    corrupted.data[k * nx * ny..(k + 1) * nx * ny]
        .iter_mut()
        .for_each(|v| *v += 3.0);
    let mut stacks = clean.clone();
    stacks[0] = Stack::from_volume("axial", corrupted, None).unwrap();

    let system = system_for(&truth, &stacks);
    let config = RegularizationConfig {
        kind: RegularizationKind::Tk1L2,
        solver: SolverChoice::Admm,
        alpha: 0.01,
        alpha_first: 0.01,
        iterations: 30,
        iter_max: 20,
        iter_max_first: 20,
        ..RegularizationConfig::default()
    };
    let solve = |x0: &Volume, kind: DataLossKind| {
        let loss = DataLossConfig { kind, scale: 0.5 };
        reconstruct(&system, x0, &config.settings(false), &loss, &CancellationToken::new())
            .unwrap()
            .volume
    };
    let linear = solve(&truth.with_data(vec![0.0; truth.len()]), DataLossKind::Linear);
    let cauchy = solve(&linear, DataLossKind::Cauchy);
    let (e_lin, e_cau) = (rmse(&linear, &truth), rmse(&cauchy, &truth));
    assert!(e_cau < e_lin, "cauchy {e_cau:.4} vs linear {e_lin:.4}");
}

#[test]
fn cancelled_solve_returns_cancelled() {
    let truth = compact_phantom(5, 1.0);
    let stacks = orthogonal_stacks(&truth, 1.0);
    let system = system_for(&truth, &stacks);
    let token = CancellationToken::new();
    token.cancel();
    let err = reconstruct(
        &system,
        &truth,
        &RegularizationConfig::default().settings(true),
        &DataLossConfig::default(),
        &token,
    )
    .unwrap_err();
    assert_eq!(err, SrrError::Cancelled);
}

/// TK1 settings solved to machine precision by LSMR.
fn exact_tk1(alpha: f64) -> RegularizationConfig {
    RegularizationConfig {
        kind: RegularizationKind::Tk1L2,
        alpha,
        alpha_first: alpha,
        iter_max: 500,
        iter_max_first: 500,
        tolerance: 1e-14,
        ..RegularizationConfig::default()
    }
}

#[test]
fn primal_dual_variants_agree_with_lsmr_on_tk1() {
    init_logger();
    let truth = compact_phantom(5, 1.0);
    let stacks = orthogonal_stacks(&truth, 1.0);
    let system = system_for(&truth, &stacks);
    let x0 = truth.with_data(vec![0.0; truth.len()]);
    let loss = DataLossConfig::default();
    let cancel = CancellationToken::new();

    let reference = reconstruct(&system, &x0, &exact_tk1(0.01).settings(false), &loss, &cancel).unwrap();
    let optimum = reference.report.final_value.total;

    for (variant, pd_gamma) in [
        (PrimalDualVariant::Alg2, 0.0),
        (PrimalDualVariant::Alg2Ahmod, 0.0),
        (PrimalDualVariant::Alg3, 1e-3),
    ] {
        let config = RegularizationConfig {
            solver: SolverChoice::PrimalDual,
            pd_variant: variant,
            pd_gamma,
            iterations: 300,
            iter_max: 100,
            iter_max_first: 100,
            tolerance: 0.0,
            divergence: DivergenceConfig {
                patience: 1000,
                rel_tolerance: 1e-3,
            },
            ..exact_tk1(0.01)
        };
        config.validate(&loss).unwrap();
        let out = reconstruct(&system, &x0, &config.settings(false), &loss, &cancel).unwrap();
        let value = out.report.final_value.total;
        let gap = (value - optimum) / optimum;
        assert!(gap > -1e-9, "{variant:?} below the optimum: {value:.9e} vs {optimum:.9e}");
        assert!(gap < 1e-2, "{variant:?}: {value:.6e} vs {optimum:.6e}");
        assert!(rmse(&out.volume, &reference.volume) < 0.05, "{variant:?}");
    }
}

#[test]
fn huber_objective_sits_between_tv_and_tikhonov() {
    init_logger();
    let truth = compact_phantom(8, 1.0);
    let stacks = orthogonal_stacks(&truth, 2.0);
    let system = system_for(&truth, &stacks);
    let x0 = truth.with_data(vec![0.0; truth.len()]);
    let loss = DataLossConfig::default();
    let cancel = CancellationToken::new();
    let (alpha, gamma) = (0.01, 0.05);

    let pd = |kind: RegularizationKind| RegularizationConfig {
        kind,
        solver: SolverChoice::PrimalDual,
        alpha,
        alpha_first: alpha,
        huber_gamma: gamma,
        iterations: 200,
        iter_max: 20,
        iter_max_first: 20,
        tolerance: 0.0,
        ..RegularizationConfig::default()
    };
    let tv = reconstruct(&system, &x0, &pd(RegularizationKind::TvL2).settings(false), &loss, &cancel).unwrap();
    // Huber's quadratic branch is TK1 with weight alpha / gamma.
    let tk1 = reconstruct(&system, &x0, &exact_tk1(alpha / gamma).settings(false), &loss, &cancel).unwrap();
    let huber = reconstruct(
        &system,
        &tv.volume,
        &pd(RegularizationKind::HuberL2).settings(false),
        &loss,
        &cancel,
    )
    .unwrap();

    let j_huber = huber.report.final_value.total;
    let j_tv = tv.report.final_value.total;
    let j_tk1 = tk1.report.final_value.total;
    assert!(j_huber <= j_tv * (1.0 + 1e-12), "huber {j_huber:.6e} vs tv {j_tv:.6e}");
    assert!(j_huber <= j_tk1 * 1.05, "huber {j_huber:.6e} vs tk1 {j_tk1:.6e}");

    // |t| - gamma / 2 <= huber(t) per voxel bounds the TV objective of the
    // Huber solution from above.
    let tv_reg = Regularizer::new(RegularizationKind::TvL2, truth.size, &truth.geometry, gamma);
    let tv_of_huber = Problem {
        system: &system,
        regularizer: &tv_reg,
        loss,
        alpha,
    }
    .evaluate(&huber.volume.data)
    .total;
    let slack = alpha * truth.len() as f64 * gamma / 2.0;
    assert!(tv_of_huber - slack <= j_huber * (1.0 + 1e-12));
    assert!(tv_of_huber >= j_huber * (1.0 - 1e-12));
}

#[test]
fn primal_dual_restarted_at_the_optimum_fails_on_the_first_iteration() {
    init_logger();
    let truth = compact_phantom(5, 1.0);
    let stacks = orthogonal_stacks(&truth, 1.0);
    let system = system_for(&truth, &stacks);
    let loss = DataLossConfig::default();
    let cancel = CancellationToken::new();

    let exact = exact_tk1(0.05);
    let x0 = truth.with_data(vec![0.0; truth.len()]);
    let optimum = reconstruct(&system, &x0, &exact.settings(false), &loss, &cancel).unwrap();

    // The zero dual start moves the first primal iterate off the minimizer.
    let restart = RegularizationConfig {
        solver: SolverChoice::PrimalDual,
        iterations: 10,
        iter_max: 200,
        iter_max_first: 200,
        divergence: DivergenceConfig {
            patience: 1,
            rel_tolerance: 0.0,
        },
        ..exact
    };
    restart.validate(&loss).unwrap();
    let err = reconstruct(&system, &optimum.volume, &restart.settings(false), &loss, &cancel).unwrap_err();
    match err {
        SrrError::SolverDivergence { iteration, objective } => {
            assert_eq!(iteration, 1);
            assert!(objective > optimum.report.final_value.total);
        }
        other => panic!("unexpected error {other}"),
    }
}
