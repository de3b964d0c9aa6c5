//! Two-step cycle orchestrator: alternate S2V registration and SRR.
//!
//! ```text
//! Initializing ─► Registering ─► Reconstructing ─┬─► Converged
//!                      ▲                          │
//!                      └──────── next cycle ◄─────┘
//!        any state ─► Failed
//! ```
//!
//! The volume is read-only while slices register against it and is replaced
//! wholesale when a reconstruction pass succeeds. Transforms are rolled back
//! to the last successful cycle on failure, so the volume and the transforms
//! available afterwards always belong together.

pub mod params;

pub use params::CycleConfig;

use crate::cancel::CancellationToken;
use crate::diagnostics::{
    elapsed_ms, transform_records, CycleReport, CycleState, FailureReport, InitializationReport,
    RunReport, TimingBreakdown, TransformRecord,
};
use crate::error::{Component, CycleFailure, Result, SrrError};
use crate::image::Volume;
use crate::operator::ImagingOperator;
use crate::registration::{register_stacks, register_volume};
use crate::sda::{reconstruction_space, scattered_data_approximation};
use crate::solver::{reconstruct, SliceSystem};
use crate::stack::{Stack, TransformSnapshot};
use log::{info, warn};
use std::time::Instant;

pub struct CycleOrchestrator {
    config: CycleConfig,
    stacks: Vec<Stack>,
    state: CycleState,
    cycle: usize,
    volume: Option<Volume>,
    seed: Option<Volume>,
    /// Stack and slice transforms belonging to the current volume.
    committed: Vec<TransformSnapshot>,
    pending_registration: Option<crate::registration::PassReport>,
    initialization: Option<InitializationReport>,
    reports: Vec<CycleReport>,
    failure: Option<CycleFailure>,
    cancel: CancellationToken,
}

impl CycleOrchestrator {
    /// Validate `config` against `stacks`. No image processing happens here.
    pub fn new(stacks: Vec<Stack>, config: CycleConfig) -> Result<Self> {
        config.validate(stacks.len())?;
        let committed = stacks.iter().map(Stack::snapshot).collect();
        Ok(Self {
            config,
            stacks,
            state: CycleState::Initializing,
            cycle: 0,
            volume: None,
            seed: None,
            committed,
            pending_registration: None,
            initialization: None,
            reports: Vec::new(),
            failure: None,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Start from `volume` instead of the SDA seed; its grid becomes the
    /// reconstruction space.
    pub fn with_initial_volume(mut self, volume: Volume) -> Result<Self> {
        volume.geometry.validate()?;
        ImagingOperator::for_volume(&volume, self.config.psf)?;
        self.seed = Some(volume);
        Ok(self)
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    /// 1-based index of the current (or last) cycle; 0 before the first.
    pub fn cycle(&self) -> usize {
        self.cycle
    }

    pub fn config(&self) -> &CycleConfig {
        &self.config
    }

    /// Volume of the last successful cycle (or the seed).
    pub fn volume(&self) -> Option<&Volume> {
        self.volume.as_ref()
    }

    pub fn stacks(&self) -> &[Stack] {
        &self.stacks
    }

    pub fn reports(&self) -> &[CycleReport] {
        &self.reports
    }

    pub fn failure(&self) -> Option<&CycleFailure> {
        self.failure.as_ref()
    }

    pub fn transform_records(&self) -> Vec<TransformRecord> {
        transform_records(&self.stacks)
    }

    pub fn report(&self) -> RunReport {
        RunReport {
            state: self.state,
            cycles_completed: self.reports.len(),
            initialization: self.initialization.clone(),
            cycles: self.reports.clone(),
            failure: self.failure.as_ref().map(FailureReport::from),
        }
    }

    /// Hand back the stacks (with their final transforms) and the volume.
    pub fn into_parts(self) -> (Vec<Stack>, Option<Volume>) {
        (self.stacks, self.volume)
    }

    /// Drive the state machine to a terminal state.
    pub fn run(&mut self) -> std::result::Result<RunReport, CycleFailure> {
        while !self.state.is_terminal() {
            self.step()?;
        }
        match &self.failure {
            Some(f) => Err(f.clone()),
            None => Ok(self.report()),
        }
    }

    /// Perform one transition.
    pub fn step(&mut self) -> std::result::Result<CycleState, CycleFailure> {
        let (component, outcome) = match self.state {
            CycleState::Initializing => (Component::Initialization, self.initialize()),
            CycleState::Registering => (Component::Registration, self.register()),
            CycleState::Reconstructing => (Component::Reconstruction, self.reconstruct()),
            CycleState::Converged | CycleState::Failed => return Ok(self.state),
        };
        match outcome {
            Ok(next) => {
                self.state = next;
                Ok(next)
            }
            Err(source) => Err(self.fail(component, source)),
        }
    }

    fn fail(&mut self, component: Component, source: SrrError) -> CycleFailure {
        for (stack, snapshot) in self.stacks.iter_mut().zip(&self.committed) {
            stack.restore(snapshot);
        }
        self.pending_registration = None;
        let failure = CycleFailure {
            cycle: self.cycle,
            component,
            source,
        };
        warn!("{failure}");
        self.state = CycleState::Failed;
        self.failure = Some(failure.clone());
        failure
    }

    fn initialize(&mut self) -> Result<CycleState> {
        let start = Instant::now();
        self.cancel.check()?;
        let mut report = InitializationReport::default();
        let target = self.config.target_stack;

        if self.config.prealign_stacks {
            let cfg = self.config.prealignment();
            for s in 0..self.stacks.len() {
                if s == target {
                    continue;
                }
                self.cancel.check()?;
                let (fixed, moving) = (&self.stacks[target], &self.stacks[s]);
                let (Some(fixed_vol), Some(moving_vol)) = (fixed.source_volume(), moving.source_volume())
                else {
                    warn!("stack `{}` has no source volume, not pre-aligned", moving.name());
                    continue;
                };
                let stage = Instant::now();
                let outcome = register_volume(moving_vol, moving.mask(), fixed_vol, fixed.mask(), &cfg)?;
                let name = moving.name().to_string();
                self.stacks[s].apply_transform(&outcome.transform);
                report.timings.push(format!("prealign {name}"), elapsed_ms(stage));
                report.prealigned.push(name);
            }
        }

        let volume = match self.seed.take() {
            Some(v) => v,
            None => {
                let stage = Instant::now();
                let space = reconstruction_space(&self.stacks[target], &self.config.space)?;
                let seed = scattered_data_approximation(&self.stacks, &space, &self.config.sda);
                report.timings.push("sda", elapsed_ms(stage));
                seed
            }
        };
        report.volume_size = volume.size;
        report.resolution = volume.geometry.spacing[0];
        report.timings.total_ms = elapsed_ms(start);
        info!(
            "initialized {:?} volume at {:.3} mm from {} stack(s)",
            volume.size,
            report.resolution,
            self.stacks.len()
        );

        self.committed = self.stacks.iter().map(Stack::snapshot).collect();
        self.volume = Some(volume);
        self.initialization = Some(report);
        self.cycle = 1;
        Ok(CycleState::Registering)
    }

    fn current_volume(volume: Option<&Volume>) -> Result<&Volume> {
        volume.ok_or_else(|| SrrError::config("volume", "orchestrator is not initialized"))
    }

    fn register(&mut self) -> Result<CycleState> {
        let cfg = self.config.registration_for(self.cycle);
        let volume = Self::current_volume(self.volume.as_ref())?;
        let pass = register_stacks(&mut self.stacks, volume, &cfg, &self.cancel)?;
        self.pending_registration = Some(pass);
        Ok(CycleState::Reconstructing)
    }

    fn reconstruct(&mut self) -> Result<CycleState> {
        let start = Instant::now();
        let mut timings = TimingBreakdown::default();
        let first = self.cycle == 1;
        let settings = self.config.regularization.settings(first);
        let previous = Self::current_volume(self.volume.as_ref())?.clone();

        let op = ImagingOperator::for_volume(&previous, self.config.psf)?;
        let stacks = &self.stacks;
        let system = timings.measure("prepare", || -> Result<SliceSystem> {
            Ok(SliceSystem::new(op.prepare_stacks(stacks)?, op.voxel_count()))
        })?;
        let (loss, cancel) = (&self.config.data_loss, &self.cancel);
        let outcome = timings.measure("solve", || reconstruct(&system, &previous, &settings, loss, cancel))?;

        let relative_change = outcome.volume.relative_change(&previous);
        timings.total_ms = elapsed_ms(start);
        let objective = outcome.report.final_value.total;
        info!(
            "cycle {}: {} objective {:.6e}, relative change {:.3e}",
            self.cycle,
            outcome.report.solver,
            objective,
            relative_change
        );

        self.reports.push(CycleReport {
            cycle: self.cycle,
            registration: self.pending_registration.take().unwrap_or_default(),
            solver: outcome.report,
            objective,
            relative_change,
            timings,
        });
        self.volume = Some(outcome.volume);
        self.committed = self.stacks.iter().map(Stack::snapshot).collect();

        let converged_early = self
            .config
            .convergence_tolerance
            .is_some_and(|tol| relative_change < tol);
        if self.cycle >= self.config.two_step_cycles || converged_early {
            info!("converged after {} cycle(s)", self.cycle);
            Ok(CycleState::Converged)
        } else {
            self.cycle += 1;
            Ok(CycleState::Registering)
        }
    }
}
