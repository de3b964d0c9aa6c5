use super::timing::TimingBreakdown;
use crate::error::{Component, CycleFailure};
use crate::registration::PassReport;
use crate::solver::SolveReport;
use serde::Serialize;

/// Lifecycle of a reconstruction run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CycleState {
    Initializing,
    Registering,
    Reconstructing,
    Converged,
    Failed,
}

impl CycleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CycleState::Converged | CycleState::Failed)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializationReport {
    /// Stacks rigidly pre-aligned to the target stack.
    pub prealigned: Vec<String>,
    pub volume_size: [usize; 3],
    pub resolution: f64,
    pub timings: TimingBreakdown,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub cycle: usize,
    pub registration: PassReport,
    pub solver: SolveReport,
    /// Objective of the new volume at the cycle's transforms.
    pub objective: f64,
    /// `‖x_new − x_old‖ / ‖x_old‖`
    pub relative_change: f64,
    pub timings: TimingBreakdown,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureReport {
    pub cycle: usize,
    pub component: Component,
    pub message: String,
}

impl From<&CycleFailure> for FailureReport {
    fn from(f: &CycleFailure) -> Self {
        Self {
            cycle: f.cycle,
            component: f.component,
            message: f.source.to_string(),
        }
    }
}

/// Everything an orchestrator run produced, minus the volume itself.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub state: CycleState,
    pub cycles_completed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initialization: Option<InitializationReport>,
    pub cycles: Vec<CycleReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReport>,
}

impl RunReport {
    /// Final SRR objective of every completed cycle.
    pub fn objectives(&self) -> Vec<f64> {
        self.cycles.iter().map(|c| c.objective).collect()
    }

    pub fn summary(&self) -> String {
        let last = self
            .cycles
            .last()
            .map(|c| format!("{:.6e}", c.objective))
            .unwrap_or_else(|| "-".to_string());
        format!(
            "{:?} after {} cycle(s), final objective {}",
            self.state, self.cycles_completed, last
        )
    }
}
