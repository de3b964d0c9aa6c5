use crate::cycle::CycleConfig;
use crate::loss::DataLossKind;
use crate::psf::PsfConfig;
use crate::regularizer::RegularizationKind;
use crate::solver::{PrimalDualVariant, SolverChoice};
use crate::synthetic::{PhantomConfig, StackSimulation};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Run report (cycle reports, timings, failure).
    pub json_out: Option<PathBuf>,
    /// Final per-slice transforms.
    pub transforms_out: Option<PathBuf>,
    /// Axial PNG planes of the reconstruction.
    pub png_dir: Option<PathBuf>,
}

/// Flat option surface of a reconstruction run. Unset fields keep the
/// defaults of [`CycleConfig`].
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ReconstructionOptions {
    pub target_stack: Option<usize>,
    pub two_step_cycles: Option<usize>,
    pub regularization: Option<RegularizationKind>,
    pub minimizer: Option<SolverChoice>,
    pub pd_variant: Option<PrimalDualVariant>,
    pub alpha: Option<f64>,
    pub alpha_first: Option<f64>,
    pub iter_max: Option<usize>,
    pub iter_max_first: Option<usize>,
    pub rho: Option<f64>,
    pub iterations: Option<usize>,
    pub data_loss: Option<DataLossKind>,
    pub data_loss_scale: Option<f64>,
    pub shrink_factors: Option<Vec<usize>>,
    pub smoothing_sigmas: Option<Vec<f64>>,
    pub search_angle: Option<f64>,
    pub psf_aware: Option<bool>,
    pub isotropic_resolution: Option<f64>,
    pub extra_frame_target: Option<f64>,
    pub sigma_sda: Option<f64>,
    pub prealign_stacks: Option<bool>,
    pub convergence_tolerance: Option<f64>,
}

impl ReconstructionOptions {
    pub fn resolve(&self) -> CycleConfig {
        let mut c = CycleConfig::default();
        if let Some(v) = self.target_stack {
            c.target_stack = v;
        }
        if let Some(v) = self.two_step_cycles {
            c.two_step_cycles = v;
        }
        let r = &mut c.regularization;
        if let Some(v) = self.regularization {
            r.kind = v;
        }
        if let Some(v) = self.minimizer {
            r.solver = v;
        }
        if let Some(v) = self.pd_variant {
            r.pd_variant = v;
        }
        if let Some(v) = self.alpha {
            r.alpha = v;
        }
        if let Some(v) = self.alpha_first {
            r.alpha_first = v;
        }
        if let Some(v) = self.iter_max {
            r.iter_max = v;
        }
        if let Some(v) = self.iter_max_first {
            r.iter_max_first = v;
        }
        if let Some(v) = self.rho {
            r.rho = v;
        }
        if let Some(v) = self.iterations {
            r.iterations = v;
        }
        if let Some(v) = self.data_loss {
            c.data_loss.kind = v;
        }
        if let Some(v) = self.data_loss_scale {
            c.data_loss.scale = v;
        }
        let g = &mut c.registration;
        if let Some(v) = &self.shrink_factors {
            g.levels.shrink_factors = v.clone();
        }
        if let Some(v) = &self.smoothing_sigmas {
            g.levels.smoothing_sigmas = v.clone();
        }
        if let Some(v) = self.search_angle {
            g.search_angle_deg = v;
        }
        if let Some(v) = self.psf_aware {
            g.psf_aware = v;
        }
        if self.isotropic_resolution.is_some() {
            c.space.isotropic_resolution = self.isotropic_resolution;
        }
        if let Some(v) = self.extra_frame_target {
            c.space.extra_frame = v;
        }
        if let Some(v) = self.sigma_sda {
            c.sda.sigma = v;
        }
        if let Some(v) = self.prealign_stacks {
            c.prealign_stacks = v;
        }
        if self.convergence_tolerance.is_some() {
            c.convergence_tolerance = self.convergence_tolerance;
        }
        c
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct SimulatedStack {
    pub name: String,
    #[serde(flatten)]
    pub simulation: StackSimulation,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub phantom: PhantomConfig,
    pub stacks: Vec<SimulatedStack>,
    #[serde(default)]
    pub psf: PsfConfig,
    #[serde(default)]
    pub reconstruction: ReconstructionOptions,
    #[serde(default)]
    pub output: OutputConfig,
}

impl RuntimeConfig {
    pub fn cycle_config(&self) -> CycleConfig {
        let mut c = self.reconstruction.resolve();
        c.psf = self.psf;
        c
    }
}

pub fn load_config(path: &Path) -> Result<RuntimeConfig, String> {
    let data = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config {}: {e}", path.display()))?;
    let config: RuntimeConfig = serde_json::from_str(&data)
        .map_err(|e| format!("Failed to parse config {}: {e}", path.display()))?;
    if config.stacks.is_empty() {
        return Err(format!("Config {} lists no stacks", path.display()));
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_overlay_defaults() {
        let json = r#"{
            "stacks": [{ "name": "ax", "orientation": "axial", "thickness": 3.0 }],
            "reconstruction": {
                "alpha": 0.05,
                "minimizer": "ADMM",
                "regularization": "TV",
                "data_loss": "huber",
                "shrink_factors": [3, 1],
                "smoothing_sigmas": [1.5, 0]
            }
        }"#;
        let config: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.stacks[0].simulation.thickness, 3.0);
        let cycle = config.cycle_config();
        assert_eq!(cycle.regularization.alpha, 0.05);
        assert_eq!(cycle.regularization.alpha_first, 0.1);
        assert_eq!(cycle.regularization.solver, SolverChoice::Admm);
        assert_eq!(cycle.regularization.kind, RegularizationKind::TvL2);
        assert_eq!(cycle.data_loss.kind, DataLossKind::Huber);
        assert_eq!(cycle.registration.levels.shrink_factors, vec![3, 1]);
        assert_eq!(cycle.two_step_cycles, 3);
        assert!(cycle.validate(1).is_ok());
    }
}
