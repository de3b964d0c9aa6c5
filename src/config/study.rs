use super::reconstruct::{ReconstructionOptions, SimulatedStack};
use crate::cycle::CycleConfig;
use crate::psf::PsfConfig;
use crate::study::StudyConfig;
use crate::synthetic::PhantomConfig;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Deserialize)]
pub struct StudyRuntimeConfig {
    #[serde(default)]
    pub phantom: PhantomConfig,
    pub stacks: Vec<SimulatedStack>,
    #[serde(default)]
    pub psf: PsfConfig,
    /// Base options; swept fields are overwritten per combination.
    #[serde(default)]
    pub reconstruction: ReconstructionOptions,
    #[serde(default)]
    pub study: StudyConfig,
    pub json_out: Option<PathBuf>,
}

impl StudyRuntimeConfig {
    pub fn base_config(&self) -> CycleConfig {
        let mut c = self.reconstruction.resolve();
        c.psf = self.psf;
        c
    }
}

pub fn load_config(path: &Path) -> Result<StudyRuntimeConfig, String> {
    let data = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config {}: {e}", path.display()))?;
    let config: StudyRuntimeConfig = serde_json::from_str(&data)
        .map_err(|e| format!("Failed to parse config {}: {e}", path.display()))?;
    if config.stacks.is_empty() {
        return Err(format!("Config {} lists no stacks", path.display()));
    }
    Ok(config)
}
