//! `Limits`: the cgroup-enablement gate plus per-controller knobs,
//! loaded from YAML. Mirrors `config_limits.py::load_limits` — a
//! missing file disables cgroups rather than erroring.

use std::path::Path;

use serde::Deserialize;

use crate::error::SandboxError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Limits {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub memory: MemoryLimits,
    #[serde(default)]
    pub cpu: CpuLimits,
    #[serde(default)]
    pub pids: PidsLimits,
    #[serde(default)]
    pub io: IoLimits,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryLimits {
    #[serde(default = "default_memory_max")]
    pub max: String,
    #[serde(default = "default_swap_max")]
    pub swap_max: String,
    #[serde(default = "default_true")]
    pub oom_group: bool,
}

impl Default for MemoryLimits {
    fn default() -> Self {
        Self {
            max: default_memory_max(),
            swap_max: default_swap_max(),
            oom_group: true,
        }
    }
}

fn default_memory_max() -> String {
    "256M".to_string()
}
fn default_swap_max() -> String {
    "0".to_string()
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CpuLimits {
    pub max: Option<String>,
    pub weight: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PidsLimits {
    pub max: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IoLimits {
    #[serde(default)]
    pub enabled: bool,
    pub device: Option<String>,
    pub rbytes: Option<String>,
    pub wbytes: Option<String>,
}

impl Limits {
    /// A missing limits file is not an error: it means cgroups are
    /// disabled for this invocation.
    pub fn load(path: &Path) -> Result<Self, SandboxError> {
        if !path.exists() {
            return Ok(Limits::default());
        }
        let text = std::fs::read_to_string(path).map_err(|e| {
            SandboxError::ConfigInvalid(format!(
                "failed to read limits file {}: {e}",
                path.display()
            ))
        })?;
        let limits: Limits = serde_yaml::from_str(&text)
            .map_err(|e| SandboxError::ConfigInvalid(format!("malformed limits YAML: {e}")))?;
        Ok(limits)
    }
}
