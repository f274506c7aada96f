//! Top-level `Settings` blob: rootfs path, jobs directory, executor flag
//! defaults. Loaded once per invocation from YAML, immutable thereafter.
//!
//! Mirrors the shape of the original `conf/sandbox.yaml` loader
//! (`config.py::load_config` / `Settings`), generalized to `serde_yaml`.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::SandboxError;

const DEFAULT_CONF_PATH: &str = "conf/sandbox.yaml";
const CONF_ENV_VAR: &str = "SANDBOX_CONF";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub rootfs: PathBuf,
    pub jobs_dir: PathBuf,
    #[serde(default)]
    pub defaults: ExecutorDefaults,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutorDefaults {
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u64,
    #[serde(default)]
    pub noexec_work: bool,
    #[serde(default)]
    pub enable_loopback: bool,
    #[serde(default)]
    pub bind_full_etc: bool,
}

fn default_timeout_s() -> u64 {
    8
}

impl Settings {
    /// Load from an explicit path, or `$SANDBOX_CONF`, or the built-in
    /// default location. Missing `rootfs`/`jobs_dir` are rejected;
    /// unknown keys are ignored by serde's default behavior.
    pub fn load(path: Option<&Path>) -> Result<Self, SandboxError> {
        let resolved = resolve_path(path);
        let text = std::fs::read_to_string(&resolved).map_err(|e| {
            SandboxError::ConfigInvalid(format!(
                "failed to read settings file {}: {e}",
                resolved.display()
            ))
        })?;
        let settings: Settings = serde_yaml::from_str(&text)
            .map_err(|e| SandboxError::ConfigInvalid(format!("malformed settings YAML: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SandboxError> {
        if self.rootfs.as_os_str().is_empty() {
            return Err(SandboxError::ConfigInvalid("rootfs is required".into()));
        }
        if self.jobs_dir.as_os_str().is_empty() {
            return Err(SandboxError::ConfigInvalid("jobs_dir is required".into()));
        }
        Ok(())
    }
}

fn resolve_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    if let Ok(env_path) = std::env::var(CONF_ENV_VAR) {
        return PathBuf::from(env_path);
    }
    PathBuf::from(DEFAULT_CONF_PATH)
}
