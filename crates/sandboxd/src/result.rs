//! Wire-level value objects: the request a caller hands the executor,
//! and the result it gets back. `RunResult` is produced exactly once
//! per `run_in_sandbox` call and serializes to the CLI's JSON output
//! document.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

/// One job: a script rooted at `job_dir`, plus the executor flags that
/// govern how the sandbox is built around it.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub job_dir: PathBuf,
    pub entry: String,
    pub timeout_s: u64,
    pub noexec_work: bool,
    pub enable_loopback: bool,
    pub bind_full_etc: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Finished,
    Timeout,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupWarning {
    pub step: &'static str,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub status: RunStatus,
    pub returncode: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cleanup_warnings: Vec<CleanupWarning>,
}

impl RunResult {
    pub fn finished(returncode: i32, stdout: String, stderr: String) -> Self {
        Self {
            status: RunStatus::Finished,
            returncode: Some(returncode),
            stdout,
            stderr,
            metrics: None,
            cleanup_warnings: Vec::new(),
        }
    }

    pub fn timeout(timeout_s: u64, stdout: String, mut stderr: String) -> Self {
        if !stderr.is_empty() && !stderr.ends_with('\n') {
            stderr.push('\n');
        }
        stderr.push_str(&format!("sandbox: guest exceeded {timeout_s}s deadline\n"));
        Self {
            status: RunStatus::Timeout,
            returncode: None,
            stdout,
            stderr,
            metrics: None,
            cleanup_warnings: Vec::new(),
        }
    }

    pub fn error(summary: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Error,
            returncode: None,
            stdout: String::new(),
            stderr: summary.into(),
            metrics: None,
            cleanup_warnings: Vec::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: BTreeMap<String, String>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_cleanup_warnings(mut self, warnings: Vec<CleanupWarning>) -> Self {
        self.cleanup_warnings = warnings;
        self
    }

    /// Exit code the CLI front-end should mirror.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Finished => self.returncode.unwrap_or(0),
            RunStatus::Timeout => 124,
            RunStatus::Error => 1,
        }
    }
}
