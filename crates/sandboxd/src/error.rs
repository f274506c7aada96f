//! Error taxonomy for the sandbox executor.
//!
//! Every fallible library entry point returns `Result<T, SandboxError>`.
//! A failure that happens before the guest is launched becomes
//! `RunResult { status: Error, .. }`; the guest's own non-zero exit is
//! never represented as a `SandboxError`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("preflight check failed: {0}")]
    PreflightFailed(String),

    #[error("cgroup v2 unified hierarchy is not available")]
    CgroupUnavailable,

    #[error("failed to create cgroup leaf {id}: {detail}")]
    CgroupCreate { id: String, detail: String },

    #[error("failed to write cgroup file {path}: {detail}")]
    CgroupWrite { path: PathBuf, detail: String },

    #[error("namespace setup failed: {0}")]
    NamespaceSetup(String),

    #[error("failed to exec guest command: {0}")]
    GuestLaunch(String),

    #[error("guest exceeded its {timeout_s}s deadline")]
    GuestTimeout { timeout_s: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("nix error: {0}")]
    Nix(#[from] nix::Error),
}

impl SandboxError {
    /// A one-line human summary suitable for `RunResult::stderr`.
    pub fn summary(&self) -> String {
        format!("sandbox error: {self}")
    }
}
