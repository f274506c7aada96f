//! Single-shot Linux sandbox executor: runs one untrusted
//! interpreter-driven script inside a mount/pid/net/uts/user namespace
//! stack plus an optional cgroup v2 leaf, and returns a structured
//! [`result::RunResult`].
//!
//! No job queue, no scheduler, no persistent spool — one call in, one
//! result out. Callers that need those build them on top of this.

pub mod cgroup;
pub mod error;
pub mod executor;
pub mod limits;
pub mod namespaces;
pub mod net;
pub mod result;
pub mod rootfs;
pub mod runner;
pub mod seccomp;
pub mod settings;
pub mod util;

pub use error::SandboxError;
pub use executor::run_in_sandbox;
pub use limits::Limits;
pub use result::{JobRequest, RunResult, RunStatus};
pub use runner::{Interpreted, Runner};
pub use settings::Settings;
