//! Runner descriptor: a closed set of variants over the capability set
//! `{build, command}`. Generalizes the original `python_runner.py`
//! (`build()`/`command()` free functions) into a small trait — duck
//! typing becomes an enum of concrete types.

use std::path::PathBuf;

use crate::error::SandboxError;
use crate::result::JobRequest;

pub trait Runner {
    /// Pure-interpreter jobs have nothing to build; future compiled
    /// runners would produce an artifact inside `job.job_dir` here.
    fn build(&self, job: &JobRequest) -> Result<(), SandboxError>;

    /// The argv the executor execs inside the chroot. The guest never
    /// sees a host path — `job.entry` is resolved as `/work/<entry>`.
    fn command(&self, job: &JobRequest) -> Vec<String>;
}

/// A single interpreter binary run against the job's entry script.
pub struct Interpreted {
    pub interpreter: PathBuf,
}

impl Interpreted {
    pub fn python3() -> Self {
        Self {
            interpreter: PathBuf::from("/usr/bin/python3"),
        }
    }
}

impl Runner for Interpreted {
    fn build(&self, _job: &JobRequest) -> Result<(), SandboxError> {
        Ok(())
    }

    fn command(&self, job: &JobRequest) -> Vec<String> {
        vec![
            self.interpreter.to_string_lossy().into_owned(),
            format!("/work/{}", job.entry),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn job() -> JobRequest {
        JobRequest {
            job_dir: PathBuf::from("/srv/sbx/jobs/abc"),
            entry: "main.py".to_string(),
            timeout_s: 8,
            noexec_work: true,
            enable_loopback: false,
            bind_full_etc: false,
        }
    }

    #[test]
    fn interpreted_command_resolves_inside_sandbox() {
        let runner = Interpreted::python3();
        let cmd = runner.command(&job());
        assert_eq!(cmd, vec!["/usr/bin/python3", "/work/main.py"]);
    }

    #[test]
    fn interpreted_build_is_a_no_op() {
        let runner = Interpreted::python3();
        assert!(runner.build(&job()).is_ok());
    }
}
