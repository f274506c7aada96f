use sandboxd::result::{RunResult, RunStatus};
use sandboxd::{run_in_sandbox, Interpreted, JobRequest, Limits};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_exit_code_mirrors_returncode() {
        let result = RunResult::finished(7, String::new(), String::new());
        assert_eq!(result.status, RunStatus::Finished);
        assert_eq!(result.exit_code(), 7);
    }

    #[test]
    fn timeout_exit_code_is_124() {
        let result = RunResult::timeout(8, "partial\n".to_string(), String::new());
        assert_eq!(result.status, RunStatus::Timeout);
        assert_eq!(result.exit_code(), 124);
        assert!(result.stderr.contains("8s deadline"));
    }

    #[test]
    fn error_exit_code_is_1() {
        let result = RunResult::error("rootfs missing");
        assert_eq!(result.status, RunStatus::Error);
        assert_eq!(result.exit_code(), 1);
    }

    #[test]
    fn missing_rootfs_surfaces_as_error_status_without_panicking() {
        let job_dir = tempfile::tempdir().unwrap();
        std::fs::write(job_dir.path().join("main.py"), "print('hi')\n").unwrap();
        let job = JobRequest {
            job_dir: job_dir.path().to_path_buf(),
            entry: "main.py".to_string(),
            timeout_s: 5,
            noexec_work: true,
            enable_loopback: false,
            bind_full_etc: false,
        };
        let result = run_in_sandbox(&job, std::path::Path::new("/nonexistent/rootfs"), &Limits::default(), &Interpreted::python3());
        assert_eq!(result.status, RunStatus::Error);
        assert_eq!(result.exit_code(), 1);
    }

    #[test]
    #[ignore = "requires CAP_SYS_ADMIN for fork+chroot+namespace entry"]
    fn guest_exceeding_timeout_is_killed_and_reported() {
        let rootfs = tempfile::tempdir().unwrap();
        let job_dir = tempfile::tempdir().unwrap();
        std::fs::write(job_dir.path().join("main.py"), "import time\ntime.sleep(30)\n").unwrap();
        let job = JobRequest {
            job_dir: job_dir.path().to_path_buf(),
            entry: "main.py".to_string(),
            timeout_s: 1,
            noexec_work: true,
            enable_loopback: false,
            bind_full_etc: false,
        };
        let result = run_in_sandbox(&job, rootfs.path(), &Limits::default(), &Interpreted::python3());
        assert_eq!(result.status, RunStatus::Timeout);
        assert_eq!(result.exit_code(), 124);
    }
}
