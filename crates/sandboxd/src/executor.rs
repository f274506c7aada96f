//! The sandbox executor state machine:
//! `Init -> CgroupPrepared -> NamespacesEntered -> RootfsBuilt ->
//! GuestLaunched -> {GuestExited|TimedOut|LaunchFailed} ->
//! MetricsCollected -> CleanedUp`.
//!
//! `unshare(CLONE_NEWPID)` only takes effect for processes forked
//! *after* the call — the caller itself stays in the old PID
//! namespace. So the rootfs view (and in particular its `proc` mount,
//! which is keyed to the mounting process's PID namespace) and the
//! loopback bring-up both have to happen inside the forked guest
//! child rather than the caller. That child becomes PID 1 of the
//! fresh namespace and carries the whole sequence through to
//! `execvp`, mirroring `original_source/.../ns_chroot.py`'s
//! `unshare --fork`.
//!
//! Replaces scattered manual cleanup (one `fs::cleanup_fs` call from a
//! single error arm of `fs.rs::prepare_rootfs`) with an explicit unwind
//! stack: every phase that acquires something pushes its own teardown
//! closure, run LIFO regardless of how the run ends.

use std::ffi::CString;
use std::fs::File;
use std::io::Read;
use std::os::unix::io::{FromRawFd, IntoRawFd, RawFd};
use std::sync::mpsc;
use std::time::Duration;

use log::{debug, info, warn};
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::sys::signal::{kill, Signal};
use nix::sys::stat::{umask, Mode};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{chdir, chroot, close, dup2, execvp, fork, pipe, ForkResult, Pid};

use crate::cgroup::{self, CgroupLeaf};
use crate::error::SandboxError;
use crate::limits::Limits;
use crate::namespaces;
use crate::net;
use crate::result::{CleanupWarning, JobRequest, RunResult};
use crate::rootfs;
use crate::runner::Runner;
use crate::seccomp::{NoFilter, SeccompHook};

type CleanupAction = Box<dyn FnOnce() -> Vec<CleanupWarning> + Send>;

/// LIFO teardown stack. Each phase that leaves behind state pushes the
/// action that undoes it; `run` fires them all regardless of how the
/// call ended, newest first.
#[derive(Default)]
struct UnwindStack(Vec<CleanupAction>);

impl UnwindStack {
    fn push(&mut self, action: impl FnOnce() -> Vec<CleanupWarning> + Send + 'static) {
        self.0.push(Box::new(action));
    }

    fn run(self) -> Vec<CleanupWarning> {
        let mut warnings = Vec::new();
        for action in self.0.into_iter().rev() {
            warnings.extend(action());
        }
        warnings
    }
}

enum GuestOutcome {
    Exited(i32),
    Signaled(i32),
    TimedOut,
}

struct GuestRun {
    outcome: GuestOutcome,
    stdout: String,
    stderr: String,
}

/// Runs `job` to completion inside a fresh sandbox and returns a
/// `RunResult` that never panics or propagates an error to the caller
/// — every failure mode, including a `SandboxError` raised before the
/// guest launches, is represented in the returned value.
pub fn run_in_sandbox(job: &JobRequest, rootfs: &std::path::Path, limits: &Limits, runner: &dyn Runner) -> RunResult {
    let mut unwind = UnwindStack::default();
    let outcome = execute(job, rootfs, limits, runner, &mut unwind);
    let warnings = unwind.run();

    match outcome {
        Ok(mut result) => {
            result.cleanup_warnings = warnings;
            result
        }
        Err(e) => {
            warn!("{}", e.summary());
            RunResult::error(e.summary()).with_cleanup_warnings(warnings)
        }
    }
}

fn execute(
    job: &JobRequest,
    rootfs: &std::path::Path,
    limits: &Limits,
    runner: &dyn Runner,
    unwind: &mut UnwindStack,
) -> Result<RunResult, SandboxError> {
    preflight(job, rootfs)?;
    runner.build(job)?;

    let leaf = if limits.enabled {
        let id = format!("job-{}", uuid::Uuid::new_v4());
        let leaf = cgroup::create_leaf(&id, limits.io.enabled)?;
        cgroup::apply_limits(&leaf, limits)?;
        let leaf_for_cleanup = leaf.clone();
        unwind.push(move || cgroup::kill_and_cleanup(&leaf_for_cleanup, Duration::from_secs(2)));
        debug!("cgroup leaf {} prepared", leaf.id);
        Some(leaf)
    } else {
        None
    };

    namespaces::enter_user_namespace()?;
    namespaces::disable_setgroups()?;
    namespaces::map_identity()?;
    namespaces::unshare_isolation_namespaces()?;
    namespaces::set_hostname("sandbox")?;
    namespaces::make_mount_tree_private()?;
    debug!("namespaces entered");

    // Built inside the forked guest child below, which is the process
    // that actually lands in the fresh PID namespace. The mount
    // namespace is shared between this process and that child, so
    // teardown from here still reaches whatever it mounted.
    let rootfs_for_cleanup = rootfs.to_path_buf();
    unwind.push(move || rootfs::teardown(&rootfs_for_cleanup));

    let command = runner.command(job);
    let timeout = Duration::from_secs(job.timeout_s);
    let guest = launch_guest(
        rootfs,
        &job.job_dir,
        job.noexec_work,
        job.bind_full_etc,
        job.enable_loopback,
        &command,
        leaf.as_ref(),
        timeout,
    )?;
    info!("guest launched and reaped: {:?} argv={:?}", describe(&guest.outcome), command);

    let metrics = leaf.as_ref().map(cgroup::read_metrics);

    let mut result = match guest.outcome {
        GuestOutcome::Exited(code) => RunResult::finished(code, guest.stdout, guest.stderr),
        GuestOutcome::Signaled(sig) => RunResult::finished(128 + sig, guest.stdout, guest.stderr),
        GuestOutcome::TimedOut => RunResult::timeout(job.timeout_s, guest.stdout, guest.stderr),
    };
    if let Some(m) = metrics {
        result = result.with_metrics(m);
    }
    Ok(result)
}

fn describe(outcome: &GuestOutcome) -> &'static str {
    match outcome {
        GuestOutcome::Exited(_) => "exited",
        GuestOutcome::Signaled(_) => "signaled",
        GuestOutcome::TimedOut => "timed out",
    }
}

fn preflight(job: &JobRequest, rootfs: &std::path::Path) -> Result<(), SandboxError> {
    if !rootfs.is_dir() {
        return Err(SandboxError::PreflightFailed(format!(
            "rootfs {} is not a directory",
            rootfs.display()
        )));
    }
    if !job.job_dir.is_dir() {
        return Err(SandboxError::PreflightFailed(format!(
            "job dir {} is not a directory",
            job.job_dir.display()
        )));
    }
    if !job.job_dir.join(&job.entry).is_file() {
        return Err(SandboxError::PreflightFailed(format!(
            "entry {} not found under {}",
            job.entry,
            job.job_dir.display()
        )));
    }
    Ok(())
}

/// Forks the guest. The child becomes PID 1 of the fresh PID
/// namespace and, before it execs, builds the rootfs view and brings
/// up loopback (both namespace-sensitive, so deferred to after the
/// fork) and chroots; the parent attaches it to `leaf`, releases it
/// over the sync pipe, then drains its stdout/stderr concurrently
/// with waiting for it to exit, killing it if it outlives `timeout`.
fn launch_guest(
    rootfs: &std::path::Path,
    job_dir: &std::path::Path,
    noexec_work: bool,
    bind_full_etc: bool,
    enable_loopback: bool,
    command: &[String],
    leaf: Option<&CgroupLeaf>,
    timeout: Duration,
) -> Result<GuestRun, SandboxError> {
    let (stdout_r, stdout_w) = pipe().map(split_raw)?;
    let (stderr_r, stderr_w) = pipe().map(split_raw)?;
    let (errpipe_r, errpipe_w) = pipe().map(split_raw)?;
    let (sync_r, sync_w) = pipe().map(split_raw)?;

    // SAFETY: this process is still single-threaded at the point of
    // the fork (no reader/waitpid threads have been spawned yet), so
    // the child below is free to run ordinary Rust code — allocate,
    // spawn `ip`, propagate `Result`s — right up to its final
    // `execvp`/`_exit`.
    match unsafe { fork() }.map_err(SandboxError::from)? {
        ForkResult::Child => {
            let _ = close(stdout_r);
            let _ = close(stderr_r);
            let _ = close(errpipe_r);
            let _ = close(sync_w);
            run_guest_child(
                rootfs,
                job_dir,
                noexec_work,
                bind_full_etc,
                enable_loopback,
                command,
                stdout_w,
                stderr_w,
                errpipe_w,
                sync_r,
            );
        }
        ForkResult::Parent { child } => {
            let _ = close(stdout_w);
            let _ = close(stderr_w);
            let _ = close(errpipe_w);
            let _ = close(sync_r);

            let attach_result = leaf.map(|leaf| cgroup::attach(leaf, child));
            // Release the guest only once it is known to be attached
            // (or there is no leaf to attach to).
            let _ = write_one(sync_w);
            let _ = close(sync_w);
            if let Some(Err(e)) = attach_result {
                let _ = kill(child, Signal::SIGKILL);
                let _ = waitpid(child, None);
                let _ = close(stdout_r);
                let _ = close(stderr_r);
                let _ = close(errpipe_r);
                return Err(e);
            }

            if let Some(msg) = read_launch_error(errpipe_r) {
                let _ = kill(child, Signal::SIGKILL);
                let _ = waitpid(child, None);
                let _ = close(stdout_r);
                let _ = close(stderr_r);
                return Err(SandboxError::GuestLaunch(msg));
            }

            Ok(wait_for_guest(child, stdout_r, stderr_r, timeout))
        }
    }
}

fn split_raw(fds: (std::os::fd::OwnedFd, std::os::fd::OwnedFd)) -> (RawFd, RawFd) {
    (fds.0.into_raw_fd(), fds.1.into_raw_fd())
}

/// Writes a single release byte to the sync pipe.
fn write_one(fd: RawFd) -> std::io::Result<()> {
    let byte = [0u8];
    let n = unsafe { libc::write(fd, byte.as_ptr() as *const libc::c_void, 1) };
    if n < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Reads whatever the guest child wrote to its error pipe before a
/// pre-exec failure. A successful `execvp` closes the child's end via
/// `FD_CLOEXEC`, so an empty read means the guest launched cleanly.
fn read_launch_error(fd: RawFd) -> Option<String> {
    // SAFETY: fd is a freshly-created pipe read end owned by this call.
    let mut file = unsafe { File::from_raw_fd(fd) };
    let mut buf = Vec::new();
    let _ = file.read_to_end(&mut buf);
    if buf.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(&buf).into_owned())
    }
}

/// Never returns. Blocks on `sync_r` until the parent confirms the
/// cgroup attach is done, builds the rootfs view and (now that it is
/// running inside the fresh PID namespace) brings up loopback, then
/// chroots, sets the guest's umask and execs — or reports why it
/// couldn't over `errpipe_w` and calls `_exit(125)`.
#[allow(clippy::too_many_arguments)]
fn run_guest_child(
    rootfs: &std::path::Path,
    job_dir: &std::path::Path,
    noexec_work: bool,
    bind_full_etc: bool,
    enable_loopback: bool,
    command: &[String],
    stdout_w: RawFd,
    stderr_w: RawFd,
    errpipe_w: RawFd,
    sync_r: RawFd,
) -> ! {
    let _ = fcntl(errpipe_w, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC));

    let mut ready = [0u8; 1];
    unsafe { libc::read(sync_r, ready.as_mut_ptr() as *mut libc::c_void, 1) };
    let _ = close(sync_r);

    if let Err(e) = rootfs::build(rootfs, job_dir, noexec_work, bind_full_etc) {
        report_and_exit(errpipe_w, &format!("building rootfs: {e}"));
    }
    debug!("rootfs view built at {}", rootfs.display());

    if enable_loopback {
        if let Err(e) = net::bring_up_loopback() {
            report_and_exit(errpipe_w, &format!("bringing up loopback: {e}"));
        }
    }

    let _ = dup2(stdout_w, 1);
    let _ = dup2(stderr_w, 2);
    let _ = close(stdout_w);
    let _ = close(stderr_w);

    if chroot(rootfs).is_err() {
        report_and_exit(errpipe_w, "chroot failed");
    }
    if chdir("/work").is_err() {
        report_and_exit(errpipe_w, "chdir /work failed");
    }
    umask(Mode::from_bits_truncate(0o002));
    if NoFilter.install().is_err() {
        report_and_exit(errpipe_w, "installing seccomp filter failed");
    }

    let cargs: Vec<CString> = command
        .iter()
        .map(|s| CString::new(s.as_str()).unwrap_or_else(|_| CString::new("").unwrap()))
        .collect();
    if cargs.is_empty() {
        report_and_exit(errpipe_w, "empty guest command");
    }
    let _ = execvp(&cargs[0], &cargs);
    report_and_exit(errpipe_w, "execvp failed");
}

fn report_and_exit(fd: RawFd, msg: &str) -> ! {
    unsafe { libc::write(fd, msg.as_ptr() as *const libc::c_void, msg.len()) };
    unsafe { libc::_exit(125) }
}

fn wait_for_guest(child: Pid, stdout_r: RawFd, stderr_r: RawFd, timeout: Duration) -> GuestRun {
    let stdout_handle = spawn_reader(stdout_r);
    let stderr_handle = spawn_reader(stderr_r);

    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let status = waitpid(child, None);
        let _ = tx.send(status);
    });

    let outcome = match rx.recv_timeout(timeout) {
        Ok(Ok(WaitStatus::Exited(_, code))) => GuestOutcome::Exited(code),
        Ok(Ok(WaitStatus::Signaled(_, sig, _))) => GuestOutcome::Signaled(sig as i32),
        Ok(Ok(_other)) => GuestOutcome::Exited(0),
        Ok(Err(e)) => {
            warn!("waitpid failed: {e}");
            GuestOutcome::Exited(1)
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            let _ = kill(child, Signal::SIGKILL);
            // Block for the real reap so stdio pipes actually close.
            let _ = rx.recv();
            GuestOutcome::TimedOut
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => GuestOutcome::Exited(1),
    };

    let stdout = stdout_handle.join().unwrap_or_default();
    let stderr = stderr_handle.join().unwrap_or_default();
    GuestRun {
        outcome,
        stdout,
        stderr,
    }
}

fn spawn_reader(fd: RawFd) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        // SAFETY: fd is a freshly-created pipe read end owned by this
        // call; nothing else reads or closes it.
        let mut file = unsafe { File::from_raw_fd(fd) };
        let mut buf = Vec::new();
        let _ = file.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwind_stack_runs_lifo() {
        let mut stack = UnwindStack::default();
        let order = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let o1 = order.clone();
        stack.push(move || {
            o1.lock().unwrap().push(1);
            Vec::new()
        });
        let o2 = order.clone();
        stack.push(move || {
            o2.lock().unwrap().push(2);
            Vec::new()
        });
        stack.run();
        assert_eq!(*order.lock().unwrap(), vec![2, 1]);
    }

    #[test]
    fn unwind_stack_collects_warnings_from_every_action() {
        let mut stack = UnwindStack::default();
        stack.push(|| {
            vec![CleanupWarning {
                step: "a",
                detail: "one".into(),
            }]
        });
        stack.push(|| {
            vec![CleanupWarning {
                step: "b",
                detail: "two".into(),
            }]
        });
        let warnings = stack.run();
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn preflight_rejects_missing_rootfs() {
        let dir = tempfile::tempdir().unwrap();
        let job = JobRequest {
            job_dir: dir.path().to_path_buf(),
            entry: "main.py".to_string(),
            timeout_s: 8,
            noexec_work: true,
            enable_loopback: false,
            bind_full_etc: false,
        };
        let missing = dir.path().join("nope");
        let err = preflight(&job, &missing).unwrap_err();
        assert!(matches!(err, SandboxError::PreflightFailed(_)));
    }

    #[test]
    fn preflight_rejects_missing_entry_file() {
        let rootfs = tempfile::tempdir().unwrap();
        let job_dir = tempfile::tempdir().unwrap();
        let job = JobRequest {
            job_dir: job_dir.path().to_path_buf(),
            entry: "main.py".to_string(),
            timeout_s: 8,
            noexec_work: true,
            enable_loopback: false,
            bind_full_etc: false,
        };
        let err = preflight(&job, rootfs.path()).unwrap_err();
        assert!(matches!(err, SandboxError::PreflightFailed(_)));
    }

    #[test]
    #[ignore = "requires CAP_SYS_ADMIN for fork+chroot+namespace entry"]
    fn run_in_sandbox_roundtrip() {
        use crate::runner::Interpreted;
        let rootfs = tempfile::tempdir().unwrap();
        let job_dir = tempfile::tempdir().unwrap();
        std::fs::write(job_dir.path().join("main.py"), "print('ok')\n").unwrap();
        let job = JobRequest {
            job_dir: job_dir.path().to_path_buf(),
            entry: "main.py".to_string(),
            timeout_s: 5,
            noexec_work: true,
            enable_loopback: false,
            bind_full_etc: false,
        };
        let result = run_in_sandbox(&job, rootfs.path(), &Limits::default(), &Interpreted::python3());
        assert_eq!(result.exit_code(), 0);
    }
}
