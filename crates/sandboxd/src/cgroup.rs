//! Cgroup v2 leaf manager.
//!
//! Generalizes `cgroups.rs`'s `CgroupManager` (which resolves a
//! per-user delegated base path for rootless containers) to a fixed
//! system parent, `/sys/fs/cgroup/sbx`, and follows the original
//! `ns_chroot.py`/`cgroups.py` kill/cleanup sequence exactly
//! rather than a "move processes back to parent" variant, which
//! doesn't apply to a single-use leaf with no reusable parent state.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{debug, warn};
use nix::unistd::Pid;

use crate::error::SandboxError;
use crate::limits::Limits;
use crate::result::CleanupWarning;

const CGROOT: &str = "/sys/fs/cgroup";
const PARENT: &str = "/sys/fs/cgroup/sbx";
const DESIRED_CONTROLLERS: &[&str] = &["cpu", "memory", "pids"];

#[derive(Debug, Clone)]
pub struct CgroupLeaf {
    pub id: String,
    pub path: PathBuf,
}

/// True iff the unified cgroup v2 hierarchy is mounted.
pub fn available() -> bool {
    Path::new(CGROOT).join("cgroup.controllers").exists()
}

fn read_trimmed(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_default().trim().to_string()
}

fn write_file(path: &Path, data: &str) -> Result<(), SandboxError> {
    fs::write(path, data).map_err(|e| SandboxError::CgroupWrite {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}

/// Enables `cpu`, `memory`, `pids` (and `io` when requested) in the
/// parent's `cgroup.subtree_control`, skipping any controller already
/// enabled or unavailable in the root's `cgroup.controllers`. Must run
/// before any leaf directory exists under the parent — the kernel
/// refuses to enable controllers while a child cgroup has processes.
fn enable_controllers(want_io: bool) -> Result<(), SandboxError> {
    let available: Vec<String> = read_trimmed(&Path::new(CGROOT).join("cgroup.controllers"))
        .split_whitespace()
        .map(str::to_string)
        .collect();

    let subtree_control = Path::new(PARENT).join("cgroup.subtree_control");
    let current: Vec<String> = read_trimmed(&subtree_control)
        .split_whitespace()
        .map(str::to_string)
        .collect();

    let mut desired: Vec<&str> = DESIRED_CONTROLLERS.to_vec();
    if want_io {
        desired.push("io");
    }

    for controller in desired {
        if !available.contains(&controller.to_string()) {
            if controller == "io" {
                return Err(SandboxError::CgroupCreate {
                    id: "sbx".to_string(),
                    detail: "io controller not available on this kernel".to_string(),
                });
            }
            continue;
        }
        let token = format!("+{controller}");
        if current.contains(&token) {
            continue;
        }
        write_file(&subtree_control, &token)?;
        debug!("enabled cgroup controller {controller} at {PARENT}");
    }
    Ok(())
}

/// Idempotently creates the parent, enables the requested controllers,
/// and creates `parent/<id>`. Fails with `CgroupCreate` on any
/// filesystem error after best-effort cleanup of a partially-created
/// leaf.
pub fn create_leaf(id: &str, want_io: bool) -> Result<CgroupLeaf, SandboxError> {
    if !available() {
        return Err(SandboxError::CgroupUnavailable);
    }

    fs::create_dir_all(PARENT).map_err(|e| SandboxError::CgroupCreate {
        id: id.to_string(),
        detail: format!("creating parent {PARENT}: {e}"),
    })?;

    enable_controllers(want_io)?;

    let path = Path::new(PARENT).join(id);
    fs::create_dir(&path).map_err(|e| SandboxError::CgroupCreate {
        id: id.to_string(),
        detail: format!("creating leaf {}: {e}", path.display()),
    })?;

    Ok(CgroupLeaf {
        id: id.to_string(),
        path,
    })
}

pub fn set_memory(leaf: &CgroupLeaf, max: &str, swap_max: &str, oom_group: bool) -> Result<(), SandboxError> {
    write_file(&leaf.path.join("memory.max"), max)?;
    write_file(&leaf.path.join("memory.swap.max"), swap_max)?;
    write_file(
        &leaf.path.join("memory.oom.group"),
        if oom_group { "1" } else { "0" },
    )?;
    Ok(())
}

pub fn set_cpu(leaf: &CgroupLeaf, cpu_max: Option<&str>, weight: Option<u32>) -> Result<(), SandboxError> {
    if let Some(max) = cpu_max {
        write_file(&leaf.path.join("cpu.max"), max)?;
    }
    if let Some(w) = weight {
        write_file(&leaf.path.join("cpu.weight"), &w.to_string())?;
    }
    Ok(())
}

pub fn set_pids(leaf: &CgroupLeaf, n: u64) -> Result<(), SandboxError> {
    write_file(&leaf.path.join("pids.max"), &n.to_string())
}

pub fn set_io(
    leaf: &CgroupLeaf,
    device: &str,
    rbps: Option<&str>,
    wbps: Option<&str>,
) -> Result<(), SandboxError> {
    let mut fields = Vec::new();
    if let Some(r) = rbps {
        fields.push(format!("rbps={r}"));
    }
    if let Some(w) = wbps {
        fields.push(format!("wbps={w}"));
    }
    let line = if fields.is_empty() {
        device.to_string()
    } else {
        format!("{device} {}", fields.join(" "))
    };
    write_file(&leaf.path.join("io.max"), &line)
}

/// Writes the PID to `cgroup.procs`. Attachment is what causes future
/// resource accounting to include descendants.
pub fn attach(leaf: &CgroupLeaf, pid: Pid) -> Result<(), SandboxError> {
    write_file(&leaf.path.join("cgroup.procs"), &pid.to_string())
}

/// Applies every limit set in `limits` to a freshly created leaf.
pub fn apply_limits(leaf: &CgroupLeaf, limits: &Limits) -> Result<(), SandboxError> {
    set_memory(
        leaf,
        &limits.memory.max,
        &limits.memory.swap_max,
        limits.memory.oom_group,
    )?;
    set_cpu(leaf, limits.cpu.max.as_deref(), limits.cpu.weight)?;
    if let Some(max) = limits.pids.max {
        set_pids(leaf, max)?;
    }
    if limits.io.enabled {
        let device = limits.io.device.as_deref().ok_or_else(|| {
            SandboxError::ConfigInvalid("io.enabled is true but io.device is unset".to_string())
        })?;
        set_io(leaf, device, limits.io.rbytes.as_deref(), limits.io.wbytes.as_deref())?;
    }
    Ok(())
}

pub fn read_metrics(leaf: &CgroupLeaf) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for name in ["memory.current", "memory.events", "cpu.stat", "pids.current"] {
        let path = leaf.path.join(name);
        if path.exists() {
            out.insert(name.to_string(), read_trimmed(&path));
        }
    }
    out
}

/// Prefers the atomic `cgroup.kill` primitive; falls back to
/// signalling every PID in `cgroup.procs` with SIGKILL. Polls
/// `cgroup.events` for `populated=0`, then removes the leaf directory
/// — a single `EBUSY` is tolerated once by re-waiting briefly. A
/// second failure is recorded as a `CleanupWarning`, never raised:
/// cleanup is best-effort and idempotent.
pub fn kill_and_cleanup(leaf: &CgroupLeaf, wait: Duration) -> Vec<CleanupWarning> {
    let mut warnings = Vec::new();

    if !leaf.path.exists() {
        return warnings;
    }

    let kill_file = leaf.path.join("cgroup.kill");
    if kill_file.exists() {
        if let Err(e) = fs::write(&kill_file, "1") {
            warnings.push(CleanupWarning {
                step: "cgroup.kill",
                detail: e.to_string(),
            });
        }
    } else {
        let procs = read_trimmed(&leaf.path.join("cgroup.procs"));
        for pid_line in procs.lines() {
            if let Ok(raw) = pid_line.trim().parse::<i32>() {
                let _ = nix::sys::signal::kill(Pid::from_raw(raw), nix::sys::signal::Signal::SIGKILL);
            }
        }
    }

    let deadline = Instant::now() + wait;
    let events = leaf.path.join("cgroup.events");
    loop {
        let content = read_trimmed(&events);
        if content.contains("populated=0") {
            break;
        }
        if Instant::now() >= deadline {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    if let Err(e) = fs::remove_dir(&leaf.path) {
        std::thread::sleep(Duration::from_millis(100));
        if let Err(e2) = fs::remove_dir(&leaf.path) {
            warn!("failed to remove cgroup leaf {}: {e2}", leaf.path.display());
            warnings.push(CleanupWarning {
                step: "cgroup.rmdir",
                detail: format!("{e}; retry: {e2}"),
            });
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_io_formats_line_with_both_fields() {
        let leaf = CgroupLeaf {
            id: "job-test".into(),
            path: tempfile::tempdir().unwrap().path().to_path_buf(),
        };
        fs::create_dir_all(&leaf.path).unwrap();
        set_io(&leaf, "8:0", Some("52428800"), Some("52428800")).unwrap();
        let content = fs::read_to_string(leaf.path.join("io.max")).unwrap();
        assert_eq!(content, "8:0 rbps=52428800 wbps=52428800");
    }

    #[test]
    fn set_io_omits_missing_field() {
        let leaf = CgroupLeaf {
            id: "job-test".into(),
            path: tempfile::tempdir().unwrap().path().to_path_buf(),
        };
        fs::create_dir_all(&leaf.path).unwrap();
        set_io(&leaf, "8:0", Some("1000"), None).unwrap();
        let content = fs::read_to_string(leaf.path.join("io.max")).unwrap();
        assert_eq!(content, "8:0 rbps=1000");
    }

    #[test]
    fn read_metrics_skips_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let leaf = CgroupLeaf {
            id: "job-test".into(),
            path: dir.path().to_path_buf(),
        };
        fs::write(dir.path().join("memory.current"), "1024\n").unwrap();
        let metrics = read_metrics(&leaf);
        assert_eq!(metrics.get("memory.current"), Some(&"1024".to_string()));
        assert!(!metrics.contains_key("cpu.stat"));
    }

    #[test]
    fn kill_and_cleanup_on_missing_leaf_is_a_noop() {
        let leaf = CgroupLeaf {
            id: "job-gone".into(),
            path: PathBuf::from("/nonexistent/sbx/job-gone"),
        };
        let warnings = kill_and_cleanup(&leaf, Duration::from_millis(10));
        assert!(warnings.is_empty());
    }

    #[test]
    #[ignore = "requires cgroup v2 delegation and CAP_SYS_ADMIN"]
    fn create_leaf_roundtrip() {
        let leaf = create_leaf("job-roundtrip-test", false).expect("create leaf");
        apply_limits(
            &leaf,
            &Limits {
                enabled: true,
                ..Default::default()
            },
        )
        .expect("apply limits");
        let warnings = kill_and_cleanup(&leaf, Duration::from_secs(1));
        assert!(warnings.is_empty());
    }
}
