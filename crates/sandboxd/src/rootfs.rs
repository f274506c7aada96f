//! Builds and tears down the private rootfs view inside the guest's
//! own mount namespace.
//!
//! Generalizes `fs.rs`'s directory/mount scaffolding (which targets a
//! pivot_root'd OCI bundle) to a bind-mount-over-a-fixed-skeleton
//! shape, and follows `original_source/.../ns_chroot.py` for the exact
//! mount ordering and bind-remount-ro idiom. No `pivot_root` and no
//! overlayfs here — the rootfs skeleton is a fixed host directory, not
//! a layered OCI image, unlike `fs/overlay.rs`.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use nix::mount::{mount, umount2, MntFlags, MsFlags};

use crate::error::SandboxError;
use crate::result::CleanupWarning;

const ARCH_SUBTREE: &str = "lib/x86_64-linux-gnu";
const ETC_WHITELIST: &[&str] = &["hosts", "nsswitch.conf", "ld.so.cache", "localtime"];
const DEV_NODES: &[&str] = &["null", "zero", "urandom"];

fn to_str(p: &Path) -> Result<&str, SandboxError> {
    p.to_str()
        .ok_or_else(|| SandboxError::PreflightFailed(format!("non-UTF8 path: {}", p.display())))
}

fn bind_mount(source: &Path, target: &Path) -> Result<(), SandboxError> {
    mount(
        Some(source),
        target,
        None::<&str>,
        MsFlags::MS_BIND,
        None::<&str>,
    )
    .map_err(|e| {
        SandboxError::NamespaceSetup(format!(
            "bind mount {} -> {}: {e}",
            source.display(),
            target.display()
        ))
    })
}

/// The kernel ignores mount flags on the initial bind; a second
/// `remount,bind` pass is required to actually enforce them.
fn remount_bind(target: &Path, extra: MsFlags) -> Result<(), SandboxError> {
    mount(
        None::<&str>,
        target,
        None::<&str>,
        MsFlags::MS_REMOUNT | MsFlags::MS_BIND | extra,
        None::<&str>,
    )
    .map_err(|e| SandboxError::NamespaceSetup(format!("remount,bind {}: {e}", target.display())))
}

fn bind_ro(source: &Path, target: &Path) -> Result<(), SandboxError> {
    bind_mount(source, target)?;
    remount_bind(target, MsFlags::MS_RDONLY)
}

/// Best-effort variant: host fragments like `/lib64` don't exist on
/// every distro. Missing source is not fatal.
fn bind_ro_if_present(source: &Path, target: &Path) -> Result<(), SandboxError> {
    if !source.exists() {
        return Ok(());
    }
    fs::create_dir_all(target)?;
    bind_ro(source, target)
}

/// Builds the rootfs view under `rootfs`, binding `job_dir` onto
/// `<rootfs>/work`. Must be called after the guest's mount namespace
/// is made private.
pub fn build(
    rootfs: &Path,
    job_dir: &Path,
    noexec_work: bool,
    bind_full_etc: bool,
) -> Result<(), SandboxError> {
    for dir in ["proc", "tmp", "usr", "lib", "lib64", "bin", "work", "dev"] {
        fs::create_dir_all(rootfs.join(dir))?;
    }
    if Path::new("/").join(ARCH_SUBTREE).is_dir() {
        fs::create_dir_all(rootfs.join(ARCH_SUBTREE))?;
    }

    mount(
        Some("tmpfs"),
        &rootfs.join("tmp"),
        Some("tmpfs"),
        MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
        Some("size=256M"),
    )
    .map_err(|e| SandboxError::NamespaceSetup(format!("mounting tmpfs on tmp: {e}")))?;
    debug!("mounted tmpfs on {}/tmp", rootfs.display());

    mount(
        Some("proc"),
        &rootfs.join("proc"),
        Some("proc"),
        MsFlags::empty(),
        None::<&str>,
    )
    .map_err(|e| SandboxError::NamespaceSetup(format!("mounting proc: {e}")))?;
    debug!("mounted proc on {}/proc", rootfs.display());

    bind_ro(Path::new("/usr"), &rootfs.join("usr"))?;
    bind_ro_if_present(Path::new("/lib"), &rootfs.join("lib"))?;
    bind_ro_if_present(Path::new("/lib64"), &rootfs.join("lib64"))?;
    bind_ro_if_present(Path::new("/bin"), &rootfs.join("bin"))?;
    bind_ro_if_present(
        &Path::new("/").join(ARCH_SUBTREE),
        &rootfs.join(ARCH_SUBTREE),
    )?;

    for name in DEV_NODES {
        let source = Path::new("/dev").join(name);
        if !source.exists() {
            continue;
        }
        let target = rootfs.join("dev").join(name);
        fs::write(&target, [])?;
        bind_ro(&source, &target)?;
    }

    build_etc(rootfs, bind_full_etc)?;

    fs::create_dir_all(rootfs.join("work"))?;
    let work_target = rootfs.join("work");
    bind_mount(job_dir, &work_target)?;
    let mut work_flags = MsFlags::MS_NOSUID | MsFlags::MS_NODEV;
    if noexec_work {
        work_flags |= MsFlags::MS_NOEXEC;
    }
    remount_bind(&work_target, work_flags)?;
    debug!("bound {} onto {}/work", job_dir.display(), rootfs.display());

    Ok(())
}

fn build_etc(rootfs: &Path, bind_full_etc: bool) -> Result<(), SandboxError> {
    fs::create_dir_all(rootfs.join("etc"))?;
    if bind_full_etc {
        return bind_ro(Path::new("/etc"), &rootfs.join("etc"));
    }
    for name in ETC_WHITELIST {
        let source = Path::new("/etc").join(name);
        if !source.exists() {
            continue;
        }
        let target = rootfs.join("etc").join(name);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, [])?;
        bind_ro(&source, &target)?;
    }
    Ok(())
}

/// Unmounts every mount point created by `build`, in reverse order.
/// Best-effort: every failure is recorded as a `CleanupWarning`
/// instead of aborting, so a partial build still gets torn down as
/// far as possible.
pub fn teardown(rootfs: &Path) -> Vec<CleanupWarning> {
    let mut warnings = Vec::new();
    let mut targets: Vec<PathBuf> = vec![rootfs.join("work"), rootfs.join("etc")];
    for name in DEV_NODES {
        targets.push(rootfs.join("dev").join(name));
    }
    targets.push(rootfs.join(ARCH_SUBTREE));
    for name in ["bin", "lib64", "lib", "usr", "proc", "tmp"] {
        targets.push(rootfs.join(name));
    }

    for target in targets {
        if let Err(e) = force_unmount(&target) {
            warn!("failed to unmount {}: {e}", target.display());
            warnings.push(CleanupWarning {
                step: "rootfs.unmount",
                detail: format!("{}: {e}", target.display()),
            });
        }
    }
    warnings
}

fn force_unmount(path: &Path) -> Result<(), SandboxError> {
    if !path.exists() {
        return Ok(());
    }
    let path_str = to_str(path)?;
    for _ in 0..3 {
        match umount2(path_str, MntFlags::MNT_DETACH) {
            Ok(()) => return Ok(()),
            Err(nix::Error::EINVAL) => return Ok(()), // not a mount point
            Err(nix::Error::EBUSY) => std::thread::sleep(std::time::Duration::from_millis(100)),
            Err(e) => return Err(SandboxError::from(e)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn force_unmount_on_missing_path_is_ok() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("never-mounted");
        assert!(force_unmount(&missing).is_ok());
    }

    #[test]
    fn teardown_on_empty_rootfs_reports_no_warnings_for_missing_targets() {
        let dir = tempdir().unwrap();
        let warnings = teardown(dir.path());
        assert!(warnings.is_empty());
    }

    #[test]
    #[ignore = "requires CAP_SYS_ADMIN to mount bind/tmpfs/proc"]
    fn build_then_teardown_roundtrip() {
        let rootfs = tempdir().unwrap();
        let job = tempdir().unwrap();
        fs::write(job.path().join("main.py"), "print('hi')\n").unwrap();
        build(rootfs.path(), job.path(), true, false).expect("build rootfs view");
        let warnings = teardown(rootfs.path());
        assert!(warnings.is_empty());
    }
}
