//! Namespace setup: unshare plus user-namespace identity mapping.
//!
//! Generalizes `syscalls.rs`'s `unshare_user_namespace` /
//! `unshare_remaining_namespaces` / `map_user_namespace_rootless`.
//! `newuidmap`/`newgidmap` subprocess calls map an arbitrary subuid
//! range for rootless multi-user containers; this executor only ever
//! needs a single identity mapping (container uid 0 -> the real
//! calling uid), which the kernel permits an unprivileged process to
//! write to its own `/proc/self/{uid,gid}_map` directly — no setuid
//! helper needed. A helper subprocess is reserved for the one boundary
//! that truly needs privilege: the mount/chroot/cgroup sequence.

use nix::sched::{unshare, CloneFlags};
use nix::unistd::{getgid, getuid, sethostname};
use log::debug;

use crate::error::SandboxError;

/// Phase 1: create the user namespace. Unprivileged.
pub fn enter_user_namespace() -> Result<(), SandboxError> {
    unshare(CloneFlags::CLONE_NEWUSER)
        .map_err(|e| SandboxError::NamespaceSetup(format!("unshare(CLONE_NEWUSER): {e}")))?;
    debug!("entered user namespace");
    Ok(())
}

/// Must run before writing `gid_map` with a non-empty mapping list, or
/// the kernel rejects it for processes without CAP_SETGID in the
/// parent namespace.
pub fn disable_setgroups() -> Result<(), SandboxError> {
    std::fs::write("/proc/self/setgroups", "deny")
        .map_err(|e| SandboxError::NamespaceSetup(format!("disabling setgroups: {e}")))
}

/// Maps container uid/gid 0 to the real calling uid/gid, one-to-one —
/// the "simulated root" the guest runs as.
pub fn map_identity() -> Result<(), SandboxError> {
    let uid = getuid().as_raw();
    let gid = getgid().as_raw();
    std::fs::write("/proc/self/uid_map", format!("0 {uid} 1"))
        .map_err(|e| SandboxError::NamespaceSetup(format!("writing uid_map: {e}")))?;
    std::fs::write("/proc/self/gid_map", format!("0 {gid} 1"))
        .map_err(|e| SandboxError::NamespaceSetup(format!("writing gid_map: {e}")))?;
    debug!("mapped container root to host uid={uid} gid={gid}");
    Ok(())
}

/// Phase 2: the remaining namespaces (mount, pid, net, uts). Requires
/// the capabilities granted by the user-namespace mapping above. A
/// fresh PID namespace only takes effect for the *next* forked child,
/// which becomes PID 1 inside it — this process does not become PID 1
/// itself.
pub fn unshare_isolation_namespaces() -> Result<(), SandboxError> {
    let flags = CloneFlags::CLONE_NEWNS
        | CloneFlags::CLONE_NEWPID
        | CloneFlags::CLONE_NEWNET
        | CloneFlags::CLONE_NEWUTS;
    unshare(flags).map_err(|e| SandboxError::NamespaceSetup(format!("unshare(remaining): {e}")))?;
    debug!("entered mount/pid/net/uts namespaces");
    Ok(())
}

/// Makes the entire mount tree private so none of the later bind
/// mounts propagate to the host or to sibling namespaces. Must run
/// before any bind mount.
pub fn make_mount_tree_private() -> Result<(), SandboxError> {
    use nix::mount::{mount, MsFlags};
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )
    .map_err(|e| SandboxError::NamespaceSetup(format!("making mount tree rprivate: {e}")))
}

pub fn set_hostname(name: &str) -> Result<(), SandboxError> {
    sethostname(name).map_err(|e| SandboxError::NamespaceSetup(format!("sethostname: {e}")))
}
