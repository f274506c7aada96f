//! Loopback-only network namespace bring-up.
//!
//! `networking.rs`/`network.rs` wire up a veth pair and shell out to
//! `slirp4netns` for outbound connectivity across several drivers —
//! out of scope here (no outbound networking by design). A fresh
//! `CLONE_NEWNET` namespace starts with `lo` down and no routes; this
//! module only brings `lo` up, via the same `ip` front-end, following
//! `util.rs`'s `run_with_timeout` wrapper over `std::process::Command`. Must run
//! before the guest is chrooted — at this point the process still sees
//! the host's `/usr/bin/ip`, since only the network namespace, not the
//! mount tree, isolates it from the host here.

use std::process::Command;
use std::time::Duration;

use crate::error::SandboxError;
use crate::util::run_with_timeout;

const IP_UP_TIMEOUT: Duration = Duration::from_secs(2);

/// Runs `ip link set lo up` to bring the loopback interface up inside
/// the guest's own network namespace.
pub fn bring_up_loopback() -> Result<(), SandboxError> {
    let mut cmd = Command::new("ip");
    cmd.args(["link", "set", "lo", "up"]);
    let output = run_with_timeout(cmd, IP_UP_TIMEOUT)
        .map_err(|e| SandboxError::NamespaceSetup(format!("running ip link set lo up: {e}")))?
        .ok_or_else(|| SandboxError::NamespaceSetup("ip link set lo up timed out".to_string()))?;

    if !output.status.success() {
        return Err(SandboxError::NamespaceSetup(format!(
            "ip link set lo up failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore = "requires a real network namespace (CLONE_NEWNET) and the ip binary"]
    fn bring_up_loopback_in_fresh_netns() {
        nix::sched::unshare(nix::sched::CloneFlags::CLONE_NEWNET).unwrap();
        bring_up_loopback().expect("bring up lo");
    }
}
