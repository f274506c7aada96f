//! Seccomp hook point.
//!
//! Leaves a place to install a syscall filter before the guest execs,
//! but fixes no policy — out of scope per the exclusion of seccomp
//! filter design. Generalizes the shape of a `SeccompFilter` (which
//! would build a `libseccomp` filter from a config struct) down to the
//! no-op this scope actually calls for; the `libseccomp` dependency
//! that would need is dropped, since no filter is ever built here.

use crate::error::SandboxError;

/// Installs a syscall filter in the calling process. The default hook
/// does nothing — a future policy would call into `libseccomp` here,
/// before the guest's `execvp`.
pub trait SeccompHook {
    fn install(&self) -> Result<(), SandboxError>;
}

pub struct NoFilter;

impl SeccompHook for NoFilter {
    fn install(&self) -> Result<(), SandboxError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_filter_hook_is_a_noop() {
        assert!(NoFilter.install().is_ok());
    }
}
