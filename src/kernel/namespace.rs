/// Network isolation through unprivileged user+network namespaces
use nix::sched::{unshare, CloneFlags};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult};

const ISOLATION_FLAGS: CloneFlags = CloneFlags::CLONE_NEWUSER.union(CloneFlags::CLONE_NEWNET);

/// Whether children can be moved into a namespace without network devices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetworkIsolation {
    Available,
    Unavailable(String),
    Disabled,
}

impl NetworkIsolation {
    pub fn is_available(&self) -> bool {
        matches!(self, NetworkIsolation::Available)
    }

    pub fn describe(&self) -> String {
        match self {
            NetworkIsolation::Available => "user+network namespaces".to_string(),
            NetworkIsolation::Unavailable(reason) => format!("unavailable: {}", reason),
            NetworkIsolation::Disabled => "disabled by configuration".to_string(),
        }
    }
}

/// Check if namespace isolation is supported on this system
pub fn is_supported() -> bool {
    std::path::Path::new("/proc/self/ns/net").exists()
}

/// Fork a throwaway child that tries the same unshare the sandbox uses.
pub fn probe() -> NetworkIsolation {
    if !is_supported() {
        return NetworkIsolation::Unavailable("/proc/self/ns/net missing".to_string());
    }

    // SAFETY: the child only calls unshare and _exit, both async-signal-safe.
    match unsafe { fork() } {
        Ok(ForkResult::Child) => {
            let code = if unshare(ISOLATION_FLAGS).is_ok() { 0 } else { 1 };
            // SAFETY: terminate the forked child without running destructors.
            unsafe { libc::_exit(code) }
        }
        Ok(ForkResult::Parent { child }) => match waitpid(child, None) {
            Ok(WaitStatus::Exited(_, 0)) => NetworkIsolation::Available,
            Ok(status) => NetworkIsolation::Unavailable(format!(
                "unshare(CLONE_NEWUSER|CLONE_NEWNET) refused ({:?})",
                status
            )),
            Err(e) => NetworkIsolation::Unavailable(format!("probe wait failed: {}", e)),
        },
        Err(e) => NetworkIsolation::Unavailable(format!("probe fork failed: {}", e)),
    }
}

/// Child side, between fork and exec.
pub fn enter_isolated_namespaces() -> std::io::Result<()> {
    unshare(ISOLATION_FLAGS).map_err(std::io::Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_does_not_panic() {
        let result = probe();
        // Either outcome is valid; containers often forbid user namespaces.
        assert!(!result.describe().is_empty());
    }

    #[test]
    fn test_disabled_is_not_available() {
        assert!(!NetworkIsolation::Disabled.is_available());
        assert!(NetworkIsolation::Available.is_available());
    }
}
