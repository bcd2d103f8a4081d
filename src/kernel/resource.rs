/// rlimit plans applied in the forked child before exec.
///
/// The plan is computed in the parent; `apply` runs between fork and exec and
/// therefore only performs raw syscalls (no allocation, no logging).
use crate::config::types::ExecutionLimits;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RlimitEntry {
    pub name: &'static str,
    pub resource: libc::__rlimit_resource_t,
    pub soft: u64,
    pub hard: u64,
}

#[derive(Clone, Debug, Default)]
pub struct RlimitPlan {
    entries: Vec<RlimitEntry>,
}

impl RlimitPlan {
    pub fn from_limits(limits: &ExecutionLimits) -> Self {
        let mut entries = Vec::with_capacity(7);

        // soft -> SIGXCPU, hard one second later -> SIGKILL
        let cpu_secs = limits.cpu_time_ms.div_ceil(1000).max(1);
        entries.push(RlimitEntry {
            name: "RLIMIT_CPU",
            resource: libc::RLIMIT_CPU,
            soft: cpu_secs,
            hard: cpu_secs + 1,
        });

        entries.push(RlimitEntry {
            name: "RLIMIT_FSIZE",
            resource: libc::RLIMIT_FSIZE,
            soft: limits.file_size_bytes,
            hard: limits.file_size_bytes,
        });

        entries.push(RlimitEntry {
            name: "RLIMIT_NOFILE",
            resource: libc::RLIMIT_NOFILE,
            soft: limits.open_files,
            hard: limits.open_files,
        });

        entries.push(RlimitEntry {
            name: "RLIMIT_CORE",
            resource: libc::RLIMIT_CORE,
            soft: 0,
            hard: 0,
        });

        if let Some(address_space) = limits.address_space_bytes {
            entries.push(RlimitEntry {
                name: "RLIMIT_AS",
                resource: libc::RLIMIT_AS,
                soft: address_space,
                hard: address_space,
            });
        }

        if let Some(nproc) = limits.process_limit {
            entries.push(RlimitEntry {
                name: "RLIMIT_NPROC",
                resource: libc::RLIMIT_NPROC,
                soft: nproc,
                hard: nproc,
            });
        }

        Self { entries }
    }

    /// RLIMIT_NPROC counts every task of the real uid, not only this run's.
    /// Raise it by the tasks the uid already has so the cap bounds growth.
    pub fn with_process_headroom(mut self, existing_tasks: u64) -> Self {
        for entry in &mut self.entries {
            if entry.resource == libc::RLIMIT_NPROC {
                entry.soft = entry.soft.saturating_add(existing_tasks);
                entry.hard = entry.soft;
            }
        }
        self
    }

    pub fn entries(&self) -> &[RlimitEntry] {
        &self.entries
    }

    /// Apply every entry to the calling process.
    ///
    /// Strict mode stops at the first failure; permissive mode skips failing entries.
    pub fn apply(&self, strict_mode: bool) -> std::io::Result<()> {
        for entry in &self.entries {
            let limit = libc::rlimit {
                rlim_cur: entry.soft as libc::rlim_t,
                rlim_max: entry.hard as libc::rlim_t,
            };
            // SAFETY: setrlimit with a valid pointer to a stack value.
            let rc = unsafe { libc::setrlimit(entry.resource, &limit) };
            if rc != 0 && strict_mode {
                return Err(std::io::Error::last_os_error());
            }
        }
        Ok(())
    }
}

/// Ask the kernel to SIGKILL the child if the supervising thread's process dies.
pub fn set_parent_death_signal() -> std::io::Result<()> {
    // SAFETY: prctl with integer arguments only.
    let rc = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL as libc::c_ulong, 0, 0, 0) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}
