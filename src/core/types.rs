use crate::config::types::{ExecutionLimits, OutputIntegrity};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Everything the supervisor needs to start one child.
#[derive(Clone, Debug)]
pub struct LaunchSpec {
    /// Absolute path; never resolved through PATH
    pub program: PathBuf,
    pub args: Vec<String>,
    pub workdir: PathBuf,
    pub environment: Vec<(String, String)>,
    /// `None` connects stdin to /dev/null
    pub stdin_data: Option<String>,
    pub limits: ExecutionLimits,
    pub isolate_network: bool,
    pub strict_mode: bool,
}

/// Why the watchdog killed the process group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KillReason {
    WallTime,
    Memory,
    /// The run's session grew past `process_limit`
    ProcessLimit,
    Cancelled,
}

/// Signal escalation report for forced termination paths.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KillReport {
    pub kill_sent: bool,
    pub waited_ms: u64,
    pub notes: Vec<String>,
}

/// Accounting from `wait4`, covering the leader and every child it reaped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_time_ms: u64,
    pub max_rss_bytes: u64,
}

/// Raw termination evidence produced by core; classified in `verdict`.
#[derive(Clone, Debug, Default)]
pub struct LaunchEvidence {
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub kill_reason: Option<KillReason>,
    pub kill_report: Option<KillReport>,
    pub wall_time_ms: u64,
    pub usage: ResourceUsage,
    /// Highest RSS seen by the watchdog while the process ran
    pub observed_rss_bytes: u64,
    pub stdout: String,
    pub stderr: String,
    pub output_integrity: OutputIntegrity,
    /// Processes of the run still alive after the leader was reaped, now killed
    pub swept_descendants: usize,
}

impl LaunchEvidence {
    pub fn peak_memory_bytes(&self) -> u64 {
        self.usage.max_rss_bytes.max(self.observed_rss_bytes)
    }
}
