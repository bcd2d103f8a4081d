/// Structured audit trail for tutorbox
///
/// Sandbox lifecycle, limit violations and tutoring safety decisions are
/// written as JSON lines to an append-only file. Without a file every event
/// still goes to the `log` facade.
use crate::config::types::{Result, TutorboxError};
use crate::core::types::{KillReason, KillReport};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

/// Audit event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditSeverity {
    Critical,
    High,
    Medium,
    Low,
}

/// Types of audit events we track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEventType {
    ExecutionStart,
    ExecutionEnd,
    ControlDegraded,

    MemoryLimitViolation,
    CpuLimitViolation,
    WallTimeLimitViolation,
    ProcessLimitViolation,
    OutputLimitViolation,
    SourceRejected,

    ForcedKill,
    StrayProcesses,
    CleanupFailure,

    HintRedacted,
    HintRejected,
    AuthFailure,
}

impl AuditEventType {
    pub fn default_severity(&self) -> AuditSeverity {
        match self {
            AuditEventType::ExecutionStart | AuditEventType::ExecutionEnd => AuditSeverity::Low,
            AuditEventType::ControlDegraded => AuditSeverity::High,

            AuditEventType::MemoryLimitViolation
            | AuditEventType::CpuLimitViolation
            | AuditEventType::WallTimeLimitViolation
            | AuditEventType::ProcessLimitViolation => AuditSeverity::Medium,
            AuditEventType::OutputLimitViolation | AuditEventType::SourceRejected => {
                AuditSeverity::Low
            }

            AuditEventType::ForcedKill => AuditSeverity::Medium,
            AuditEventType::StrayProcesses => AuditSeverity::High,
            AuditEventType::CleanupFailure => AuditSeverity::Critical,

            AuditEventType::HintRedacted => AuditSeverity::Medium,
            AuditEventType::HintRejected => AuditSeverity::High,
            AuditEventType::AuthFailure => AuditSeverity::Medium,
        }
    }
}

/// One audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_type: AuditEventType,
    pub severity: AuditSeverity,
    pub timestamp: DateTime<Utc>,
    pub details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem_id: Option<String>,
    /// sha256 of the submitted source, never the source itself
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_fingerprint: Option<String>,
}

impl AuditEvent {
    /// Create a new event with default severity
    pub fn new(event_type: AuditEventType, details: impl Into<String>) -> Self {
        Self {
            event_type,
            severity: event_type.default_severity(),
            timestamp: Utc::now(),
            details: details.into(),
            run_id: None,
            pid: None,
            learner: None,
            problem_id: None,
            source_fingerprint: None,
        }
    }

    pub fn with_run_id(mut self, run_id: &str) -> Self {
        self.run_id = Some(run_id.to_string());
        self
    }

    pub fn with_pid(mut self, pid: i32) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn with_learner(mut self, learner: &str) -> Self {
        self.learner = Some(learner.to_string());
        self
    }

    pub fn with_problem(mut self, problem_id: &str) -> Self {
        self.problem_id = Some(problem_id.to_string());
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: &str) -> Self {
        self.source_fingerprint = Some(fingerprint.to_string());
        self
    }

    pub fn with_severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }
}

/// File-backed audit writer
pub struct AuditLogger {
    audit_file: Mutex<File>,
    audit_path: PathBuf,
}

impl AuditLogger {
    pub fn new(audit_path: &Path) -> Result<Self> {
        if let Some(parent) = audit_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                TutorboxError::Config(format!("Failed to create audit log directory: {}", e))
            })?;
        }

        let audit_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(audit_path)
            .map_err(|e| TutorboxError::Config(format!("Failed to open audit log: {}", e)))?;

        Ok(Self {
            audit_file: Mutex::new(audit_file),
            audit_path: audit_path.to_path_buf(),
        })
    }

    pub fn write_event(&self, event: &AuditEvent) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize audit event: {}", e);
                return;
            }
        };

        match self.audit_file.lock() {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{}", line).and_then(|_| file.flush()) {
                    error!("Failed to write to audit log: {}", e);
                }
            }
            Err(_) => error!("Failed to acquire lock on audit file"),
        }
    }

    pub fn audit_path(&self) -> &Path {
        &self.audit_path
    }
}

static AUDIT_LOGGER: OnceLock<AuditLogger> = OnceLock::new();

/// Initialize the global audit file. `None` keeps events on the logger only.
pub fn init_audit_logger(audit_path: Option<&Path>) -> Result<()> {
    let Some(path) = audit_path else {
        info!("No audit log configured; audit events go to the logger only");
        return Ok(());
    };

    let logger = AuditLogger::new(path)?;
    if AUDIT_LOGGER.set(logger).is_err() {
        warn!("Audit logger already initialized");
    } else {
        info!("Audit log at {}", path.display());
    }
    Ok(())
}

/// Record an event in the audit file (if any) and the logger.
pub fn record(event: AuditEvent) {
    match event.severity {
        AuditSeverity::Critical | AuditSeverity::High => {
            error!("AUDIT {:?}: {}", event.event_type, event.details)
        }
        AuditSeverity::Medium => warn!("AUDIT {:?}: {}", event.event_type, event.details),
        AuditSeverity::Low => info!("AUDIT {:?}: {}", event.event_type, event.details),
    }

    if let Some(logger) = AUDIT_LOGGER.get() {
        logger.write_event(&event);
    }
}

/// Convenience functions for common audit events
pub mod events {
    use super::*;

    pub fn execution_start(run_id: &str, phase: &str, fingerprint: &str) {
        record(
            AuditEvent::new(AuditEventType::ExecutionStart, format!("{} started", phase))
                .with_run_id(run_id)
                .with_fingerprint(fingerprint),
        );
    }

    pub fn execution_end(run_id: &str, phase: &str, status: &str, duration_ms: u64) {
        record(
            AuditEvent::new(
                AuditEventType::ExecutionEnd,
                format!("{} finished: {} in {} ms", phase, status, duration_ms),
            )
            .with_run_id(run_id),
        );
    }

    pub fn control_degraded(control: &str, reason: &str) {
        record(AuditEvent::new(
            AuditEventType::ControlDegraded,
            format!("{} unavailable: {}", control, reason),
        ));
    }

    pub fn memory_limit_violation(run_id: &str, used: u64, limit: u64) {
        record(
            AuditEvent::new(
                AuditEventType::MemoryLimitViolation,
                format!("peak memory {} bytes exceeded limit {} bytes", used, limit),
            )
            .with_run_id(run_id),
        );
    }

    pub fn cpu_limit_violation(run_id: &str, used_ms: u64, limit_ms: u64) {
        record(
            AuditEvent::new(
                AuditEventType::CpuLimitViolation,
                format!("cpu time {} ms exceeded limit {} ms", used_ms, limit_ms),
            )
            .with_run_id(run_id),
        );
    }

    pub fn wall_time_limit_violation(run_id: &str, used_ms: u64, limit_ms: u64) {
        record(
            AuditEvent::new(
                AuditEventType::WallTimeLimitViolation,
                format!("wall time {} ms exceeded limit {} ms", used_ms, limit_ms),
            )
            .with_run_id(run_id),
        );
    }

    pub fn process_limit_violation(run_id: &str, limit: u64) {
        record(
            AuditEvent::new(
                AuditEventType::ProcessLimitViolation,
                format!("run exceeded its cap of {} processes", limit),
            )
            .with_run_id(run_id),
        );
    }

    pub fn output_truncated(pid: i32, total_bytes: u64, limit: usize) {
        record(
            AuditEvent::new(
                AuditEventType::OutputLimitViolation,
                format!("output of {} bytes truncated to {} bytes", total_bytes, limit),
            )
            .with_pid(pid),
        );
    }

    pub fn source_rejected(size: usize, limit: usize) {
        record(AuditEvent::new(
            AuditEventType::SourceRejected,
            format!("source of {} bytes exceeds {} bytes", size, limit),
        ));
    }

    pub fn forced_kill(pid: i32, reason: KillReason, report: &KillReport) {
        let mut details = format!("process group killed ({:?})", reason);
        if !report.notes.is_empty() {
            details.push_str(": ");
            details.push_str(&report.notes.join("; "));
        }
        record(AuditEvent::new(AuditEventType::ForcedKill, details).with_pid(pid));
    }

    /// Processes that outlived their run's leader. `settled` is false when
    /// the sweep gave up with something still running.
    pub fn strays_killed(pid: i32, killed: usize, settled: bool) {
        let mut event = AuditEvent::new(
            AuditEventType::StrayProcesses,
            format!("{} process(es) outlived the run and were killed", killed),
        )
        .with_pid(pid);
        if !settled {
            event = event.with_severity(AuditSeverity::Critical);
            event.details.push_str("; some could not be removed");
        }
        record(event);
    }

    pub fn cleanup_failure(run_id: &str, error: &str) {
        record(
            AuditEvent::new(
                AuditEventType::CleanupFailure,
                format!("run directory removal failed: {}", error),
            )
            .with_run_id(run_id),
        );
    }

    pub fn hint_redacted(learner: &str, problem_id: &str, spans: usize) {
        record(
            AuditEvent::new(
                AuditEventType::HintRedacted,
                format!("{} reference-solution span(s) redacted from hint", spans),
            )
            .with_learner(learner)
            .with_problem(problem_id),
        );
    }

    pub fn hint_rejected(learner: &str, problem_id: &str, reason: &str) {
        record(
            AuditEvent::new(AuditEventType::HintRejected, format!("hint withheld: {}", reason))
                .with_learner(learner)
                .with_problem(problem_id),
        );
    }

    pub fn auth_failure(request_id: &str) {
        record(AuditEvent::new(
            AuditEventType::AuthFailure,
            format!("unrecognised caller token on request {}", request_id),
        ));
    }
}
