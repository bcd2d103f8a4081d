/// Status classification
///
/// Maps raw termination evidence to an `ExecutionStatus`. Pure and
/// deterministic: the same evidence always yields the same status.
use crate::config::types::{ExecutionLimits, ExecutionStatus};
use crate::core::types::{KillReason, LaunchEvidence};
use serde::{Deserialize, Serialize};

/// What decided the status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCause {
    NormalExit,
    NonzeroExit,
    FatalSignal,
    WallTimeJudge,
    CpuTimeKernel,
    CpuTimeAccounted,
    MemoryJudge,
    MemoryAccounted,
    /// The C++ runtime reported an allocation refused under RLIMIT_AS
    AllocationRefused,
    ProcessLimitJudge,
    FileSizeKernel,
    CancelledByJudge,
    UnknownTermination,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Classification {
    pub status: ExecutionStatus,
    pub cause: StatusCause,
}

impl Classification {
    fn new(status: ExecutionStatus, cause: StatusCause) -> Self {
        Self { status, cause }
    }
}

pub struct StatusClassifier;

impl StatusClassifier {
    pub fn classify(evidence: &LaunchEvidence, limits: &ExecutionLimits) -> Classification {
        // Judge actions take precedence: a forced kill surfaces as SIGKILL.
        if let Some(reason) = evidence.kill_reason {
            return match reason {
                KillReason::WallTime => {
                    Classification::new(ExecutionStatus::Timeout, StatusCause::WallTimeJudge)
                }
                KillReason::Memory => Classification::new(
                    ExecutionStatus::ResourceLimitExceeded,
                    StatusCause::MemoryJudge,
                ),
                KillReason::ProcessLimit => Classification::new(
                    ExecutionStatus::ResourceLimitExceeded,
                    StatusCause::ProcessLimitJudge,
                ),
                KillReason::Cancelled => Classification::new(
                    ExecutionStatus::RuntimeError,
                    StatusCause::CancelledByJudge,
                ),
            };
        }

        match evidence.signal {
            Some(libc::SIGXCPU) => {
                return Classification::new(ExecutionStatus::Timeout, StatusCause::CpuTimeKernel)
            }
            Some(libc::SIGXFSZ) => {
                return Classification::new(
                    ExecutionStatus::ResourceLimitExceeded,
                    StatusCause::FileSizeKernel,
                )
            }
            _ => {}
        }

        // RLIMIT_CPU hard limit delivers SIGKILL; accounting still shows the overrun.
        if evidence.usage.cpu_time_ms >= limits.cpu_time_ms && !Self::exited_cleanly(evidence) {
            return Classification::new(ExecutionStatus::Timeout, StatusCause::CpuTimeAccounted);
        }

        if evidence.peak_memory_bytes() > limits.memory_bytes {
            return Classification::new(
                ExecutionStatus::ResourceLimitExceeded,
                StatusCause::MemoryAccounted,
            );
        }

        // An uncaught bad_alloc aborts; it only means a limit when one was set.
        if limits.address_space_bytes.is_some()
            && !Self::exited_cleanly(evidence)
            && evidence.stderr.contains("std::bad_alloc")
        {
            return Classification::new(
                ExecutionStatus::ResourceLimitExceeded,
                StatusCause::AllocationRefused,
            );
        }

        match (evidence.exit_code, evidence.signal) {
            (Some(0), _) => Classification::new(ExecutionStatus::Success, StatusCause::NormalExit),
            (Some(_), _) => {
                Classification::new(ExecutionStatus::RuntimeError, StatusCause::NonzeroExit)
            }
            (None, Some(_)) => {
                Classification::new(ExecutionStatus::RuntimeError, StatusCause::FatalSignal)
            }
            (None, None) => Classification::new(
                ExecutionStatus::RuntimeError,
                StatusCause::UnknownTermination,
            ),
        }
    }

    fn exited_cleanly(evidence: &LaunchEvidence) -> bool {
        evidence.exit_code == Some(0)
    }
}
