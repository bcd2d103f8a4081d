/// Core types and structures for the tutorbox system
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Process cap for submitted programs when none is configured
pub const DEFAULT_PROCESS_LIMIT: u64 = 64;

/// Resource envelope for one sandboxed process (compiler or payload).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionLimits {
    /// CPU time limit in milliseconds (enforced via RLIMIT_CPU)
    pub cpu_time_ms: u64,
    /// Wall clock limit in milliseconds (enforced by the watchdog)
    pub wall_time_ms: u64,
    /// Resident memory limit in bytes (enforced by the watchdog and rusage)
    pub memory_bytes: u64,
    /// Address space cap in bytes (RLIMIT_AS); `None` leaves it unset.
    /// Allocations past it fail inside the program instead of being killed.
    pub address_space_bytes: Option<u64>,
    /// Per-stream capture cap for stdout and stderr
    pub max_output_bytes: usize,
    /// Largest file the process may create
    pub file_size_bytes: u64,
    /// Max open file descriptors
    pub open_files: u64,
    /// Live processes one run may hold. Enforced by the watchdog on the run's
    /// session and, above the uid's current task count, by RLIMIT_NPROC.
    pub process_limit: Option<u64>,
}

impl ExecutionLimits {
    /// Default envelope for the submitted program.
    pub fn run_defaults() -> Self {
        Self {
            cpu_time_ms: 2_000,
            wall_time_ms: 5_000,
            memory_bytes: 256 * 1024 * 1024,
            address_space_bytes: None,
            max_output_bytes: 64 * 1024,
            file_size_bytes: 16 * 1024 * 1024,
            open_files: 64,
            process_limit: Some(DEFAULT_PROCESS_LIMIT),
        }
    }

    /// Compiler needs more time, memory and descriptors than the payload.
    pub fn compile_defaults() -> Self {
        Self {
            cpu_time_ms: 20_000,
            wall_time_ms: 30_000,
            memory_bytes: 1024 * 1024 * 1024,
            address_space_bytes: None,
            max_output_bytes: 64 * 1024,
            file_size_bytes: 64 * 1024 * 1024,
            open_files: 256,
            process_limit: None,
        }
    }
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self::run_defaults()
    }
}

/// Outcome of one sandboxed execution - closed set
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Process exited with status 0 within every limit
    #[default]
    Success,
    /// Compiler rejected the source; the program never ran
    CompileError,
    /// Non-zero exit or fatal signal not attributable to a limit
    RuntimeError,
    /// Wall or CPU time limit exceeded
    Timeout,
    /// Memory or file size limit exceeded
    ResourceLimitExceeded,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Success => write!(f, "success"),
            ExecutionStatus::CompileError => write!(f, "compile_error"),
            ExecutionStatus::RuntimeError => write!(f, "runtime_error"),
            ExecutionStatus::Timeout => write!(f, "timeout"),
            ExecutionStatus::ResourceLimitExceeded => write!(f, "resource_limit_exceeded"),
        }
    }
}

/// Output integrity classification
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputIntegrity {
    #[default]
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "truncated_by_judge_limit")]
    TruncatedByJudgeLimit,
    #[serde(rename = "read_error")]
    ReadError,
}

impl std::fmt::Display for OutputIntegrity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputIntegrity::Complete => write!(f, "complete"),
            OutputIntegrity::TruncatedByJudgeLimit => write!(f, "truncated_by_judge_limit"),
            OutputIntegrity::ReadError => write!(f, "read_error"),
        }
    }
}

/// Result of one sandboxed run. Request-scoped; never cached.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub stdout: String,
    pub stderr: String,
    /// Exit code of the process (if it exited normally)
    pub exit_code: Option<i32>,
    /// Signal that terminated the process (if any)
    pub signal: Option<i32>,
    /// Wall clock time used in milliseconds
    pub duration_ms: u64,
    /// User + system CPU time in milliseconds
    pub cpu_time_ms: u64,
    /// Peak resident set size in bytes
    pub memory_peak_bytes: u64,
    pub output_integrity: OutputIntegrity,
}

impl ExecutionResult {
    pub fn compile_error(diagnostics: String, duration_ms: u64) -> Self {
        Self {
            status: ExecutionStatus::CompileError,
            stdout: String::new(),
            stderr: diagnostics,
            duration_ms,
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

/// Classification of a result against expected behaviour
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
    CompileError,
    RuntimeError,
    Timeout,
    ResourceLimitExceeded,
}

impl Verdict {
    /// Verdict for a run whose output is not compared against anything.
    pub fn from_status(status: ExecutionStatus) -> Self {
        match status {
            ExecutionStatus::Success => Verdict::Pass,
            ExecutionStatus::CompileError => Verdict::CompileError,
            ExecutionStatus::RuntimeError => Verdict::RuntimeError,
            ExecutionStatus::Timeout => Verdict::Timeout,
            ExecutionStatus::ResourceLimitExceeded => Verdict::ResourceLimitExceeded,
        }
    }

    pub fn is_pass(self) -> bool {
        self == Verdict::Pass
    }

    /// Taxonomy kind for failing execution verdicts. `Pass` and `Fail` have none.
    pub fn error_kind(self) -> Option<ErrorKind> {
        match self {
            Verdict::Pass | Verdict::Fail => None,
            Verdict::CompileError => Some(ErrorKind::CompileError),
            Verdict::RuntimeError => Some(ErrorKind::RuntimeError),
            Verdict::Timeout => Some(ErrorKind::Timeout),
            Verdict::ResourceLimitExceeded => Some(ErrorKind::ResourceLimitExceeded),
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Verdict::Pass => "pass",
            Verdict::Fail => "fail",
            Verdict::CompileError => "compile_error",
            Verdict::RuntimeError => "runtime_error",
            Verdict::Timeout => "timeout",
            Verdict::ResourceLimitExceeded => "resource_limit_exceeded",
        };
        f.write_str(label)
    }
}

/// Machine-readable error kind carried by failure responses - closed set
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    SourceTooLarge,
    CompileError,
    RuntimeError,
    Timeout,
    ResourceLimitExceeded,
    UnknownProblem,
    HintUnavailable,
    InternalFault,
    InvalidRequest,
    Unauthorized,
    Cancelled,
}

impl ErrorKind {
    /// Non-success status code for error responses (HTTP semantics).
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::InvalidRequest => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::UnknownProblem => 404,
            ErrorKind::SourceTooLarge => 413,
            ErrorKind::CompileError
            | ErrorKind::RuntimeError
            | ErrorKind::Timeout
            | ErrorKind::ResourceLimitExceeded => 422,
            ErrorKind::Cancelled => 499,
            ErrorKind::InternalFault => 500,
            ErrorKind::HintUnavailable => 503,
        }
    }
}

/// Failures of the external reasoning collaborator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReasoningError {
    #[error("reasoning service timed out after {0} ms")]
    Timeout(u64),

    #[error("reasoning service transport error: {0}")]
    Transport(String),

    /// `body` is kept for logs; it can echo the request, so it never reaches Display.
    #[error("reasoning service returned status {status}")]
    Status { status: u16, body: String },

    #[error("reasoning service reply could not be parsed: {0}")]
    MalformedReply(String),

    #[error("reasoning service returned an empty reply")]
    EmptyReply,

    #[error("reply withheld: it reproduced the reference solution")]
    SolutionLeak,

    #[error("reasoning service is not configured: {0}")]
    NotConfigured(String),
}

impl ReasoningError {
    /// Caller-facing summary. Carries no upstream text.
    pub fn public_summary(&self) -> String {
        match self {
            ReasoningError::Timeout(_) => "the tutor did not answer in time".to_string(),
            ReasoningError::Transport(_) => "the tutor could not be reached".to_string(),
            ReasoningError::Status { status, .. } => {
                format!("the tutor service answered with status {}", status)
            }
            ReasoningError::MalformedReply(_) => "the tutor reply could not be read".to_string(),
            ReasoningError::EmptyReply => "the tutor returned an empty reply".to_string(),
            ReasoningError::SolutionLeak => {
                "the reply was withheld because it revealed the solution".to_string()
            }
            ReasoningError::NotConfigured(_) => "the tutor is not configured".to_string(),
        }
    }
}

/// Custom error types for tutorbox
#[derive(Error, Debug)]
pub enum TutorboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Source is {size} bytes; the limit is {limit} bytes")]
    SourceTooLarge { size: usize, limit: usize },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown problem: {0}")]
    UnknownProblem(String),

    #[error("Caller token not recognised")]
    Unauthorized,

    #[error("Hint unavailable: {0}")]
    HintUnavailable(#[source] ReasoningError),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Filesystem error: {0}")]
    Filesystem(String),

    #[error("Isolation control unavailable: {0}")]
    Isolation(String),

    #[error("Execution cancelled")]
    Cancelled,
}

impl TutorboxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TutorboxError::SourceTooLarge { .. } => ErrorKind::SourceTooLarge,
            TutorboxError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            TutorboxError::UnknownProblem(_) => ErrorKind::UnknownProblem,
            TutorboxError::Unauthorized => ErrorKind::Unauthorized,
            TutorboxError::HintUnavailable(_) => ErrorKind::HintUnavailable,
            TutorboxError::Cancelled => ErrorKind::Cancelled,
            TutorboxError::Io(_)
            | TutorboxError::Config(_)
            | TutorboxError::Process(_)
            | TutorboxError::Filesystem(_)
            | TutorboxError::Isolation(_) => ErrorKind::InternalFault,
        }
    }

    /// Detail safe to hand to a caller. Internal faults never expose paths or OS state,
    /// and reasoning failures never echo what the upstream service sent back.
    pub fn public_detail(&self) -> String {
        match self {
            TutorboxError::HintUnavailable(cause) => {
                format!("Hint unavailable: {}", cause.public_summary())
            }
            _ if self.kind() == ErrorKind::InternalFault => {
                "internal error while processing the request".to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl From<nix::errno::Errno> for TutorboxError {
    fn from(err: nix::errno::Errno) -> Self {
        TutorboxError::Process(err.to_string())
    }
}

/// Result type alias for tutorbox operations
pub type Result<T> = std::result::Result<T, TutorboxError>;
