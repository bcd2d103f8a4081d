/// Compile-and-run sandbox
///
/// One call acquires a run directory and a process group per step, and
/// releases both before returning on every path.
use crate::config::loader::{SandboxConfig, ToolchainConfig};
use crate::config::types::{
    ExecutionLimits, ExecutionResult, ExecutionStatus, Result, TutorboxError, DEFAULT_PROCESS_LIMIT,
};
use crate::core::supervisor::launch;
use crate::core::types::{LaunchEvidence, LaunchSpec};
use crate::judge::adapter::{CommandLine, ToolchainAdapter};
use crate::judge::languages::cpp::CppAdapter;
use crate::kernel::namespace::{self, NetworkIsolation};
use crate::kernel::signal::CancelToken;
use crate::observability::audit::events;
use crate::safety::workspace::{RunWorkspace, WorkspaceManager};
use crate::utils::env_hygiene::EnvPolicy;
use crate::verdict::classifier::{StatusCause, StatusClassifier};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// One compile-and-run request
#[derive(Clone, Debug, Default)]
pub struct ExecutionRequest {
    pub source: String,
    pub stdin: Option<String>,
    /// Overrides the configured run limits
    pub limits: Option<ExecutionLimits>,
}

impl ExecutionRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = Some(limits);
        self
    }
}

/// Result of compiling once and running once per input
#[derive(Clone, Debug, PartialEq)]
pub enum BatchOutcome {
    Compiled(Vec<ExecutionResult>),
    CompileFailed(ExecutionResult),
}

impl BatchOutcome {
    pub fn into_results(self) -> Vec<ExecutionResult> {
        match self {
            BatchOutcome::Compiled(results) => results,
            BatchOutcome::CompileFailed(result) => vec![result],
        }
    }
}

/// Execution contract consumed by the orchestrator
pub trait CodeExecutor: Send + Sync {
    fn execute(&self, request: &ExecutionRequest, cancel: &CancelToken) -> Result<ExecutionResult>;

    fn execute_batch(
        &self,
        source: &str,
        inputs: &[String],
        limits: Option<&ExecutionLimits>,
        cancel: &CancelToken,
    ) -> Result<BatchOutcome>;

    fn max_source_bytes(&self) -> usize;
}

/// Toolchain availability report (`check-deps`)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolchainReport {
    pub language: String,
    pub compiler: String,
    pub available: bool,
    pub version: Option<String>,
    pub network_isolation: String,
    pub detail: Option<String>,
}

/// sha256 of the source, hex encoded
pub fn source_fingerprint(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub struct Sandbox {
    adapter: Arc<dyn ToolchainAdapter>,
    workspaces: WorkspaceManager,
    config: SandboxConfig,
    isolation: NetworkIsolation,
    env_policy: EnvPolicy,
}

impl Sandbox {
    pub fn new(config: SandboxConfig, toolchain: ToolchainConfig) -> Result<Self> {
        Self::with_adapter(config, Arc::new(CppAdapter::new(toolchain)))
    }

    pub fn with_adapter(config: SandboxConfig, adapter: Arc<dyn ToolchainAdapter>) -> Result<Self> {
        let workspaces = WorkspaceManager::new(config.workspace_root.clone())?;

        let isolation = if config.network_isolation {
            namespace::probe()
        } else {
            NetworkIsolation::Disabled
        };
        match &isolation {
            NetworkIsolation::Available => {
                log::debug!("Network isolation: {}", isolation.describe())
            }
            NetworkIsolation::Unavailable(reason) => {
                events::control_degraded("network_isolation", reason);
                if !config.strict_mode {
                    log::warn!(
                        "Network isolation unavailable ({}); programs run with host networking",
                        reason
                    );
                }
            }
            NetworkIsolation::Disabled => {
                log::warn!("Network isolation disabled by configuration")
            }
        }

        Ok(Self {
            adapter,
            workspaces,
            config,
            isolation,
            env_policy: EnvPolicy::default(),
        })
    }

    pub fn isolation(&self) -> &NetworkIsolation {
        &self.isolation
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    /// Remove run directories abandoned by an earlier crash.
    pub fn sweep_stale(&self) -> Result<usize> {
        self.workspaces
            .sweep_stale(Duration::from_secs(self.config.stale_after_secs))
    }

    pub fn check_toolchain(&self) -> ToolchainReport {
        let version_cmd = self.adapter.version_command();
        let mut report = ToolchainReport {
            language: self.adapter.language().to_string(),
            compiler: version_cmd.program.display().to_string(),
            available: false,
            version: None,
            network_isolation: self.isolation.describe(),
            detail: None,
        };

        if !version_cmd.program.exists() {
            report.detail = Some("compiler not found".to_string());
            return report;
        }

        let spec = LaunchSpec {
            program: version_cmd.program.clone(),
            args: version_cmd.args.clone(),
            workdir: self.workspaces.base_dir().to_path_buf(),
            environment: self.env_policy.sandbox_environment(self.workspaces.base_dir()),
            stdin_data: None,
            limits: self.config.compile_limits.clone(),
            isolate_network: false,
            strict_mode: false,
        };
        match launch(&spec, &CancelToken::new()) {
            Ok(evidence) if evidence.exit_code == Some(0) => {
                report.available = true;
                report.version = evidence.stdout.lines().next().map(str::to_string);
            }
            Ok(evidence) => {
                report.detail = Some(format!(
                    "version probe exited with {:?}",
                    evidence.exit_code.or(evidence.signal)
                ));
            }
            Err(e) => report.detail = Some(e.to_string()),
        }
        report
    }

    fn check_source(&self, source: &str) -> Result<()> {
        if source.len() > self.config.max_source_bytes {
            events::source_rejected(source.len(), self.config.max_source_bytes);
            return Err(TutorboxError::SourceTooLarge {
                size: source.len(),
                limit: self.config.max_source_bytes,
            });
        }
        Ok(())
    }

    fn isolate_network(&self) -> Result<bool> {
        match &self.isolation {
            NetworkIsolation::Available => Ok(true),
            NetworkIsolation::Unavailable(reason) if self.config.strict_mode => Err(
                TutorboxError::Isolation(format!("network isolation unavailable: {}", reason)),
            ),
            _ => Ok(false),
        }
    }

    /// Programs always run under a process cap; an override without one
    /// inherits the configured cap.
    fn run_limits(&self, requested: Option<&ExecutionLimits>) -> ExecutionLimits {
        let mut limits = requested.unwrap_or(&self.config.run_limits).clone();
        if limits.process_limit.is_none() {
            limits.process_limit =
                Some(self.config.run_limits.process_limit.unwrap_or(DEFAULT_PROCESS_LIMIT));
        }
        limits
    }

    fn spec_for(
        &self,
        command: CommandLine,
        workspace: &RunWorkspace,
        stdin: Option<&str>,
        limits: &ExecutionLimits,
        isolate_network: bool,
    ) -> LaunchSpec {
        LaunchSpec {
            program: command.program,
            args: command.args,
            workdir: workspace.run_dir().to_path_buf(),
            environment: self.env_policy.sandbox_environment(workspace.run_dir()),
            stdin_data: stdin.map(str::to_string),
            limits: limits.clone(),
            isolate_network,
            strict_mode: self.config.strict_mode,
        }
    }

    /// Materialize and compile. `Some` carries the compile failure.
    fn compile(
        &self,
        workspace: &RunWorkspace,
        source: &str,
        isolate_network: bool,
        cancel: &CancelToken,
    ) -> Result<Option<ExecutionResult>> {
        workspace.write_file(self.adapter.source_name(), source.as_bytes())?;
        events::execution_start(workspace.run_id(), "compile", &source_fingerprint(source));

        let limits = &self.config.compile_limits;
        let spec = self.spec_for(
            self.adapter.compile_command(workspace),
            workspace,
            None,
            limits,
            isolate_network,
        );
        let evidence = launch(&spec, cancel)?;
        let classification = StatusClassifier::classify(&evidence, limits);
        events::execution_end(
            workspace.run_id(),
            "compile",
            &classification.status.to_string(),
            evidence.wall_time_ms,
        );

        if classification.status == ExecutionStatus::Success {
            return Ok(None);
        }

        let mut diagnostics = workspace.sanitize_diagnostics(&evidence.stderr);
        if diagnostics.trim().is_empty() {
            diagnostics = workspace.sanitize_diagnostics(&evidence.stdout);
        }
        match classification.status {
            ExecutionStatus::Timeout => {
                diagnostics.push_str("\ncompilation exceeded its time limit");
            }
            ExecutionStatus::ResourceLimitExceeded => {
                diagnostics.push_str("\ncompilation exceeded its resource limits");
            }
            _ => {}
        }
        Ok(Some(ExecutionResult::compile_error(
            diagnostics,
            evidence.wall_time_ms,
        )))
    }

    fn run_binary(
        &self,
        workspace: &RunWorkspace,
        stdin: Option<&str>,
        limits: &ExecutionLimits,
        isolate_network: bool,
        cancel: &CancelToken,
    ) -> Result<ExecutionResult> {
        let command = self.adapter.run_command(workspace);
        if !command.program.exists() {
            return Err(TutorboxError::Process(
                "compiler reported success but produced no binary".to_string(),
            ));
        }

        let spec = self.spec_for(command, workspace, stdin, limits, isolate_network);
        let evidence = launch(&spec, cancel)?;
        let classification = StatusClassifier::classify(&evidence, limits);
        record_violation(workspace.run_id(), classification.cause, &evidence, limits);
        events::execution_end(
            workspace.run_id(),
            "run",
            &classification.status.to_string(),
            evidence.wall_time_ms,
        );

        Ok(ExecutionResult {
            status: classification.status,
            stderr: workspace.sanitize_diagnostics(&evidence.stderr),
            stdout: evidence.stdout.clone(),
            exit_code: evidence.exit_code,
            signal: evidence.signal,
            duration_ms: evidence.wall_time_ms,
            cpu_time_ms: evidence.usage.cpu_time_ms,
            memory_peak_bytes: evidence.peak_memory_bytes(),
            output_integrity: evidence.output_integrity,
        })
    }
}

fn record_violation(
    run_id: &str,
    cause: StatusCause,
    evidence: &LaunchEvidence,
    limits: &ExecutionLimits,
) {
    match cause {
        StatusCause::WallTimeJudge => {
            events::wall_time_limit_violation(run_id, evidence.wall_time_ms, limits.wall_time_ms)
        }
        StatusCause::CpuTimeKernel | StatusCause::CpuTimeAccounted => {
            events::cpu_limit_violation(run_id, evidence.usage.cpu_time_ms, limits.cpu_time_ms)
        }
        StatusCause::MemoryJudge | StatusCause::MemoryAccounted | StatusCause::AllocationRefused => {
            events::memory_limit_violation(run_id, evidence.peak_memory_bytes(), limits.memory_bytes)
        }
        StatusCause::ProcessLimitJudge => {
            events::process_limit_violation(run_id, limits.process_limit.unwrap_or_default())
        }
        _ => {}
    }
}

impl CodeExecutor for Sandbox {
    fn execute(&self, request: &ExecutionRequest, cancel: &CancelToken) -> Result<ExecutionResult> {
        self.check_source(&request.source)?;
        let isolate_network = self.isolate_network()?;
        let limits = self.run_limits(request.limits.as_ref());

        let mut workspace = self.workspaces.create_workspace()?;
        let result = match self.compile(&workspace, &request.source, isolate_network, cancel)? {
            Some(failure) => failure,
            None => self.run_binary(
                &workspace,
                request.stdin.as_deref(),
                &limits,
                isolate_network,
                cancel,
            )?,
        };
        if let Err(e) = workspace.cleanup() {
            log::warn!("{}", e);
        }
        Ok(result)
    }

    fn execute_batch(
        &self,
        source: &str,
        inputs: &[String],
        limits: Option<&ExecutionLimits>,
        cancel: &CancelToken,
    ) -> Result<BatchOutcome> {
        self.check_source(source)?;
        let isolate_network = self.isolate_network()?;
        let limits = self.run_limits(limits);

        let mut workspace = self.workspaces.create_workspace()?;
        if let Some(failure) = self.compile(&workspace, source, isolate_network, cancel)? {
            return Ok(BatchOutcome::CompileFailed(failure));
        }

        let mut results = Vec::with_capacity(inputs.len());
        for input in inputs {
            results.push(self.run_binary(
                &workspace,
                Some(input.as_str()),
                &limits,
                isolate_network,
                cancel,
            )?);
        }
        if let Err(e) = workspace.cleanup() {
            log::warn!("{}", e);
        }
        Ok(BatchOutcome::Compiled(results))
    }

    fn max_source_bytes(&self) -> usize {
        self.config.max_source_bytes
    }
}
