// Startup validation.
// Collects every problem before reporting; strict mode turns errors into a hard failure.

use crate::config::loader::TutorboxConfig;
use crate::config::types::{ExecutionLimits, Result, TutorboxError};
use std::path::Path;

/// Validation result with detailed errors
#[derive(Debug)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate config at startup
pub fn validate_config(config: &TutorboxConfig) -> Result<ValidationResult> {
    let mut result = ValidationResult::new();

    validate_limits("run_limits", &config.sandbox.run_limits, &mut result);
    if config.sandbox.run_limits.process_limit.is_none() {
        result.add_error(
            "run_limits.process_limit must be set; submitted programs always run under a process cap"
                .to_string(),
        );
    }
    validate_limits("compile_limits", &config.sandbox.compile_limits, &mut result);
    validate_sandbox(config, &mut result);
    validate_toolchain(config, &mut result);
    validate_tutor(config, &mut result);

    if config.sandbox.strict_mode && !result.is_valid() {
        let error_msg = format!(
            "Config validation failed in strict mode:\n{}",
            result.errors.join("\n")
        );
        return Err(TutorboxError::Config(error_msg));
    }

    for warning in &result.warnings {
        log::warn!("config: {}", warning);
    }
    for error in &result.errors {
        log::error!("config: {}", error);
    }

    Ok(result)
}

fn validate_limits(section: &str, limits: &ExecutionLimits, result: &mut ValidationResult) {
    if limits.memory_bytes == 0 {
        result.add_error(format!("{}.memory_bytes cannot be zero", section));
    } else if limits.memory_bytes < 1024 * 1024 {
        result.add_warning(format!(
            "{}.memory_bytes {} is very low (< 1MB), the C++ runtime may not start",
            section, limits.memory_bytes
        ));
    }

    if limits.cpu_time_ms == 0 {
        result.add_error(format!("{}.cpu_time_ms cannot be zero", section));
    }
    if limits.wall_time_ms == 0 {
        result.add_error(format!("{}.wall_time_ms cannot be zero", section));
    }
    if limits.wall_time_ms < limits.cpu_time_ms {
        result.add_error(format!(
            "{}.wall_time_ms ({}) must be >= cpu_time_ms ({})",
            section, limits.wall_time_ms, limits.cpu_time_ms
        ));
    }

    if limits.max_output_bytes == 0 {
        result.add_error(format!("{}.max_output_bytes cannot be zero", section));
    }
    if limits.open_files < 8 {
        result.add_error(format!(
            "{}.open_files must be at least 8 (stdio plus loader)",
            section
        ));
    }

    if let Some(address_space) = limits.address_space_bytes {
        if address_space < limits.memory_bytes {
            result.add_warning(format!(
                "{}.address_space_bytes is below memory_bytes; allocations will fail before the memory watchdog fires",
                section
            ));
        }
    }

    if limits.process_limit == Some(0) {
        result.add_error(format!("{}.process_limit cannot be zero", section));
    }
}

fn validate_sandbox(config: &TutorboxConfig, result: &mut ValidationResult) {
    let sandbox = &config.sandbox;

    if !sandbox.workspace_root.is_absolute() {
        result.add_error(format!(
            "workspace_root must be absolute path: {:?}",
            sandbox.workspace_root
        ));
    }

    if sandbox.max_source_bytes == 0 {
        result.add_error("max_source_bytes cannot be zero".to_string());
    }

    if !sandbox.network_isolation {
        let msg = "network_isolation is disabled; submitted programs can reach the network";
        if sandbox.strict_mode {
            result.add_error(msg.to_string());
        } else {
            result.add_warning(msg.to_string());
        }
    }

    if config.service.max_parallel == 0 {
        result.add_error("service.max_parallel cannot be zero".to_string());
    }
    if config.service.queue_depth == 0 {
        result.add_error("service.queue_depth cannot be zero".to_string());
    }
}

fn validate_toolchain(config: &TutorboxConfig, result: &mut ValidationResult) {
    let toolchain = &config.toolchain;

    if !toolchain.compiler.is_absolute() {
        result.add_error(format!(
            "toolchain.compiler must be an absolute path: {:?}",
            toolchain.compiler
        ));
    } else if !toolchain.compiler.exists() {
        result.add_warning(format!(
            "toolchain.compiler does not exist: {:?}",
            toolchain.compiler
        ));
    }

    for name in [&toolchain.source_name, &toolchain.binary_name] {
        if name.is_empty() || name.contains('/') || name.starts_with('.') {
            result.add_error(format!(
                "toolchain file names must be plain names, got {:?}",
                name
            ));
        }
    }

    if let Some(flag) = toolchain.flags.iter().find(|f| f.trim() == "-o") {
        result.add_error(format!(
            "toolchain.flags must not set the output path ({:?})",
            flag
        ));
    }
}

fn validate_tutor(config: &TutorboxConfig, result: &mut ValidationResult) {
    if config.tutor.redaction_threshold == 0 {
        result.add_error("tutor.redaction_threshold cannot be zero".to_string());
    } else if config.tutor.redaction_threshold < 16 {
        result.add_warning(format!(
            "tutor.redaction_threshold {} will redact ordinary C++ phrases",
            config.tutor.redaction_threshold
        ));
    }

    if config.reasoning.timeout_ms == 0 {
        result.add_error("reasoning.timeout_ms cannot be zero".to_string());
    }

    if config.reasoning.api_key().is_none() {
        result.add_warning(format!(
            "{} is not set; hint requests will fail",
            config.reasoning.api_key_env
        ));
    }

    if config.callers.is_empty() {
        result.add_warning("no callers configured; every request will be unauthorized".to_string());
    }
}

/// Check if isolation controls are available on this system
pub fn check_system_capabilities() -> Vec<String> {
    let mut missing = Vec::new();

    #[cfg(target_os = "linux")]
    {
        if !Path::new("/proc/self/ns/net").exists() {
            missing.push("network namespaces not available".to_string());
        }
        if !Path::new("/proc/self/statm").exists() {
            missing.push("/proc memory accounting not available".to_string());
        }
    }

    #[cfg(not(target_os = "linux"))]
    {
        missing.push("Linux-only features not available on this platform".to_string());
    }

    missing
}
