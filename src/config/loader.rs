//! Runtime configuration (`tutorbox.json`).
//!
//! Every section has built-in defaults, so an absent or partial file is valid.
//! CLI flags override the loaded values in `cli.rs`.

use crate::config::types::{ExecutionLimits, Result, TutorboxError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "tutorbox.json";

/// Top-level configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TutorboxConfig {
    pub sandbox: SandboxConfig,
    pub toolchain: ToolchainConfig,
    pub reasoning: ReasoningConfig,
    pub tutor: TutorConfig,
    pub service: ServiceConfig,
    /// JSON array of problem records
    pub catalog_path: PathBuf,
    /// Caller token -> learner id
    pub callers: BTreeMap<String, String>,
    /// Append-only JSON-lines audit file; `None` routes events to the logger
    pub audit_log: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Parent of every run directory
    pub workspace_root: PathBuf,
    pub max_source_bytes: usize,
    pub run_limits: ExecutionLimits,
    pub compile_limits: ExecutionLimits,
    /// Run children in fresh user+network namespaces when the kernel allows it
    pub network_isolation: bool,
    /// Fail instead of degrading when an isolation control is unavailable
    pub strict_mode: bool,
    /// Run directories older than this are removed at service start
    pub stale_after_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
            max_source_bytes: 64 * 1024,
            run_limits: ExecutionLimits::run_defaults(),
            compile_limits: ExecutionLimits::compile_defaults(),
            network_isolation: true,
            strict_mode: false,
            stale_after_secs: 3600,
        }
    }
}

/// Per-uid root keeps concurrent users from sharing run directories.
pub fn default_workspace_root() -> PathBuf {
    let euid = nix::unistd::geteuid().as_raw();
    std::env::temp_dir().join(format!("tutorbox-uid-{}", euid))
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Absolute path of the only compiler the sandbox will invoke
    pub compiler: PathBuf,
    pub flags: Vec<String>,
    pub source_name: String,
    pub binary_name: String,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            compiler: PathBuf::from("/usr/bin/g++"),
            flags: vec!["-std=c++17".into(), "-O2".into(), "-pipe".into()],
            source_name: "main.cpp".into(),
            binary_name: "main".into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    pub api_base: String,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub timeout_ms: u64,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".into(),
            model: "gpt-4o".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            timeout_ms: 30_000,
            temperature: 0.7,
            max_tokens: 512,
        }
    }
}

impl ReasoningConfig {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TutorConfig {
    /// Longest reference-solution substring a hint may contain
    pub redaction_threshold: usize,
    pub hint_retry_backoff_ms: u64,
}

impl Default for TutorConfig {
    fn default() -> Self {
        Self {
            redaction_threshold: 40,
            hint_retry_backoff_ms: 500,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Worker threads, and so the cap on concurrent sandbox calls
    pub max_parallel: usize,
    /// Requests buffered ahead of the workers before the reader blocks
    pub queue_depth: usize,
    /// End of input counts as a caller disconnect and cancels in-flight work
    pub cancel_on_eof: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            queue_depth: 32,
            cancel_on_eof: true,
        }
    }
}

impl TutorboxConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TutorboxError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config: TutorboxConfig = serde_json::from_str(&content).map_err(|e| {
            TutorboxError::Config(format!("invalid config {}: {}", path.display(), e))
        })?;
        config.resolve_relative_paths(path.parent());
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// `--config` wins; otherwise `./tutorbox.json` if present; otherwise defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let local = Path::new(DEFAULT_CONFIG_FILE);
                if local.exists() {
                    Self::load(local)
                } else {
                    log::debug!("No {} found, using built-in defaults", DEFAULT_CONFIG_FILE);
                    Ok(Self::default())
                }
            }
        }
    }

    fn resolve_relative_paths(&mut self, base: Option<&Path>) {
        let Some(base) = base.filter(|b| !b.as_os_str().is_empty()) else {
            return;
        };
        if !self.catalog_path.as_os_str().is_empty() && self.catalog_path.is_relative() {
            self.catalog_path = base.join(&self.catalog_path);
        }
        if let Some(audit) = self.audit_log.as_mut() {
            if audit.is_relative() {
                *audit = base.join(&*audit);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tutorbox.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{"catalog_path": "problems.json",
                "sandbox": {{"max_source_bytes": 1024, "run_limits": {{"wall_time_ms": 750}}}},
                "callers": {{"secret": "ada"}}}}"#
        )
        .unwrap();

        let config = TutorboxConfig::load(&path).unwrap();
        assert_eq!(config.sandbox.max_source_bytes, 1024);
        assert_eq!(config.sandbox.run_limits.wall_time_ms, 750);
        assert_eq!(config.sandbox.run_limits.cpu_time_ms, 2_000);
        assert_eq!(config.catalog_path, dir.path().join("problems.json"));
        assert_eq!(config.callers.get("secret").map(String::as_str), Some("ada"));
        assert_eq!(config.reasoning.model, "gpt-4o");
        assert_eq!(config.tutor.redaction_threshold, 40);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tutorbox.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            TutorboxConfig::load(&path),
            Err(TutorboxError::Config(_))
        ));
    }

    #[test]
    fn test_default_workspace_root_is_per_uid() {
        let root = default_workspace_root();
        let name = root.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("tutorbox-uid-"));
    }
}
