use crate::safety::workspace::RunWorkspace;
use std::path::PathBuf;

/// Fixed argument vector for one toolchain step. Never passed through a shell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandLine {
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// Toolchain adapter contract for compile/run stages.
pub trait ToolchainAdapter: Send + Sync {
    fn language(&self) -> &'static str;
    /// File name the source is materialized under
    fn source_name(&self) -> &str;
    /// Command run with the run directory as cwd; its output lands in the run directory
    fn compile_command(&self, workspace: &RunWorkspace) -> CommandLine;
    fn run_command(&self, workspace: &RunWorkspace) -> CommandLine;
    /// Command that prints the toolchain version
    fn version_command(&self) -> CommandLine;
}
