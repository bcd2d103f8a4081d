use crate::config::loader::ToolchainConfig;
use crate::judge::adapter::{CommandLine, ToolchainAdapter};
use crate::safety::workspace::RunWorkspace;

/// g++ with an allow-listed absolute path and fixed flags
#[derive(Debug, Clone)]
pub struct CppAdapter {
    toolchain: ToolchainConfig,
}

impl CppAdapter {
    pub fn new(toolchain: ToolchainConfig) -> Self {
        Self { toolchain }
    }
}

impl Default for CppAdapter {
    fn default() -> Self {
        Self::new(ToolchainConfig::default())
    }
}

impl ToolchainAdapter for CppAdapter {
    fn language(&self) -> &'static str {
        "cpp"
    }

    fn source_name(&self) -> &str {
        &self.toolchain.source_name
    }

    fn compile_command(&self, _workspace: &RunWorkspace) -> CommandLine {
        let mut args = self.toolchain.flags.clone();
        args.push("-o".to_string());
        args.push(self.toolchain.binary_name.clone());
        args.push(self.toolchain.source_name.clone());
        CommandLine {
            program: self.toolchain.compiler.clone(),
            args,
        }
    }

    fn run_command(&self, workspace: &RunWorkspace) -> CommandLine {
        CommandLine {
            program: workspace.run_dir().join(&self.toolchain.binary_name),
            args: Vec::new(),
        }
    }

    fn version_command(&self) -> CommandLine {
        CommandLine {
            program: self.toolchain.compiler.clone(),
            args: vec!["--version".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safety::workspace::WorkspaceManager;

    #[test]
    fn test_compile_argv_is_fixed() {
        let root = tempfile::tempdir().unwrap();
        let workspace = WorkspaceManager::new(root.path().to_path_buf())
            .unwrap()
            .create_workspace()
            .unwrap();
        let adapter = CppAdapter::default();

        let compile = adapter.compile_command(&workspace);
        assert_eq!(compile.program, std::path::PathBuf::from("/usr/bin/g++"));
        assert_eq!(
            compile.args,
            vec!["-std=c++17", "-O2", "-pipe", "-o", "main", "main.cpp"]
        );

        let run = adapter.run_command(&workspace);
        assert_eq!(run.program, workspace.run_dir().join("main"));
        assert!(run.args.is_empty());
    }
}
