/// Run-scoped workspaces
///
/// Every sandbox call gets its own `run-<uuid>` directory (mode 0700) under the
/// workspace root. The directory is removed when the guard drops, on every
/// exit path.
use crate::config::types::{Result, TutorboxError};
use crate::observability::audit::events;
use std::fs::{self, DirBuilder, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

const RUN_DIR_PREFIX: &str = "run-";

/// Single-use run directory
#[derive(Debug)]
pub struct RunWorkspace {
    run_id: String,
    run_dir: PathBuf,
    removed: bool,
}

impl RunWorkspace {
    fn create(base_dir: &Path) -> Result<Self> {
        let run_id = Uuid::new_v4().to_string();
        let run_dir = base_dir.join(format!("{}{}", RUN_DIR_PREFIX, run_id));

        DirBuilder::new().mode(0o700).create(&run_dir).map_err(|e| {
            TutorboxError::Filesystem(format!(
                "Failed to create run directory {}: {}",
                run_dir.display(),
                e
            ))
        })?;

        Ok(Self {
            run_id,
            run_dir,
            removed: false,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Write `content` to a new file named `name` inside the run directory.
    pub fn write_file(&self, name: &str, content: &[u8]) -> Result<PathBuf> {
        let path = self.path_for(name)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&path)
            .map_err(|e| {
                TutorboxError::Filesystem(format!("Failed to create {}: {}", path.display(), e))
            })?;
        file.write_all(content).map_err(|e| {
            TutorboxError::Filesystem(format!("Failed to write {}: {}", path.display(), e))
        })?;
        Ok(path)
    }

    /// Path for an artifact the toolchain will create.
    pub fn path_for(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(TutorboxError::Config(format!(
                "artifact name must be a plain file name: {:?}",
                name
            )));
        }
        Ok(self.run_dir.join(name))
    }

    /// Rewrite host paths in toolchain output so only bare file names remain.
    pub fn sanitize_diagnostics(&self, text: &str) -> String {
        let dir = self.run_dir.to_string_lossy();
        text.replace(&format!("{}/", dir), "").replace(dir.as_ref(), ".")
    }

    /// Remove the run directory (idempotent)
    pub fn cleanup(&mut self) -> Result<()> {
        if self.removed {
            return Ok(());
        }
        match fs::remove_dir_all(&self.run_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                events::cleanup_failure(&self.run_id, &e.to_string());
                return Err(TutorboxError::Filesystem(format!(
                    "Failed to remove run directory {}: {}",
                    self.run_dir.display(),
                    e
                )));
            }
        }
        self.removed = true;
        Ok(())
    }
}

impl Drop for RunWorkspace {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            log::warn!("{}", e);
        }
    }
}

/// Owner of the workspace root
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    base_dir: PathBuf,
}

impl WorkspaceManager {
    pub fn new(base_dir: PathBuf) -> Result<Self> {
        DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(&base_dir)
            .map_err(|e| {
                TutorboxError::Filesystem(format!(
                    "Failed to create workspace root {}: {}",
                    base_dir.display(),
                    e
                ))
            })?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn create_workspace(&self) -> Result<RunWorkspace> {
        RunWorkspace::create(&self.base_dir)
    }

    /// Remove run directories left behind by a crashed process.
    pub fn sweep_stale(&self, max_age: Duration) -> Result<usize> {
        let now = SystemTime::now();
        let mut cleaned = 0;

        let entries = fs::read_dir(&self.base_dir).map_err(|e| {
            TutorboxError::Filesystem(format!(
                "Failed to read workspace root {}: {}",
                self.base_dir.display(),
                e
            ))
        })?;

        for entry in entries.flatten() {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(RUN_DIR_PREFIX) {
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_dir() {
                continue;
            }
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok());
            if age.is_some_and(|age| age >= max_age) {
                let path = entry.path();
                match fs::remove_dir_all(&path) {
                    Ok(()) => {
                        log::info!("Removed stale run directory {}", path.display());
                        cleaned += 1;
                    }
                    Err(e) => log::warn!("Failed to remove stale {}: {}", path.display(), e),
                }
            }
        }

        Ok(cleaned)
    }
}
