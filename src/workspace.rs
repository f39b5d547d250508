//! Scoped working directory for a job.
//!
//! Entering a [`WorkspaceScope`] creates (or recreates, when overwriting) the
//! job's directory and makes it the process working directory. The previous
//! directory is restored when the scope exits or is dropped.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::WorkspaceError;

/// Guard holding the job inside its workspace directory.
#[derive(Debug)]
pub struct WorkspaceScope {
    previous: PathBuf,
    entered: bool,
}

impl WorkspaceScope {
    /// Enter `path`, creating it if needed. With `overwrite`, an existing
    /// directory is removed first. A path resolving to the current directory
    /// is entered without touching the filesystem.
    pub fn enter(path: &Path, overwrite: bool) -> Result<Self, WorkspaceError> {
        let previous = env::current_dir().map_err(WorkspaceError::CurrentDir)?;
        if is_current_dir(path) {
            return Ok(Self {
                previous,
                entered: false,
            });
        }

        let exists = path.is_dir();
        if overwrite && exists {
            fs::remove_dir_all(path).map_err(|source| WorkspaceError::Remove {
                path: path.to_path_buf(),
                source,
            })?;
        }
        if overwrite || !exists {
            fs::create_dir_all(path).map_err(|source| WorkspaceError::Create {
                path: path.to_path_buf(),
                source,
            })?;
        }
        env::set_current_dir(path).map_err(|source| WorkspaceError::Enter {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::debug!(workspace = %path.display(), overwrite, "Entered workspace");
        Ok(Self {
            previous,
            entered: true,
        })
    }

    #[cfg(test)]
    fn previous(&self) -> &Path {
        &self.previous
    }

    /// Restore the previous working directory, reporting failure.
    pub fn exit(mut self) -> Result<(), WorkspaceError> {
        self.restore()
    }

    fn restore(&mut self) -> Result<(), WorkspaceError> {
        if !self.entered {
            return Ok(());
        }
        self.entered = false;
        env::set_current_dir(&self.previous).map_err(|source| WorkspaceError::Restore {
            path: self.previous.clone(),
            source,
        })
    }
}

impl Drop for WorkspaceScope {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            tracing::error!(error = %e, "Failed to restore working directory");
        }
    }
}

/// Whether `path` names the current working directory.
pub fn is_current_dir(path: &Path) -> bool {
    if path.as_os_str().is_empty() || path == Path::new(".") {
        return true;
    }
    match (path.canonicalize(), env::current_dir().and_then(|d| d.canonicalize())) {
        (Ok(target), Ok(current)) => target == current,
        _ => false,
    }
}

/// Serializes tests that change the process working directory.
#[cfg(test)]
pub(crate) fn cwd_lock() -> std::sync::MutexGuard<'static, ()> {
    static CWD_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    CWD_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}
