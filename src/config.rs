//! Configuration types.

use std::path::PathBuf;

use crate::error::PoolError;

/// Environment variable capping the number of worker processes.
pub const JOBS_ENV: &str = "SIMPOOL_JOBS";
/// Environment variable overriding the worker executable.
pub const WORKER_PROGRAM_ENV: &str = "SIMPOOL_WORKER_PROGRAM";
/// Environment variable capping the batch progress bar width.
pub const PROGRESS_MAX_WIDTH_ENV: &str = "SIMPOOL_PROGRESS_MAX_WIDTH";

/// Batch execution options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOptions {
    /// Upper bound on worker processes (in addition to job count and CPUs).
    pub max_workers: Option<usize>,
    /// Executable launched for each worker. Defaults to the current binary,
    /// which must call [`crate::worker::serve`] at startup.
    pub worker_program: Option<PathBuf>,
    /// Extra arguments passed to each worker.
    pub worker_args: Vec<String>,
    /// Width cap for the batch progress bar. Falls back to the first job's
    /// `sim.progress.max_width`.
    pub progress_max_width: Option<u16>,
}

impl BatchOptions {
    /// Defaults overridden by `SIMPOOL_*` environment variables. Unparseable
    /// values are ignored.
    pub fn from_env() -> Self {
        let max_workers = std::env::var(JOBS_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|n| *n > 0);
        let worker_program = std::env::var_os(WORKER_PROGRAM_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        let progress_max_width = std::env::var(PROGRESS_MAX_WIDTH_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<u16>().ok());

        Self {
            max_workers,
            worker_program,
            worker_args: Vec::new(),
            progress_max_width,
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = Some(max_workers);
        self
    }

    pub fn with_worker_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.worker_program = Some(program.into());
        self
    }

    pub fn with_worker_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.worker_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_progress_max_width(mut self, width: u16) -> Self {
        self.progress_max_width = Some(width);
        self
    }

    /// Executable to launch for workers.
    pub fn resolve_worker_program(&self) -> Result<PathBuf, PoolError> {
        match &self.worker_program {
            Some(program) => Ok(program.clone()),
            None => std::env::current_exe().map_err(PoolError::Program),
        }
    }
}
