//! Error types for simpool.

use std::path::PathBuf;

/// Top-level error type for batch and job execution.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Worker pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Result file error: {0}")]
    ResultFile(#[from] ResultFileError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid time specification {spec:?}: {reason}")]
    InvalidTime { spec: String, reason: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Workspace directory errors. Always propagated to the caller.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("Failed to read current directory: {0}")]
    CurrentDir(#[source] std::io::Error),

    #[error("Failed to remove workspace {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create workspace {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to enter workspace {path}: {source}")]
    Enter {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to restore working directory {path}: {source}")]
    Restore {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Job-related errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {seq:?} failed: {reason}")]
    Failed { seq: Option<u64>, reason: String },

    #[error("Result has no usable config sim.seq")]
    MissingSeq,
}

/// Worker pool errors.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Failed to spawn worker {worker} ({program}): {source}")]
    SpawnFailed {
        worker: usize,
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "Worker {worker} exited before reporting a result for job {}",
        .seq.map_or_else(|| "without sim.seq".to_string(), |seq| seq.to_string())
    )]
    WorkerExited { worker: usize, seq: Option<u64> },

    #[error("Workers lost: received {received} of {expected} results")]
    WorkerLost { expected: usize, received: usize },

    #[error("Worker protocol error: {0}")]
    Protocol(String),

    #[error("Failed to locate worker program: {0}")]
    Program(#[source] std::io::Error),
}

/// Result persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum ResultFileError {
    #[error("Failed to serialize result for {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to write result file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for simpool.
pub type Result<T> = std::result::Result<T, Error>;
