//! Line-delimited JSON messages exchanged with worker processes.
//!
//! The parent writes [`WorkItem`]s to a worker's stdin and reads
//! [`WorkerEvent`]s from its stdout, one JSON object per line.

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::error::PoolError;
use crate::job::{SimConfig, SimResult};
use crate::progress::ProgressSample;

/// Unit of work handed to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkItem {
    /// Run one job.
    Job { config: SimConfig },
    /// No more work; exit.
    Stop,
}

/// Message reported back by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerEvent {
    Progress(ProgressSample),
    Result { result: SimResult },
}

/// Serialize `message` as a single newline-terminated line.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, PoolError> {
    let mut line =
        serde_json::to_string(message).map_err(|e| PoolError::Protocol(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

/// Parse one protocol line.
pub fn decode<T: DeserializeOwned>(line: &str) -> Result<T, PoolError> {
    serde_json::from_str(line.trim()).map_err(|e| PoolError::Protocol(format!("{e}: {line:?}")))
}
