//! Job execution phases.

use serde::{Deserialize, Serialize};

/// Step of a job's lifecycle; failures are reported against the phase that
/// raised them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    /// Building the environment from the config.
    Environment,
    /// Model pre-initialization hook.
    PreInit,
    /// Attaching the progress reporter.
    Progress,
    /// Constructing and elaborating the model.
    Elaborate,
    /// Running the environment to its stop condition.
    Run,
    /// Model post-simulation hook.
    PostSimulate,
    /// Extracting model results.
    Result,
    /// Reading `sim.result.file` and writing the result there.
    ResultFile,
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Environment => "environment",
            Self::PreInit => "pre_init",
            Self::Progress => "progress",
            Self::Elaborate => "elaborate",
            Self::Run => "run",
            Self::PostSimulate => "post_simulate",
            Self::Result => "result",
            Self::ResultFile => "result_file",
        };
        write!(f, "{s}")
    }
}

/// A failure captured while running a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseFailure {
    pub phase: JobPhase,
    pub message: String,
}

impl PhaseFailure {
    pub fn new(phase: JobPhase, message: impl Into<String>) -> Self {
        Self {
            phase,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for PhaseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.phase, self.message)
    }
}
