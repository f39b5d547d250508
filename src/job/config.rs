//! Job configuration map.
//!
//! A [`SimConfig`] is an ordered string → JSON value mapping. The keys under
//! `sim.` are reserved for the orchestration core; everything else belongs to
//! the model.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;

/// Reserved configuration keys.
pub mod keys {
    pub const SEQ: &str = "sim.seq";
    pub const SEED: &str = "sim.seed";
    pub const TIMESCALE: &str = "sim.timescale";
    pub const DURATION: &str = "sim.duration";
    pub const WORKSPACE: &str = "sim.workspace";
    pub const WORKSPACE_OVERWRITE: &str = "sim.workspace.overwrite";
    pub const PROGRESS_ENABLE: &str = "sim.progress.enable";
    pub const PROGRESS_MAX_WIDTH: &str = "sim.progress.max_width";
    pub const RESULT_FILE: &str = "sim.result.file";
}

/// Configuration for a single simulation job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimConfig(Map<String, Value>);

impl SimConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Insert a value, returning the previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Return the value for `key`, inserting `default` first if it is absent.
    pub fn setdefault(&mut self, key: &str, default: impl Into<Value>) -> &Value {
        self.0.entry(key.to_string()).or_insert_with(|| default.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Job sequence number within its batch, if one was stamped.
    pub fn seq(&self) -> Option<u64> {
        self.0.get(keys::SEQ).and_then(Value::as_u64)
    }

    /// Workspace directory for the job. Defaults to the current directory.
    pub fn workspace(&mut self) -> Result<PathBuf, ConfigError> {
        match self.setdefault(keys::WORKSPACE, ".") {
            Value::String(s) => Ok(PathBuf::from(s)),
            Value::Null => Ok(PathBuf::from(".")),
            other => Err(invalid(keys::WORKSPACE, "a path string", other)),
        }
    }

    /// Whether an existing workspace is wiped before the job. Defaults to `false`.
    pub fn workspace_overwrite(&mut self) -> Result<bool, ConfigError> {
        self.flag(keys::WORKSPACE_OVERWRITE)
    }

    /// Whether progress reporting is enabled. Defaults to `false`.
    pub fn progress_enabled(&mut self) -> Result<bool, ConfigError> {
        self.flag(keys::PROGRESS_ENABLE)
    }

    /// Maximum width of the progress display, if capped.
    pub fn progress_max_width(&mut self) -> Result<Option<u16>, ConfigError> {
        match self.setdefault(keys::PROGRESS_MAX_WIDTH, Value::Null) {
            Value::Null => Ok(None),
            Value::Number(n) => n
                .as_u64()
                .and_then(|w| u16::try_from(w).ok())
                .map(Some)
                .ok_or_else(|| {
                    invalid(
                        keys::PROGRESS_MAX_WIDTH,
                        "a column count",
                        &Value::Number(n.clone()),
                    )
                }),
            other => Err(invalid(keys::PROGRESS_MAX_WIDTH, "a column count", other)),
        }
    }

    /// Path the job result is written to, if any.
    pub fn result_file(&mut self) -> Result<Option<PathBuf>, ConfigError> {
        match self.setdefault(keys::RESULT_FILE, Value::Null) {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(PathBuf::from(s))),
            other => Err(invalid(keys::RESULT_FILE, "a path string", other)),
        }
    }

    fn flag(&mut self, key: &str) -> Result<bool, ConfigError> {
        match self.setdefault(key, false) {
            Value::Bool(b) => Ok(*b),
            Value::Null => Ok(false),
            other => Err(invalid(key, "a boolean", other)),
        }
    }
}

pub(crate) fn invalid(key: &str, expected: &str, found: &Value) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("expected {expected}, found {found}"),
    }
}

impl From<Map<String, Value>> for SimConfig {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for SimConfig {
    type Error = ConfigError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(ConfigError::ParseError(format!(
                "configuration must be an object, found {other}"
            ))),
        }
    }
}

impl FromIterator<(String, Value)> for SimConfig {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
