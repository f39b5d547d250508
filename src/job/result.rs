//! Job result map and result-file persistence.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ResultFileError;
use crate::job::config::{SimConfig, keys as config_keys};

/// Keys the core writes into every result.
pub mod keys {
    pub const EXCEPTION: &str = "sim.exception";
    pub const NOW: &str = "sim.now";
    pub const TIME: &str = "sim.time";
    pub const RUNTIME: &str = "sim.runtime";
    pub const CONFIG: &str = "config";
}

/// Outcome of one simulation job.
///
/// Model-specific entries live alongside the reserved `sim.*` keys and the
/// `config` that produced the result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimResult(Map<String, Value>);

impl SimResult {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Result for a job that failed before producing anything else.
    pub fn failure(config: SimConfig, reason: impl Into<String>, runtime: f64) -> Self {
        let mut result = Self::new();
        result.insert(keys::EXCEPTION, reason.into());
        result.set_config(config);
        result.insert(keys::RUNTIME, runtime);
        result
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub(crate) fn set_config(&mut self, config: SimConfig) {
        self.0
            .insert(keys::CONFIG.to_string(), Value::Object(config.into_map()));
    }

    /// Error description recorded for a failed job.
    pub fn exception(&self) -> Option<&str> {
        self.0.get(keys::EXCEPTION).and_then(Value::as_str)
    }

    pub fn is_failure(&self) -> bool {
        self.exception().is_some()
    }

    /// Wall-clock seconds the job took.
    pub fn runtime(&self) -> Option<f64> {
        self.0.get(keys::RUNTIME).and_then(Value::as_f64)
    }

    /// Final simulation time in timescale units.
    pub fn now(&self) -> Option<f64> {
        self.0.get(keys::NOW).and_then(Value::as_f64)
    }

    /// Final simulation time in seconds.
    pub fn time(&self) -> Option<f64> {
        self.0.get(keys::TIME).and_then(Value::as_f64)
    }

    /// The config this result was produced from.
    pub fn config(&self) -> Option<SimConfig> {
        match self.0.get(keys::CONFIG) {
            Some(Value::Object(map)) => Some(SimConfig::from(map.clone())),
            _ => None,
        }
    }

    /// The `sim.seq` of the producing config.
    pub fn seq(&self) -> Option<u64> {
        self.0
            .get(keys::CONFIG)
            .and_then(|c| c.get(config_keys::SEQ))
            .and_then(Value::as_u64)
    }

    /// Write the result as a YAML document.
    pub fn dump(&self, path: &Path) -> Result<(), ResultFileError> {
        let document =
            serde_yaml::to_string(&self.0).map_err(|source| ResultFileError::Serialize {
                path: path.to_path_buf(),
                source,
            })?;
        std::fs::write(path, document).map_err(|source| ResultFileError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn failure_result_carries_config_and_reason() {
        let config = SimConfig::new().with(config_keys::SEQ, 3);
        let result = SimResult::failure(config.clone(), "boom", 0.5);
        assert_eq!(result.exception(), Some("boom"));
        assert!(result.is_failure());
        assert_eq!(result.seq(), Some(3));
        assert_eq!(result.config(), Some(config));
        assert_eq!(result.runtime(), Some(0.5));
    }

    #[test]
    fn null_exception_is_success() {
        let mut result = SimResult::new();
        result.insert(keys::EXCEPTION, Value::Null);
        assert!(!result.is_failure());
    }

    #[test]
    fn dump_writes_yaml_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("result.yaml");

        let mut result = SimResult::new();
        result.insert("queue.served", 12);
        result.insert(keys::EXCEPTION, Value::Null);
        result.set_config(SimConfig::new().with(config_keys::SEQ, 0));
        result.dump(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("queue.served: 12"));
        let parsed: serde_yaml::Value = serde_yaml::from_str(&text).unwrap();
        assert_eq!(parsed["config"]["sim.seq"], serde_yaml::Value::from(0));
        assert!(parsed["sim.exception"].is_null());
    }

    #[test]
    fn dump_into_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("result.yaml");
        let err = SimResult::new().dump(&path).unwrap_err();
        assert!(matches!(err, ResultFileError::Write { .. }));
    }

    #[test]
    fn json_shape_is_flat_map() {
        let mut result = SimResult::new();
        result.insert(keys::RUNTIME, 1.25);
        assert_eq!(serde_json::to_value(&result).unwrap(), json!({"sim.runtime": 1.25}));
    }
}
