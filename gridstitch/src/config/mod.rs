//! Resource configuration.
//!
//! A [`Config`] is a flat key/value store loaded from one or more JSON files
//! applied in declaration order, later files overriding earlier keys.
//! Configuration is advisory: accessors tolerate integral numeric coercions
//! and yield the zero value for missing or mistyped keys, logging a warning
//! rather than failing, so a partially populated file never blocks a run.

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

/// Errors raised while loading configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("error reading config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("error reading JSON from config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Read-only application settings.
#[derive(Debug, Clone, Default)]
pub struct Config {
    values: BTreeMap<String, Value>,
}

impl Config {
    /// Loads settings from the given files, applied in order.
    pub fn load<P: AsRef<Path>>(files: &[P]) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        for file in files {
            cfg.read_file(file.as_ref())?;
        }
        Ok(cfg)
    }

    fn read_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let parsed: BTreeMap<String, Value> =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        self.values.extend(parsed);
        Ok(())
    }

    /// Inserts a single value, later entries overriding earlier ones.
    /// Primarily useful for tests and embedders.
    pub fn insert(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    /// Reads an integer property; missing or non-numeric keys yield 0.
    /// Floats holding an integral value are accepted.
    pub fn get_int(&self, name: &str) -> i64 {
        match self.values.get(name) {
            None => 0,
            Some(Value::Number(n)) => {
                if let Some(v) = n.as_i64() {
                    v
                } else if let Some(v) = n.as_f64() {
                    v as i64
                } else {
                    warn!("expected an integer value for {name}: {n}");
                    0
                }
            }
            Some(other) => {
                warn!("expected an integer value for {name}: {other}");
                0
            }
        }
    }

    /// Reads a string property; missing or mistyped keys yield "".
    pub fn get_string(&self, name: &str) -> String {
        match self.values.get(name) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => {
                warn!("expected a string value for {name}: {other}");
                String::new()
            }
            None => String::new(),
        }
    }

    /// Reads a string-array property. A single string is promoted to a
    /// one-element array; missing or mistyped keys yield an empty list.
    pub fn get_string_array(&self, name: &str) -> Vec<String> {
        match self.values.get(name) {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    other => {
                        warn!("ignoring non-string entry in {name}: {other}");
                        None
                    }
                })
                .collect(),
            Some(other) => {
                warn!("expected a string array value for {name}: {other}");
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    /// Reads a string-to-string map property; missing or mistyped keys
    /// yield an empty map.
    pub fn get_string_map(&self, name: &str) -> BTreeMap<String, String> {
        let mut result = BTreeMap::new();
        match self.values.get(name) {
            Some(Value::Object(entries)) => {
                for (k, v) in entries {
                    match v {
                        Value::String(s) => {
                            result.insert(k.clone(), s.clone());
                        }
                        other => {
                            warn!("ignoring non-string entry {k} in {name}: {other}");
                        }
                    }
                }
            }
            Some(other) => {
                warn!("expected a string map value for {name}: {other}");
            }
            None => {}
        }
        result
    }

    /// Reads an array of flat string records, e.g. the `dvidinstances`
    /// entries; non-record elements are skipped.
    pub fn get_record_array(&self, name: &str) -> Vec<BTreeMap<String, String>> {
        let mut records = Vec::new();
        if let Some(Value::Array(items)) = self.values.get(name) {
            for item in items {
                if let Value::Object(entries) = item {
                    let record: BTreeMap<String, String> = entries
                        .iter()
                        .filter_map(|(k, v)| match v {
                            Value::String(s) => Some((k.clone(), s.clone())),
                            _ => None,
                        })
                        .collect();
                    records.push(record);
                } else {
                    warn!("ignoring non-record entry in {name}: {item}");
                }
            }
        }
        records
    }
}
