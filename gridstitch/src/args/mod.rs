//! Typed job arguments.
//!
//! Every service operation carries a [`JobArgs`] value: a set of named,
//! typed options backed by a shared [`ArgRegistry`] of declarations and
//! defaults, plus a per-instance overlay of overrides. Cloning a `JobArgs`
//! copies the overlay but shares the registry, so splitters can cheaply
//! derive per-subjob argument sets without duplicating flag declarations.
//!
//! Reads never mutate. A read resolves against the overlay first and falls
//! back to the registry default; asking for an undeclared name or for the
//! wrong type yields a typed [`ArgError`] instead of terminating the
//! process.

mod cmdline;

pub use cmdline::{default_if_empty, push_flag, push_float, push_int, push_kv, push_uint};

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors produced by typed argument access.
#[derive(Debug, Error)]
pub enum ArgError {
    /// No flag with this name has been declared or set.
    #[error("no flag found for {0}")]
    MissingFlag(String),

    /// The flag exists but holds a different type.
    #[error("flag {name} holds a {actual} value, not a {expected}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },
}

/// A single argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    List(Vec<String>),
}

impl ArgValue {
    /// Name of the contained type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            ArgValue::Bool(_) => "bool",
            ArgValue::Int(_) => "int",
            ArgValue::UInt(_) => "uint",
            ArgValue::Float(_) => "float",
            ArgValue::Str(_) => "string",
            ArgValue::List(_) => "string list",
        }
    }
}

/// Registry of flag declarations and their default values.
///
/// Built once per service and shared by reference across all [`JobArgs`]
/// clones; only overlays are per-instance.
#[derive(Debug, Default)]
pub struct ArgRegistry {
    defaults: HashMap<String, ArgValue>,
}

impl ArgRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_bool(&mut self, name: &str, default: bool) {
        self.defaults.insert(name.into(), ArgValue::Bool(default));
    }

    pub fn declare_int(&mut self, name: &str, default: i64) {
        self.defaults.insert(name.into(), ArgValue::Int(default));
    }

    pub fn declare_uint(&mut self, name: &str, default: u64) {
        self.defaults.insert(name.into(), ArgValue::UInt(default));
    }

    pub fn declare_float(&mut self, name: &str, default: f64) {
        self.defaults.insert(name.into(), ArgValue::Float(default));
    }

    pub fn declare_string(&mut self, name: &str, default: &str) {
        self.defaults
            .insert(name.into(), ArgValue::Str(default.into()));
    }

    /// Declares a list flag with an empty default.
    pub fn declare_list(&mut self, name: &str) {
        self.defaults.insert(name.into(), ArgValue::List(Vec::new()));
    }

    fn default_of(&self, name: &str) -> Option<&ArgValue> {
        self.defaults.get(name)
    }
}

/// A job's argument set: shared declarations plus a private overlay.
#[derive(Debug, Clone)]
pub struct JobArgs {
    registry: Arc<ArgRegistry>,
    overlay: HashMap<String, ArgValue>,
}

impl JobArgs {
    /// Creates an argument set over the given registry with no overrides.
    pub fn new(registry: Arc<ArgRegistry>) -> Self {
        Self {
            registry,
            overlay: HashMap::new(),
        }
    }

    fn lookup(&self, name: &str) -> Result<&ArgValue, ArgError> {
        self.overlay
            .get(name)
            .or_else(|| self.registry.default_of(name))
            .ok_or_else(|| ArgError::MissingFlag(name.to_string()))
    }

    fn mismatch(name: &str, expected: &'static str, actual: &ArgValue) -> ArgError {
        ArgError::TypeMismatch {
            name: name.to_string(),
            expected,
            actual: actual.type_name(),
        }
    }

    pub fn get_bool(&self, name: &str) -> Result<bool, ArgError> {
        match self.lookup(name)? {
            ArgValue::Bool(v) => Ok(*v),
            other => Err(Self::mismatch(name, "bool", other)),
        }
    }

    pub fn get_int(&self, name: &str) -> Result<i64, ArgError> {
        match self.lookup(name)? {
            ArgValue::Int(v) => Ok(*v),
            other => Err(Self::mismatch(name, "int", other)),
        }
    }

    pub fn get_uint(&self, name: &str) -> Result<u64, ArgError> {
        match self.lookup(name)? {
            ArgValue::UInt(v) => Ok(*v),
            other => Err(Self::mismatch(name, "uint", other)),
        }
    }

    pub fn get_float(&self, name: &str) -> Result<f64, ArgError> {
        match self.lookup(name)? {
            ArgValue::Float(v) => Ok(*v),
            other => Err(Self::mismatch(name, "float", other)),
        }
    }

    pub fn get_string(&self, name: &str) -> Result<String, ArgError> {
        match self.lookup(name)? {
            ArgValue::Str(v) => Ok(v.clone()),
            other => Err(Self::mismatch(name, "string", other)),
        }
    }

    pub fn get_string_list(&self, name: &str) -> Result<Vec<String>, ArgError> {
        match self.lookup(name)? {
            ArgValue::List(v) => Ok(v.clone()),
            other => Err(Self::mismatch(name, "string list", other)),
        }
    }

    pub fn set_bool(&mut self, name: &str, value: bool) {
        self.overlay.insert(name.into(), ArgValue::Bool(value));
    }

    pub fn set_int(&mut self, name: &str, value: i64) {
        self.overlay.insert(name.into(), ArgValue::Int(value));
    }

    pub fn set_uint(&mut self, name: &str, value: u64) {
        self.overlay.insert(name.into(), ArgValue::UInt(value));
    }

    pub fn set_float(&mut self, name: &str, value: f64) {
        self.overlay.insert(name.into(), ArgValue::Float(value));
    }

    pub fn set_string(&mut self, name: &str, value: &str) {
        self.overlay.insert(name.into(), ArgValue::Str(value.into()));
    }

    pub fn set_string_list(&mut self, name: &str, value: Vec<String>) {
        self.overlay.insert(name.into(), ArgValue::List(value));
    }

    /// Iterates over the overridden options, in no particular order.
    pub fn changed(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
        self.overlay.iter().map(|(k, v)| (k.as_str(), v))
    }
}
