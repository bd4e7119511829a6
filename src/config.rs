//! Engine configuration.
//!
//! A flat key/value store with typed getters over [`serde_json::Value`]
//! entries. Recognized keys:
//!
//! | Key | Effect |
//! |---|---|
//! | `graph.format` | Graph text format; only `graphviz` is defined. |
//! | `graph.graphconf` | Inline graph text. |
//! | `queue_size` | Default per-port capacity (`-1` = unbounded). |
//! | `queue_size_external` | Capacity for input virtual node external ports. |
//!
//! Unknown keys are stored but ignored by the engine.

use std::collections::HashMap;

use serde_json::Value;

/// Immutable configuration snapshot consumed by the build pipeline and the
/// virtual nodes.
#[derive(Debug, Clone, Default)]
pub struct Configuration {
  values: HashMap<String, Value>,
}

impl Configuration {
  pub fn get(&self, key: &str) -> Option<&Value> {
    self.values.get(key)
  }

  pub fn get_str(&self, key: &str) -> Option<&str> {
    self.values.get(key).and_then(Value::as_str)
  }

  pub fn get_str_or(&self, key: &str, default: &str) -> String {
    self.get_str(key).unwrap_or(default).to_string()
  }

  pub fn get_i64(&self, key: &str) -> Option<i64> {
    self.values.get(key).and_then(Value::as_i64)
  }

  pub fn get_i64_or(&self, key: &str, default: i64) -> i64 {
    self.get_i64(key).unwrap_or(default)
  }

  /// Queue capacity for `key`, mapping the `-1` convention to unbounded.
  ///
  /// Returns `default` when the key is absent.
  pub fn queue_capacity(&self, key: &str, default: Option<usize>) -> Option<usize> {
    match self.get_i64(key) {
      None => default,
      Some(n) if n < 0 => None,
      Some(n) => Some(n as usize),
    }
  }
}

/// Builder for [`Configuration`].
#[derive(Debug, Default)]
pub struct ConfigurationBuilder {
  values: HashMap<String, Value>,
}

impl ConfigurationBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self.values.insert(key.into(), value.into());
    self
  }

  pub fn build(self) -> Configuration {
    Configuration {
      values: self.values,
    }
  }
}
