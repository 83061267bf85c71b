//! Decoding of specific-operation payloads.

use polystore_core::{Filter, PersistenceError, PersistenceResult};
use serde_json::Value;

/// Typed view over a specific-operation payload.
pub(crate) struct Params<'a> {
    table: &'a str,
    operation: &'a str,
    value: &'a Value,
}

impl<'a> Params<'a> {
    pub(crate) fn new(table: &'a str, operation: &'a str, value: &'a Value) -> Self {
        Self {
            table,
            operation,
            value,
        }
    }

    pub(crate) fn invalid(&self, reason: impl Into<String>) -> PersistenceError {
        PersistenceError::validation(self.table, self.operation, reason)
    }

    pub(crate) fn get(&self, key: &str) -> Option<&'a Value> {
        self.value.get(key).filter(|v| !v.is_null())
    }

    pub(crate) fn str(&self, key: &str) -> Option<&'a str> {
        self.get(key).and_then(Value::as_str)
    }

    pub(crate) fn required_str(&self, key: &str) -> PersistenceResult<&'a str> {
        self.str(key)
            .ok_or_else(|| self.invalid(format!("missing string parameter '{key}'")))
    }

    pub(crate) fn usize(&self, key: &str) -> Option<usize> {
        self.get(key)
            .and_then(Value::as_u64)
            .and_then(|n| usize::try_from(n).ok())
    }

    pub(crate) fn f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    pub(crate) fn filter(&self) -> PersistenceResult<Option<Filter>> {
        self.get("filter")
            .map(|raw| {
                serde_json::from_value(raw.clone())
                    .map_err(|e| self.invalid(format!("malformed filter: {e}")))
            })
            .transpose()
    }

    pub(crate) fn vector(&self, key: &str) -> PersistenceResult<Vec<f64>> {
        let items = self
            .get(key)
            .and_then(Value::as_array)
            .ok_or_else(|| self.invalid(format!("missing vector parameter '{key}'")))?;
        items
            .iter()
            .map(|v| {
                v.as_f64()
                    .ok_or_else(|| self.invalid(format!("non-numeric element in '{key}'")))
            })
            .collect()
    }

    pub(crate) fn strings(&self, key: &str) -> Vec<String> {
        self.get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Read a numeric array out of a record field.
pub(crate) fn as_vector(value: &Value) -> Option<Vec<f64>> {
    value.as_array()?.iter().map(Value::as_f64).collect()
}
