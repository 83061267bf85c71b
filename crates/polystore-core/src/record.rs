//! Technology-agnostic record representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A single stored record.
///
/// `version` starts at 1 and increments on every update, mirroring the
/// optimistic-concurrency counter most stores expose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Record identity, unique within its table.
    pub id: String,
    /// Record payload.
    pub data: Map<String, Value>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
    /// Update counter.
    pub version: u64,
}

impl Record {
    /// Create a record with an explicit id.
    #[must_use]
    pub fn new(id: impl Into<String>, data: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            data,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// Create a record from a JSON payload.
    ///
    /// A string `id` field in the payload becomes the record id and is
    /// removed from the data; otherwise a v4 UUID is generated.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        let mut data = match value {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_owned(), other);
                map
            },
        };
        let id = match data.remove("id") {
            Some(Value::String(id)) => id,
            Some(Value::Number(n)) => n.to_string(),
            Some(other) => {
                data.insert("id".to_owned(), other);
                Uuid::new_v4().to_string()
            },
            None => Uuid::new_v4().to_string(),
        };
        Self::new(id, data)
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Look up a field by dotted path (`profile.name`). The pseudo-field
    /// `id` resolves to the record id.
    #[must_use]
    pub fn field(&self, path: &str) -> Option<Value> {
        if path == "id" {
            return Some(Value::String(self.id.clone()));
        }
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.data.get(first)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current.clone())
    }

    /// Merge `patch` into the payload, bumping `version` and `updated_at`.
    ///
    /// Keys mapped to `null` are removed. An `id` key in the patch is ignored.
    pub fn apply_patch(&mut self, patch: &Map<String, Value>) {
        for (key, value) in patch {
            if key == "id" {
                continue;
            }
            if value.is_null() {
                self.data.remove(key);
            } else {
                self.data.insert(key.clone(), value.clone());
            }
        }
        self.version = self.version.saturating_add(1);
        self.updated_at = Utc::now();
    }

    /// Flatten into a JSON object with `id` alongside the payload fields.
    #[must_use]
    pub fn to_flat_value(&self) -> Value {
        let mut map = self.data.clone();
        map.insert("id".to_owned(), Value::String(self.id.clone()));
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_value_extracts_id() {
        let record = Record::from_value(json!({"id": "u1", "email": "a@example.com"}));
        assert_eq!(record.id, "u1");
        assert!(!record.data.contains_key("id"));
        assert_eq!(record.version, 1);
    }

    #[test]
    fn from_value_generates_id() {
        let record = Record::from_value(json!({"email": "a@example.com"}));
        assert!(Uuid::parse_str(&record.id).is_ok());
    }

    #[test]
    fn dotted_field_lookup() {
        let record = Record::from_value(json!({
            "id": "u1",
            "profile": {"name": "Ada", "tags": ["x", "y"]}
        }));
        assert_eq!(record.field("profile.name"), Some(json!("Ada")));
        assert_eq!(record.field("profile.tags.1"), Some(json!("y")));
        assert_eq!(record.field("id"), Some(json!("u1")));
        assert_eq!(record.field("profile.missing"), None);
    }

    #[test]
    fn patch_bumps_version_and_removes_nulls() {
        let mut record = Record::from_value(json!({"id": "u1", "a": 1, "b": 2}));
        let patch = json!({"a": 10, "b": null, "id": "ignored"});
        record.apply_patch(patch.as_object().unwrap());
        assert_eq!(record.version, 2);
        assert_eq!(record.id, "u1");
        assert_eq!(record.field("a"), Some(json!(10)));
        assert_eq!(record.field("b"), None);
    }
}
