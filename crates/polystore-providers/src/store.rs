//! Table storage shared by every in-memory adapter.

use std::collections::{BTreeMap, HashMap};

use polystore_core::{Filter, PersistenceError, PersistenceResult, Record, TableSchema};
use serde_json::{Map, Value};

/// Data-level rejection of an insert, reported by the adapter as a
/// provider error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum InsertRejected {
    Duplicate(String),
    MissingFields(Vec<String>),
}

impl std::fmt::Display for InsertRejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Duplicate(id) => write!(f, "duplicate key '{id}'"),
            Self::MissingFields(fields) => {
                write!(f, "missing required field(s): {}", fields.join(", "))
            },
        }
    }
}

/// One table: optional schema and rows keyed by id.
#[derive(Debug, Clone, Default)]
pub(crate) struct Table {
    pub(crate) schema: Option<TableSchema>,
    pub(crate) rows: BTreeMap<String, Record>,
}

impl Table {
    /// Rows matching `filter`, in id order.
    pub(crate) fn matching(&self, filter: Option<&Filter>) -> Vec<&Record> {
        self.rows
            .values()
            .filter(|r| filter.is_none_or(|f| f.matches(r)))
            .collect()
    }
}

/// Every table of one provider, or a transaction's working copy of them.
#[derive(Debug, Clone, Default)]
pub(crate) struct Store {
    pub(crate) tables: HashMap<String, Table>,
}

impl Store {
    pub(crate) fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub(crate) fn table_mut(&mut self, name: &str) -> &mut Table {
        self.tables.entry(name.to_owned()).or_default()
    }

    pub(crate) fn insert(
        &mut self,
        table: &str,
        record: Record,
        upsert: bool,
    ) -> Result<Record, InsertRejected> {
        let t = self.table_mut(table);
        if let Some(schema) = &t.schema {
            let missing = schema.missing_required(&record);
            if !missing.is_empty() {
                return Err(InsertRejected::MissingFields(
                    missing.into_iter().map(str::to_owned).collect(),
                ));
            }
        }
        if !upsert && t.rows.contains_key(&record.id) {
            return Err(InsertRejected::Duplicate(record.id));
        }
        t.rows.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    pub(crate) fn update(
        &mut self,
        table: &str,
        id: &str,
        patch: &Map<String, Value>,
    ) -> PersistenceResult<Record> {
        let row = self
            .tables
            .get_mut(table)
            .and_then(|t| t.rows.get_mut(id))
            .ok_or_else(|| PersistenceError::not_found(table, id))?;
        row.apply_patch(patch);
        Ok(row.clone())
    }

    pub(crate) fn delete(&mut self, table: &str, id: &str) -> bool {
        self.tables
            .get_mut(table)
            .is_some_and(|t| t.rows.remove(id).is_some())
    }
}
