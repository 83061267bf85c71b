//! Technology-agnostic query specification.
//!
//! A [`QuerySpec`] names a target table, an operation kind, optional filter
//! criteria and free-form parameters. It carries no knowledge of which store
//! will serve it; the router decides that.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::error::{PersistenceError, PersistenceResult};
use crate::record::Record;
use crate::technology::QueryKind;

/// Comparison operator used by [`Filter::Compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
    /// Substring (strings) or membership (arrays).
    Contains,
    /// String prefix.
    StartsWith,
}

/// Filter criteria over record fields. Field names accept dotted paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Filter {
    /// `field <op> value`.
    Compare {
        /// Field path.
        field: String,
        /// Operator.
        op: Operator,
        /// Right-hand operand.
        value: Value,
    },
    /// `field IN values`.
    In {
        /// Field path.
        field: String,
        /// Accepted values.
        values: Vec<Value>,
    },
    /// All sub-filters must match.
    And {
        /// Conjuncts.
        filters: Vec<Filter>,
    },
    /// At least one sub-filter must match.
    Or {
        /// Disjuncts.
        filters: Vec<Filter>,
    },
    /// Negation.
    Not {
        /// Negated filter.
        filter: Box<Filter>,
    },
}

impl Filter {
    /// `field == value`.
    #[must_use]
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Compare {
            field: field.into(),
            op: Operator::Eq,
            value: value.into(),
        }
    }

    /// `field <op> value`.
    #[must_use]
    pub fn compare(field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        Self::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// `field IN values`.
    #[must_use]
    pub fn is_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::In {
            field: field.into(),
            values,
        }
    }

    /// Conjunction.
    #[must_use]
    pub fn and(filters: Vec<Filter>) -> Self {
        Self::And { filters }
    }

    /// Disjunction.
    #[must_use]
    pub fn or(filters: Vec<Filter>) -> Self {
        Self::Or { filters }
    }

    /// Evaluate against a record.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::Compare { field, op, value } => record
                .field(field)
                .is_some_and(|actual| compare_with(&actual, *op, value)),
            Self::In { field, values } => record
                .field(field)
                .is_some_and(|actual| values.iter().any(|v| loose_eq(&actual, v))),
            Self::And { filters } => filters.iter().all(|f| f.matches(record)),
            Self::Or { filters } => filters.iter().any(|f| f.matches(record)),
            Self::Not { filter } => !filter.matches(record),
        }
    }

    /// If this filter pins `id` to exactly one value, return it.
    #[must_use]
    pub fn point_lookup_id(&self) -> Option<&Value> {
        match self {
            Self::Compare {
                field,
                op: Operator::Eq,
                value,
            } if field == "id" => Some(value),
            Self::And { filters } => filters.iter().find_map(Self::point_lookup_id),
            _ => None,
        }
    }

    fn validate(&self, table: &str, kind: QueryKind) -> PersistenceResult<()> {
        match self {
            Self::Compare { field, .. } | Self::In { field, .. } if field.trim().is_empty() => Err(
                PersistenceError::validation(table, kind.as_str(), "filter field name is empty"),
            ),
            Self::And { filters } | Self::Or { filters } => {
                if filters.is_empty() {
                    return Err(PersistenceError::validation(
                        table,
                        kind.as_str(),
                        "empty and/or filter group",
                    ));
                }
                filters.iter().try_for_each(|f| f.validate(table, kind))
            },
            Self::Not { filter } => filter.validate(table, kind),
            _ => Ok(()),
        }
    }
}

/// Equality that treats `1` and `1.0` as equal.
#[must_use]
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Total-enough ordering for scalar JSON values; `None` for mixed types.
#[must_use]
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn compare_with(actual: &Value, op: Operator, expected: &Value) -> bool {
    match op {
        Operator::Eq => loose_eq(actual, expected),
        Operator::Ne => !loose_eq(actual, expected),
        Operator::Gt => compare_values(actual, expected) == Some(Ordering::Greater),
        Operator::Gte => matches!(
            compare_values(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Operator::Lt => compare_values(actual, expected) == Some(Ordering::Less),
        Operator::Lte => matches!(
            compare_values(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        Operator::Contains => match (actual, expected) {
            (Value::String(s), Value::String(needle)) => s.contains(needle.as_str()),
            (Value::Array(items), needle) => items.iter().any(|i| loose_eq(i, needle)),
            _ => false,
        },
        Operator::StartsWith => match (actual, expected) {
            (Value::String(s), Value::String(prefix)) => s.starts_with(prefix.as_str()),
            _ => false,
        },
    }
}

/// Sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    /// Field path.
    pub field: String,
    /// Descending when true.
    #[serde(default)]
    pub descending: bool,
}

impl OrderBy {
    /// Ascending sort on `field`.
    #[must_use]
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    /// Descending sort on `field`.
    #[must_use]
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }
}

/// A technology-agnostic request. Immutable once built; builder methods
/// consume and return `self`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    /// Named query this spec was built from, if any. The router uses it to
    /// look up per-query cache settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Target table or collection.
    pub table: String,
    /// Operation kind.
    pub kind: QueryKind,
    /// Filter criteria.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    /// Free-form parameters (payloads, search vectors, traversal settings).
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    /// Maximum number of records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Records to skip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    /// Sort order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<OrderBy>,
}

impl QuerySpec {
    /// Create a spec of the given kind against `table`.
    #[must_use]
    pub fn new(table: impl Into<String>, kind: QueryKind) -> Self {
        Self {
            name: None,
            table: table.into(),
            kind,
            filter: None,
            parameters: BTreeMap::new(),
            limit: None,
            offset: None,
            order_by: Vec::new(),
        }
    }

    /// Shorthand for a `Select`.
    #[must_use]
    pub fn select(table: impl Into<String>) -> Self {
        Self::new(table, QueryKind::Select)
    }

    /// Tag with the originating named query.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the filter.
    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Add a parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Replace all parameters.
    #[must_use]
    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.parameters = params.into_iter().collect();
        self
    }

    /// Set the limit.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the offset.
    #[must_use]
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Append a sort key.
    #[must_use]
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    /// Parameters as a JSON object.
    #[must_use]
    pub fn parameters_value(&self) -> Value {
        Value::Object(
            self.parameters
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Payload for [`Provider::execute_specific_operation`](crate::Provider::execute_specific_operation):
    /// the parameters plus `filter`, `limit` and `offset` when set.
    #[must_use]
    pub fn operation_payload(&self) -> Value {
        let mut map: Map<String, Value> = self
            .parameters
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(filter) = &self.filter
            && let Ok(encoded) = serde_json::to_value(filter)
        {
            map.insert("filter".to_owned(), encoded);
        }
        if let Some(limit) = self.limit {
            map.insert("limit".to_owned(), Value::from(limit));
        }
        if let Some(offset) = self.offset {
            map.insert("offset".to_owned(), Value::from(offset));
        }
        Value::Object(map)
    }

    /// Structural checks that do not depend on the target technology.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Validation`] if the table name is empty,
    /// the limit is zero, or a filter group is empty.
    pub fn validate(&self) -> PersistenceResult<()> {
        if self.table.trim().is_empty() {
            return Err(PersistenceError::validation(
                "<empty>",
                self.kind.as_str(),
                "table name is empty",
            ));
        }
        if self.limit == Some(0) {
            return Err(PersistenceError::validation(
                &self.table,
                self.kind.as_str(),
                "limit must be positive",
            ));
        }
        if let Some(filter) = &self.filter {
            filter.validate(&self.table, self.kind)?;
        }
        Ok(())
    }

    /// Apply filter, order, offset and limit to an in-memory record set.
    ///
    /// Used by adapters without native query evaluation.
    #[must_use]
    pub fn apply_to(&self, records: impl IntoIterator<Item = Record>) -> Vec<Record> {
        let mut out: Vec<Record> = records
            .into_iter()
            .filter(|r| self.filter.as_ref().is_none_or(|f| f.matches(r)))
            .collect();
        if !self.order_by.is_empty() {
            out.sort_by(|a, b| {
                for key in &self.order_by {
                    let ord = match (a.field(&key.field), b.field(&key.field)) {
                        (Some(x), Some(y)) => compare_values(&x, &y).unwrap_or(Ordering::Equal),
                        (Some(_), None) => Ordering::Less,
                        (None, Some(_)) => Ordering::Greater,
                        (None, None) => Ordering::Equal,
                    };
                    let ord = if key.descending { ord.reverse() } else { ord };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }
        let skip = self.offset.unwrap_or(0);
        let take = self.limit.unwrap_or(usize::MAX);
        out.into_iter().skip(skip).take(take).collect()
    }
}
