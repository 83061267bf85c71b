//! Grouped aggregation.

use std::collections::BTreeMap;

use polystore_core::PersistenceResult;
use serde_json::{Value, json};

use crate::params::Params;
use crate::store::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Metric {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl Metric {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "count" => Self::Count,
            "sum" => Self::Sum,
            "avg" => Self::Avg,
            "min" => Self::Min,
            "max" => Self::Max,
            _ => return None,
        })
    }
}

#[derive(Default)]
struct Acc {
    count: u64,
    sum: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl Acc {
    fn push(&mut self, v: f64) {
        self.count = self.count.saturating_add(1);
        self.sum += v;
        self.min = Some(self.min.map_or(v, |m| m.min(v)));
        self.max = Some(self.max.map_or(v, |m| m.max(v)));
    }

    #[allow(clippy::cast_precision_loss)]
    fn finish(&self, metric: Metric) -> Value {
        match metric {
            Metric::Count => json!(self.count),
            Metric::Sum => json!(self.sum),
            Metric::Avg if self.count > 0 => json!(self.sum / self.count as f64),
            Metric::Avg => Value::Null,
            Metric::Min => self.min.map_or(Value::Null, |v| json!(v)),
            Metric::Max => self.max.map_or(Value::Null, |v| json!(v)),
        }
    }
}

/// Group key as text; records without the field fall into the `null` group.
fn group_key(value: Option<Value>) -> String {
    match value {
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
        None => "null".to_owned(),
    }
}

pub(crate) fn aggregate(table: Option<&Table>, params: &Params<'_>) -> PersistenceResult<Value> {
    let metric_name = params.str("metric").unwrap_or("count");
    let metric = Metric::parse(metric_name)
        .ok_or_else(|| params.invalid(format!("unknown metric '{metric_name}'")))?;
    let field = params.str("field");
    if metric != Metric::Count && field.is_none() {
        return Err(params.invalid(format!("metric '{metric_name}' needs a field")));
    }
    let group_by = params.str("group_by");
    let filter = params.filter()?;

    let mut groups: BTreeMap<String, Acc> = BTreeMap::new();
    for record in table.map(|t| t.matching(filter.as_ref())).unwrap_or_default() {
        let key = group_by.map_or_else(|| "all".to_owned(), |g| group_key(record.field(g)));
        let acc = groups.entry(key).or_default();
        match (metric, field) {
            (Metric::Count, None) => acc.push(0.0),
            (_, Some(f)) => {
                if let Some(v) = record.field(f).as_ref().and_then(Value::as_f64) {
                    acc.push(v);
                }
            },
            (_, None) => {},
        }
    }

    let groups: Vec<Value> = groups
        .into_iter()
        .map(|(key, acc)| json!({"key": key, "value": acc.finish(metric)}))
        .collect();
    Ok(json!({ "groups": groups }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use polystore_core::Record;

    fn sales() -> Table {
        let mut t = Table::default();
        for (id, region, amount) in [("1", "eu", 10.0), ("2", "eu", 30.0), ("3", "us", 5.0)] {
            let r = Record::from_value(json!({"id": id, "region": region, "amount": amount}));
            t.rows.insert(r.id.clone(), r);
        }
        t
    }

    #[test]
    fn sum_by_region() {
        let t = sales();
        let p = json!({"group_by": "region", "metric": "sum", "field": "amount"});
        let out = aggregate(Some(&t), &Params::new("sales", "aggregate", &p)).unwrap();
        assert_eq!(
            out,
            json!({"groups": [{"key": "eu", "value": 40.0}, {"key": "us", "value": 5.0}]})
        );
    }

    #[test]
    fn count_without_grouping() {
        let t = sales();
        let p = json!({});
        let out = aggregate(Some(&t), &Params::new("sales", "aggregate", &p)).unwrap();
        assert_eq!(out, json!({"groups": [{"key": "all", "value": 3}]}));
    }

    #[test]
    fn unknown_metric_rejected() {
        let p = json!({"metric": "median", "field": "amount"});
        let err = aggregate(None, &Params::new("sales", "aggregate", &p)).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }
}
