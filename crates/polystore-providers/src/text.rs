//! Term-frequency text relevance.

use std::cmp::Ordering;

use polystore_core::{PersistenceResult, Record, ScoredRecord, TextSearchResponse};
use serde_json::Value;

use crate::params::Params;
use crate::store::Table;

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

fn collect_text(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.extend(tokenize(s)),
        Value::Array(items) => items.iter().for_each(|v| collect_text(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_text(v, out)),
        _ => {},
    }
}

/// Relevance of `record` for `terms`: each term contributes `tf / (tf + 1)`
/// so repeated occurrences saturate.
#[allow(clippy::cast_precision_loss)]
fn score(record: &Record, fields: &[String], terms: &[String]) -> f64 {
    let mut tokens = Vec::new();
    if fields.is_empty() {
        record.data.values().for_each(|v| collect_text(v, &mut tokens));
    } else {
        for field in fields {
            if let Some(v) = record.field(field) {
                collect_text(&v, &mut tokens);
            }
        }
    }
    terms
        .iter()
        .map(|term| {
            let tf = tokens.iter().filter(|t| *t == term).count() as f64;
            tf / (tf + 1.0)
        })
        .sum()
}

pub(crate) fn search(table: Option<&Table>, params: &Params<'_>) -> PersistenceResult<Value> {
    let text = params.required_str("query")?;
    let terms: Vec<String> = tokenize(text).collect();
    if terms.is_empty() {
        return Err(params.invalid("search text has no terms"));
    }
    let fields = params.strings("fields");
    let limit = params.usize("limit").unwrap_or(10);

    let mut hits: Vec<ScoredRecord> = table
        .map(|t| t.matching(None))
        .unwrap_or_default()
        .into_iter()
        .filter_map(|record| {
            let s = score(record, &fields, &terms);
            (s > 0.0).then(|| ScoredRecord::new(record.clone(), s))
        })
        .collect();
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.record.id.cmp(&b.record.id))
    });
    hits.truncate(limit);

    serde_json::to_value(TextSearchResponse { hits })
        .map_err(|e| params.invalid(format!("response encoding failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn more_matching_terms_score_higher() {
        let terms: Vec<String> = tokenize("rust async").collect();
        let both = Record::from_value(json!({"id": "a", "body": "Rust and async Rust"}));
        let one = Record::from_value(json!({"id": "b", "body": "rust only"}));
        assert!(score(&both, &[], &terms) > score(&one, &[], &terms));
    }

    #[test]
    fn field_restriction() {
        let terms: Vec<String> = tokenize("graph").collect();
        let rec = Record::from_value(json!({"id": "a", "title": "intro", "body": "graph"}));
        assert_eq!(score(&rec, &["title".into()], &terms), 0.0);
        assert!(score(&rec, &["body".into()], &terms) > 0.0);
    }
}
