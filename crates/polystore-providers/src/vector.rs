//! Cosine nearest-neighbour search.

use std::cmp::Ordering;

use polystore_core::{PersistenceResult, VectorMatch, VectorSearchResponse};
use serde_json::Value;

use crate::params::{Params, as_vector};
use crate::store::Table;

/// Cosine similarity, `None` for mismatched dimensions or zero vectors.
#[must_use]
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let (mut dot, mut na, mut nb) = (0.0_f64, 0.0_f64, 0.0_f64);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return None;
    }
    Some(dot / (na.sqrt() * nb.sqrt()))
}

pub(crate) fn search(table: Option<&Table>, params: &Params<'_>) -> PersistenceResult<Value> {
    let query = params.vector("vector")?;
    let field = params.str("field").unwrap_or("embedding");
    let floor = params.f64("min_similarity");
    let limit = params.usize("limit").unwrap_or(10);
    let filter = params.filter()?;

    let mut matches: Vec<VectorMatch> = table
        .map(|t| t.matching(filter.as_ref()))
        .unwrap_or_default()
        .into_iter()
        .filter_map(|record| {
            let stored = as_vector(&record.field(field)?)?;
            let similarity = cosine_similarity(&query, &stored)?;
            floor
                .is_none_or(|f| similarity >= f)
                .then(|| VectorMatch::new(record.clone(), similarity))
        })
        .collect();

    matches.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.record.id.cmp(&b.record.id))
    });
    matches.truncate(limit);

    serde_json::to_value(VectorSearchResponse { matches })
        .map_err(|e| params.invalid(format!("response encoding failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]).unwrap() - 1.0).abs() < 1e-12);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap().abs() < 1e-12);
        assert!(cosine_similarity(&[1.0], &[1.0, 2.0]).is_none());
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]).is_none());
    }
}
