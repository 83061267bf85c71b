//! Merging results from several technologies.

use std::collections::{HashMap, HashSet};

use polystore_core::{
    HybridWeights, Record, ScoredRecord, SetMerge, TextSearchResponse, VectorSearchResponse,
};

/// Scale scores into `[0, 1]`.
///
/// Scores already inside `[0, 1]` are kept as they are so they stay
/// comparable across calls. Otherwise min-max scaling is applied; if every
/// score is equal they all map to `1.0`.
#[must_use]
pub fn normalize(scores: &[f64]) -> Vec<f64> {
    if scores.iter().all(|s| (0.0..=1.0).contains(s)) {
        return scores.to_vec();
    }
    let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if range <= f64::EPSILON {
        return vec![1.0; scores.len()];
    }
    scores.iter().map(|s| (s - min) / range).collect()
}

struct Candidate {
    record: Record,
    vector: f64,
    text: f64,
    /// (leg, position) of first appearance; breaks score ties.
    seen_at: (usize, usize),
}

/// Combine a vector and a text result into one ranking.
///
/// Each candidate scores `weights.vector * v + weights.text * t` over the
/// normalized component scores; a candidate absent from one side scores 0
/// there. Records are identified by id and a duplicate keeps its best
/// component score. Output is sorted by combined score, ties broken by the
/// leg (vector first) and position where the record first appeared.
#[must_use]
pub fn hybrid(
    vector: &VectorSearchResponse,
    text: &TextSearchResponse,
    weights: HybridWeights,
    limit: Option<usize>,
) -> Vec<ScoredRecord> {
    let mut candidates: Vec<Candidate> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    let mut upsert = |record: &Record, leg: usize, position: usize, score: f64| {
        let slot = *index.entry(record.id.clone()).or_insert_with(|| {
            candidates.push(Candidate {
                record: record.clone(),
                vector: 0.0,
                text: 0.0,
                seen_at: (leg, position),
            });
            candidates.len().saturating_sub(1)
        });
        if let Some(candidate) = candidates.get_mut(slot) {
            let component = if leg == 0 {
                &mut candidate.vector
            } else {
                &mut candidate.text
            };
            *component = component.max(score);
        }
    };

    let vector_scores: Vec<f64> = vector.matches.iter().map(|m| m.similarity).collect();
    for (position, (m, score)) in vector
        .matches
        .iter()
        .zip(normalize(&vector_scores))
        .enumerate()
    {
        upsert(&m.record, 0, position, score);
    }
    let text_scores: Vec<f64> = text.hits.iter().map(|h| h.score).collect();
    for (position, (hit, score)) in text.hits.iter().zip(normalize(&text_scores)).enumerate() {
        upsert(&hit.record, 1, position, score);
    }

    let mut ranked: Vec<(ScoredRecord, (usize, usize))> = candidates
        .into_iter()
        .map(|c| {
            let score = weights.vector * c.vector + weights.text * c.text;
            (
                ScoredRecord {
                    record: c.record,
                    score,
                    vector_score: Some(c.vector),
                    text_score: Some(c.text),
                },
                c.seen_at,
            )
        })
        .collect();
    ranked.sort_by(|(a, a_seen), (b, b_seen)| {
        b.score.total_cmp(&a.score).then_with(|| a_seen.cmp(b_seen))
    });
    let mut out: Vec<ScoredRecord> = ranked.into_iter().map(|(r, _)| r).collect();
    if let Some(limit) = limit {
        out.truncate(limit);
    }
    out
}

/// Union or intersect record sets by id.
///
/// When several sources hold the same id, the record from the first-declared
/// source is kept. Output follows first-appearance order.
#[must_use]
pub fn merge_sets(sources: Vec<Vec<Record>>, merge: SetMerge, limit: Option<usize>) -> Vec<Record> {
    let mut out = match merge {
        SetMerge::Union => {
            let mut seen = HashSet::new();
            sources
                .into_iter()
                .flatten()
                .filter(|r| seen.insert(r.id.clone()))
                .collect::<Vec<_>>()
        },
        SetMerge::Intersection => {
            let mut iter = sources.into_iter();
            let Some(first) = iter.next() else {
                return Vec::new();
            };
            let others: Vec<HashSet<String>> = iter
                .map(|records| records.into_iter().map(|r| r.id).collect())
                .collect();
            let mut seen = HashSet::new();
            first
                .into_iter()
                .filter(|r| others.iter().all(|ids| ids.contains(&r.id)))
                .filter(|r| seen.insert(r.id.clone()))
                .collect()
        },
    };
    if let Some(limit) = limit {
        out.truncate(limit);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use polystore_core::VectorMatch;
    use serde_json::json;

    fn rec(id: &str) -> Record {
        Record::from_value(json!({"id": id}))
    }

    fn vectors(scores: &[(&str, f64)]) -> VectorSearchResponse {
        VectorSearchResponse {
            matches: scores
                .iter()
                .map(|(id, s)| VectorMatch::new(rec(id), *s))
                .collect(),
        }
    }

    fn texts(scores: &[(&str, f64)]) -> TextSearchResponse {
        TextSearchResponse {
            hits: scores
                .iter()
                .map(|(id, s)| ScoredRecord::new(rec(id), *s))
                .collect(),
        }
    }

    fn weights(vector: f64, text: f64) -> HybridWeights {
        HybridWeights { vector, text }
    }

    #[test]
    fn weighted_scores_rank_candidates() {
        let merged = hybrid(
            &vectors(&[("c1", 0.9), ("c2", 0.4)]),
            &texts(&[("c2", 0.9), ("c1", 0.1)]),
            weights(0.7, 0.3),
            None,
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].record.id, "c1");
        assert!((merged[0].score - 0.66).abs() < 1e-9);
        assert_eq!(merged[1].record.id, "c2");
        assert!((merged[1].score - 0.55).abs() < 1e-9);
    }

    #[test]
    fn missing_side_scores_zero() {
        let merged = hybrid(
            &vectors(&[("v-only", 0.8)]),
            &texts(&[("t-only", 0.8)]),
            weights(0.5, 0.5),
            None,
        );
        assert!(merged.iter().all(|r| (r.score - 0.4).abs() < 1e-9));
        assert_eq!(merged[0].text_score, Some(0.0));
        // Equal scores: the vector leg was declared first.
        assert_eq!(merged[0].record.id, "v-only");
    }

    #[test]
    fn duplicates_keep_best_score() {
        let merged = hybrid(
            &vectors(&[("a", 0.2), ("a", 0.6)]),
            &texts(&[]),
            weights(1.0, 0.0),
            None,
        );
        assert_eq!(merged.len(), 1);
        assert!((merged[0].score - 0.6).abs() < 1e-9);
    }

    #[test]
    fn out_of_range_scores_are_min_max_scaled() {
        assert_eq!(normalize(&[2.0, 4.0, 3.0]), vec![0.0, 1.0, 0.5]);
        assert_eq!(normalize(&[0.2, 0.7]), vec![0.2, 0.7]);
        assert_eq!(normalize(&[5.0, 5.0]), vec![1.0, 1.0]);
        assert!(normalize(&[]).is_empty());
    }

    #[test]
    fn limit_truncates_after_sorting() {
        let merged = hybrid(
            &vectors(&[("a", 0.1), ("b", 0.9), ("c", 0.5)]),
            &texts(&[]),
            weights(1.0, 0.0),
            Some(2),
        );
        let ids: Vec<&str> = merged.iter().map(|r| r.record.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn union_keeps_first_declared_source() {
        let first = vec![rec("a").with_field("src", json!(1)), rec("b")];
        let second = vec![rec("a").with_field("src", json!(2)), rec("c")];
        let merged = merge_sets(vec![first, second], SetMerge::Union, None);
        let ids: Vec<&str> = merged.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(merged[0].field("src"), Some(json!(1)));
    }

    #[test]
    fn intersection_requires_every_source() {
        let merged = merge_sets(
            vec![
                vec![rec("a"), rec("b"), rec("c")],
                vec![rec("c"), rec("a")],
                vec![rec("a"), rec("c"), rec("d")],
            ],
            SetMerge::Intersection,
            None,
        );
        let ids: Vec<&str> = merged.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert!(merge_sets(Vec::new(), SetMerge::Intersection, None).is_empty());
    }
}
