//! Technology-specific search requests and their typed results.
//!
//! Search requests are lowered to a [`QuerySpec`] whose parameters travel to
//! the provider's specific-operation escape hatch. Providers answer with the
//! response types defined here, serialized as JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PersistenceError, PersistenceResult};
use crate::query::{Filter, QuerySpec};
use crate::record::Record;
use crate::technology::QueryKind;

fn default_embedding_field() -> String {
    "embedding".to_owned()
}

fn default_top_k() -> usize {
    10
}

/// Nearest-neighbour search over an embedding field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorSearchQuery {
    /// Target collection.
    pub table: String,
    /// Query embedding.
    pub vector: Vec<f32>,
    /// Number of matches to return.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Field holding the stored embedding.
    #[serde(default = "default_embedding_field")]
    pub field: String,
    /// Drop matches below this cosine similarity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_similarity: Option<f64>,
    /// Metadata pre-filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
}

impl VectorSearchQuery {
    /// Search `table` for the `top_k` nearest neighbours of `vector`.
    #[must_use]
    pub fn new(table: impl Into<String>, vector: Vec<f32>, top_k: usize) -> Self {
        Self {
            table: table.into(),
            vector,
            top_k,
            field: default_embedding_field(),
            min_similarity: None,
            filter: None,
        }
    }

    /// Set the similarity floor.
    #[must_use]
    pub fn with_min_similarity(mut self, floor: f64) -> Self {
        self.min_similarity = Some(floor);
        self
    }

    /// Set the metadata pre-filter.
    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Lower to a routable spec.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty vector or a zero `top_k`.
    pub fn to_query_spec(&self) -> PersistenceResult<QuerySpec> {
        if self.vector.is_empty() {
            return Err(PersistenceError::validation(
                &self.table,
                QueryKind::VectorSearch.as_str(),
                "query vector is empty",
            ));
        }
        if self.top_k == 0 {
            return Err(PersistenceError::validation(
                &self.table,
                QueryKind::VectorSearch.as_str(),
                "top_k must be positive",
            ));
        }
        let mut spec = QuerySpec::new(&self.table, QueryKind::VectorSearch)
            .with_param("vector", serde_json::json!(self.vector))
            .with_param("field", self.field.clone())
            .with_limit(self.top_k);
        if let Some(floor) = self.min_similarity {
            spec = spec.with_param("min_similarity", floor);
        }
        if let Some(filter) = &self.filter {
            spec = spec.with_filter(filter.clone());
        }
        Ok(spec)
    }
}

/// Relevance-ranked text search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSearchQuery {
    /// Target index.
    pub table: String,
    /// Free-text query.
    pub query: String,
    /// Fields to search; empty means every string field.
    #[serde(default)]
    pub fields: Vec<String>,
    /// Maximum hits.
    #[serde(default = "default_top_k")]
    pub limit: usize,
}

impl TextSearchQuery {
    /// Search `table` for `query`.
    #[must_use]
    pub fn new(table: impl Into<String>, query: impl Into<String>, limit: usize) -> Self {
        Self {
            table: table.into(),
            query: query.into(),
            fields: Vec::new(),
            limit,
        }
    }

    /// Restrict to the given fields.
    #[must_use]
    pub fn in_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = fields;
        self
    }

    /// Lower to a routable spec.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a blank query or a zero limit.
    pub fn to_query_spec(&self) -> PersistenceResult<QuerySpec> {
        if self.query.trim().is_empty() {
            return Err(PersistenceError::validation(
                &self.table,
                QueryKind::FullTextSearch.as_str(),
                "search text is empty",
            ));
        }
        if self.limit == 0 {
            return Err(PersistenceError::validation(
                &self.table,
                QueryKind::FullTextSearch.as_str(),
                "limit must be positive",
            ));
        }
        Ok(QuerySpec::new(&self.table, QueryKind::FullTextSearch)
            .with_param("query", self.query.clone())
            .with_param("fields", serde_json::json!(self.fields))
            .with_limit(self.limit))
    }
}

/// Weights applied to normalized component scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HybridWeights {
    /// Weight of the vector similarity.
    pub vector: f64,
    /// Weight of the text relevance.
    pub text: f64,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            vector: 0.7,
            text: 0.3,
        }
    }
}

/// Vector and text search combined into one ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridSearchQuery {
    /// Vector half.
    pub vector: VectorSearchQuery,
    /// Text half.
    pub text: TextSearchQuery,
    /// Score weights.
    #[serde(default)]
    pub weights: HybridWeights,
    /// Maximum merged results.
    #[serde(default = "default_top_k")]
    pub limit: usize,
}

impl HybridSearchQuery {
    /// Combine a vector and a text query with the given weights.
    #[must_use]
    pub fn new(vector: VectorSearchQuery, text: TextSearchQuery, weights: HybridWeights) -> Self {
        let limit = vector.top_k.max(text.limit);
        Self {
            vector,
            text,
            weights,
            limit,
        }
    }

    /// Check weights before fan-out.
    ///
    /// # Errors
    ///
    /// Returns a validation error for negative or all-zero weights.
    pub fn validate(&self) -> PersistenceResult<()> {
        let w = self.weights;
        if w.vector < 0.0 || w.text < 0.0 || (w.vector == 0.0 && w.text == 0.0) {
            return Err(PersistenceError::validation(
                &self.vector.table,
                "hybrid_search",
                "weights must be non-negative and not both zero",
            ));
        }
        Ok(())
    }
}

/// Traversal direction along graph edges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Follow edges from source to target.
    #[default]
    Outgoing,
    /// Follow edges from target to source.
    Incoming,
    /// Either direction.
    Both,
}

fn default_depth() -> usize {
    3
}

/// Breadth-first traversal from a start node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphTraversalQuery {
    /// Edge collection.
    pub table: String,
    /// Start node id.
    pub start: String,
    /// Maximum hops.
    #[serde(default = "default_depth")]
    pub max_depth: usize,
    /// Only follow edges with this label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_label: Option<String>,
    /// Edge direction.
    #[serde(default)]
    pub direction: Direction,
}

impl GraphTraversalQuery {
    /// Traverse `table` from `start` up to `max_depth` hops.
    #[must_use]
    pub fn new(table: impl Into<String>, start: impl Into<String>, max_depth: usize) -> Self {
        Self {
            table: table.into(),
            start: start.into(),
            max_depth,
            edge_label: None,
            direction: Direction::Outgoing,
        }
    }

    /// Only follow edges labelled `label`.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.edge_label = Some(label.into());
        self
    }

    /// Set the traversal direction.
    #[must_use]
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Lower to a routable spec.
    #[must_use]
    pub fn to_query_spec(&self) -> QuerySpec {
        let mut spec = QuerySpec::new(&self.table, QueryKind::GraphTraversal)
            .with_param("start", self.start.clone())
            .with_param("max_depth", self.max_depth)
            .with_param("direction", serde_json::json!(self.direction));
        if let Some(label) = &self.edge_label {
            spec = spec.with_param("edge_label", label.clone());
        }
        spec
    }
}

/// Weighted shortest path between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortestPathQuery {
    /// Edge collection.
    pub table: String,
    /// Source node id.
    pub from: String,
    /// Target node id.
    pub to: String,
    /// Give up beyond this many hops.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<usize>,
}

impl ShortestPathQuery {
    /// Path from `from` to `to` in `table`.
    #[must_use]
    pub fn new(table: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            from: from.into(),
            to: to.into(),
            max_depth: None,
        }
    }

    /// Lower to a routable spec.
    #[must_use]
    pub fn to_query_spec(&self) -> QuerySpec {
        let mut spec = QuerySpec::new(&self.table, QueryKind::ShortestPath)
            .with_param("from", self.from.clone())
            .with_param("to", self.to.clone());
        if let Some(depth) = self.max_depth {
            spec = spec.with_param("max_depth", depth);
        }
        spec
    }
}

/// Set operation applied to cross-technology results, keyed by record id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetMerge {
    /// Every record that appears in any source.
    #[default]
    Union,
    /// Only records present in every source.
    Intersection,
}

/// Independent sub-queries against different tables merged into one set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossTechnologyQuery {
    /// Sub-queries, in precedence order.
    pub sources: Vec<QuerySpec>,
    /// Merge operation.
    #[serde(default)]
    pub merge: SetMerge,
    /// Maximum merged results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl CrossTechnologyQuery {
    /// Merge `sources` with `merge`.
    #[must_use]
    pub fn new(sources: Vec<QuerySpec>, merge: SetMerge) -> Self {
        Self {
            sources,
            merge,
            limit: None,
        }
    }

    /// Cap the merged result.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// One vector search match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    /// Matched record.
    pub record: Record,
    /// Cosine similarity.
    pub similarity: f64,
    /// `1 - similarity`.
    pub distance: f64,
}

impl VectorMatch {
    /// Build a match; distance is derived from similarity.
    #[must_use]
    pub fn new(record: Record, similarity: f64) -> Self {
        Self {
            record,
            similarity,
            distance: 1.0 - similarity,
        }
    }
}

/// Provider response to a vector search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorSearchResponse {
    /// Matches, best first.
    pub matches: Vec<VectorMatch>,
}

/// A record with a relevance score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    /// Record.
    pub record: Record,
    /// Combined or raw score.
    pub score: f64,
    /// Normalized vector component, for hybrid results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_score: Option<f64>,
    /// Normalized text component, for hybrid results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_score: Option<f64>,
}

impl ScoredRecord {
    /// A record with a single raw score.
    #[must_use]
    pub fn new(record: Record, score: f64) -> Self {
        Self {
            record,
            score,
            vector_score: None,
            text_score: None,
        }
    }
}

/// Provider response to a text search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextSearchResponse {
    /// Hits, best first.
    pub hits: Vec<ScoredRecord>,
}

/// Node reached by a traversal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraversedNode {
    /// Node id.
    pub id: String,
    /// Hops from the start node.
    pub depth: usize,
    /// Node this one was reached from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub via: Option<String>,
}

/// Provider response to a traversal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraversalResult {
    /// Nodes in visit order, start node first.
    pub nodes: Vec<TraversedNode>,
}

/// A resolved path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphPath {
    /// Node ids from source to target inclusive.
    pub nodes: Vec<String>,
    /// Sum of edge weights.
    pub weight: f64,
}

impl GraphPath {
    /// Number of edges on the path.
    #[must_use]
    pub fn hops(&self) -> usize {
        self.nodes.len().saturating_sub(1)
    }
}

/// Provider response to a shortest-path request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShortestPathResponse {
    /// The path, or `None` when the target is unreachable.
    pub path: Option<GraphPath>,
}

/// Decode a provider's specific-operation response.
///
/// # Errors
///
/// Returns a validation error naming `table` and `operation` if the payload
/// does not have the expected shape.
pub fn decode_response<T: serde::de::DeserializeOwned>(
    table: &str,
    operation: &str,
    value: Value,
) -> PersistenceResult<T> {
    serde_json::from_value(value).map_err(|e| {
        PersistenceError::validation(table, operation, format!("malformed provider response: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn vector_query_lowers_to_spec() {
        let spec = VectorSearchQuery::new("docs", vec![0.1, 0.2], 5)
            .with_min_similarity(0.5)
            .to_query_spec()
            .unwrap();
        assert_eq!(spec.kind, QueryKind::VectorSearch);
        assert_eq!(spec.limit, Some(5));
        assert_eq!(spec.parameters.get("field"), Some(&json!("embedding")));
        assert_eq!(spec.parameters.get("min_similarity"), Some(&json!(0.5)));
    }

    #[test]
    fn empty_vector_is_rejected() {
        let err = VectorSearchQuery::new("docs", vec![], 5)
            .to_query_spec()
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn hybrid_weights_must_not_both_be_zero() {
        let q = HybridSearchQuery::new(
            VectorSearchQuery::new("docs", vec![1.0], 3),
            TextSearchQuery::new("docs_text", "rust", 3),
            HybridWeights {
                vector: 0.0,
                text: 0.0,
            },
        );
        assert!(q.validate().is_err());
    }

    #[test]
    fn vector_match_distance() {
        let m = VectorMatch::new(Record::from_value(json!({"id": "a"})), 0.75);
        assert!((m.distance - 0.25).abs() < 1e-9);
    }

    #[test]
    fn decode_rejects_wrong_shape() {
        let err =
            decode_response::<ShortestPathResponse>("edges", "shortest_path", json!([1, 2]))
                .unwrap_err();
        assert!(err.to_string().contains("malformed"));
        let ok: ShortestPathResponse =
            decode_response("edges", "shortest_path", json!({"path": null})).unwrap();
        assert!(ok.path.is_none());
    }
}
