//! Storage technology classes and the capability vocabulary providers
//! declare against.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A storage technology class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TechnologyType {
    /// Key-value cache (redis-like).
    Cache,
    /// Relational SQL store.
    Relational,
    /// Document store.
    Document,
    /// Vector similarity store.
    Vector,
    /// Wide-column store.
    WideColumn,
    /// Property graph store.
    Graph,
    /// Full-text search engine.
    Search,
    /// Analytical / data-lake store.
    Analytical,
}

impl TechnologyType {
    /// Every technology, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::Cache,
        Self::Relational,
        Self::Document,
        Self::Vector,
        Self::WideColumn,
        Self::Graph,
        Self::Search,
        Self::Analytical,
    ];

    /// Canonical lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Relational => "relational",
            Self::Document => "document",
            Self::Vector => "vector",
            Self::WideColumn => "wide_column",
            Self::Graph => "graph",
            Self::Search => "search",
            Self::Analytical => "analytical",
        }
    }
}

impl fmt::Display for TechnologyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TechnologyType {
    type Err = String;

    /// Accepts canonical names as well as the product names deployments
    /// commonly use for each class.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cache" | "redis" | "key_value" => Ok(Self::Cache),
            "relational" | "sql" | "postgres" | "cockroachdb" => Ok(Self::Relational),
            "document" | "mongodb" => Ok(Self::Document),
            "vector" | "weaviate" => Ok(Self::Vector),
            "wide_column" | "cassandra" => Ok(Self::WideColumn),
            "graph" | "neo4j" => Ok(Self::Graph),
            "search" | "elasticsearch" => Ok(Self::Search),
            "analytical" | "data_lake" => Ok(Self::Analytical),
            other => Err(format!("unknown technology type '{other}'")),
        }
    }
}

/// Kind of operation a [`QuerySpec`](crate::QuerySpec) asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    /// Filtered read returning records.
    Select,
    /// Count of matching records.
    Count,
    /// Record insertion.
    Insert,
    /// Record update.
    Update,
    /// Record deletion.
    Delete,
    /// Nearest-neighbour search over embeddings.
    VectorSearch,
    /// Relevance-ranked text search.
    FullTextSearch,
    /// Breadth-first traversal from a start node.
    GraphTraversal,
    /// Shortest path between two nodes.
    ShortestPath,
    /// Grouped aggregation.
    Aggregate,
}

impl QueryKind {
    /// Snake-case name, used in fingerprints and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Count => "count",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::VectorSearch => "vector_search",
            Self::FullTextSearch => "full_text_search",
            Self::GraphTraversal => "graph_traversal",
            Self::ShortestPath => "shortest_path",
            Self::Aggregate => "aggregate",
        }
    }

    /// Whether the operation mutates data.
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Delete)
    }

    /// Whether the operation is served through the provider's specific
    /// operation escape hatch rather than `query`.
    #[must_use]
    pub const fn is_specific(self) -> bool {
        matches!(
            self,
            Self::VectorSearch
                | Self::FullTextSearch
                | Self::GraphTraversal
                | Self::ShortestPath
                | Self::Aggregate
        )
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data types a provider can store natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// UTF-8 text.
    String,
    /// Signed integer.
    Integer,
    /// Floating point.
    Float,
    /// Boolean.
    Boolean,
    /// Arbitrary nested JSON.
    Json,
    /// Timestamp.
    Timestamp,
    /// Dense float vector.
    Vector,
    /// Raw bytes.
    Binary,
    /// UUID.
    Uuid,
}

/// Optional provider features the router and optimizer consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Native begin/commit/rollback.
    Transactions,
    /// Native multi-key lookup (`IN` / `MGET`).
    MultiGet,
    /// Limit evaluated inside the store.
    LimitPushdown,
    /// Secondary indexes on arbitrary fields.
    SecondaryIndexes,
    /// Embedding similarity.
    VectorSimilarity,
    /// Text relevance scoring.
    FullText,
    /// Graph traversal and paths.
    GraphTraversal,
    /// Native per-key expiry.
    Ttl,
    /// Grouped aggregations.
    Aggregations,
    /// Dotted-path access into nested documents.
    NestedDocuments,
}

impl Feature {
    /// Every feature, in declaration order.
    pub const ALL: [Self; 10] = [
        Self::Transactions,
        Self::MultiGet,
        Self::LimitPushdown,
        Self::SecondaryIndexes,
        Self::VectorSimilarity,
        Self::FullText,
        Self::GraphTraversal,
        Self::Ttl,
        Self::Aggregations,
        Self::NestedDocuments,
    ];

    /// Snake-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transactions => "transactions",
            Self::MultiGet => "multi_get",
            Self::LimitPushdown => "limit_pushdown",
            Self::SecondaryIndexes => "secondary_indexes",
            Self::VectorSimilarity => "vector_similarity",
            Self::FullText => "full_text",
            Self::GraphTraversal => "graph_traversal",
            Self::Ttl => "ttl",
            Self::Aggregations => "aggregations",
            Self::NestedDocuments => "nested_documents",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
