//! Capability profile per technology.
//!
//! A profile is the default capability set an adapter of that technology
//! declares. Provider feature flags can switch individual features on or off;
//! query kinds that depend on a feature follow it.

use std::collections::HashSet;

use polystore_core::{DataType, Feature, ProviderConfig, QueryKind, TechnologyType};

/// Declared capabilities of one adapter instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    /// Accepted operation kinds.
    pub query_kinds: HashSet<QueryKind>,
    /// Natively stored data types.
    pub data_types: HashSet<DataType>,
    /// Available features.
    pub features: HashSet<Feature>,
    /// Whether inserting an existing id overwrites instead of failing.
    pub upsert_on_insert: bool,
    /// Whether records may be updated or deleted.
    pub mutable: bool,
}

const SCALARS: [DataType; 6] = [
    DataType::String,
    DataType::Integer,
    DataType::Float,
    DataType::Boolean,
    DataType::Timestamp,
    DataType::Uuid,
];

fn default_features(technology: TechnologyType) -> &'static [Feature] {
    match technology {
        TechnologyType::Cache => &[Feature::MultiGet, Feature::Ttl],
        TechnologyType::Relational => &[
            Feature::Transactions,
            Feature::MultiGet,
            Feature::LimitPushdown,
            Feature::SecondaryIndexes,
            Feature::Aggregations,
        ],
        TechnologyType::Document => &[
            Feature::MultiGet,
            Feature::LimitPushdown,
            Feature::SecondaryIndexes,
            Feature::NestedDocuments,
            Feature::Aggregations,
        ],
        TechnologyType::Vector => &[Feature::VectorSimilarity, Feature::LimitPushdown],
        TechnologyType::WideColumn => &[Feature::LimitPushdown, Feature::Ttl],
        TechnologyType::Graph => &[Feature::GraphTraversal],
        TechnologyType::Search => &[
            Feature::FullText,
            Feature::LimitPushdown,
            Feature::NestedDocuments,
        ],
        TechnologyType::Analytical => &[Feature::Aggregations, Feature::LimitPushdown],
    }
}

fn extra_types(technology: TechnologyType) -> &'static [DataType] {
    match technology {
        TechnologyType::Cache => &[DataType::Binary, DataType::Json],
        TechnologyType::Relational | TechnologyType::WideColumn => &[DataType::Binary],
        TechnologyType::Document | TechnologyType::Search | TechnologyType::Analytical => {
            &[DataType::Json]
        },
        TechnologyType::Vector => &[DataType::Vector, DataType::Json],
        TechnologyType::Graph => &[DataType::Json],
    }
}

/// Resolve the capability set for `config`.
#[must_use]
pub fn capabilities(config: &ProviderConfig) -> Capabilities {
    let technology = config.technology;
    let mut features: HashSet<Feature> = default_features(technology).iter().copied().collect();
    for feature in ALL_FEATURES {
        match config.feature_flag(feature) {
            Some(true) => {
                features.insert(feature);
            },
            Some(false) => {
                features.remove(&feature);
            },
            None => {},
        }
    }

    let mutable = technology != TechnologyType::Analytical;
    let mut query_kinds: HashSet<QueryKind> =
        [QueryKind::Select, QueryKind::Count, QueryKind::Insert]
            .into_iter()
            .collect();
    if mutable {
        query_kinds.insert(QueryKind::Update);
        query_kinds.insert(QueryKind::Delete);
    }
    if features.contains(&Feature::VectorSimilarity) {
        query_kinds.insert(QueryKind::VectorSearch);
    }
    if features.contains(&Feature::FullText) {
        query_kinds.insert(QueryKind::FullTextSearch);
    }
    if features.contains(&Feature::GraphTraversal) {
        query_kinds.insert(QueryKind::GraphTraversal);
        query_kinds.insert(QueryKind::ShortestPath);
    }
    if features.contains(&Feature::Aggregations) {
        query_kinds.insert(QueryKind::Aggregate);
    }

    let data_types = SCALARS
        .iter()
        .chain(extra_types(technology))
        .copied()
        .collect();

    Capabilities {
        query_kinds,
        data_types,
        features,
        upsert_on_insert: technology == TechnologyType::Cache,
        mutable,
    }
}

const ALL_FEATURES: [Feature; 10] = [
    Feature::Transactions,
    Feature::MultiGet,
    Feature::LimitPushdown,
    Feature::SecondaryIndexes,
    Feature::VectorSimilarity,
    Feature::FullText,
    Feature::GraphTraversal,
    Feature::Ttl,
    Feature::Aggregations,
    Feature::NestedDocuments,
];
