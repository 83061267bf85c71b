//! Execution plans produced by the router.

use polystore_core::{CachePolicy, HybridWeights, QuerySpec, SetMerge, TechnologyType};
use serde::Serialize;

/// Where and how one request executes.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    /// Spec after technology-aware rewrites.
    pub spec: QuerySpec,
    /// Cache key of the spec as the caller wrote it.
    pub fingerprint: String,
    /// Technology chosen.
    pub technology: TechnologyType,
    /// Provider instance chosen.
    pub provider: String,
    /// Cache policy for reads; for writes, the effect on the table's entries.
    pub cache: CachePolicy,
    /// Whether a fallback technology was chosen over the primary.
    pub fallback: bool,
    /// Static cost estimate: the chosen technology's rank among the table's
    /// candidates, 0 for the primary. Lower is preferred.
    pub estimated_cost: u32,
    /// Healthy technologies that would serve the table next, in declared
    /// order.
    pub fallback_order: Vec<TechnologyType>,
}

impl ExecutionPlan {
    /// Target table.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.spec.table
    }
}

/// How multi-technology results are combined.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Weighted vector and text scores. The first leg is the vector search.
    Hybrid {
        /// Score weights.
        weights: HybridWeights,
    },
    /// Set operation keyed by record id.
    Set {
        /// Union or intersection.
        merge: SetMerge,
    },
}

/// Plan naming several technologies and the merge applied to their results.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiPlan {
    /// Sub-plans in declared order. Merge ties break on this order.
    pub legs: Vec<ExecutionPlan>,
    /// Merge strategy.
    pub merge: MergeStrategy,
    /// Cap on merged results.
    pub limit: Option<usize>,
}

impl MultiPlan {
    /// Distinct technologies involved, in declared order.
    #[must_use]
    pub fn technologies(&self) -> Vec<TechnologyType> {
        let mut out = Vec::new();
        for leg in &self.legs {
            if !out.contains(&leg.technology) {
                out.push(leg.technology);
            }
        }
        out
    }
}
