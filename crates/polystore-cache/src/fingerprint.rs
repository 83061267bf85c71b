//! Deterministic cache keys.

use polystore_core::QuerySpec;
use serde_json::{Value, json};

/// Table name as used in keys: trimmed and lowercased.
#[must_use]
pub fn normalize_table(table: &str) -> String {
    table.trim().to_ascii_lowercase()
}

/// Fingerprint of a read.
///
/// The key is `"{table}:{kind}:{digest}"` where the digest is a BLAKE3 hash
/// of the canonical JSON encoding of everything that shapes the result. Object
/// keys serialize in sorted order, so parameter insertion order never changes
/// the key. The readable prefix is what table-prefix invalidation matches on.
#[must_use]
pub fn fingerprint(spec: &QuerySpec) -> String {
    let table = normalize_table(&spec.table);
    let canonical = json!({
        "kind": spec.kind.as_str(),
        "table": table,
        "parameters": spec.parameters_value(),
        "filter": spec.filter,
        "limit": spec.limit,
        "offset": spec.offset,
        "order_by": spec.order_by,
    });
    let digest = blake3::hash(canonical_bytes(&canonical).as_slice());
    format!("{table}:{}:{}", spec.kind.as_str(), digest.to_hex())
}

/// Key of a single record written through the cache.
#[must_use]
pub fn record_key(table: &str, id: &str) -> String {
    format!("{}:record:{id}", normalize_table(table))
}

fn canonical_bytes(value: &Value) -> Vec<u8> {
    // serde_json's default map is ordered, so this is already canonical.
    serde_json::to_vec(value).unwrap_or_default()
}
