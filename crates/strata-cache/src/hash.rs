use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Canonical hash input. Field order is alphabetical and the bindings map
/// is a BTreeMap, so the JSON encoding is deterministic.
#[derive(Serialize)]
struct HashInput<'a> {
    params: &'a BTreeMap<String, String>,
    report_id: i64,
    sql: &'a str,
}

/// Compute the content hash identifying a cached result.
///
/// Identical `(report_id, rendered_sql, bindings)` always produce the same
/// hash; any difference in any input changes it.
pub fn canonical_hash(
    report_id: i64,
    rendered_sql: &str,
    bindings: &BTreeMap<String, String>,
) -> String {
    let input = HashInput {
        params: bindings,
        report_id,
        sql: rendered_sql,
    };
    let data = serde_json::to_string(&input).expect("hash input is always serializable");
    hex::encode(Sha256::digest(data.as_bytes()))
}
