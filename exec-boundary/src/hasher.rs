//! C1 — Canonical Hasher.
//!
//! Produces a 256-bit hash over a canonical byte sequence built by explicit
//! string concatenation: a versioned prefix, `|` separators, sorted keys,
//! and UTC RFC-3339 timestamps. Never delegates to a structural serialiser
//! (e.g. `serde_json::to_vec`) whose field order is host-defined — every
//! hash path here builds its own byte string.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

const CANONICAL_PREFIX: &str = "boundary-v1";

/// One field contributing to a canonical hash: `name=value`, sorted by the
/// caller before being passed in (sorting is the caller's job so that
/// different call sites can document their own field order once).
pub struct Field<'a>(pub &'a str, pub String);

/// Build the canonical string for a sorted list of fields.
pub fn canonicalize(fields: &[Field]) -> String {
    let mut parts = Vec::with_capacity(fields.len() + 1);
    parts.push(CANONICAL_PREFIX.to_string());
    for Field(name, value) in fields {
        parts.push(format!("{}={}", name, value));
    }
    parts.join("|")
}

/// Hash arbitrary canonical bytes to a lowercase hex SHA-256 digest.
pub fn content_hash(canonical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Render a bool the canonical way: `true` / `false`.
pub fn render_bool(b: bool) -> String {
    if b { "true".to_string() } else { "false".to_string() }
}

/// Render an integer the canonical way: base-10, no grouping.
pub fn render_i64(n: i64) -> String {
    n.to_string()
}

/// Render a timestamp the canonical way: UTC RFC-3339.
pub fn render_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

/// Render a sorted collection of strings as a canonical, comma-joined list.
/// Sorting happens here so every call site gets the same stable order
/// regardless of the caller's iteration order.
pub fn render_sorted(items: impl IntoIterator<Item = impl Into<String>>) -> String {
    let mut v: Vec<String> = items.into_iter().map(Into::into).collect();
    v.sort();
    v.join(",")
}

/// Convenience: hash a list of `(name, value)` pairs already sorted by name.
pub fn hash_fields(fields: &[(&str, String)]) -> String {
    let rendered: Vec<Field> = fields
        .iter()
        .map(|(k, v)| Field(k, v.clone()))
        .collect();
    content_hash(&canonicalize(&rendered))
}
