//! Stable fingerprints for dedup, sampling and config drift.
//!
//! Everything here is SHA-256 over a canonical string form. The built-in
//! hasher is never used for persisted or cross-process keys.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// SHA-256 of a UTF-8 string, lowercase hex (64 chars).
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Stable incident dedupe key.
///
/// Only identity fields participate. `period` is the invoice period, not
/// an event timestamp; no time-varying field may be added here, and the
/// multi-flag set stays out (a changing flag set would restart the spam).
pub fn dedupe_key(
    provider: &str,
    invoice_id: &str,
    primary_flag: &str,
    category: &str,
    action_code: &str,
    period_yyyy_mm: &str,
) -> String {
    let base = format!(
        "{provider}|{invoice_id}|{primary_flag}|{category}|{action_code}|{period_yyyy_mm}"
    );
    sha256_hex(&base)
}

/// Deterministic 16-char fallback id for invoices without a real id.
pub fn invoice_ref_hash(
    supplier: &str,
    invoice_no: &str,
    period: &str,
    consumption_kwh: f64,
    total_amount: f64,
) -> String {
    let parts = [
        supplier.to_lowercase().trim().to_string(),
        invoice_no.trim().to_string(),
        period.trim().to_string(),
        format!("{consumption_kwh:.2}"),
        format!("{total_amount:.2}"),
    ];
    sha256_hex(&parts.join("|"))[..16].to_string()
}

/// Integer UTC epoch-day, the 24-hour dedupe bucket.
pub fn epoch_day(at: DateTime<Utc>) -> i64 {
    at.timestamp().div_euclid(86_400)
}

/// Canonical JSON string: serde_json's default map is BTree-backed, so
/// object keys come out lexicographically sorted in every process.
pub fn canonical_json(value: &serde_json::Value) -> String {
    value.to_string()
}

/// Deterministic sampling bucket for an id: first 4 digest bytes,
/// big-endian, modulo `bucket_size`.
pub fn sample_bucket(id: &str, bucket_size: u32) -> u32 {
    let digest = Sha256::digest(id.as_bytes());
    let word = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    word % bucket_size
}
