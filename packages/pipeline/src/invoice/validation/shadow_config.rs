//! Shadow validation configuration.
//!
//! Keys:
//!   INVOICE_SHADOW_SAMPLE_RATE — float 0.0-1.0, clamped, default 0.01
//!   INVOICE_SHADOW_WHITELIST   — comma-separated pattern names, default "missing_totals_skips"

use std::collections::BTreeSet;

use crate::common::hash::sample_bucket;
use crate::common::rng::SeededRng;

pub const DEFAULT_SAMPLE_RATE: f64 = 0.01;
pub const SAMPLE_BUCKET_SIZE: u32 = 10_000;

fn default_whitelist() -> BTreeSet<String> {
    BTreeSet::from(["missing_totals_skips".to_string()])
}

/// Immutable shadow validation config.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowConfig {
    pub sample_rate: f64,
    pub whitelist: BTreeSet<String>,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            whitelist: default_whitelist(),
        }
    }
}

impl ShadowConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let sample_rate = lookup("INVOICE_SHADOW_SAMPLE_RATE")
            .and_then(|raw| raw.trim().parse::<f64>().ok())
            .map(|rate| rate.clamp(0.0, 1.0))
            .unwrap_or(DEFAULT_SAMPLE_RATE);

        let whitelist = match lookup("INVOICE_SHADOW_WHITELIST") {
            Some(raw) if !raw.trim().is_empty() => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            _ => default_whitelist(),
        };

        Self {
            sample_rate,
            whitelist,
        }
    }

    pub fn load() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

/// Deterministic sampling when an invoice id is available.
///
/// SHA-256 bucketing over 10 000 buckets makes the decision identical in
/// every process; the seeded RNG is only the fallback for anonymous
/// invoices.
pub fn should_sample(invoice_id: Option<&str>, rate: f64, rng: &SeededRng) -> bool {
    if rate <= 0.0 {
        return false;
    }
    if rate >= 1.0 {
        return true;
    }

    match invoice_id {
        Some(id) => {
            let bucket = sample_bucket(id, SAMPLE_BUCKET_SIZE);
            (bucket as f64) < rate * SAMPLE_BUCKET_SIZE as f64
        }
        None => rng.random() < rate,
    }
}
