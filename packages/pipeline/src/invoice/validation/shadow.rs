//! Shadow compare: legacy validator output vs the rule-set validator.
//!
//! Strictly post-validation; nothing here ever influences the real
//! decision. This is the single shadow path: the sampled hook decides
//! whether to run, the comparator diffs the code sets, the whitelist
//! suppresses known-benign divergences, and counters record the rest.

use serde_json::{json, Value};
use std::collections::BTreeSet;
use tracing::warn;

use crate::common::metrics::{names, BaseMetricsSink};
use crate::common::rng::SeededRng;

use super::shadow_config::{should_sample, ShadowConfig};
use super::validator::validate;

/// Legacy error strings carry their code as a prefix
/// ("PAYABLE_TOTAL_MISMATCH: payable=100, total=200"). Only these
/// prefixes are comparable; unknown strings are silently dropped.
const KNOWN_LEGACY_PREFIXES: [&str; 4] = [
    "PAYABLE_TOTAL_MISMATCH",
    "TOTAL_MISMATCH",
    "ZERO_CONSUMPTION",
    "LINE_CROSSCHECK_FAIL",
];

pub fn extract_legacy_codes(errors: &[String]) -> BTreeSet<String> {
    errors
        .iter()
        .filter_map(|e| {
            let prefix = e.split(':').next().unwrap_or("").trim();
            KNOWN_LEGACY_PREFIXES
                .contains(&prefix)
                .then(|| prefix.to_string())
        })
        .collect()
}

/// Shadow compare outcome, for assertions and debug reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowCompareResult {
    pub old_valid: bool,
    pub new_valid: bool,
    pub valid_match: bool,
    pub old_codes: BTreeSet<String>,
    pub new_codes: BTreeSet<String>,
    pub codes_only_old: BTreeSet<String>,
    pub codes_only_new: BTreeSet<String>,
    pub codes_common: BTreeSet<String>,
}

impl ShadowCompareResult {
    pub fn to_value(&self) -> Value {
        let sorted = |set: &BTreeSet<String>| set.iter().cloned().collect::<Vec<_>>();
        json!({
            "old_valid": self.old_valid,
            "new_valid": self.new_valid,
            "valid_match": self.valid_match,
            "old_codes": sorted(&self.old_codes),
            "new_codes": sorted(&self.new_codes),
            "codes_only_old": sorted(&self.codes_only_old),
            "codes_only_new": sorted(&self.codes_only_new),
            "codes_common": sorted(&self.codes_common),
        })
    }
}

/// Run the rule-set validator and diff it against legacy output.
pub fn compare_validators(invoice: &Value, legacy_errors: &[String]) -> ShadowCompareResult {
    let old_valid = legacy_errors.is_empty();
    let old_codes = extract_legacy_codes(legacy_errors);

    let new_result = validate(invoice);
    let new_valid = new_result.valid;
    let new_codes: BTreeSet<String> = new_result
        .errors
        .iter()
        .map(|e| e.code.as_str().to_string())
        .collect();

    ShadowCompareResult {
        old_valid,
        new_valid,
        valid_match: old_valid == new_valid,
        codes_only_old: old_codes.difference(&new_codes).cloned().collect(),
        codes_only_new: new_codes.difference(&old_codes).cloned().collect(),
        codes_common: old_codes.intersection(&new_codes).cloned().collect(),
        old_codes,
        new_codes,
    }
}

// ---------------------------------------------------------------------------
// Whitelist patterns
// ---------------------------------------------------------------------------

/// "missing_totals_skips": the legacy validator emits ZERO_CONSUMPTION
/// when lines are missing; the rule set skips the absent section.
fn matches_missing_totals_skips(result: &ShadowCompareResult) -> bool {
    !result.valid_match
        && result.codes_only_old.len() == 1
        && result.codes_only_old.contains("ZERO_CONSUMPTION")
        && result.codes_only_new.is_empty()
}

pub fn is_whitelisted(result: &ShadowCompareResult, whitelist: &BTreeSet<String>) -> bool {
    if result.valid_match {
        return false; // no mismatch, nothing to whitelist
    }
    whitelist.iter().any(|name| match name.as_str() {
        "missing_totals_skips" => matches_missing_totals_skips(result),
        _ => false,
    })
}

// ---------------------------------------------------------------------------
// Hook
// ---------------------------------------------------------------------------

/// Post-validation shadow hook.
///
/// Samples deterministically by invoice id, compares, records counters
/// and logs actionable mismatches. Returns None when not sampled. Never
/// affects the caller's decision.
pub fn shadow_validate_hook(
    invoice: &Value,
    legacy_errors: &[String],
    invoice_id: Option<&str>,
    config: &ShadowConfig,
    metrics: &dyn BaseMetricsSink,
    rng: &SeededRng,
) -> Option<ShadowCompareResult> {
    if !should_sample(invoice_id, config.sample_rate, rng) {
        return None;
    }

    let result = compare_validators(invoice, legacy_errors);
    let whitelisted = is_whitelisted(&result, &config.whitelist);

    metrics.inc(names::SHADOW_SAMPLED_TOTAL, &[]);
    if !result.valid_match {
        metrics.inc(names::SHADOW_MISMATCH_TOTAL, &[]);
        if whitelisted {
            metrics.inc(names::SHADOW_WHITELISTED_TOTAL, &[]);
        } else {
            metrics.inc(names::SHADOW_ACTIONABLE_TOTAL, &[]);
            warn!(
                invoice_id = invoice_id.unwrap_or("unknown"),
                old_valid = result.old_valid,
                new_valid = result.new_valid,
                codes_only_old = ?result.codes_only_old,
                codes_only_new = ?result.codes_only_new,
                "shadow validation mismatch"
            );
        }
    }

    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::metrics::InMemoryMetrics;

    fn always_sampling() -> ShadowConfig {
        ShadowConfig {
            sample_rate: 1.0,
            ..ShadowConfig::default()
        }
    }

    fn valid_invoice() -> Value {
        json!({
            "ettn": "0198c5f4-2d6a-4e8b-9c3d-5f6a7b8c9d0e",
            "periods": [
                {"code": "T1", "start": "2025-01-01", "end": "2025-01-31", "kwh": 1.0, "amount": 1.0},
                {"code": "T2", "start": "2025-01-01", "end": "2025-01-31", "kwh": 1.0, "amount": 1.0},
                {"code": "T3", "start": "2025-01-01", "end": "2025-01-31", "kwh": 1.0, "amount": 1.0},
            ],
        })
    }

    #[test]
    fn legacy_code_extraction_keeps_known_prefixes_only() {
        let codes = extract_legacy_codes(&[
            "PAYABLE_TOTAL_MISMATCH: payable=100, total=200".to_string(),
            "SOMETHING_ELSE: detail".to_string(),
            "ZERO_CONSUMPTION".to_string(),
        ]);
        assert_eq!(codes.len(), 2);
        assert!(codes.contains("PAYABLE_TOTAL_MISMATCH"));
        assert!(codes.contains("ZERO_CONSUMPTION"));
    }

    #[test]
    fn matching_validators_agree() {
        let result = compare_validators(&valid_invoice(), &[]);
        assert!(result.old_valid);
        assert!(result.new_valid);
        assert!(result.valid_match);
        assert!(result.codes_only_old.is_empty());
        assert!(result.codes_only_new.is_empty());
    }

    #[test]
    fn divergence_shows_up_in_code_diffs() {
        // Legacy flags zero consumption; the rule set sees no lines
        // section and skips.
        let result = compare_validators(
            &valid_invoice(),
            &["ZERO_CONSUMPTION: total consumption_kwh=0".to_string()],
        );
        assert!(!result.valid_match);
        assert_eq!(result.codes_only_old.len(), 1);
        assert!(result.codes_only_old.contains("ZERO_CONSUMPTION"));
        assert!(result.codes_only_new.is_empty());
    }

    #[test]
    fn missing_totals_skips_pattern_is_whitelisted() {
        let result = compare_validators(
            &valid_invoice(),
            &["ZERO_CONSUMPTION: lines missing".to_string()],
        );
        assert!(is_whitelisted(&result, &ShadowConfig::default().whitelist));
    }

    #[test]
    fn match_is_never_whitelisted() {
        let result = compare_validators(&valid_invoice(), &[]);
        assert!(!is_whitelisted(&result, &ShadowConfig::default().whitelist));
    }

    #[test]
    fn other_divergences_are_not_whitelisted() {
        let mut invoice = valid_invoice();
        invoice["ettn"] = json!("junk");
        let result = compare_validators(&invoice, &[]);
        assert!(!result.valid_match);
        assert!(!is_whitelisted(&result, &ShadowConfig::default().whitelist));
    }

    #[test]
    fn hook_skips_when_rate_zero() {
        let metrics = InMemoryMetrics::new();
        let rng = SeededRng::new(1);
        let config = ShadowConfig {
            sample_rate: 0.0,
            ..ShadowConfig::default()
        };
        let result = shadow_validate_hook(
            &valid_invoice(),
            &[],
            Some("INV1"),
            &config,
            &metrics,
            &rng,
        );
        assert!(result.is_none());
        assert_eq!(metrics.snapshot().counter(names::SHADOW_SAMPLED_TOTAL, &[]), 0.0);
    }

    #[test]
    fn hook_counts_whitelisted_and_actionable_separately() {
        let metrics = InMemoryMetrics::new();
        let rng = SeededRng::new(1);
        let config = always_sampling();

        // Whitelisted mismatch.
        shadow_validate_hook(
            &valid_invoice(),
            &["ZERO_CONSUMPTION: lines missing".to_string()],
            Some("INV1"),
            &config,
            &metrics,
            &rng,
        );
        // Actionable mismatch: rule set invalid, legacy silent.
        let mut broken = valid_invoice();
        broken["ettn"] = json!("junk");
        shadow_validate_hook(&broken, &[], Some("INV2"), &config, &metrics, &rng);

        let snap = metrics.snapshot();
        assert_eq!(snap.counter(names::SHADOW_SAMPLED_TOTAL, &[]), 2.0);
        assert_eq!(snap.counter(names::SHADOW_MISMATCH_TOTAL, &[]), 2.0);
        assert_eq!(snap.counter(names::SHADOW_WHITELISTED_TOTAL, &[]), 1.0);
        assert_eq!(snap.counter(names::SHADOW_ACTIONABLE_TOTAL, &[]), 1.0);
    }

    #[test]
    fn hook_sampling_is_deterministic_for_same_invoice_id() {
        let metrics = InMemoryMetrics::new();
        let rng = SeededRng::new(1);
        let config = ShadowConfig {
            sample_rate: 0.5,
            ..ShadowConfig::default()
        };
        let first = shadow_validate_hook(
            &valid_invoice(),
            &[],
            Some("INV-fixed"),
            &config,
            &metrics,
            &rng,
        )
        .is_some();
        for _ in 0..10 {
            let again = shadow_validate_hook(
                &valid_invoice(),
                &[],
                Some("INV-fixed"),
                &config,
                &metrics,
                &rng,
            )
            .is_some();
            assert_eq!(first, again);
        }
    }
}
