//! Before/after metric capture for scenarios.
//!
//! Capture is restricted to a whitelist of five metric names with
//! bounded-cardinality labels; deltas are computed per label tuple. A
//! negative counter delta is impossible by construction, so observing one
//! is an invariant violation: it produces a `FailDiagnostic` and flips
//! `invariant_ok`.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::json;

use crate::common::metrics::{names, BaseMetricsSink, MetricKey, MetricsSnapshot};

use super::lc_config::retry_amp_tolerance;

/// The only metric names the capture tracks.
pub const CAPTURE_WHITELIST: [&str; 5] = [
    names::DEPENDENCY_CALL_TOTAL,
    names::DEPENDENCY_RETRY_TOTAL,
    names::RATE_LIMIT_TOTAL,
    names::CIRCUIT_BREAKER_STATE,
    names::KILLSWITCH_FALLBACK_OPEN_TOTAL,
];

/// Evidence packet for one violated invariant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailDiagnostic {
    pub scenario_id: String,
    pub dependency: String,
    pub outcome: String,
    pub observed: serde_json::Value,
    pub expected: serde_json::Value,
    pub seed: u64,
}

/// Per-label-tuple counter deltas plus derived ratios.
#[derive(Debug, Clone, Default)]
pub struct MetricsDelta {
    pub counters: BTreeMap<MetricKey, f64>,
}

impl MetricsDelta {
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> f64 {
        self.counters
            .get(&MetricKey::new(name, labels))
            .copied()
            .unwrap_or(0.0)
    }

    fn sum_for(&self, name: &str) -> f64 {
        self.counters
            .iter()
            .filter(|(key, _)| key.name == name)
            .map(|(_, v)| *v)
            .sum()
    }

    pub fn total_calls(&self) -> f64 {
        self.sum_for(names::DEPENDENCY_CALL_TOTAL)
    }

    pub fn total_retries(&self) -> f64 {
        self.sum_for(names::DEPENDENCY_RETRY_TOTAL)
    }

    /// Retries per call over the captured window.
    pub fn retry_amplification(&self) -> f64 {
        let calls = self.total_calls();
        if calls <= 0.0 {
            return 0.0;
        }
        self.total_retries() / calls
    }

    pub fn assert_retry_amp_close(&self, expected: f64) -> Result<(), String> {
        let observed = self.retry_amplification();
        let diff = (observed - expected).abs();
        if diff > retry_amp_tolerance(expected) {
            return Err(format!(
                "retry_amplification mismatch: observed={observed} expected={expected} diff={diff}"
            ));
        }
        Ok(())
    }

    /// Scan counter deltas for impossible values. Gauges may move either
    /// way; counters may not shrink.
    pub fn check_invariants(&self, scenario_id: &str, seed: u64) -> Vec<FailDiagnostic> {
        let mut diagnostics = Vec::new();
        for (key, delta) in &self.counters {
            if *delta < 0.0 {
                let label = |name: &str| {
                    key.labels
                        .iter()
                        .find(|(k, _)| k == name)
                        .map(|(_, v)| v.clone())
                        .unwrap_or_default()
                };
                diagnostics.push(FailDiagnostic {
                    scenario_id: scenario_id.to_string(),
                    dependency: label("dependency"),
                    outcome: label("outcome"),
                    observed: json!(delta),
                    expected: json!(">= 0"),
                    seed,
                });
            }
        }
        diagnostics
    }
}

/// Snapshot-diff container around a metrics sink.
pub struct MetricsCapture {
    before: MetricsSnapshot,
}

impl MetricsCapture {
    /// Snapshot the sink now; later `delta` calls diff against this.
    pub fn start(sink: &dyn BaseMetricsSink) -> Self {
        Self {
            before: sink.snapshot(),
        }
    }

    pub fn from_snapshot(before: MetricsSnapshot) -> Self {
        Self { before }
    }

    pub fn delta(&self, sink: &dyn BaseMetricsSink) -> MetricsDelta {
        let after = sink.snapshot();
        let mut counters = BTreeMap::new();

        for (key, after_value) in &after.counters {
            if !CAPTURE_WHITELIST.contains(&key.name.as_str()) {
                continue;
            }
            let before_value = self.before.counters.get(key).copied().unwrap_or(0.0);
            counters.insert(key.clone(), after_value - before_value);
        }
        // Counters that disappeared entirely also show as negative drift.
        for (key, before_value) in &self.before.counters {
            if !CAPTURE_WHITELIST.contains(&key.name.as_str()) {
                continue;
            }
            if !after.counters.contains_key(key) {
                counters.insert(key.clone(), -before_value);
            }
        }

        MetricsDelta { counters }
    }
}
