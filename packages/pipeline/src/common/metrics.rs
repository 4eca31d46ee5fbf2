//! Metrics sink port.
//!
//! Counters and gauges with bounded-cardinality label sets. The pipeline
//! never talks to a metrics backend directly; it goes through
//! `BaseMetricsSink` so tests can snapshot and diff the exact values the
//! guards emitted.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// Metric names used across the crate. Closed set; labels are enumerated
/// at the call sites.
pub mod names {
    pub const DEPENDENCY_CALL_TOTAL: &str = "dependency_call_total";
    pub const DEPENDENCY_RETRY_TOTAL: &str = "dependency_retry_total";
    pub const RATE_LIMIT_TOTAL: &str = "rate_limit_total";
    pub const CIRCUIT_BREAKER_STATE: &str = "circuit_breaker_state";
    pub const KILLSWITCH_FALLBACK_OPEN_TOTAL: &str = "killswitch_fallback_open_total";
    pub const KILLSWITCH_ERROR_TOTAL: &str = "killswitch_error_total";
    pub const KILLSWITCH_STATE: &str = "killswitch_state";
    pub const GUARD_CONFIG_FALLBACK_TOTAL: &str = "guard_config_fallback_total";
    pub const GUARD_CONFIG_LOADED: &str = "guard_config_loaded";
    pub const DRIFT_DETECTED_TOTAL: &str = "drift_detected_total";
    pub const SHADOW_SAMPLED_TOTAL: &str = "invoice_validation_shadow_sampled_total";
    pub const SHADOW_MISMATCH_TOTAL: &str = "invoice_validation_shadow_mismatch_total";
    pub const SHADOW_WHITELISTED_TOTAL: &str = "invoice_validation_shadow_whitelisted_total";
    pub const SHADOW_ACTIONABLE_TOTAL: &str = "invoice_validation_shadow_actionable_total";
    pub const ENFORCE_TOTAL: &str = "invoice_validation_enforce_total";
    pub const ENFORCE_BLOCKED_TOTAL: &str = "invoice_validation_enforce_blocked_total";
    pub const ENFORCE_SOFTWARN_TOTAL: &str = "invoice_validation_enforce_softwarn_total";
}

/// Identity of one series: metric name plus sorted label pairs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetricKey {
    pub name: String,
    pub labels: Vec<(String, String)>,
}

impl MetricKey {
    pub fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        let mut labels: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        labels.sort();
        Self {
            name: name.to_string(),
            labels,
        }
    }
}

/// Point-in-time copy of every series the sink has seen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<MetricKey, f64>,
    pub gauges: BTreeMap<MetricKey, f64>,
}

impl MetricsSnapshot {
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> f64 {
        self.counters
            .get(&MetricKey::new(name, labels))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn gauge(&self, name: &str, labels: &[(&str, &str)]) -> f64 {
        self.gauges
            .get(&MetricKey::new(name, labels))
            .copied()
            .unwrap_or(0.0)
    }
}

/// Metrics port. Implementations must be cheap and infallible; a metrics
/// problem must never fail a request.
pub trait BaseMetricsSink: Send + Sync {
    fn inc(&self, name: &str, labels: &[(&str, &str)]);
    fn set(&self, name: &str, labels: &[(&str, &str)], value: f64);
    fn snapshot(&self) -> MetricsSnapshot;
}

pub type SharedMetrics = Arc<dyn BaseMetricsSink>;

/// In-memory sink used in production for the capture harness and in every
/// test. Counters only grow; gauges are last-write-wins.
#[derive(Default)]
pub struct InMemoryMetrics {
    inner: RwLock<MetricsSnapshot>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedMetrics {
        Arc::new(Self::new())
    }
}

impl BaseMetricsSink for InMemoryMetrics {
    fn inc(&self, name: &str, labels: &[(&str, &str)]) {
        let key = MetricKey::new(name, labels);
        let mut snap = self.inner.write();
        *snap.counters.entry(key).or_insert(0.0) += 1.0;
    }

    fn set(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = MetricKey::new(name, labels);
        self.inner.write().gauges.insert(key, value);
    }

    fn snapshot(&self) -> MetricsSnapshot {
        self.inner.read().clone()
    }
}

/// Sink that drops everything. Handy for call sites that do not care.
pub struct NoopMetrics;

impl BaseMetricsSink for NoopMetrics {
    fn inc(&self, _name: &str, _labels: &[(&str, &str)]) {}
    fn set(&self, _name: &str, _labels: &[(&str, &str)], _value: f64) {}
    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot::default()
    }
}
