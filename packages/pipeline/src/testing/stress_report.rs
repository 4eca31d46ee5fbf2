//! Deterministic stress report.
//!
//! One row per scenario plus the `write_path_safe` aggregate: true iff
//! every write-tagged scenario observed zero retries, vacuously true when
//! there are none. Serialization is bit-stable: object keys are sorted
//! (serde_json's default map is BTree-backed) and floats are rounded to a
//! fixed number of decimals before they enter the tree.

use serde_json::{json, Map, Value};

use super::load_harness::p95;
use super::metrics_capture::FailDiagnostic;
use super::scenario_runner::ScenarioResult;

/// Fixed float representation: four decimals is enough for ratios and
/// millisecond latencies while keeping the JSON stable.
fn fixed(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[derive(Debug, Clone)]
pub struct ScenarioRow {
    pub scenario_name: String,
    pub total_calls: u64,
    pub retry_count: u64,
    pub retry_amplification_factor: f64,
    pub p95_latency_ms: f64,
    pub cb_opened: bool,
    pub failopen_count: u64,
    pub is_write: bool,
}

impl ScenarioRow {
    pub fn from_result(result: &ScenarioResult) -> Self {
        let amplification = if result.total_calls > 0 {
            result.retry_count as f64 / result.total_calls as f64
        } else {
            0.0
        };
        Self {
            scenario_name: result.scenario_id.clone(),
            total_calls: result.total_calls,
            retry_count: result.retry_count,
            retry_amplification_factor: amplification,
            p95_latency_ms: p95(&result.latencies_ms),
            cb_opened: result.cb_opened,
            failopen_count: result.failopen_count,
            is_write: result.is_write,
        }
    }

    fn to_value(&self) -> Value {
        json!({
            "scenario_name": self.scenario_name,
            "total_calls": self.total_calls,
            "retry_count": self.retry_count,
            "retry_amplification_factor": fixed(self.retry_amplification_factor),
            "p95_latency_ms": fixed(self.p95_latency_ms),
            "cb_opened": self.cb_opened,
            "failopen_count": self.failopen_count,
            "is_write": self.is_write,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct StressReport {
    pub rows: Vec<ScenarioRow>,
    pub diagnostics: Vec<FailDiagnostic>,
    pub invariant_ok: bool,
    pub metadata: Map<String, Value>,
}

impl StressReport {
    pub fn from_results(results: &[ScenarioResult]) -> Self {
        let mut rows: Vec<ScenarioRow> = results.iter().map(ScenarioRow::from_result).collect();
        // Stable row order regardless of execution interleaving.
        rows.sort_by(|a, b| a.scenario_name.cmp(&b.scenario_name));

        let diagnostics: Vec<FailDiagnostic> = results
            .iter()
            .flat_map(|r| r.diagnostics.iter().cloned())
            .collect();
        let invariant_ok = diagnostics.is_empty() && results.iter().all(|r| r.invariant_ok);

        Self {
            rows,
            diagnostics,
            invariant_ok,
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// True iff no write-tagged scenario retried. Empty set is safe.
    pub fn write_path_safe(&self) -> bool {
        self.rows
            .iter()
            .filter(|row| row.is_write)
            .all(|row| row.retry_count == 0)
    }

    pub fn to_value(&self) -> Value {
        json!({
            "scenarios": self.rows.iter().map(ScenarioRow::to_value).collect::<Vec<_>>(),
            "write_path_safe": self.write_path_safe(),
            "invariant_ok": self.invariant_ok,
            "diagnostics": self.diagnostics,
            "metadata": Value::Object(self.metadata.clone()),
        })
    }

    /// Deterministic JSON: sorted keys, fixed floats, no whitespace.
    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }
}
