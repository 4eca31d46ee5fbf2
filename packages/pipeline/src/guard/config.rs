//! Guard configuration snapshot.
//!
//! Loaded once from `OPS_GUARD_*` environment variables with typed
//! coercion. Any invalid field falls the whole snapshot back to the
//! compiled-in defaults and increments `guard_config_fallback_total`;
//! a half-applied overlay is worse than no overlay.
//!
//! `config_hash` is the first 12 hex chars of SHA-256 over the canonical
//! JSON serialization, stable across processes. Drift Guard compares it
//! against a frozen baseline.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::common::hash::{canonical_json, sha256_hex};
use crate::common::metrics::{names, BaseMetricsSink};

use super::{Dependency, Endpoint};

const CONFIG_HASH_LEN: usize = 12;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
    #[error("constraint violated: {0}")]
    Constraint(String),
}

/// Immutable operational-guard configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GuardConfig {
    pub schema_version: String,
    pub config_version: String,

    // Killswitch
    pub killswitch_global_import_disabled: bool,
    /// Comma-separated tenant blocklist.
    pub killswitch_disabled_tenants: String,

    // Rate limits (per minute)
    pub rate_limit_import_per_minute: u32,
    pub rate_limit_validate_per_minute: u32,
    pub rate_limit_lookup_per_minute: u32,
    pub rate_limit_default_per_minute: u32,

    // Circuit breaker
    pub cb_error_threshold_pct: f64,
    pub cb_error_threshold_count: u32,
    pub cb_open_duration_seconds: f64,
    pub cb_precheck_enabled: bool,

    // Dependency wrapper
    pub wrapper_timeout_seconds_default: f64,
    /// JSON map dependency -> seconds; parsed lazily, invalid entries fall
    /// back per call.
    pub wrapper_timeout_seconds_by_dependency: String,
    pub wrapper_retry_max_attempts_default: u32,
    pub wrapper_retry_max_attempts_by_dependency: String,
    pub wrapper_retry_backoff_base_ms: u64,
    pub wrapper_retry_backoff_cap_ms: u64,
    pub wrapper_retry_jitter_pct: f64,
    pub wrapper_retry_on_write: bool,
    pub wrapper_fail_open_enabled: bool,

    // Drift guard
    pub drift_guard_fail_open: bool,
    pub drift_guard_provider_timeout_ms: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            schema_version: "1.0".to_string(),
            config_version: "default".to_string(),
            killswitch_global_import_disabled: false,
            killswitch_disabled_tenants: String::new(),
            rate_limit_import_per_minute: 10,
            rate_limit_validate_per_minute: 30,
            rate_limit_lookup_per_minute: 60,
            rate_limit_default_per_minute: 60,
            cb_error_threshold_pct: 50.0,
            cb_error_threshold_count: 20,
            cb_open_duration_seconds: 30.0,
            cb_precheck_enabled: true,
            wrapper_timeout_seconds_default: 5.0,
            wrapper_timeout_seconds_by_dependency: String::new(),
            wrapper_retry_max_attempts_default: 2,
            wrapper_retry_max_attempts_by_dependency: String::new(),
            wrapper_retry_backoff_base_ms: 500,
            wrapper_retry_backoff_cap_ms: 5000,
            wrapper_retry_jitter_pct: 0.2,
            wrapper_retry_on_write: false,
            wrapper_fail_open_enabled: true,
            drift_guard_fail_open: true,
            drift_guard_provider_timeout_ms: 100,
        }
    }
}

impl GuardConfig {
    /// Cross-field invariants. A snapshot that fails here is discarded
    /// wholesale by `load_guard_config`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wrapper_timeout_seconds_default <= 0.0 {
            return Err(ConfigError::Constraint(
                "wrapper_timeout_seconds_default must be > 0".to_string(),
            ));
        }
        if self.wrapper_retry_backoff_base_ms == 0 {
            return Err(ConfigError::Constraint(
                "wrapper_retry_backoff_base_ms must be >= 1".to_string(),
            ));
        }
        if self.wrapper_retry_backoff_base_ms > self.wrapper_retry_backoff_cap_ms {
            return Err(ConfigError::Constraint(
                "wrapper_retry_backoff_base_ms must be <= wrapper_retry_backoff_cap_ms".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.wrapper_retry_jitter_pct) {
            return Err(ConfigError::Constraint(
                "wrapper_retry_jitter_pct must be in [0, 1]".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.cb_error_threshold_pct) {
            return Err(ConfigError::Constraint(
                "cb_error_threshold_pct must be in [0, 100]".to_string(),
            ));
        }
        if self.cb_error_threshold_count == 0 {
            return Err(ConfigError::Constraint(
                "cb_error_threshold_count must be >= 1".to_string(),
            ));
        }
        if self.cb_open_duration_seconds <= 0.0 {
            return Err(ConfigError::Constraint(
                "cb_open_duration_seconds must be > 0".to_string(),
            ));
        }
        if !(1..=5000).contains(&self.drift_guard_provider_timeout_ms) {
            return Err(ConfigError::Constraint(
                "drift_guard_provider_timeout_ms must be in [1, 5000]".to_string(),
            ));
        }
        Ok(())
    }

    /// Truncated SHA-256 over the canonical JSON form. Deterministic
    /// across processes; used by Drift Guard baselines.
    pub fn config_hash(&self) -> String {
        let value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        sha256_hex(&canonical_json(&value))[..CONFIG_HASH_LEN].to_string()
    }

    /// Tenants denied by the killswitch.
    pub fn disabled_tenants(&self) -> HashSet<String> {
        self.killswitch_disabled_tenants
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Per-minute quota for an endpoint.
    pub fn rate_limit_per_minute(&self, endpoint: Endpoint) -> u32 {
        match endpoint {
            Endpoint::Import => self.rate_limit_import_per_minute,
            Endpoint::Validate => self.rate_limit_validate_per_minute,
            Endpoint::Lookup => self.rate_limit_lookup_per_minute,
            Endpoint::Admin => self.rate_limit_default_per_minute,
        }
    }

    /// Per-dependency call timeout, seconds. Override map entries must
    /// name a known dependency and be positive; anything else falls back
    /// to the default and increments `guard_config_fallback_total`.
    pub fn timeout_seconds_for(
        &self,
        dependency: Dependency,
        metrics: &dyn BaseMetricsSink,
    ) -> f64 {
        lookup_override_f64(
            &self.wrapper_timeout_seconds_by_dependency,
            dependency,
            metrics,
        )
        .filter(|v| *v > 0.0)
        .unwrap_or(self.wrapper_timeout_seconds_default)
    }

    /// Per-dependency retry cap.
    pub fn retry_max_attempts_for(
        &self,
        dependency: Dependency,
        metrics: &dyn BaseMetricsSink,
    ) -> u32 {
        lookup_override_f64(
            &self.wrapper_retry_max_attempts_by_dependency,
            dependency,
            metrics,
        )
        .filter(|v| *v >= 0.0 && v.fract() == 0.0)
        .map(|v| v as u32)
        .unwrap_or(self.wrapper_retry_max_attempts_default)
    }
}

/// Parse a JSON override map and pick out one dependency's value.
///
/// Invalid JSON, a non-object document, or an unknown dependency key in
/// the map all count as configuration damage and emit the fallback metric.
fn lookup_override_f64(
    raw: &str,
    dependency: Dependency,
    metrics: &dyn BaseMetricsSink,
) -> Option<f64> {
    if raw.trim().is_empty() {
        return None;
    }

    let parsed: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(_) => {
            metrics.inc(names::GUARD_CONFIG_FALLBACK_TOTAL, &[]);
            return None;
        }
    };

    let object = match parsed.as_object() {
        Some(o) => o,
        None => {
            metrics.inc(names::GUARD_CONFIG_FALLBACK_TOTAL, &[]);
            return None;
        }
    };

    let mut found = None;
    for (key, value) in object {
        match Dependency::parse(key) {
            Some(dep) => {
                if dep == dependency {
                    found = value.as_f64();
                }
            }
            None => {
                warn!(key = %key, "unknown dependency in guard config override");
                metrics.inc(names::GUARD_CONFIG_FALLBACK_TOTAL, &[]);
            }
        }
    }
    found
}

// =============================================================================
// Environment loading
// =============================================================================

/// Build a snapshot from an env-style lookup. Every recognized key must
/// coerce cleanly; the first bad value aborts the overlay.
pub fn from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<GuardConfig, ConfigError> {
    let mut config = GuardConfig::default();

    read_string(&lookup, "OPS_GUARD_SCHEMA_VERSION", &mut config.schema_version);
    read_string(&lookup, "OPS_GUARD_CONFIG_VERSION", &mut config.config_version);
    read_string(
        &lookup,
        "OPS_GUARD_KILLSWITCH_DISABLED_TENANTS",
        &mut config.killswitch_disabled_tenants,
    );
    read_string(
        &lookup,
        "OPS_GUARD_WRAPPER_TIMEOUT_SECONDS_BY_DEPENDENCY",
        &mut config.wrapper_timeout_seconds_by_dependency,
    );
    read_string(
        &lookup,
        "OPS_GUARD_WRAPPER_RETRY_MAX_ATTEMPTS_BY_DEPENDENCY",
        &mut config.wrapper_retry_max_attempts_by_dependency,
    );

    read_parsed(
        &lookup,
        "OPS_GUARD_KILLSWITCH_GLOBAL_IMPORT_DISABLED",
        &mut config.killswitch_global_import_disabled,
    )?;
    read_parsed(
        &lookup,
        "OPS_GUARD_RATE_LIMIT_IMPORT_PER_MINUTE",
        &mut config.rate_limit_import_per_minute,
    )?;
    read_parsed(
        &lookup,
        "OPS_GUARD_RATE_LIMIT_VALIDATE_PER_MINUTE",
        &mut config.rate_limit_validate_per_minute,
    )?;
    read_parsed(
        &lookup,
        "OPS_GUARD_RATE_LIMIT_LOOKUP_PER_MINUTE",
        &mut config.rate_limit_lookup_per_minute,
    )?;
    read_parsed(
        &lookup,
        "OPS_GUARD_RATE_LIMIT_DEFAULT_PER_MINUTE",
        &mut config.rate_limit_default_per_minute,
    )?;
    read_parsed(
        &lookup,
        "OPS_GUARD_CB_ERROR_THRESHOLD_PCT",
        &mut config.cb_error_threshold_pct,
    )?;
    read_parsed(
        &lookup,
        "OPS_GUARD_CB_ERROR_THRESHOLD_COUNT",
        &mut config.cb_error_threshold_count,
    )?;
    read_parsed(
        &lookup,
        "OPS_GUARD_CB_OPEN_DURATION_SECONDS",
        &mut config.cb_open_duration_seconds,
    )?;
    read_parsed(
        &lookup,
        "OPS_GUARD_CB_PRECHECK_ENABLED",
        &mut config.cb_precheck_enabled,
    )?;
    read_parsed(
        &lookup,
        "OPS_GUARD_WRAPPER_TIMEOUT_SECONDS_DEFAULT",
        &mut config.wrapper_timeout_seconds_default,
    )?;
    read_parsed(
        &lookup,
        "OPS_GUARD_WRAPPER_RETRY_MAX_ATTEMPTS_DEFAULT",
        &mut config.wrapper_retry_max_attempts_default,
    )?;
    read_parsed(
        &lookup,
        "OPS_GUARD_WRAPPER_RETRY_BACKOFF_BASE_MS",
        &mut config.wrapper_retry_backoff_base_ms,
    )?;
    read_parsed(
        &lookup,
        "OPS_GUARD_WRAPPER_RETRY_BACKOFF_CAP_MS",
        &mut config.wrapper_retry_backoff_cap_ms,
    )?;
    read_parsed(
        &lookup,
        "OPS_GUARD_WRAPPER_RETRY_JITTER_PCT",
        &mut config.wrapper_retry_jitter_pct,
    )?;
    read_parsed(
        &lookup,
        "OPS_GUARD_WRAPPER_RETRY_ON_WRITE",
        &mut config.wrapper_retry_on_write,
    )?;
    read_parsed(
        &lookup,
        "OPS_GUARD_WRAPPER_FAIL_OPEN_ENABLED",
        &mut config.wrapper_fail_open_enabled,
    )?;
    read_parsed(
        &lookup,
        "OPS_GUARD_DRIFT_FAIL_OPEN",
        &mut config.drift_guard_fail_open,
    )?;
    read_parsed(
        &lookup,
        "OPS_GUARD_DRIFT_PROVIDER_TIMEOUT_MS",
        &mut config.drift_guard_provider_timeout_ms,
    )?;

    config.validate()?;
    Ok(config)
}

fn read_string(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut String) {
    if let Some(raw) = lookup(key) {
        *target = raw;
    }
}

fn read_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) -> Result<(), ConfigError> {
    if let Some(raw) = lookup(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.clone(),
            })?;
    }
    Ok(())
}

/// Load from the process environment with safe fallback.
///
/// On any coercion or constraint failure the compiled-in defaults are
/// returned and `guard_config_fallback_total` is incremented. The loaded
/// gauge always reflects the snapshot actually in effect.
pub fn load_guard_config(metrics: &dyn BaseMetricsSink) -> GuardConfig {
    let config = match from_lookup(|key| std::env::var(key).ok()) {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "guard config overlay invalid, using defaults");
            metrics.inc(names::GUARD_CONFIG_FALLBACK_TOTAL, &[]);
            GuardConfig::default()
        }
    };

    metrics.set(
        names::GUARD_CONFIG_LOADED,
        &[
            ("schema_version", &config.schema_version),
            ("config_hash", &config.config_hash()),
        ],
        1.0,
    );
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::metrics::InMemoryMetrics;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = GuardConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.schema_version, "1.0");
        assert_eq!(config.rate_limit_import_per_minute, 10);
        assert_eq!(config.cb_error_threshold_pct, 50.0);
        assert!(!config.killswitch_global_import_disabled);
        assert!(!config.wrapper_retry_on_write);
        assert!(config.wrapper_fail_open_enabled);
        assert!(config.cb_precheck_enabled);
    }

    #[test]
    fn config_hash_is_deterministic_and_12_chars() {
        let a = GuardConfig::default();
        let b = GuardConfig::default();
        assert_eq!(a.config_hash(), b.config_hash());
        assert_eq!(a.config_hash().len(), 12);
    }

    #[test]
    fn config_hash_changes_with_content() {
        let a = GuardConfig::default();
        let b = GuardConfig {
            rate_limit_import_per_minute: 99,
            ..GuardConfig::default()
        };
        assert_ne!(a.config_hash(), b.config_hash());
    }

    #[test]
    fn env_overlay_applies_typed_values() {
        let config = from_lookup(lookup_from(&[
            ("OPS_GUARD_SCHEMA_VERSION", "2.0"),
            ("OPS_GUARD_KILLSWITCH_GLOBAL_IMPORT_DISABLED", "true"),
            ("OPS_GUARD_RATE_LIMIT_IMPORT_PER_MINUTE", "5"),
            ("OPS_GUARD_CB_OPEN_DURATION_SECONDS", "60.0"),
            ("OPS_GUARD_WRAPPER_RETRY_MAX_ATTEMPTS_DEFAULT", "3"),
        ]))
        .unwrap();

        assert_eq!(config.schema_version, "2.0");
        assert!(config.killswitch_global_import_disabled);
        assert_eq!(config.rate_limit_import_per_minute, 5);
        assert_eq!(config.cb_open_duration_seconds, 60.0);
        assert_eq!(config.wrapper_retry_max_attempts_default, 3);
    }

    #[test]
    fn unparsable_value_rejects_overlay() {
        let result = from_lookup(lookup_from(&[(
            "OPS_GUARD_WRAPPER_TIMEOUT_SECONDS_DEFAULT",
            "not_a_float",
        )]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn negative_timeout_rejects_overlay() {
        let result = from_lookup(lookup_from(&[(
            "OPS_GUARD_WRAPPER_TIMEOUT_SECONDS_DEFAULT",
            "-5",
        )]));
        assert!(result.is_err());
    }

    #[test]
    fn backoff_base_above_cap_rejects_overlay() {
        let result = from_lookup(lookup_from(&[
            ("OPS_GUARD_WRAPPER_RETRY_BACKOFF_BASE_MS", "10000"),
            ("OPS_GUARD_WRAPPER_RETRY_BACKOFF_CAP_MS", "500"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn backoff_base_equal_cap_is_valid() {
        let config = from_lookup(lookup_from(&[
            ("OPS_GUARD_WRAPPER_RETRY_BACKOFF_BASE_MS", "1000"),
            ("OPS_GUARD_WRAPPER_RETRY_BACKOFF_CAP_MS", "1000"),
        ]))
        .unwrap();
        assert_eq!(config.wrapper_retry_backoff_base_ms, 1000);
        assert_eq!(config.wrapper_retry_backoff_cap_ms, 1000);
    }

    #[test]
    fn jitter_outside_unit_interval_rejects_overlay() {
        assert!(from_lookup(lookup_from(&[("OPS_GUARD_WRAPPER_RETRY_JITTER_PCT", "1.5")])).is_err());
        assert!(from_lookup(lookup_from(&[("OPS_GUARD_WRAPPER_RETRY_JITTER_PCT", "-0.1")])).is_err());
    }

    #[test]
    fn zero_retry_attempts_is_valid() {
        let config =
            from_lookup(lookup_from(&[("OPS_GUARD_WRAPPER_RETRY_MAX_ATTEMPTS_DEFAULT", "0")]))
                .unwrap();
        assert_eq!(config.wrapper_retry_max_attempts_default, 0);
    }

    #[test]
    fn timeout_override_valid_json() {
        let metrics = InMemoryMetrics::new();
        let config = GuardConfig {
            wrapper_timeout_seconds_by_dependency:
                r#"{"storage": 3.0, "extractor": 15.0}"#.to_string(),
            ..GuardConfig::default()
        };
        assert_eq!(config.timeout_seconds_for(Dependency::Storage, &metrics), 3.0);
        assert_eq!(config.timeout_seconds_for(Dependency::Extractor, &metrics), 15.0);
        assert_eq!(config.timeout_seconds_for(Dependency::DbPrimary, &metrics), 5.0);
    }

    #[test]
    fn timeout_override_invalid_json_falls_back_with_metric() {
        let metrics = InMemoryMetrics::new();
        let config = GuardConfig {
            wrapper_timeout_seconds_by_dependency: "not_json".to_string(),
            ..GuardConfig::default()
        };
        assert_eq!(config.timeout_seconds_for(Dependency::Storage, &metrics), 5.0);
        assert!(metrics.snapshot().counter(names::GUARD_CONFIG_FALLBACK_TOTAL, &[]) >= 1.0);
    }

    #[test]
    fn timeout_override_unknown_dependency_ignored_with_metric() {
        let metrics = InMemoryMetrics::new();
        let config = GuardConfig {
            wrapper_timeout_seconds_by_dependency:
                r#"{"bogus_dep": 99.0, "storage": 3.0}"#.to_string(),
            ..GuardConfig::default()
        };
        assert_eq!(config.timeout_seconds_for(Dependency::Storage, &metrics), 3.0);
        assert!(metrics.snapshot().counter(names::GUARD_CONFIG_FALLBACK_TOTAL, &[]) >= 1.0);
    }

    #[test]
    fn timeout_override_negative_value_falls_back() {
        let metrics = InMemoryMetrics::new();
        let config = GuardConfig {
            wrapper_timeout_seconds_by_dependency: r#"{"storage": -1.0}"#.to_string(),
            ..GuardConfig::default()
        };
        assert_eq!(config.timeout_seconds_for(Dependency::Storage, &metrics), 5.0);
    }

    #[test]
    fn timeout_override_non_object_json_falls_back_with_metric() {
        let metrics = InMemoryMetrics::new();
        let config = GuardConfig {
            wrapper_timeout_seconds_by_dependency: "[1, 2, 3]".to_string(),
            ..GuardConfig::default()
        };
        assert_eq!(config.timeout_seconds_for(Dependency::Storage, &metrics), 5.0);
        assert!(metrics.snapshot().counter(names::GUARD_CONFIG_FALLBACK_TOTAL, &[]) >= 1.0);
    }

    #[test]
    fn retry_override_valid_json() {
        let metrics = InMemoryMetrics::new();
        let config = GuardConfig {
            wrapper_retry_max_attempts_by_dependency:
                r#"{"extractor": 3, "tariff_lookup": 1}"#.to_string(),
            ..GuardConfig::default()
        };
        assert_eq!(config.retry_max_attempts_for(Dependency::Extractor, &metrics), 3);
        assert_eq!(config.retry_max_attempts_for(Dependency::TariffLookup, &metrics), 1);
        assert_eq!(config.retry_max_attempts_for(Dependency::DbPrimary, &metrics), 2);
    }

    #[test]
    fn disabled_tenants_are_split_and_trimmed() {
        let config = GuardConfig {
            killswitch_disabled_tenants: "tenant-a, tenant-b,,  tenant-c".to_string(),
            ..GuardConfig::default()
        };
        let tenants = config.disabled_tenants();
        assert_eq!(tenants.len(), 3);
        assert!(tenants.contains("tenant-b"));
    }

    #[test]
    fn unknown_env_keys_are_ignored() {
        let config = from_lookup(lookup_from(&[("OPS_GUARD_UNKNOWN_FIELD", "whatever")])).unwrap();
        assert_eq!(config, GuardConfig::default());
    }

    #[test]
    fn drift_provider_timeout_bounds_enforced() {
        assert!(from_lookup(lookup_from(&[("OPS_GUARD_DRIFT_PROVIDER_TIMEOUT_MS", "0")])).is_err());
        assert!(from_lookup(lookup_from(&[("OPS_GUARD_DRIFT_PROVIDER_TIMEOUT_MS", "5001")])).is_err());
        let config =
            from_lookup(lookup_from(&[("OPS_GUARD_DRIFT_PROVIDER_TIMEOUT_MS", "250")])).unwrap();
        assert_eq!(config.drift_guard_provider_timeout_ms, 250);
    }
}
