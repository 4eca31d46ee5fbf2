//! Drift guard: config-hash and endpoint-signature comparison against a
//! frozen baseline.
//!
//! A request's drift input is derived by a pluggable provider, compared
//! against the baseline, then dispatched by effective mode: shadow logs
//! and proceeds, enforce blocks with a 503-equivalent outcome. Mode
//! resolution is single-sourced in `resolve_effective_mode`.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use tracing::{error, warn};

use crate::common::hash::sha256_hex;
use crate::common::metrics::{names, SharedMetrics};

use super::config::GuardConfig;

// =============================================================================
// Modes and risk classes
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantMode {
    Off,
    Shadow,
    Enforce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskClass {
    Low,
    Medium,
    High,
}

impl RiskClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskClass::Low => "low",
            RiskClass::Medium => "medium",
            RiskClass::High => "high",
        }
    }
}

/// The single source of truth for effective-mode resolution.
///
/// `Enforce` on a low-risk endpoint downgrades to `Shadow`; `Off` is never
/// upgraded.
pub fn resolve_effective_mode(mode: TenantMode, risk: RiskClass) -> TenantMode {
    match (mode, risk) {
        (TenantMode::Enforce, RiskClass::Low) => TenantMode::Shadow,
        (mode, _) => mode,
    }
}

// =============================================================================
// Drift input and baseline
// =============================================================================

#[derive(Debug, Clone)]
pub struct DriftInput {
    pub endpoint: String,
    pub method: String,
    pub tenant_id: String,
    pub request_signature: String,
    pub config_hash: String,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftReasonCode {
    ThresholdExceeded,
    InputAnomaly,
}

impl DriftReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriftReasonCode::ThresholdExceeded => "threshold_exceeded",
            DriftReasonCode::InputAnomaly => "input_anomaly",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DriftDecision {
    pub is_drift: bool,
    pub reason_code: Option<DriftReasonCode>,
    pub detail: String,
}

impl DriftDecision {
    fn no_drift() -> Self {
        Self {
            is_drift: false,
            reason_code: None,
            detail: String::new(),
        }
    }
}

/// Frozen comparison target built at deploy time.
#[derive(Debug, Clone)]
pub struct DriftBaseline {
    pub config_hash: String,
    pub known_endpoint_signatures: HashSet<String>,
    pub created_at_ms: u64,
}

pub fn compute_endpoint_signature(endpoint: &str, method: &str, risk_class: &str) -> String {
    sha256_hex(&format!("{endpoint}|{method}|{risk_class}"))
}

pub fn build_baseline(
    config_hash: &str,
    known_endpoints: &[(&str, &str, &str)],
    created_at_ms: u64,
) -> DriftBaseline {
    DriftBaseline {
        config_hash: config_hash.to_string(),
        known_endpoint_signatures: known_endpoints
            .iter()
            .map(|(e, m, r)| compute_endpoint_signature(e, m, r))
            .collect(),
        created_at_ms,
    }
}

/// Compare one request against the baseline. No baseline means no drift.
/// Config-hash mismatch is checked before endpoint signatures.
pub fn evaluate_drift(input: &DriftInput, baseline: Option<&DriftBaseline>) -> DriftDecision {
    let baseline = match baseline {
        Some(b) => b,
        None => return DriftDecision::no_drift(),
    };

    if input.config_hash != baseline.config_hash {
        return DriftDecision {
            is_drift: true,
            reason_code: Some(DriftReasonCode::ThresholdExceeded),
            detail: format!(
                "config_hash mismatch: baseline={} observed={}",
                baseline.config_hash, input.config_hash
            ),
        };
    }

    if !baseline.known_endpoint_signatures.is_empty()
        && !baseline
            .known_endpoint_signatures
            .contains(&input.request_signature)
    {
        return DriftDecision {
            is_drift: true,
            reason_code: Some(DriftReasonCode::InputAnomaly),
            detail: format!(
                "unknown endpoint signature for {} {}",
                input.method, input.endpoint
            ),
        };
    }

    DriftDecision::no_drift()
}

// =============================================================================
// Input providers
// =============================================================================

pub trait DriftInputProvider: Send + Sync {
    fn get_input(
        &self,
        endpoint: &str,
        method: &str,
        tenant_id: &str,
        config_hash: &str,
        risk_class: RiskClass,
        now_ms: u64,
    ) -> Result<DriftInput>;
}

/// Default provider: signature is the SHA-256 endpoint signature, so a
/// deployed baseline built from the route table matches requests exactly.
pub struct HashDriftInputProvider;

impl DriftInputProvider for HashDriftInputProvider {
    fn get_input(
        &self,
        endpoint: &str,
        method: &str,
        tenant_id: &str,
        config_hash: &str,
        risk_class: RiskClass,
        now_ms: u64,
    ) -> Result<DriftInput> {
        Ok(DriftInput {
            endpoint: endpoint.to_string(),
            method: method.to_string(),
            tenant_id: tenant_id.to_string(),
            request_signature: compute_endpoint_signature(endpoint, method, risk_class.as_str()),
            config_hash: config_hash.to_string(),
            timestamp_ms: now_ms,
        })
    }
}

/// Provider scripted to fail; exercises fail-open/fail-closed paths.
pub struct FailingDriftInputProvider;

impl DriftInputProvider for FailingDriftInputProvider {
    fn get_input(
        &self,
        _endpoint: &str,
        _method: &str,
        _tenant_id: &str,
        _config_hash: &str,
        _risk_class: RiskClass,
        _now_ms: u64,
    ) -> Result<DriftInput> {
        anyhow::bail!("drift input provider unavailable")
    }
}

// =============================================================================
// Guard
// =============================================================================

/// What the caller must do with the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftAction {
    Proceed,
    /// 503-equivalent. Only effective-Enforce produces this.
    Block,
}

pub struct DriftGuard {
    config: Arc<GuardConfig>,
    baseline: Option<DriftBaseline>,
    provider: Arc<dyn DriftInputProvider>,
    metrics: SharedMetrics,
}

impl DriftGuard {
    pub fn new(
        config: Arc<GuardConfig>,
        baseline: Option<DriftBaseline>,
        provider: Arc<dyn DriftInputProvider>,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            config,
            baseline,
            provider,
            metrics,
        }
    }

    /// Evaluate one request. In `Off` effective mode the provider is not
    /// called at all. Provider failure follows `drift_guard_fail_open`.
    pub fn check(
        &self,
        endpoint: &str,
        method: &str,
        tenant_id: &str,
        mode: TenantMode,
        risk_class: RiskClass,
        now_ms: u64,
    ) -> (DriftAction, Option<DriftDecision>) {
        let effective = resolve_effective_mode(mode, risk_class);
        if effective == TenantMode::Off {
            return (DriftAction::Proceed, None);
        }

        let input = match self.provider.get_input(
            endpoint,
            method,
            tenant_id,
            &self.config.config_hash(),
            risk_class,
            now_ms,
        ) {
            Ok(input) => input,
            Err(e) => {
                error!(error = %e, "drift input provider failed");
                if self.config.drift_guard_fail_open {
                    return (DriftAction::Proceed, None);
                }
                return (DriftAction::Block, None);
            }
        };

        let decision = evaluate_drift(&input, self.baseline.as_ref());
        if decision.is_drift {
            let reason = decision
                .reason_code
                .map(|r| r.as_str())
                .unwrap_or("unknown");
            self.metrics
                .inc(names::DRIFT_DETECTED_TOTAL, &[("reason", reason)]);
            warn!(
                endpoint = %endpoint,
                tenant_id = %tenant_id,
                reason = reason,
                detail = %decision.detail,
                "drift detected"
            );
            if effective == TenantMode::Enforce {
                return (DriftAction::Block, Some(decision));
            }
        }

        (DriftAction::Proceed, Some(decision))
    }
}
