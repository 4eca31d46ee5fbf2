//! Enforcement decision engine.
//!
//! Runs the validator in the configured mode and returns an
//! `EnforcementDecision` the caller acts on. Block is a decision value,
//! not a panic; only `EnforceHard` can produce it, and `EnforceSoft`
//! never escalates past Warn.

use serde_json::{json, Value};
use tracing::warn;

use crate::common::metrics::{names, BaseMetricsSink};
use crate::common::rng::SeededRng;

use super::enforcement_config::{EnforcementConfig, ValidationMode};
use super::error_codes::ValidationErrorCode;
use super::shadow::{shadow_validate_hook, ShadowCompareResult};
use super::shadow_config::ShadowConfig;
use super::types::ValidationError;
use super::validator::validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementAction {
    Pass,
    Warn,
    Block,
}

impl EnforcementAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnforcementAction::Pass => "pass",
            EnforcementAction::Warn => "warn",
            EnforcementAction::Block => "block",
        }
    }
}

/// Result of `enforce_validation`; callers act on `action`.
#[derive(Debug, Clone)]
pub struct EnforcementDecision {
    pub action: EnforcementAction,
    pub mode: ValidationMode,
    pub errors: Vec<ValidationError>,
    pub blocker_codes: Vec<ValidationErrorCode>,
    pub shadow_result: Option<ShadowCompareResult>,
}

impl EnforcementDecision {
    fn passing(mode: ValidationMode) -> Self {
        Self {
            action: EnforcementAction::Pass,
            mode,
            errors: Vec::new(),
            blocker_codes: Vec::new(),
            shadow_result: None,
        }
    }

    pub fn to_value(&self) -> Value {
        json!({
            "action": self.action.as_str(),
            "mode": self.mode.as_str(),
            "errors": self.errors,
            "blocker_codes": self.blocker_codes.iter().map(|c| c.as_str()).collect::<Vec<_>>(),
            "shadow_result": self.shadow_result.as_ref().map(|s| s.to_value()),
        })
    }
}

fn record(decision: &EnforcementDecision, metrics: &dyn BaseMetricsSink) {
    metrics.inc(names::ENFORCE_TOTAL, &[]);
    match decision.action {
        EnforcementAction::Block => metrics.inc(names::ENFORCE_BLOCKED_TOTAL, &[]),
        EnforcementAction::Warn => metrics.inc(names::ENFORCE_SOFTWARN_TOTAL, &[]),
        EnforcementAction::Pass => {}
    }
}

/// Run the validator in the configured mode and decide pass/warn/block.
///
/// Mode behavior:
///   off          — nothing runs, action = pass
///   shadow       — sampled shadow hook runs, action = pass always
///   enforce_soft — invalid means warn; never blocks
///   enforce_hard — any blocker code means block; advisory-only means warn
#[allow(clippy::too_many_arguments)]
pub fn enforce_validation(
    invoice: &Value,
    legacy_errors: &[String],
    invoice_id: Option<&str>,
    config: &EnforcementConfig,
    shadow_config: &ShadowConfig,
    metrics: &dyn BaseMetricsSink,
    rng: &SeededRng,
) -> EnforcementDecision {
    if config.mode == ValidationMode::Off {
        let decision = EnforcementDecision::passing(config.mode);
        record(&decision, metrics);
        return decision;
    }

    if config.mode == ValidationMode::Shadow {
        let shadow_result = shadow_validate_hook(
            invoice,
            legacy_errors,
            invoice_id,
            shadow_config,
            metrics,
            rng,
        );
        let mut decision = EnforcementDecision::passing(config.mode);
        decision.shadow_result = shadow_result;
        record(&decision, metrics);
        return decision;
    }

    // enforce_soft / enforce_hard
    let result = validate(invoice);
    if result.valid {
        let decision = EnforcementDecision::passing(config.mode);
        record(&decision, metrics);
        return decision;
    }

    let blockers: Vec<ValidationErrorCode> = result
        .errors
        .iter()
        .map(|e| e.code)
        .filter(|code| config.blocker_codes.contains(code))
        .collect();

    let decision = match config.mode {
        ValidationMode::EnforceSoft => {
            warn!(
                invoice_id = invoice_id.unwrap_or("unknown"),
                codes = ?result.codes(),
                "enforcement warn"
            );
            EnforcementDecision {
                action: EnforcementAction::Warn,
                mode: config.mode,
                errors: result.errors,
                blocker_codes: blockers,
                shadow_result: None,
            }
        }
        ValidationMode::EnforceHard if !blockers.is_empty() => EnforcementDecision {
            action: EnforcementAction::Block,
            mode: config.mode,
            errors: result.errors,
            blocker_codes: blockers,
            shadow_result: None,
        },
        _ => {
            // EnforceHard with advisory codes only.
            warn!(
                invoice_id = invoice_id.unwrap_or("unknown"),
                codes = ?result.codes(),
                "enforcement warn, advisory codes only"
            );
            EnforcementDecision {
                action: EnforcementAction::Warn,
                mode: config.mode,
                errors: result.errors,
                blocker_codes: Vec::new(),
                shadow_result: None,
            }
        }
    };

    record(&decision, metrics);
    decision
}
