//! Enforcement configuration.
//!
//! Keys:
//!   INVOICE_VALIDATION_MODE          — off/shadow/enforce_soft/enforce_hard, default "shadow"
//!   INVOICE_VALIDATION_BLOCKER_CODES — comma-separated code names, defaults below

use std::collections::BTreeSet;

use super::error_codes::ValidationErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    Off,
    Shadow,
    EnforceSoft,
    EnforceHard,
}

impl ValidationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationMode::Off => "off",
            ValidationMode::Shadow => "shadow",
            ValidationMode::EnforceSoft => "enforce_soft",
            ValidationMode::EnforceHard => "enforce_hard",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "off" => Some(ValidationMode::Off),
            "shadow" => Some(ValidationMode::Shadow),
            "enforce_soft" => Some(ValidationMode::EnforceSoft),
            "enforce_hard" => Some(ValidationMode::EnforceHard),
            _ => None,
        }
    }
}

fn default_blocker_codes() -> BTreeSet<ValidationErrorCode> {
    BTreeSet::from([
        ValidationErrorCode::InvalidEttn,
        ValidationErrorCode::InconsistentPeriods,
        ValidationErrorCode::ReactivePenaltyMismatch,
        ValidationErrorCode::TotalMismatch,
        ValidationErrorCode::PayableTotalMismatch,
    ])
}

/// Immutable enforcement config.
#[derive(Debug, Clone, PartialEq)]
pub struct EnforcementConfig {
    pub mode: ValidationMode,
    pub blocker_codes: BTreeSet<ValidationErrorCode>,
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            mode: ValidationMode::Shadow,
            blocker_codes: default_blocker_codes(),
        }
    }
}

impl EnforcementConfig {
    /// Read from an env-style lookup with safe fallbacks: an unknown mode
    /// falls back to shadow, an empty override keeps the default set, and
    /// unknown code names in the override are dropped.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mode = lookup("INVOICE_VALIDATION_MODE")
            .and_then(|raw| ValidationMode::parse(&raw))
            .unwrap_or(ValidationMode::Shadow);

        let blocker_codes = match lookup("INVOICE_VALIDATION_BLOCKER_CODES") {
            Some(raw) if !raw.trim().is_empty() => {
                let parsed: BTreeSet<ValidationErrorCode> = raw
                    .split(',')
                    .filter_map(|s| ValidationErrorCode::parse(s.trim()))
                    .collect();
                if parsed.is_empty() {
                    default_blocker_codes()
                } else {
                    parsed
                }
            }
            _ => default_blocker_codes(),
        };

        Self {
            mode,
            blocker_codes,
        }
    }

    pub fn load() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}
