//! Operational guard: admission control in front of every I/O-facing
//! operation.
//!
//! Order is fixed: killswitch, then rate limit, then circuit-breaker
//! precheck. Denials are explicit decision values, never exceptions; the
//! caller translates them to its protocol. The only fail-open points are
//! the killswitch internal-error path and the wrapper's read-path
//! exhaustion sentinel.

pub mod circuit_breaker;
pub mod config;
pub mod drift;
pub mod killswitch;
pub mod rate_limit;
pub mod wrapper;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::clock::SharedClock;
use crate::common::metrics::SharedMetrics;
use crate::common::rng::SeededRng;

pub use circuit_breaker::{CbState, CircuitBreakerRegistry};
pub use config::{load_guard_config, GuardConfig};
pub use drift::{DriftAction, DriftBaseline, DriftGuard, RiskClass, TenantMode};
pub use killswitch::{Killswitch, KillswitchCheck};
pub use rate_limit::{RateDecision, RateLimiter};
pub use wrapper::{CallOutcome, DependencyWrapper, WrapperPolicy};

// =============================================================================
// Identities
// =============================================================================

/// Guarded entry points. Quotas are configured per endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    Import,
    Validate,
    Lookup,
    Admin,
}

impl Endpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Import => "import",
            Endpoint::Validate => "validate",
            Endpoint::Lookup => "lookup",
            Endpoint::Admin => "admin",
        }
    }
}

/// External dependencies the wrapper and breakers know about. Closed set;
/// config override maps only accept these names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dependency {
    DbPrimary,
    Storage,
    Extractor,
    TariffLookup,
    IssueSink,
}

impl Dependency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dependency::DbPrimary => "db_primary",
            Dependency::Storage => "storage",
            Dependency::Extractor => "extractor",
            Dependency::TariffLookup => "tariff_lookup",
            Dependency::IssueSink => "issue_sink",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "db_primary" => Some(Dependency::DbPrimary),
            "storage" => Some(Dependency::Storage),
            "extractor" => Some(Dependency::Extractor),
            "tariff_lookup" => Some(Dependency::TariffLookup),
            "issue_sink" => Some(Dependency::IssueSink),
            _ => None,
        }
    }
}

// =============================================================================
// Decisions
// =============================================================================

/// Closed set of deny reasons. Callers map these to protocol responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GuardDenyReason {
    #[error("KILL_SWITCHED")]
    KillSwitched,
    #[error("RATE_LIMITED")]
    RateLimited,
    #[error("CIRCUIT_OPEN")]
    CircuitOpen,
    #[error("INTERNAL_ERROR")]
    InternalError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    Deny(GuardDenyReason),
}

impl GuardDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardDecision::Allow)
    }
}

// =============================================================================
// Composed guard
// =============================================================================

pub struct OperationalGuard {
    config: Arc<GuardConfig>,
    killswitch: Killswitch,
    rate_limiter: RateLimiter,
    breakers: Arc<CircuitBreakerRegistry>,
    metrics: SharedMetrics,
    rng: Arc<SeededRng>,
}

impl OperationalGuard {
    pub fn new(
        config: Arc<GuardConfig>,
        clock: SharedClock,
        metrics: SharedMetrics,
        rng: Arc<SeededRng>,
    ) -> Self {
        let killswitch = Killswitch::new(config.clone(), metrics.clone());
        let rate_limiter = RateLimiter::new(config.clone(), clock.clone(), metrics.clone());
        let breakers = Arc::new(CircuitBreakerRegistry::new(
            config.clone(),
            clock,
            metrics.clone(),
        ));
        Self {
            config,
            killswitch,
            rate_limiter,
            breakers,
            metrics,
            rng,
        }
    }

    pub fn config(&self) -> &Arc<GuardConfig> {
        &self.config
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn killswitch(&self) -> &Killswitch {
        &self.killswitch
    }

    /// Admission check for one request. Rate limit runs before the
    /// breaker precheck; the precheck never consumes a half-open probe
    /// slot (claiming the probe is the wrapper's job).
    pub fn check_admission(
        &self,
        endpoint: Endpoint,
        tenant_id: &str,
        dependency: Dependency,
    ) -> GuardDecision {
        if !self.killswitch.check(tenant_id).proceeds() {
            return GuardDecision::Deny(GuardDenyReason::KillSwitched);
        }

        if !self.rate_limiter.check(endpoint, tenant_id).is_allowed() {
            return GuardDecision::Deny(GuardDenyReason::RateLimited);
        }

        if self.config.cb_precheck_enabled && self.breakers.state(dependency) == CbState::Open {
            return GuardDecision::Deny(GuardDenyReason::CircuitOpen);
        }

        GuardDecision::Allow
    }

    /// Build a wrapper for one dependency call under the current config.
    pub fn wrapper(&self, dependency: Dependency, is_write: bool) -> DependencyWrapper {
        let policy =
            WrapperPolicy::for_dependency(&self.config, dependency, is_write, self.metrics.as_ref());
        DependencyWrapper::new(
            policy,
            self.breakers.clone(),
            self.metrics.clone(),
            self.rng.clone(),
        )
    }

    /// Restore breakers and rate-limit buckets. Test isolation only.
    pub fn reset_all(&self) {
        self.breakers.reset_all();
        self.rate_limiter.reset_all();
    }
}
