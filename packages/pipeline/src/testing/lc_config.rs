//! Cross-cutting configuration for the load-characterization harness.

use crate::guard::Endpoint;

pub const DEFAULT_SEED: u64 = 1337;
/// Acceptable achieved-rps deviation, ±30%.
pub const RPS_TOL_PCT: f64 = 0.30;

/// Runtime truth only; never a spec parameter.
pub fn eval_interval_seconds() -> u64 {
    std::env::var("EVAL_INTERVAL_SECONDS")
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(60)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileType {
    Baseline,
    Peak,
    Stress,
    Burst,
}

impl ProfileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileType::Baseline => "baseline",
            ProfileType::Peak => "peak",
            ProfileType::Stress => "stress",
            ProfileType::Burst => "burst",
        }
    }

    /// Minimum request counts per profile.
    pub fn min_requests(&self) -> u64 {
        match self {
            ProfileType::Baseline | ProfileType::Peak => 200,
            ProfileType::Stress | ProfileType::Burst => 500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultType {
    DbTimeout,
    External5xx,
    Killswitch,
    RateLimit,
    GuardError,
}

impl FaultType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultType::DbTimeout => "db_timeout",
            FaultType::External5xx => "external_5xx",
            FaultType::Killswitch => "killswitch",
            FaultType::RateLimit => "rate_limit",
            FaultType::GuardError => "guard_error",
        }
    }

    /// Expected breaker behavior at saturating failure rates. The
    /// killswitch bypasses the breaker entirely and the rate limiter runs
    /// before it, so neither should open a circuit.
    pub fn expects_cb_open(&self) -> bool {
        match self {
            FaultType::DbTimeout | FaultType::External5xx | FaultType::GuardError => true,
            FaultType::Killswitch | FaultType::RateLimit => false,
        }
    }

    /// Endpoint under load for this fault scenario.
    pub fn endpoint(&self) -> Endpoint {
        match self {
            FaultType::Killswitch | FaultType::RateLimit => Endpoint::Import,
            _ => Endpoint::Validate,
        }
    }
}

/// Relative-plus-absolute tolerance for retry-amplification comparisons.
pub fn retry_amp_tolerance(expected: f64) -> f64 {
    (1e-4 * expected.abs()).max(1e-6)
}

/// Runtime configuration for LC scenarios.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LcRuntimeConfig {
    pub seed: u64,
    pub eval_interval_seconds: u64,
}

impl Default for LcRuntimeConfig {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            eval_interval_seconds: eval_interval_seconds(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_requests_per_profile() {
        assert_eq!(ProfileType::Baseline.min_requests(), 200);
        assert_eq!(ProfileType::Peak.min_requests(), 200);
        assert_eq!(ProfileType::Stress.min_requests(), 500);
        assert_eq!(ProfileType::Burst.min_requests(), 500);
    }

    #[test]
    fn cb_expectations_per_fault() {
        assert!(FaultType::DbTimeout.expects_cb_open());
        assert!(FaultType::External5xx.expects_cb_open());
        assert!(FaultType::GuardError.expects_cb_open());
        assert!(!FaultType::Killswitch.expects_cb_open());
        assert!(!FaultType::RateLimit.expects_cb_open());
    }

    #[test]
    fn retry_amp_tolerance_has_floor() {
        assert_eq!(retry_amp_tolerance(0.0), 1e-6);
        assert!(retry_amp_tolerance(100.0) >= 1e-2);
    }

    #[test]
    fn default_runtime_config_uses_fixed_seed() {
        assert_eq!(LcRuntimeConfig::default().seed, 1337);
    }
}
