//! Dependency wrapper: timeout + bounded retry + breaker integration.
//!
//! A call site builds a `WrapperPolicy` from config for its dependency and
//! hands `invoke` an async closure; the wrapper owns everything around it.
//! Policy invariant: a write never retries unless
//! `wrapper_retry_on_write` is explicitly enabled, regardless of the
//! configured attempt cap.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::common::metrics::{names, SharedMetrics};
use crate::common::rng::SeededRng;

use super::circuit_breaker::CircuitBreakerRegistry;
use super::config::GuardConfig;
use super::Dependency;

/// Result of a wrapped call.
#[derive(Debug)]
pub enum CallOutcome<T> {
    Ok(T),
    /// Breaker precheck rejected the call; it was never invoked.
    CircuitOpen,
    /// Retries exhausted on a read with fail-open enabled. The caller
    /// decides what degraded behavior means.
    FailOpen,
    Err(anyhow::Error),
}

impl<T> CallOutcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, CallOutcome::Ok(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            CallOutcome::Ok(v) => Some(v),
            _ => None,
        }
    }
}

/// Per-call policy, resolved once from config.
#[derive(Debug, Clone)]
pub struct WrapperPolicy {
    pub dependency: Dependency,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub jitter_pct: f64,
    pub is_write: bool,
    pub fail_open: bool,
    pub precheck_enabled: bool,
}

impl WrapperPolicy {
    /// Resolve the policy for one dependency. Per-dependency overrides
    /// come from the config JSON maps; invalid overrides already fell
    /// back inside `GuardConfig`.
    pub fn for_dependency(
        config: &GuardConfig,
        dependency: Dependency,
        is_write: bool,
        metrics: &dyn crate::common::metrics::BaseMetricsSink,
    ) -> Self {
        let configured_attempts = config
            .retry_max_attempts_for(dependency, metrics)
            .max(1);
        let max_attempts = if is_write && !config.wrapper_retry_on_write {
            1
        } else {
            configured_attempts
        };

        Self {
            dependency,
            timeout: Duration::from_secs_f64(config.timeout_seconds_for(dependency, metrics)),
            max_attempts,
            backoff_base_ms: config.wrapper_retry_backoff_base_ms,
            backoff_cap_ms: config.wrapper_retry_backoff_cap_ms,
            jitter_pct: config.wrapper_retry_jitter_pct,
            is_write,
            fail_open: config.wrapper_fail_open_enabled,
            precheck_enabled: config.cb_precheck_enabled,
        }
    }

    /// Backoff before the given retry, `min(base * 2^(attempt-1), cap)`
    /// jittered by ±jitter_pct. `attempt` is the attempt that just failed,
    /// counted from 1.
    pub fn backoff_ms(&self, attempt: u32, rng: &SeededRng) -> u64 {
        let exp = self
            .backoff_base_ms
            .saturating_mul(1u64 << (attempt - 1).min(32));
        let capped = exp.min(self.backoff_cap_ms);
        let factor = 1.0 + self.jitter_pct * (2.0 * rng.random() - 1.0);
        (capped as f64 * factor).round().max(0.0) as u64
    }
}

pub struct DependencyWrapper {
    policy: WrapperPolicy,
    breakers: Arc<CircuitBreakerRegistry>,
    metrics: SharedMetrics,
    rng: Arc<SeededRng>,
}

impl DependencyWrapper {
    pub fn new(
        policy: WrapperPolicy,
        breakers: Arc<CircuitBreakerRegistry>,
        metrics: SharedMetrics,
        rng: Arc<SeededRng>,
    ) -> Self {
        Self {
            policy,
            breakers,
            metrics,
            rng,
        }
    }

    pub fn policy(&self) -> &WrapperPolicy {
        &self.policy
    }

    fn count(&self, outcome: &str) {
        self.metrics.inc(
            names::DEPENDENCY_CALL_TOTAL,
            &[
                ("dependency", self.policy.dependency.as_str()),
                ("outcome", outcome),
            ],
        );
    }

    /// Run the call under the policy. Attempts are strictly sequential;
    /// every attempt is counted, every retry is counted.
    pub async fn invoke<T, F, Fut>(&self, f: F) -> CallOutcome<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let dependency = self.policy.dependency;

        if self.policy.precheck_enabled && !self.breakers.allow_request(dependency) {
            self.count("circuit_open");
            debug!(dependency = dependency.as_str(), "circuit open, call skipped");
            return CallOutcome::CircuitOpen;
        }

        let mut last_error = None;
        for attempt in 1..=self.policy.max_attempts {
            match tokio::time::timeout(self.policy.timeout, f()).await {
                Ok(Ok(value)) => {
                    self.count("ok");
                    self.breakers.record_success(dependency);
                    return CallOutcome::Ok(value);
                }
                Ok(Err(e)) => {
                    self.count("error");
                    self.breakers.record_failure(dependency);
                    warn!(
                        dependency = dependency.as_str(),
                        attempt,
                        error = %e,
                        "dependency call failed"
                    );
                    last_error = Some(e);
                }
                Err(_) => {
                    self.count("timeout");
                    self.breakers.record_failure(dependency);
                    warn!(
                        dependency = dependency.as_str(),
                        attempt,
                        timeout_ms = self.policy.timeout.as_millis() as u64,
                        "dependency call timed out"
                    );
                    last_error = Some(anyhow::anyhow!(
                        "{} timed out after {:?}",
                        dependency.as_str(),
                        self.policy.timeout
                    ));
                }
            }

            if attempt < self.policy.max_attempts {
                self.metrics.inc(
                    names::DEPENDENCY_RETRY_TOTAL,
                    &[("dependency", dependency.as_str())],
                );
                let backoff = self.policy.backoff_ms(attempt, &self.rng);
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
        }

        if !self.policy.is_write && self.policy.fail_open {
            self.count("fail_open");
            return CallOutcome::FailOpen;
        }

        CallOutcome::Err(last_error.unwrap_or_else(|| {
            anyhow::anyhow!("{} exhausted retries", dependency.as_str())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::clock::{FakeClock, SharedClock};
    use crate::common::metrics::{BaseMetricsSink, InMemoryMetrics};
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fixture(config: GuardConfig) -> (Arc<GuardConfig>, Arc<CircuitBreakerRegistry>, Arc<InMemoryMetrics>, Arc<SeededRng>) {
        let config = Arc::new(config);
        let clock: SharedClock = Arc::new(FakeClock::new(
            chrono::Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap(),
        ));
        let metrics = Arc::new(InMemoryMetrics::new());
        let breakers = Arc::new(CircuitBreakerRegistry::new(
            config.clone(),
            clock,
            metrics.clone(),
        ));
        (config, breakers, metrics, Arc::new(SeededRng::new(1337)))
    }

    fn wrapper(
        config: &GuardConfig,
        breakers: Arc<CircuitBreakerRegistry>,
        metrics: Arc<InMemoryMetrics>,
        rng: Arc<SeededRng>,
        dependency: Dependency,
        is_write: bool,
    ) -> DependencyWrapper {
        let policy = WrapperPolicy::for_dependency(config, dependency, is_write, metrics.as_ref());
        DependencyWrapper::new(policy, breakers, metrics, rng)
    }

    #[test]
    fn write_policy_forces_single_attempt() {
        let metrics = InMemoryMetrics::new();
        let config = GuardConfig {
            wrapper_retry_max_attempts_default: 5,
            ..GuardConfig::default()
        };
        let policy = WrapperPolicy::for_dependency(&config, Dependency::DbPrimary, true, &metrics);
        assert_eq!(policy.max_attempts, 1);
    }

    #[test]
    fn write_policy_respects_explicit_retry_on_write() {
        let metrics = InMemoryMetrics::new();
        let config = GuardConfig {
            wrapper_retry_max_attempts_default: 5,
            wrapper_retry_on_write: true,
            ..GuardConfig::default()
        };
        let policy = WrapperPolicy::for_dependency(&config, Dependency::DbPrimary, true, &metrics);
        assert_eq!(policy.max_attempts, 5);
    }

    #[test]
    fn read_policy_keeps_configured_attempts() {
        let metrics = InMemoryMetrics::new();
        let config = GuardConfig {
            wrapper_retry_max_attempts_default: 3,
            ..GuardConfig::default()
        };
        let policy = WrapperPolicy::for_dependency(&config, Dependency::Extractor, false, &metrics);
        assert_eq!(policy.max_attempts, 3);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let config = GuardConfig {
            wrapper_retry_jitter_pct: 0.0,
            ..GuardConfig::default()
        };
        let metrics = InMemoryMetrics::new();
        let policy = WrapperPolicy::for_dependency(&config, Dependency::Extractor, false, &metrics);
        let rng = SeededRng::new(1);
        assert_eq!(policy.backoff_ms(1, &rng), 500);
        assert_eq!(policy.backoff_ms(2, &rng), 1000);
        assert_eq!(policy.backoff_ms(3, &rng), 2000);
        assert_eq!(policy.backoff_ms(4, &rng), 4000);
        assert_eq!(policy.backoff_ms(5, &rng), 5000); // capped
        assert_eq!(policy.backoff_ms(10, &rng), 5000);
    }

    #[test]
    fn backoff_jitter_stays_in_band() {
        let config = GuardConfig::default(); // jitter 0.2
        let metrics = InMemoryMetrics::new();
        let policy = WrapperPolicy::for_dependency(&config, Dependency::Extractor, false, &metrics);
        let rng = SeededRng::new(42);
        for _ in 0..200 {
            let b = policy.backoff_ms(1, &rng);
            assert!((400..=600).contains(&b), "jittered backoff {b} out of band");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_succeeds() {
        let (config, breakers, metrics, rng) = fixture(GuardConfig {
            wrapper_retry_max_attempts_default: 3,
            ..GuardConfig::default()
        });
        let w = wrapper(&config, breakers, metrics.clone(), rng, Dependency::Extractor, false);

        let calls = AtomicU32::new(0);
        let outcome = w
            .invoke(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(anyhow::anyhow!("transient"))
                    } else {
                        Ok(7u32)
                    }
                }
            })
            .await;

        assert_eq!(outcome.ok(), Some(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let snap = metrics.snapshot();
        assert_eq!(
            snap.counter(names::DEPENDENCY_RETRY_TOTAL, &[("dependency", "extractor")]),
            2.0
        );
        assert_eq!(
            snap.counter(
                names::DEPENDENCY_CALL_TOTAL,
                &[("dependency", "extractor"), ("outcome", "error")]
            ),
            2.0
        );
        assert_eq!(
            snap.counter(
                names::DEPENDENCY_CALL_TOTAL,
                &[("dependency", "extractor"), ("outcome", "ok")]
            ),
            1.0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn read_exhaustion_fails_open() {
        let (config, breakers, metrics, rng) = fixture(GuardConfig::default());
        let w = wrapper(&config, breakers, metrics.clone(), rng, Dependency::TariffLookup, false);

        let outcome: CallOutcome<()> = w
            .invoke(|| async { Err(anyhow::anyhow!("down")) })
            .await;
        assert!(matches!(outcome, CallOutcome::FailOpen));

        let snap = metrics.snapshot();
        assert_eq!(
            snap.counter(
                names::DEPENDENCY_CALL_TOTAL,
                &[("dependency", "tariff_lookup"), ("outcome", "fail_open")]
            ),
            1.0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn write_exhaustion_surfaces_error() {
        let (config, breakers, metrics, rng) = fixture(GuardConfig::default());
        let w = wrapper(&config, breakers, metrics, rng, Dependency::DbPrimary, true);

        let calls = AtomicU32::new(0);
        let outcome: CallOutcome<()> = w
            .invoke(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(anyhow::anyhow!("constraint violated")) }
            })
            .await;

        assert!(matches!(outcome, CallOutcome::Err(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fail_open_disabled_surfaces_error_on_read() {
        let (config, breakers, metrics, rng) = fixture(GuardConfig {
            wrapper_fail_open_enabled: false,
            ..GuardConfig::default()
        });
        let w = wrapper(&config, breakers, metrics, rng, Dependency::TariffLookup, false);

        let outcome: CallOutcome<()> = w
            .invoke(|| async { Err(anyhow::anyhow!("down")) })
            .await;
        assert!(matches!(outcome, CallOutcome::Err(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_failure_and_retries() {
        let (config, breakers, metrics, rng) = fixture(GuardConfig {
            wrapper_timeout_seconds_default: 0.05,
            wrapper_retry_max_attempts_default: 2,
            ..GuardConfig::default()
        });
        let w = wrapper(&config, breakers, metrics.clone(), rng, Dependency::Extractor, false);

        let outcome: CallOutcome<()> = w
            .invoke(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;
        assert!(matches!(outcome, CallOutcome::FailOpen));

        let snap = metrics.snapshot();
        assert_eq!(
            snap.counter(
                names::DEPENDENCY_CALL_TOTAL,
                &[("dependency", "extractor"), ("outcome", "timeout")]
            ),
            2.0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn precheck_skips_call_when_open() {
        let (config, breakers, metrics, rng) = fixture(GuardConfig {
            cb_error_threshold_count: 2,
            ..GuardConfig::default()
        });
        breakers.record_failure(Dependency::Storage);
        breakers.record_failure(Dependency::Storage);

        let w = wrapper(&config, breakers, metrics.clone(), rng, Dependency::Storage, false);
        let calls = AtomicU32::new(0);
        let outcome: CallOutcome<()> = w
            .invoke(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert!(matches!(outcome, CallOutcome::CircuitOpen));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            metrics.snapshot().counter(
                names::DEPENDENCY_CALL_TOTAL,
                &[("dependency", "storage"), ("outcome", "circuit_open")]
            ),
            1.0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn precheck_disabled_invokes_anyway() {
        let (config, breakers, metrics, rng) = fixture(GuardConfig {
            cb_error_threshold_count: 2,
            cb_precheck_enabled: false,
            ..GuardConfig::default()
        });
        breakers.record_failure(Dependency::Storage);
        breakers.record_failure(Dependency::Storage);

        let w = wrapper(&config, breakers, metrics, rng, Dependency::Storage, false);
        let outcome = w.invoke(|| async { Ok(1u8) }).await;
        assert!(outcome.is_ok());
    }
}
