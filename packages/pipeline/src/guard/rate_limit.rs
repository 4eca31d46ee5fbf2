//! Per-(endpoint, tenant) token-bucket rate limiter.
//!
//! State is in-process and single-cluster by design; independent processes
//! each keep their own buckets, which only makes the limit stricter under
//! partition. Refill is driven by the monotonic clock so wall-clock jumps
//! cannot mint tokens.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::clock::SharedClock;
use crate::common::metrics::{names, SharedMetrics};

use super::config::GuardConfig;
use super::Endpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited,
}

impl RateDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateDecision::Allowed => "allowed",
            RateDecision::Limited => "limited",
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed)
    }
}

struct Bucket {
    tokens: f64,
    last_refill_ms: u64,
}

pub struct RateLimiter {
    config: Arc<GuardConfig>,
    clock: SharedClock,
    metrics: SharedMetrics,
    buckets: Mutex<HashMap<(Endpoint, String), Bucket>>,
}

impl RateLimiter {
    pub fn new(config: Arc<GuardConfig>, clock: SharedClock, metrics: SharedMetrics) -> Self {
        Self {
            config,
            clock,
            metrics,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Take one token for (endpoint, tenant). Buckets start full at the
    /// per-minute quota and refill continuously at quota/60s.
    pub fn check(&self, endpoint: Endpoint, tenant_id: &str) -> RateDecision {
        let quota = self.config.rate_limit_per_minute(endpoint) as f64;
        let now_ms = self.clock.monotonic_now_ms();

        let decision = {
            let mut buckets = self.buckets.lock();
            let bucket = buckets
                .entry((endpoint, tenant_id.to_string()))
                .or_insert(Bucket {
                    tokens: quota,
                    last_refill_ms: now_ms,
                });

            let elapsed_ms = now_ms.saturating_sub(bucket.last_refill_ms);
            bucket.tokens = (bucket.tokens + elapsed_ms as f64 * quota / 60_000.0).min(quota);
            bucket.last_refill_ms = now_ms;

            if bucket.tokens >= 1.0 {
                bucket.tokens -= 1.0;
                RateDecision::Allowed
            } else {
                RateDecision::Limited
            }
        };

        self.metrics.inc(
            names::RATE_LIMIT_TOTAL,
            &[("endpoint", endpoint.as_str()), ("decision", decision.as_str())],
        );
        decision
    }

    /// Drop all bucket state. Test isolation only.
    pub fn reset_all(&self) {
        self.buckets.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::clock::FakeClock;
    use crate::common::metrics::{BaseMetricsSink, InMemoryMetrics};
    use chrono::TimeZone;

    fn limiter_with_quota(import_per_minute: u32) -> (RateLimiter, Arc<FakeClock>) {
        let clock = Arc::new(FakeClock::new(
            chrono::Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap(),
        ));
        let config = Arc::new(GuardConfig {
            rate_limit_import_per_minute: import_per_minute,
            ..GuardConfig::default()
        });
        let limiter = RateLimiter::new(config, clock.clone(), InMemoryMetrics::shared());
        (limiter, clock)
    }

    #[test]
    fn quota_is_enforced_within_a_minute() {
        let (limiter, _clock) = limiter_with_quota(3);
        for _ in 0..3 {
            assert_eq!(limiter.check(Endpoint::Import, "t1"), RateDecision::Allowed);
        }
        assert_eq!(limiter.check(Endpoint::Import, "t1"), RateDecision::Limited);
    }

    #[test]
    fn tokens_refill_over_time() {
        let (limiter, clock) = limiter_with_quota(6);
        for _ in 0..6 {
            limiter.check(Endpoint::Import, "t1");
        }
        assert_eq!(limiter.check(Endpoint::Import, "t1"), RateDecision::Limited);

        // 6/min refills one token every 10s.
        clock.advance_ms(10_000);
        assert_eq!(limiter.check(Endpoint::Import, "t1"), RateDecision::Allowed);
        assert_eq!(limiter.check(Endpoint::Import, "t1"), RateDecision::Limited);
    }

    #[test]
    fn tenants_have_independent_buckets() {
        let (limiter, _clock) = limiter_with_quota(1);
        assert_eq!(limiter.check(Endpoint::Import, "t1"), RateDecision::Allowed);
        assert_eq!(limiter.check(Endpoint::Import, "t1"), RateDecision::Limited);
        assert_eq!(limiter.check(Endpoint::Import, "t2"), RateDecision::Allowed);
    }

    #[test]
    fn endpoints_have_independent_buckets() {
        let (limiter, _clock) = limiter_with_quota(1);
        assert_eq!(limiter.check(Endpoint::Import, "t1"), RateDecision::Allowed);
        assert_eq!(limiter.check(Endpoint::Import, "t1"), RateDecision::Limited);
        // Validate endpoint still has its own (larger) quota.
        assert_eq!(limiter.check(Endpoint::Validate, "t1"), RateDecision::Allowed);
    }

    #[test]
    fn decisions_are_counted_with_endpoint_label() {
        let clock = Arc::new(FakeClock::new(
            chrono::Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap(),
        ));
        let metrics = Arc::new(InMemoryMetrics::new());
        let config = Arc::new(GuardConfig {
            rate_limit_import_per_minute: 1,
            ..GuardConfig::default()
        });
        let limiter = RateLimiter::new(config, clock, metrics.clone());

        limiter.check(Endpoint::Import, "t1");
        limiter.check(Endpoint::Import, "t1");

        let snap = metrics.snapshot();
        assert_eq!(
            snap.counter(names::RATE_LIMIT_TOTAL, &[("endpoint", "import"), ("decision", "allowed")]),
            1.0
        );
        assert_eq!(
            snap.counter(names::RATE_LIMIT_TOTAL, &[("endpoint", "import"), ("decision", "limited")]),
            1.0
        );
    }

    #[test]
    fn reset_all_restores_full_buckets() {
        let (limiter, _clock) = limiter_with_quota(1);
        limiter.check(Endpoint::Import, "t1");
        assert_eq!(limiter.check(Endpoint::Import, "t1"), RateDecision::Limited);
        limiter.reset_all();
        assert_eq!(limiter.check(Endpoint::Import, "t1"), RateDecision::Allowed);
    }
}
