//! Fault injector: controlled fault injection for scenarios.
//!
//! One injector per runtime, owned by the kernel and passed explicitly;
//! no module-level ambient state. Injection points expire on a monotonic
//! TTL so a forgotten fault cannot outlive its scenario by much, and the
//! scenario runner additionally resets the injector in a guaranteed
//! cleanup path.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::common::clock::SharedClock;

pub const DEFAULT_TTL_MS: u64 = 120_000;

/// Five injection points, one per fault scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InjectionPoint {
    DbTimeout,
    External5xxBurst,
    KillswitchToggle,
    RateLimitSpike,
    GuardInternalError,
}

impl InjectionPoint {
    pub const ALL: [InjectionPoint; 5] = [
        InjectionPoint::DbTimeout,
        InjectionPoint::External5xxBurst,
        InjectionPoint::KillswitchToggle,
        InjectionPoint::RateLimitSpike,
        InjectionPoint::GuardInternalError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InjectionPoint::DbTimeout => "DB_TIMEOUT",
            InjectionPoint::External5xxBurst => "EXTERNAL_5XX_BURST",
            InjectionPoint::KillswitchToggle => "KILLSWITCH_TOGGLE",
            InjectionPoint::RateLimitSpike => "RATE_LIMIT_SPIKE",
            InjectionPoint::GuardInternalError => "GUARD_INTERNAL_ERROR",
        }
    }
}

#[derive(Debug, Clone, Default)]
struct InjectionState {
    enabled: bool,
    params: Value,
    enabled_at_ms: u64,
    /// 0 = no expiry.
    ttl_ms: u64,
}

pub struct FaultInjector {
    clock: SharedClock,
    points: Mutex<HashMap<InjectionPoint, InjectionState>>,
}

impl FaultInjector {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            points: Mutex::new(HashMap::new()),
        }
    }

    pub fn shared(clock: SharedClock) -> Arc<Self> {
        Arc::new(Self::new(clock))
    }

    /// Enable injection at a point with params and a TTL.
    pub fn enable(&self, point: InjectionPoint, params: Value, ttl_ms: u64) {
        let mut points = self.points.lock();
        points.insert(
            point,
            InjectionState {
                enabled: true,
                params,
                enabled_at_ms: self.clock.monotonic_now_ms(),
                ttl_ms,
            },
        );
    }

    pub fn disable(&self, point: InjectionPoint) {
        let mut points = self.points.lock();
        points.insert(point, InjectionState::default());
    }

    /// Active right now, respecting TTL auto-expiry.
    pub fn is_enabled(&self, point: InjectionPoint) -> bool {
        let mut points = self.points.lock();
        let state = match points.get_mut(&point) {
            Some(state) => state,
            None => return false,
        };
        if !state.enabled {
            return false;
        }
        if state.ttl_ms > 0
            && self
                .clock
                .monotonic_now_ms()
                .saturating_sub(state.enabled_at_ms)
                > state.ttl_ms
        {
            *state = InjectionState::default();
            return false;
        }
        true
    }

    pub fn params(&self, point: InjectionPoint) -> Value {
        self.points
            .lock()
            .get(&point)
            .map(|state| state.params.clone())
            .unwrap_or(Value::Null)
    }

    pub fn disable_all(&self) {
        let mut points = self.points.lock();
        for point in InjectionPoint::ALL {
            points.insert(point, InjectionState::default());
        }
    }

    /// Full reset: every point disabled and params dropped. The scenario
    /// runner calls this from its cleanup guard.
    pub fn reset(&self) {
        self.points.lock().clear();
    }

    /// True when no point is active. Used by teardown assertions.
    pub fn is_clean(&self) -> bool {
        !InjectionPoint::ALL.iter().any(|p| self.is_enabled(*p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::clock::FakeClock;
    use chrono::TimeZone;
    use serde_json::json;

    fn injector() -> (FaultInjector, Arc<FakeClock>) {
        let clock = Arc::new(FakeClock::new(
            chrono::Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap(),
        ));
        (FaultInjector::new(clock.clone()), clock)
    }

    #[test]
    fn starts_clean() {
        let (inj, _clock) = injector();
        assert!(inj.is_clean());
        for point in InjectionPoint::ALL {
            assert!(!inj.is_enabled(point));
        }
    }

    #[test]
    fn enable_and_disable_round_trip() {
        let (inj, _clock) = injector();
        inj.enable(
            InjectionPoint::DbTimeout,
            json!({"delay_ms": 500}),
            DEFAULT_TTL_MS,
        );
        assert!(inj.is_enabled(InjectionPoint::DbTimeout));
        assert_eq!(inj.params(InjectionPoint::DbTimeout), json!({"delay_ms": 500}));

        inj.disable(InjectionPoint::DbTimeout);
        assert!(!inj.is_enabled(InjectionPoint::DbTimeout));
        assert_eq!(inj.params(InjectionPoint::DbTimeout), Value::Null);
    }

    #[test]
    fn ttl_expires_on_monotonic_clock() {
        let (inj, clock) = injector();
        inj.enable(InjectionPoint::RateLimitSpike, Value::Null, 10_000);
        clock.advance_ms(10_000);
        assert!(inj.is_enabled(InjectionPoint::RateLimitSpike));
        clock.advance_ms(1);
        assert!(!inj.is_enabled(InjectionPoint::RateLimitSpike));
    }

    #[test]
    fn zero_ttl_never_expires() {
        let (inj, clock) = injector();
        inj.enable(InjectionPoint::GuardInternalError, Value::Null, 0);
        clock.advance_ms(10_000_000);
        assert!(inj.is_enabled(InjectionPoint::GuardInternalError));
    }

    #[test]
    fn disable_all_clears_every_point() {
        let (inj, _clock) = injector();
        for point in InjectionPoint::ALL {
            inj.enable(point, Value::Null, 0);
        }
        inj.disable_all();
        assert!(inj.is_clean());
    }

    #[test]
    fn reset_drops_all_state() {
        let (inj, _clock) = injector();
        inj.enable(InjectionPoint::External5xxBurst, json!({"pct": 100}), 0);
        inj.reset();
        assert!(inj.is_clean());
        assert_eq!(inj.params(InjectionPoint::External5xxBurst), Value::Null);
    }
}
