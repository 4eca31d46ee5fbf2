//! Per-dependency circuit breakers.
//!
//! Three-state machine over a rolling window of recent outcomes:
//!
//! ```text
//! Closed ──(failure pct > threshold over full window)──► Open
//! Open ──(open_duration elapsed)──► HalfOpen
//! HalfOpen ──(probe ok)──► Closed
//! HalfOpen ──(probe failed)──► Open
//! ```
//!
//! While HalfOpen exactly one probe is allowed through; everything else is
//! rejected until the probe settles. Transitions are timed on the
//! monotonic clock.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::common::clock::SharedClock;
use crate::common::metrics::{names, SharedMetrics};

use super::config::GuardConfig;
use super::Dependency;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CbState {
    Closed = 0,
    HalfOpen = 1,
    Open = 2,
}

impl CbState {
    pub fn as_gauge(&self) -> f64 {
        *self as i32 as f64
    }
}

struct BreakerState {
    state: CbState,
    /// Rolling window of outcome samples, true = failure.
    window: VecDeque<bool>,
    opened_at_ms: u64,
    probe_in_flight: bool,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CbState::Closed,
            window: VecDeque::new(),
            opened_at_ms: 0,
            probe_in_flight: false,
        }
    }
}

pub struct CircuitBreakerRegistry {
    config: Arc<GuardConfig>,
    clock: SharedClock,
    metrics: SharedMetrics,
    breakers: Mutex<HashMap<Dependency, BreakerState>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: Arc<GuardConfig>, clock: SharedClock, metrics: SharedMetrics) -> Self {
        Self {
            config,
            clock,
            metrics,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Current state, applying the Open -> HalfOpen timer.
    pub fn state(&self, dependency: Dependency) -> CbState {
        let mut breakers = self.breakers.lock();
        let breaker = breakers.entry(dependency).or_insert_with(BreakerState::new);
        self.tick(dependency, breaker);
        breaker.state
    }

    /// Whether a request may proceed right now. In HalfOpen this hands out
    /// the single probe slot.
    pub fn allow_request(&self, dependency: Dependency) -> bool {
        let mut breakers = self.breakers.lock();
        let breaker = breakers.entry(dependency).or_insert_with(BreakerState::new);
        self.tick(dependency, breaker);

        match breaker.state {
            CbState::Closed => true,
            CbState::Open => false,
            CbState::HalfOpen => {
                if breaker.probe_in_flight {
                    false
                } else {
                    breaker.probe_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self, dependency: Dependency) {
        self.record(dependency, false);
    }

    pub fn record_failure(&self, dependency: Dependency) {
        self.record(dependency, true);
    }

    fn record(&self, dependency: Dependency, failed: bool) {
        let mut breakers = self.breakers.lock();
        let breaker = breakers.entry(dependency).or_insert_with(BreakerState::new);
        self.tick(dependency, breaker);

        match breaker.state {
            CbState::HalfOpen => {
                breaker.probe_in_flight = false;
                if failed {
                    self.transition(dependency, breaker, CbState::Open);
                } else {
                    breaker.window.clear();
                    self.transition(dependency, breaker, CbState::Closed);
                }
            }
            CbState::Closed => {
                let window_len = self.config.cb_error_threshold_count as usize;
                breaker.window.push_back(failed);
                while breaker.window.len() > window_len {
                    breaker.window.pop_front();
                }

                if breaker.window.len() == window_len {
                    let failures = breaker.window.iter().filter(|f| **f).count();
                    let pct = failures as f64 * 100.0 / window_len as f64;
                    if pct > self.config.cb_error_threshold_pct {
                        self.transition(dependency, breaker, CbState::Open);
                    }
                }
            }
            // Late result from before the window opened; the timer decides.
            CbState::Open => {}
        }
    }

    fn tick(&self, dependency: Dependency, breaker: &mut BreakerState) {
        if breaker.state == CbState::Open {
            let open_ms = (self.config.cb_open_duration_seconds * 1000.0) as u64;
            if self.clock.monotonic_now_ms().saturating_sub(breaker.opened_at_ms) >= open_ms {
                self.transition(dependency, breaker, CbState::HalfOpen);
            }
        }
    }

    fn transition(&self, dependency: Dependency, breaker: &mut BreakerState, next: CbState) {
        if breaker.state == next {
            return;
        }
        info!(
            dependency = dependency.as_str(),
            from = ?breaker.state,
            to = ?next,
            "circuit breaker transition"
        );
        breaker.state = next;
        if next == CbState::Open {
            breaker.opened_at_ms = self.clock.monotonic_now_ms();
            breaker.window.clear();
            breaker.probe_in_flight = false;
        }
        self.metrics.set(
            names::CIRCUIT_BREAKER_STATE,
            &[("dependency", dependency.as_str())],
            next.as_gauge(),
        );
    }

    /// Restore every breaker to Closed. Test isolation only.
    pub fn reset_all(&self) {
        let mut breakers = self.breakers.lock();
        for (dependency, breaker) in breakers.iter_mut() {
            breaker.window.clear();
            breaker.probe_in_flight = false;
            if breaker.state != CbState::Closed {
                breaker.state = CbState::Closed;
                self.metrics.set(
                    names::CIRCUIT_BREAKER_STATE,
                    &[("dependency", dependency.as_str())],
                    CbState::Closed.as_gauge(),
                );
            }
        }
    }
}
