//! Clock port for deterministic time.
//!
//! Everything that reads the time goes through a `Clock` trait object so
//! tests can replay exact timelines. `monotonic_now_ms` is the basis for
//! rate-limit refill, breaker open-duration and fault-injection TTLs;
//! `now` is the basis for DB timestamps and dedupe buckets.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Time source for the pipeline. Replaceable for tests.
pub trait Clock: Send + Sync {
    /// Current wall-clock time in UTC.
    fn now(&self) -> DateTime<Utc>;

    /// Monotonic milliseconds since an arbitrary epoch.
    fn monotonic_now_ms(&self) -> u64;
}

pub type SharedClock = Arc<dyn Clock>;

/// Production clock backed by the OS.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic_now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Virtual clock for time-anomaly testing.
///
/// Supports forward and backward jumps. The monotonic reading never goes
/// backwards and never below zero.
pub struct FakeClock {
    inner: Mutex<FakeClockState>,
}

struct FakeClockState {
    wall: DateTime<Utc>,
    monotonic_ms: u64,
}

impl FakeClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            inner: Mutex::new(FakeClockState {
                wall: start,
                monotonic_ms: 1_000_000,
            }),
        }
    }

    /// Move both wall and monotonic time forward.
    pub fn advance_ms(&self, delta_ms: u64) {
        let mut state = self.inner.lock();
        state.wall += chrono::Duration::milliseconds(delta_ms as i64);
        state.monotonic_ms += delta_ms;
    }

    /// Simulate a forward wall-clock jump (e.g. NTP correction).
    pub fn jump_forward_ms(&self, delta_ms: u64) {
        let mut state = self.inner.lock();
        state.wall += chrono::Duration::milliseconds(delta_ms as i64);
    }

    /// Simulate a backward wall-clock jump. The monotonic reading is
    /// unaffected; that is the property the guards rely on.
    pub fn jump_backward_ms(&self, delta_ms: u64) {
        let mut state = self.inner.lock();
        state.wall -= chrono::Duration::milliseconds(delta_ms as i64);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        self.inner.lock().wall
    }

    fn monotonic_now_ms(&self) -> u64 {
        self.inner.lock().monotonic_ms
    }
}
