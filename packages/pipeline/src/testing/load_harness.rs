//! Deterministic load profiles and the dry-run harness.
//!
//! Nothing here performs real I/O; the harness computes planned request
//! counts, synthetic latencies and scale factors deterministically so
//! stress reports are bit-stable across runs and machines.

use anyhow::{bail, Result};

use crate::common::clock::SharedClock;
use crate::common::rng::SeededRng;

use super::lc_config::{ProfileType, RPS_TOL_PCT};

pub const MIN_SCALE_FACTOR: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadProfile {
    pub profile_type: ProfileType,
    pub target_rps: f64,
    pub duration_seconds: f64,
}

impl LoadProfile {
    pub fn new(profile_type: ProfileType, target_rps: f64, duration_seconds: f64) -> Self {
        Self {
            profile_type,
            target_rps,
            duration_seconds,
        }
    }

    pub fn min_requests(&self) -> u64 {
        self.profile_type.min_requests()
    }

    /// Deterministic rounding rule: the planned count is never below the
    /// profile floor.
    pub fn target_requests(&self) -> u64 {
        let derived = (self.target_rps * self.duration_seconds).ceil() as u64;
        derived.max(self.min_requests())
    }

    pub fn baseline() -> Self {
        Self::new(ProfileType::Baseline, 50.0, 10.0)
    }

    pub fn peak() -> Self {
        Self::new(ProfileType::Peak, 200.0, 10.0)
    }

    pub fn stress() -> Self {
        Self::new(ProfileType::Stress, 500.0, 5.0)
    }

    pub fn burst() -> Self {
        Self::new(ProfileType::Burst, 1000.0, 0.5)
    }
}

#[derive(Debug, Clone)]
pub struct LoadResult {
    pub profile: LoadProfile,
    pub started_at_ms: u64,
    pub finished_at_ms: u64,
    pub planned_requests: u64,
    pub executed_requests: u64,
    pub achieved_rps: f64,
    /// achieved_rps / target_rps.
    pub scale_factor: f64,
    /// Synthetic per-request latency distribution, p95.
    pub p95_latency_ms: f64,
}

pub struct LoadHarness {
    clock: SharedClock,
}

impl LoadHarness {
    pub fn new(clock: SharedClock) -> Self {
        Self { clock }
    }

    pub fn plan(&self, profile: &LoadProfile) -> Result<u64> {
        let planned = profile.target_requests();
        if planned < profile.min_requests() {
            bail!("planned_requests below profile minimum");
        }
        Ok(planned)
    }

    /// Dry run: deterministic counts and synthetic latencies, no real
    /// traffic. `executed_requests` defaults to the plan.
    pub fn run_dry(
        &self,
        profile: &LoadProfile,
        executed_requests: Option<u64>,
        rng: &SeededRng,
    ) -> Result<LoadResult> {
        let started_at_ms = self.clock.monotonic_now_ms();
        let planned = self.plan(profile)?;
        let executed = executed_requests.unwrap_or(planned);
        if executed < profile.min_requests() {
            bail!("executed_requests below profile minimum");
        }

        let achieved_rps = if profile.duration_seconds > 0.0 {
            executed as f64 / profile.duration_seconds
        } else {
            f64::INFINITY
        };
        let scale_factor = if profile.target_rps > 0.0 {
            achieved_rps / profile.target_rps
        } else {
            f64::INFINITY
        };
        if scale_factor < MIN_SCALE_FACTOR {
            bail!("scale_factor below {MIN_SCALE_FACTOR}");
        }

        let p95_latency_ms = p95(&synthetic_latencies(executed, rng));
        let finished_at_ms = self.clock.monotonic_now_ms();

        Ok(LoadResult {
            profile: *profile,
            started_at_ms,
            finished_at_ms,
            planned_requests: planned,
            executed_requests: executed,
            achieved_rps,
            scale_factor,
            p95_latency_ms,
        })
    }

    /// Achieved rps within ±30% of target.
    pub fn within_rps_tolerance(target_rps: f64, achieved_rps: f64) -> bool {
        if target_rps <= 0.0 {
            return true;
        }
        let tolerance = RPS_TOL_PCT * target_rps;
        (target_rps - tolerance..=target_rps + tolerance).contains(&achieved_rps)
    }
}

/// Per-request latency drawn from the seeded RNG: a 5-50ms body with a
/// thin slow tail. Deterministic for a given RNG state.
fn synthetic_latencies(count: u64, rng: &SeededRng) -> Vec<f64> {
    (0..count)
        .map(|_| {
            let body = 5.0 + rng.random() * 45.0;
            if rng.random() < 0.02 {
                body + 200.0 + rng.random() * 300.0
            } else {
                body
            }
        })
        .collect()
}

/// p95 over the sample, nearest-rank on the sorted values.
pub fn p95(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = ((sorted.len() as f64) * 0.95).ceil() as usize;
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}
