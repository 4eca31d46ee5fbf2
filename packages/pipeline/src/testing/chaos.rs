//! Chaos plumbing: deterministic fault schedules, budgets and traces.
//!
//! A schedule is fully determined by (seed, total_steps, fault_rate,
//! allowed actions); two generations with the same inputs are identical,
//! which is what makes failed chaos runs replayable.

use serde_json::{json, Map, Value};

use crate::common::rng::SeededRng;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultAction {
    /// No fault, the step succeeds.
    Skip,
    Fail,
    Timeout,
    Truncate,
    ClockJumpForward,
    ClockJumpBackward,
}

impl FaultAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultAction::Skip => "skip",
            FaultAction::Fail => "fail",
            FaultAction::Timeout => "timeout",
            FaultAction::Truncate => "truncate",
            FaultAction::ClockJumpForward => "clock_jump_fwd",
            FaultAction::ClockJumpBackward => "clock_jump_bwd",
        }
    }

    pub fn is_clock_jump(&self) -> bool {
        matches!(self, FaultAction::ClockJumpForward | FaultAction::ClockJumpBackward)
    }
}

/// A single fault event in the schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledFault {
    pub step: u64,
    pub action: FaultAction,
    pub params: Value,
}

impl ScheduledFault {
    fn skip(step: u64) -> Self {
        Self {
            step,
            action: FaultAction::Skip,
            params: Value::Null,
        }
    }
}

/// Deterministic fault schedule generated from a seed.
#[derive(Debug, Clone)]
pub struct FaultSchedule {
    seed: u64,
    events: Vec<ScheduledFault>,
}

impl FaultSchedule {
    pub fn generate(
        seed: u64,
        total_steps: u64,
        fault_rate: f64,
        allowed: &[FaultAction],
    ) -> Self {
        let rng = SeededRng::new(seed);
        let allowed = if allowed.is_empty() {
            &[FaultAction::Fail, FaultAction::Timeout][..]
        } else {
            allowed
        };

        let mut events = Vec::with_capacity(total_steps as usize);
        for step in 0..total_steps {
            if rng.random() < fault_rate {
                let action = *rng.choose(allowed);
                let params = match action {
                    FaultAction::Timeout => {
                        json!({"delay_ms": rng.randint(100, 5000)})
                    }
                    FaultAction::ClockJumpForward | FaultAction::ClockJumpBackward => {
                        json!({"delta_ms": rng.randint(10, 500)})
                    }
                    FaultAction::Truncate => {
                        json!({"truncate_pct": 0.1 + rng.random() * 0.8})
                    }
                    _ => Value::Null,
                };
                events.push(ScheduledFault {
                    step,
                    action,
                    params,
                });
            } else {
                events.push(ScheduledFault::skip(step));
            }
        }

        Self { seed, events }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn total_steps(&self) -> u64 {
        self.events.len() as u64
    }

    pub fn events(&self) -> &[ScheduledFault] {
        &self.events
    }

    pub fn fault_count(&self) -> u64 {
        self.events
            .iter()
            .filter(|e| e.action != FaultAction::Skip)
            .count() as u64
    }

    pub fn action_at(&self, step: u64) -> ScheduledFault {
        self.events
            .get(step as usize)
            .cloned()
            .unwrap_or_else(|| ScheduledFault::skip(step))
    }
}

/// Limits on fault injection that keep chaos runs meaningful.
#[derive(Debug, Clone, Copy)]
pub struct FaultBudget {
    /// Max fraction of steps that can be faults.
    pub max_fault_rate: f64,
    /// Max consecutive faults.
    pub max_burst: u64,
    /// Max clock anomalies per run.
    pub max_clock_jumps: u64,
}

impl Default for FaultBudget {
    fn default() -> Self {
        Self {
            max_fault_rate: 0.5,
            max_burst: 5,
            max_clock_jumps: 3,
        }
    }
}

impl FaultBudget {
    pub fn validate(&self, schedule: &FaultSchedule) -> bool {
        let events = schedule.events();
        if events.is_empty() {
            return true;
        }

        let fault_rate = schedule.fault_count() as f64 / events.len() as f64;
        if fault_rate > self.max_fault_rate {
            return false;
        }

        let mut consecutive = 0u64;
        for event in events {
            if event.action != FaultAction::Skip {
                consecutive += 1;
                if consecutive > self.max_burst {
                    return false;
                }
            } else {
                consecutive = 0;
            }
        }

        let clock_jumps = events.iter().filter(|e| e.action.is_clock_jump()).count() as u64;
        clock_jumps <= self.max_clock_jumps
    }
}

/// Per-step record of what actually happened.
#[derive(Debug, Clone)]
pub struct TraceEntry {
    pub step: u64,
    pub action: FaultAction,
    pub clock_ms: u64,
    pub outcome: String,
    pub detail: Value,
}

/// Replayable execution trace: seed plus per-step decisions.
#[derive(Debug, Clone)]
pub struct ChaosTrace {
    pub seed: u64,
    pub total_steps: u64,
    pub fault_count: u64,
    pub entries: Vec<TraceEntry>,
}

impl ChaosTrace {
    pub fn new(schedule: &FaultSchedule) -> Self {
        Self {
            seed: schedule.seed(),
            total_steps: schedule.total_steps(),
            fault_count: schedule.fault_count(),
            entries: Vec::new(),
        }
    }

    pub fn add(&mut self, step: u64, action: FaultAction, clock_ms: u64, outcome: &str, detail: Value) {
        self.entries.push(TraceEntry {
            step,
            action,
            clock_ms,
            outcome: outcome.to_string(),
            detail,
        });
    }

    /// Minimal info needed to reproduce this run.
    pub fn replay_info(&self) -> Value {
        let failed_steps: Vec<u64> = self
            .entries
            .iter()
            .filter(|e| e.outcome == "invariant_violation")
            .map(|e| e.step)
            .collect();
        let mut map = Map::new();
        map.insert("seed".to_string(), json!(self.seed));
        map.insert("total_steps".to_string(), json!(self.total_steps));
        map.insert("fault_count".to_string(), json!(self.fault_count));
        map.insert("entries_count".to_string(), json!(self.entries.len()));
        map.insert("failed_steps".to_string(), json!(failed_steps));
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_ACTIONS: [FaultAction; 5] = [
        FaultAction::Fail,
        FaultAction::Timeout,
        FaultAction::Truncate,
        FaultAction::ClockJumpForward,
        FaultAction::ClockJumpBackward,
    ];

    #[test]
    fn same_seed_same_schedule() {
        let a = FaultSchedule::generate(1337, 100, 0.3, &ALL_ACTIONS);
        let b = FaultSchedule::generate(1337, 100, 0.3, &ALL_ACTIONS);
        assert_eq!(a.events(), b.events());
    }

    #[test]
    fn different_seed_different_schedule() {
        let a = FaultSchedule::generate(1, 200, 0.3, &ALL_ACTIONS);
        let b = FaultSchedule::generate(2, 200, 0.3, &ALL_ACTIONS);
        assert_ne!(a.events(), b.events());
    }

    #[test]
    fn fault_rate_zero_is_all_skips() {
        let schedule = FaultSchedule::generate(7, 50, 0.0, &ALL_ACTIONS);
        assert_eq!(schedule.fault_count(), 0);
        assert_eq!(schedule.total_steps(), 50);
    }

    #[test]
    fn fault_rate_one_is_all_faults() {
        let schedule = FaultSchedule::generate(7, 50, 1.0, &[FaultAction::Fail]);
        assert_eq!(schedule.fault_count(), 50);
        assert!(schedule.events().iter().all(|e| e.action == FaultAction::Fail));
    }

    #[test]
    fn timeout_faults_carry_delay_params() {
        let schedule = FaultSchedule::generate(21, 200, 1.0, &[FaultAction::Timeout]);
        for event in schedule.events() {
            let delay = event.params["delay_ms"].as_i64().unwrap();
            assert!((100..=5000).contains(&delay));
        }
    }

    #[test]
    fn action_at_beyond_schedule_is_skip() {
        let schedule = FaultSchedule::generate(1, 10, 0.5, &ALL_ACTIONS);
        assert_eq!(schedule.action_at(999).action, FaultAction::Skip);
    }

    #[test]
    fn budget_accepts_empty_and_light_schedules() {
        let budget = FaultBudget::default();
        let empty = FaultSchedule::generate(1, 0, 0.5, &ALL_ACTIONS);
        assert!(budget.validate(&empty));
        let light = FaultSchedule::generate(1, 100, 0.1, &[FaultAction::Fail]);
        assert!(budget.validate(&light));
    }

    #[test]
    fn budget_rejects_excessive_fault_rate() {
        let budget = FaultBudget::default();
        let heavy = FaultSchedule::generate(1, 100, 1.0, &[FaultAction::Fail]);
        assert!(!budget.validate(&heavy));
    }

    #[test]
    fn budget_rejects_long_bursts() {
        let budget = FaultBudget {
            max_fault_rate: 1.0,
            max_burst: 3,
            max_clock_jumps: 1000,
        };
        let bursty = FaultSchedule::generate(1, 10, 1.0, &[FaultAction::Fail]);
        assert!(!budget.validate(&bursty));
    }

    #[test]
    fn trace_replay_info_lists_violations() {
        let schedule = FaultSchedule::generate(9, 5, 0.5, &ALL_ACTIONS);
        let mut trace = ChaosTrace::new(&schedule);
        trace.add(0, FaultAction::Skip, 1000, "ok", Value::Null);
        trace.add(1, FaultAction::Fail, 1001, "invariant_violation", Value::Null);

        let info = trace.replay_info();
        assert_eq!(info["seed"], serde_json::json!(9));
        assert_eq!(info["entries_count"], serde_json::json!(2));
        assert_eq!(info["failed_steps"], serde_json::json!([1]));
    }
}
