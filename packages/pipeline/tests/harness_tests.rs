//! End-to-end harness scenarios: load determinism across engine
//! instances, injector cleanup, write-path-safety aggregation and the
//! guard/wrapper/metrics-capture loop. No external services involved.

use std::sync::Arc;

use chrono::TimeZone;
use pipeline_core::common::clock::{FakeClock, SharedClock};
use pipeline_core::common::metrics::{names, BaseMetricsSink, InMemoryMetrics};
use pipeline_core::common::rng::SeededRng;
use pipeline_core::guard::{
    CircuitBreakerRegistry, Dependency, DependencyWrapper, GuardConfig, WrapperPolicy,
};
use pipeline_core::testing::{
    FaultInjector, FaultType, InjectionConfig, LoadHarness, LoadProfile, MetricsCapture,
    ScenarioRunner, StressReport,
};

fn fake_clock() -> Arc<FakeClock> {
    Arc::new(FakeClock::new(
        chrono::Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap(),
    ))
}

fn fresh_runner() -> ScenarioRunner {
    let clock: SharedClock = fake_clock();
    ScenarioRunner::new(FaultInjector::shared(clock))
}

#[test]
fn load_determinism_across_engine_instances() {
    // Seed 1337, Baseline profile, DB_TIMEOUT at 10%: two independent
    // engines must produce identical counts and the same breaker verdict.
    let profile = LoadProfile::baseline();
    let injection = InjectionConfig::fault(FaultType::DbTimeout, 0.1, 1337);

    let run = |runner: &ScenarioRunner| {
        let harness = LoadHarness::new(fake_clock());
        let rng = SeededRng::new(1337);
        let load = harness.run_dry(&profile, None, &rng).unwrap();
        let scenario = runner.run_scenario(
            "baseline_db_timeout",
            injection,
            load.executed_requests,
            false,
        );
        (
            load.executed_requests,
            scenario.success_count(),
            scenario.failure_count(),
            scenario.cb_opened,
            load.p95_latency_ms,
        )
    };

    let a = run(&fresh_runner());
    let b = run(&fresh_runner());
    assert_eq!(a, b);
}

#[test]
fn scenario_counts_shift_with_seed_but_not_with_instance() {
    let runner = fresh_runner();
    let base = runner.run_scenario(
        "s",
        InjectionConfig::fault(FaultType::External5xx, 0.5, 1337),
        500,
        false,
    );
    let same_seed = fresh_runner().run_scenario(
        "s",
        InjectionConfig::fault(FaultType::External5xx, 0.5, 1337),
        500,
        false,
    );
    let other_seed = fresh_runner().run_scenario(
        "s",
        InjectionConfig::fault(FaultType::External5xx, 0.5, 7331),
        500,
        false,
    );

    assert_eq!(base.outcomes, same_seed.outcomes);
    assert_ne!(base.outcomes, other_seed.outcomes);
}

#[test]
fn every_scenario_leaves_the_injector_clean() {
    let runner = fresh_runner();
    for fault in [
        FaultType::DbTimeout,
        FaultType::External5xx,
        FaultType::Killswitch,
        FaultType::RateLimit,
        FaultType::GuardError,
    ] {
        runner.run_scenario("cleanup", InjectionConfig::fault(fault, 1.0, 1), 50, false);
        assert!(
            runner.injector().is_clean(),
            "injector left dirty after {fault:?}"
        );
    }
}

#[test]
fn write_policy_keeps_report_write_path_safe() {
    let runner = fresh_runner();
    let reads = runner.run_scenario(
        "reads_db_timeout",
        InjectionConfig::fault(FaultType::DbTimeout, 0.5, 1337),
        200,
        false,
    );
    let writes = runner.run_scenario(
        "writes_db_timeout",
        InjectionConfig::fault(FaultType::DbTimeout, 0.5, 1337),
        200,
        true,
    );

    let report = StressReport::from_results(&[reads.clone(), writes.clone()]);
    assert!(report.write_path_safe(), "writes never retry by policy");
    assert!(reads.retry_count > 0);
    assert_eq!(writes.retry_count, 0);

    // Same inputs, fresh engine: identical report bytes.
    let runner2 = fresh_runner();
    let reads2 = runner2.run_scenario(
        "reads_db_timeout",
        InjectionConfig::fault(FaultType::DbTimeout, 0.5, 1337),
        200,
        false,
    );
    let writes2 = runner2.run_scenario(
        "writes_db_timeout",
        InjectionConfig::fault(FaultType::DbTimeout, 0.5, 1337),
        200,
        true,
    );
    let report2 = StressReport::from_results(&[reads2, writes2]);
    assert_eq!(report.to_json(), report2.to_json());
}

#[tokio::test(start_paused = true)]
async fn wrapper_failures_open_breaker_and_show_in_capture() {
    let clock: SharedClock = fake_clock();
    let metrics = Arc::new(InMemoryMetrics::new());
    let config = Arc::new(GuardConfig {
        cb_error_threshold_count: 4,
        wrapper_retry_max_attempts_default: 2,
        ..GuardConfig::default()
    });
    let breakers = Arc::new(CircuitBreakerRegistry::new(
        config.clone(),
        clock,
        metrics.clone(),
    ));

    let capture = MetricsCapture::start(metrics.as_ref());

    let policy = WrapperPolicy::for_dependency(
        &config,
        Dependency::Extractor,
        false,
        metrics.as_ref(),
    );
    let wrapper = DependencyWrapper::new(
        policy,
        breakers.clone(),
        metrics.clone(),
        Arc::new(SeededRng::new(1337)),
    );

    // Two invocations, two attempts each: four failures fill the window.
    for _ in 0..2 {
        let outcome: pipeline_core::guard::CallOutcome<()> = wrapper
            .invoke(|| async { Err(anyhow::anyhow!("backend 500")) })
            .await;
        assert!(!outcome.is_ok());
    }

    let delta = capture.delta(metrics.as_ref());
    assert_eq!(
        delta.counter(
            names::DEPENDENCY_CALL_TOTAL,
            &[("dependency", "extractor"), ("outcome", "error")]
        ),
        4.0
    );
    assert_eq!(
        delta.counter(
            names::DEPENDENCY_CALL_TOTAL,
            &[("dependency", "extractor"), ("outcome", "fail_open")]
        ),
        2.0
    );
    assert_eq!(
        delta.counter(names::DEPENDENCY_RETRY_TOTAL, &[("dependency", "extractor")]),
        2.0
    );
    // 4 error attempts + 2 fail-open outcomes in the call counter.
    assert_eq!(delta.retry_amplification(), 2.0 / 6.0);
    assert!(delta.check_invariants("wrapper_cb", 1337).is_empty());

    // The window filled with failures; the breaker must be open now.
    assert_eq!(
        metrics
            .snapshot()
            .gauge(names::CIRCUIT_BREAKER_STATE, &[("dependency", "extractor")]),
        2.0
    );
}
