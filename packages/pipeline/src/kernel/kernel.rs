// PipelineKernel - core infrastructure with all dependencies.
//
// One explicit runtime object constructed at startup and passed as Arc;
// there is no module-level ambient state. The metrics sink, fault
// injector and guard registries all live here so tests can build a fully
// isolated runtime per case.

use std::sync::Arc;

use anyhow::Result;
use sqlx::PgPool;

use crate::common::clock::{SharedClock, SystemClock};
use crate::common::metrics::{InMemoryMetrics, SharedMetrics};
use crate::common::rng::SeededRng;
use crate::guard::{
    Dependency, DriftAction, DriftGuard, Endpoint, GuardConfig, GuardDecision, GuardDenyReason,
    OperationalGuard, RiskClass, TenantMode,
};
use crate::incident::IncidentRepository;
use crate::invoice::validation::{EnforcementConfig, ShadowConfig};
use crate::kernel::traits::{BaseExtractor, BaseIssueSink, BaseStorage, BaseTariffLookup};
use crate::testing::fault_injection::FaultInjector;

use super::jobs::{Job, JobKind, JobQueue};

/// PipelineKernel holds every dependency the pipeline core needs.
pub struct PipelineKernel {
    pub db_pool: PgPool,
    pub storage: Arc<dyn BaseStorage>,
    pub extractor: Arc<dyn BaseExtractor>,
    pub tariff_lookup: Arc<dyn BaseTariffLookup>,
    pub issue_sink: Arc<dyn BaseIssueSink>,
    pub metrics: SharedMetrics,
    pub clock: SharedClock,
    pub rng: Arc<SeededRng>,
    pub guard_config: Arc<GuardConfig>,
    pub guard: OperationalGuard,
    pub jobs: Arc<JobQueue>,
    pub incidents: IncidentRepository,
    pub enforcement_config: EnforcementConfig,
    pub shadow_config: ShadowConfig,
    pub fault_injector: Arc<FaultInjector>,
    /// Baseline comparison runs only when a baseline was frozen at
    /// deploy time.
    pub drift_guard: Option<DriftGuard>,
    pub drift_mode: TenantMode,
}

impl PipelineKernel {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db_pool: PgPool,
        storage: Arc<dyn BaseStorage>,
        extractor: Arc<dyn BaseExtractor>,
        tariff_lookup: Arc<dyn BaseTariffLookup>,
        issue_sink: Arc<dyn BaseIssueSink>,
        metrics: SharedMetrics,
        clock: SharedClock,
        rng: Arc<SeededRng>,
        guard_config: Arc<GuardConfig>,
        enforcement_config: EnforcementConfig,
        shadow_config: ShadowConfig,
    ) -> Self {
        let guard = OperationalGuard::new(
            guard_config.clone(),
            clock.clone(),
            metrics.clone(),
            rng.clone(),
        );
        let fault_injector = Arc::new(FaultInjector::new(clock.clone()));
        Self {
            jobs: Arc::new(JobQueue::new(db_pool.clone())),
            incidents: IncidentRepository::new(db_pool.clone()),
            db_pool,
            storage,
            extractor,
            tariff_lookup,
            issue_sink,
            metrics,
            clock,
            rng,
            guard_config,
            guard,
            enforcement_config,
            shadow_config,
            fault_injector,
            drift_guard: None,
            drift_mode: TenantMode::Shadow,
        }
    }

    /// Install a frozen drift baseline; submissions are compared against
    /// it in `drift_mode`.
    pub fn with_drift_guard(mut self, drift_guard: DriftGuard, mode: TenantMode) -> Self {
        self.drift_guard = Some(drift_guard);
        self.drift_mode = mode;
        self
    }

    /// Kernel with mock ports, an in-memory metrics sink and env-free
    /// configs. The pool is lazy, so cases that never touch the database
    /// need no server.
    pub fn for_tests(db_pool: PgPool, seed: u64) -> Self {
        use crate::kernel::test_dependencies::TestDependencies;

        let deps = TestDependencies::new();
        Self::new(
            db_pool,
            deps.storage,
            deps.extractor,
            deps.tariff_lookup,
            deps.issue_sink,
            Arc::new(InMemoryMetrics::new()),
            Arc::new(SystemClock::new()),
            Arc::new(SeededRng::new(seed)),
            Arc::new(GuardConfig::default()),
            EnforcementConfig::default(),
            ShadowConfig::default(),
        )
    }
}

/// Outcome of a pipeline submission.
#[derive(Debug)]
pub enum SubmitOutcome {
    Accepted { job: Job, created: bool },
    Denied(GuardDenyReason),
    /// 503-equivalent from the drift guard in enforce mode.
    DriftBlocked,
}

/// Front door for submissions: guard admission, then idempotent enqueue.
pub struct PipelineService {
    kernel: Arc<PipelineKernel>,
}

impl PipelineService {
    pub fn new(kernel: Arc<PipelineKernel>) -> Self {
        Self { kernel }
    }

    /// The dependency a job of this kind will lean on; admission
    /// prechecks that breaker.
    fn primary_dependency(kind: JobKind) -> Dependency {
        match kind {
            JobKind::Extract | JobKind::ExtractAndValidate => Dependency::Extractor,
            JobKind::Validate => Dependency::DbPrimary,
        }
    }

    pub async fn submit(
        &self,
        tenant_id: &str,
        invoice_ref: &str,
        kind: JobKind,
        payload: Option<serde_json::Value>,
    ) -> Result<SubmitOutcome> {
        let decision = self.kernel.guard.check_admission(
            Endpoint::Import,
            tenant_id,
            Self::primary_dependency(kind),
        );
        if let GuardDecision::Deny(reason) = decision {
            return Ok(SubmitOutcome::Denied(reason));
        }

        if let Some(drift_guard) = &self.kernel.drift_guard {
            let (action, _) = drift_guard.check(
                "/import",
                "POST",
                tenant_id,
                self.kernel.drift_mode,
                RiskClass::High,
                self.kernel.clock.monotonic_now_ms(),
            );
            if action == DriftAction::Block {
                return Ok(SubmitOutcome::DriftBlocked);
            }
        }

        let (job, created) = self
            .kernel
            .jobs
            .enqueue(invoice_ref, kind, payload, true)
            .await?;
        Ok(SubmitOutcome::Accepted { job, created })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lazy_pool() -> PgPool {
        PgPool::connect_lazy("postgres://pipeline@localhost/pipeline_test").expect("lazy pool")
    }

    #[tokio::test]
    async fn kernel_for_tests_wires_defaults() {
        let kernel = PipelineKernel::for_tests(lazy_pool(), 1337);
        assert_eq!(kernel.rng.seed(), 1337);
        assert_eq!(kernel.guard_config.schema_version, "1.0");
    }

    #[tokio::test]
    async fn submit_denied_by_killswitch_never_reaches_queue() {
        let mut kernel = PipelineKernel::for_tests(lazy_pool(), 1);
        let config = Arc::new(GuardConfig {
            killswitch_global_import_disabled: true,
            ..GuardConfig::default()
        });
        kernel.guard = OperationalGuard::new(
            config.clone(),
            kernel.clock.clone(),
            kernel.metrics.clone(),
            kernel.rng.clone(),
        );
        kernel.guard_config = config;

        let service = PipelineService::new(Arc::new(kernel));
        // The pool is lazy and unreachable; a denied submission must not
        // touch it.
        let outcome = service
            .submit("tenant-a", "inv-1", JobKind::Extract, None)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            SubmitOutcome::Denied(GuardDenyReason::KillSwitched)
        ));
    }

    #[tokio::test]
    async fn submit_blocked_by_stale_drift_baseline() {
        use crate::guard::drift::{build_baseline, HashDriftInputProvider};

        let kernel = PipelineKernel::for_tests(lazy_pool(), 1);
        let drift_guard = DriftGuard::new(
            kernel.guard_config.clone(),
            Some(build_baseline("stale-config-hash", &[], 1)),
            Arc::new(HashDriftInputProvider),
            kernel.metrics.clone(),
        );
        let kernel = kernel.with_drift_guard(drift_guard, TenantMode::Enforce);

        let service = PipelineService::new(Arc::new(kernel));
        let outcome = service
            .submit("tenant-a", "inv-1", JobKind::Extract, None)
            .await
            .unwrap();
        assert!(matches!(outcome, SubmitOutcome::DriftBlocked));
    }

    #[test]
    fn primary_dependency_by_kind() {
        assert_eq!(
            PipelineService::primary_dependency(JobKind::Extract),
            Dependency::Extractor
        );
        assert_eq!(
            PipelineService::primary_dependency(JobKind::Validate),
            Dependency::DbPrimary
        );
    }
}
