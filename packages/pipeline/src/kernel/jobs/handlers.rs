//! Job dispatch: kind -> pipeline stage.
//!
//! The worker hands every claimed job to a `JobHandler`; the pipeline
//! implementation drives the extract and validate stages through the
//! operational guard and records incidents for invalid invoices. External
//! state stays behind the ports; a failed stage surfaces as an error and
//! the worker owns the job-row transition.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::guard::{CallOutcome, Dependency};
use crate::incident::{
    ActionRouter, ActionSpec, IncidentSeverity, IncidentSpec, RouteContext, UpsertIncident,
};
use crate::invoice::validation::{enforce_validation, EnforcementAction, EnforcementDecision};
use crate::kernel::kernel::PipelineKernel;

use super::job::{Job, JobKind};

/// Handles one claimed job and produces its result map.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<Value>;
}

pub struct PipelineHandler {
    kernel: Arc<PipelineKernel>,
    router: ActionRouter,
}

impl PipelineHandler {
    pub fn new(kernel: Arc<PipelineKernel>) -> Self {
        Self {
            kernel,
            router: ActionRouter::default(),
        }
    }

    fn payload_str<'a>(job: &'a Job, key: &str) -> Option<&'a str> {
        job.payload.as_ref()?.get(key)?.as_str()
    }

    fn tenant_id(job: &Job) -> String {
        Self::payload_str(job, "tenant_id")
            .unwrap_or("default")
            .to_string()
    }

    async fn run_extract(&self, job: &Job) -> Result<Value> {
        let storage_ref = Self::payload_str(job, "storage_ref")
            .map(str::to_string)
            .unwrap_or_else(|| job.invoice_ref.clone());
        let mime = Self::payload_str(job, "mime").unwrap_or("application/pdf").to_string();
        let hints = job
            .payload
            .as_ref()
            .and_then(|p| p.get("hints"))
            .cloned()
            .unwrap_or(Value::Null);

        let storage = self.kernel.storage.clone();
        let bytes = match self
            .kernel
            .guard
            .wrapper(Dependency::Storage, false)
            .invoke(|| {
                let storage = storage.clone();
                let storage_ref = storage_ref.clone();
                async move { storage.get_bytes(&storage_ref).await }
            })
            .await
        {
            CallOutcome::Ok(bytes) => bytes,
            CallOutcome::CircuitOpen => return Err(anyhow!("storage circuit open")),
            CallOutcome::FailOpen => {
                // No degraded path for a missing document.
                return Err(anyhow!("storage unavailable, fail-open exhausted"));
            }
            CallOutcome::Err(e) => return Err(e),
        };

        let extractor = self.kernel.extractor.clone();
        let extracted = match self
            .kernel
            .guard
            .wrapper(Dependency::Extractor, false)
            .invoke(|| {
                let extractor = extractor.clone();
                let bytes = bytes.clone();
                let mime = mime.clone();
                let hints = hints.clone();
                async move { extractor.extract(&bytes, &mime, &hints).await }
            })
            .await
        {
            CallOutcome::Ok(extracted) => extracted,
            CallOutcome::CircuitOpen => return Err(anyhow!("extractor circuit open")),
            CallOutcome::FailOpen => return Err(anyhow!("extractor unavailable, fail-open exhausted")),
            CallOutcome::Err(e) => return Err(e),
        };

        info!(
            job_id = %job.id,
            invoice_ref = %job.invoice_ref,
            vendor = extracted.vendor.as_deref().unwrap_or("unknown"),
            "extraction complete"
        );
        Ok(serde_json::to_value(&extracted)?)
    }

    /// Canonical invoice map for validation: either supplied directly in
    /// the payload or assembled from an extraction result.
    fn canonical_invoice(job: &Job, extracted: Option<&Value>) -> Result<Value> {
        if let Some(invoice) = job.payload.as_ref().and_then(|p| p.get("invoice")) {
            return Ok(invoice.clone());
        }

        let extracted = extracted
            .ok_or_else(|| anyhow!("job {} has neither invoice payload nor extraction", job.id))?;

        let mut canonical = extracted
            .get("extra")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_else(Map::new);
        if let Some(totals) = extracted.get("totals") {
            if !totals.is_null() {
                canonical.insert("totals".to_string(), totals.clone());
            }
        }
        if let Some(lines) = extracted.get("line_items") {
            if lines.as_array().is_some_and(|l| !l.is_empty()) {
                canonical.insert("lines".to_string(), lines.clone());
            }
        }
        Ok(Value::Object(canonical))
    }

    async fn run_validate(&self, job: &Job, extracted: Option<&Value>) -> Result<Value> {
        let invoice = Self::canonical_invoice(job, extracted)?;
        let legacy_errors: Vec<String> = job
            .payload
            .as_ref()
            .and_then(|p| p.get("legacy_errors"))
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let decision = enforce_validation(
            &invoice,
            &legacy_errors,
            Some(&job.invoice_ref),
            &self.kernel.enforcement_config,
            &self.kernel.shadow_config,
            self.kernel.metrics.as_ref(),
            &self.kernel.rng,
        );

        if decision.action != EnforcementAction::Pass {
            self.record_validation_incident(job, &decision).await?;
        }

        let tariff = self.lookup_tariff(job, &invoice).await?;

        let mut result = decision.to_value();
        if let (Some(object), Some(unit_price)) = (result.as_object_mut(), tariff) {
            object.insert("tariff_unit_price".to_string(), json!(unit_price));
        }
        Ok(result)
    }

    /// Pure-read tariff enrichment. A miss or a dead lookup backend is
    /// not a validation failure; it becomes a RetryLookup incident and
    /// the validation result ships without the price.
    async fn lookup_tariff(&self, job: &Job, invoice: &Value) -> Result<Option<f64>> {
        let tariff_code = match invoice.get("tariff_code").and_then(Value::as_str) {
            Some(code) => code.to_string(),
            None => return Ok(None),
        };
        let period = Self::payload_str(job, "period").unwrap_or("").to_string();

        let lookup = self.kernel.tariff_lookup.clone();
        let outcome = self
            .kernel
            .guard
            .wrapper(Dependency::TariffLookup, false)
            .invoke(|| {
                let lookup = lookup.clone();
                let tariff_code = tariff_code.clone();
                let period = period.clone();
                async move { lookup.unit_price(&tariff_code, &period).await }
            })
            .await;

        let (price, status) = match outcome {
            CallOutcome::Ok(Some(price)) => return Ok(Some(price)),
            CallOutcome::Ok(None) => (None, "not_found"),
            CallOutcome::CircuitOpen => (None, "circuit_open"),
            CallOutcome::FailOpen => (None, "failed"),
            CallOutcome::Err(e) => {
                warn!(job_id = %job.id, error = %e, "tariff lookup failed");
                (None, "failed")
            }
        };

        let spec = IncidentSpec {
            primary_flag: "TARIFF_LOOKUP_FAILED".to_string(),
            category: "LOOKUP".to_string(),
            severity: IncidentSeverity::S3,
            action: ActionSpec {
                kind: "RETRY_LOOKUP".to_string(),
                owner: "tariff".to_string(),
                code: "TARIFF_LOOKUP_FAILED".to_string(),
                hint_text: None,
            },
            all_flags: vec!["TARIFF_LOOKUP_FAILED".to_string()],
        };
        let lookup_evidence = json!({
            "tariff_status": status,
            "tariff_source": "tariff_lookup",
        });
        self.record_incident(job, spec, None, Some(lookup_evidence))
            .await?;
        Ok(price)
    }

    /// Invalid invoices surface as incidents instead of mutating any
    /// external invoice state.
    async fn record_validation_incident(
        &self,
        job: &Job,
        decision: &EnforcementDecision,
    ) -> Result<()> {
        let first_error = match decision.errors.first() {
            Some(error) => error,
            None => return Ok(()),
        };
        let primary_flag = decision
            .blocker_codes
            .first()
            .map(|c| c.as_str())
            .unwrap_or(first_error.code.as_str())
            .to_string();
        let severity = if decision.action == EnforcementAction::Block {
            IncidentSeverity::S2
        } else {
            IncidentSeverity::S3
        };

        let spec = IncidentSpec {
            primary_flag: primary_flag.clone(),
            category: "VALIDATION".to_string(),
            severity,
            action: ActionSpec {
                kind: "USER_FIX".to_string(),
                owner: "extraction".to_string(),
                code: first_error.code.as_str().to_string(),
                hint_text: Some(first_error.message.clone()),
            },
            all_flags: decision
                .errors
                .iter()
                .map(|e| e.code.as_str().to_string())
                .collect(),
        };

        let message = first_error.message.clone();
        self.record_incident(
            job,
            spec,
            Some(json!({"validation_action": decision.action.as_str(), "message": message})),
            None,
        )
        .await
    }

    /// Route, upsert, and for fresh BugReports deliver the issue payload.
    async fn record_incident(
        &self,
        job: &Job,
        spec: IncidentSpec,
        details: Option<Value>,
        lookup_evidence: Option<Value>,
    ) -> Result<()> {
        let tenant_id = Self::tenant_id(job);
        let provider = Self::payload_str(job, "provider").unwrap_or("unknown").to_string();
        let period = Self::payload_str(job, "period").unwrap_or("").to_string();

        let key = crate::common::hash::dedupe_key(
            &provider,
            &job.invoice_ref,
            &spec.primary_flag,
            &spec.category,
            &spec.action.code,
            &period,
        );

        let now = self.kernel.clock.now();
        let ctx = RouteContext {
            provider: provider.clone(),
            invoice_id: job.invoice_ref.clone(),
            period: period.clone(),
            dedupe_key: key,
            calc_context: None,
            lookup_evidence: lookup_evidence.clone(),
        };
        let routed = self.router.route(&spec, &ctx, now);

        let mut builder_details = details;
        if let Some(evidence) = lookup_evidence {
            builder_details = Some(match builder_details {
                Some(mut existing) => {
                    if let Some(object) = existing.as_object_mut() {
                        object.insert("lookup_evidence".to_string(), evidence);
                    }
                    existing
                }
                None => json!({"lookup_evidence": evidence}),
            });
        }

        let mut input = UpsertIncident::builder()
            .tenant_id(tenant_id)
            .trace_id(job.id.to_string())
            .provider(provider)
            .invoice_id(job.invoice_ref.clone())
            .period(period)
            .primary_flag(spec.primary_flag.clone())
            .category(spec.category.clone())
            .severity(spec.severity)
            .action_owner(spec.action.owner.clone())
            .action_code(spec.action.code.clone())
            .all_flags(spec.all_flags.clone())
            .build();
        input.details = builder_details;

        let (incident_id, is_new) = self.kernel.incidents.upsert(&input, &routed, now).await?;

        // Fresh BugReports go out to the tracker; delivery is a write,
        // so the wrapper gives it a single attempt.
        if is_new {
            if let Some(issue) = routed.payload.as_ref().and_then(|p| p.get("issue")) {
                let sink = self.kernel.issue_sink.clone();
                let issue = issue.clone();
                let outcome = self
                    .kernel
                    .guard
                    .wrapper(Dependency::IssueSink, true)
                    .invoke(|| {
                        let sink = sink.clone();
                        let issue = issue.clone();
                        async move { sink.submit(&issue).await }
                    })
                    .await;
                if !outcome.is_ok() {
                    warn!(incident_id = %incident_id, "issue delivery failed");
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandler for PipelineHandler {
    async fn handle(&self, job: &Job) -> Result<Value> {
        match job.kind {
            JobKind::Extract => self.run_extract(job).await,
            JobKind::Validate => self.run_validate(job, None).await,
            JobKind::ExtractAndValidate => {
                let extracted = self.run_extract(job).await?;
                let decision = self.run_validate(job, Some(&extracted)).await?;
                Ok(json!({
                    "extraction": extracted,
                    "validation": decision,
                }))
            }
        }
    }
}
