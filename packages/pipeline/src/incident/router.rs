//! Action routing for incidents.
//!
//! Pure function of (incident, context, now): classifies the action type
//! and produces the routed payload plus the effective status. No side
//! effects; persistence is the repository's job.

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};

use super::issue_payload::IssuePayloadBuilder;
use super::model::{IncidentActionType, IncidentSeverity, IncidentStatus};

pub const DEFAULT_RETRY_DELAY_MINUTES: i64 = 30;

/// Action block of a canonical incident record.
#[derive(Debug, Clone)]
pub struct ActionSpec {
    /// Wire form of the action type; unknown values route as UserFix.
    pub kind: String,
    pub owner: String,
    pub code: String,
    pub hint_text: Option<String>,
}

/// Canonical incident record as produced by the detection layer.
#[derive(Debug, Clone)]
pub struct IncidentSpec {
    pub primary_flag: String,
    pub category: String,
    pub severity: IncidentSeverity,
    pub action: ActionSpec,
    pub all_flags: Vec<String>,
}

/// Routing context: identity plus optional forensic inputs.
#[derive(Debug, Clone, Default)]
pub struct RouteContext {
    pub provider: String,
    pub invoice_id: String,
    pub period: String,
    pub dedupe_key: String,
    pub calc_context: Option<Value>,
    pub lookup_evidence: Option<Value>,
}

/// Router output; `payload` is JSON-serializable as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedAction {
    pub action_type: IncidentActionType,
    pub status: IncidentStatus,
    pub payload: Option<Value>,
}

impl RoutedAction {
    pub fn to_value(&self) -> Value {
        json!({
            "action_type": self.action_type.as_str(),
            "status": self.status.as_str(),
            "payload": self.payload,
        })
    }
}

pub struct ActionRouter {
    issue_builder: IssuePayloadBuilder,
    retry_delay_minutes: i64,
}

impl Default for ActionRouter {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_DELAY_MINUTES)
    }
}

impl ActionRouter {
    pub fn new(retry_delay_minutes: i64) -> Self {
        Self {
            issue_builder: IssuePayloadBuilder::new(),
            retry_delay_minutes,
        }
    }

    /// Route one incident. `now` is injected for determinism.
    pub fn route(
        &self,
        incident: &IncidentSpec,
        ctx: &RouteContext,
        now: DateTime<Utc>,
    ) -> RoutedAction {
        match IncidentActionType::parse(&incident.action.kind) {
            Some(IncidentActionType::UserFix) => self.route_user_fix(&incident.action),
            Some(IncidentActionType::RetryLookup) => self.route_retry_lookup(&incident.action, now),
            Some(IncidentActionType::BugReport) => self.route_bug_report(incident, ctx),
            Some(IncidentActionType::FallbackOk) => RoutedAction {
                action_type: IncidentActionType::FallbackOk,
                status: IncidentStatus::AutoResolved,
                payload: None,
            },
            None => RoutedAction {
                action_type: IncidentActionType::UserFix,
                status: IncidentStatus::Open,
                payload: Some(json!({
                    "ui_alert": {"message": "Incele", "code": "UNKNOWN"},
                })),
            },
        }
    }

    fn route_user_fix(&self, action: &ActionSpec) -> RoutedAction {
        let code = if action.code.is_empty() {
            "UNKNOWN"
        } else {
            &action.code
        };
        let message = action.hint_text.as_deref().unwrap_or("Incele");
        RoutedAction {
            action_type: IncidentActionType::UserFix,
            status: IncidentStatus::Open,
            payload: Some(json!({
                "ui_alert": {"message": message, "code": code},
            })),
        }
    }

    fn route_retry_lookup(&self, action: &ActionSpec, now: DateTime<Utc>) -> RoutedAction {
        let code = if action.code.is_empty() {
            "UNKNOWN"
        } else {
            &action.code
        };
        let retry_eligible_at = now + Duration::minutes(self.retry_delay_minutes);
        RoutedAction {
            action_type: IncidentActionType::RetryLookup,
            status: IncidentStatus::PendingRetry,
            payload: Some(json!({
                "retry": {
                    "retry_eligible_at": retry_eligible_at.to_rfc3339(),
                    "reason_code": code,
                },
            })),
        }
    }

    fn route_bug_report(&self, incident: &IncidentSpec, ctx: &RouteContext) -> RoutedAction {
        let issue = self.issue_builder.build(
            incident,
            &ctx.dedupe_key,
            &ctx.provider,
            &ctx.invoice_id,
            &ctx.period,
            ctx.calc_context.as_ref(),
            ctx.lookup_evidence.as_ref(),
        );
        RoutedAction {
            action_type: IncidentActionType::BugReport,
            status: IncidentStatus::Reported,
            payload: Some(json!({"issue": issue.to_value()})),
        }
    }
}
