//! Incident model and status machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;
use uuid::Uuid;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "incident_severity", rename_all = "lowercase")]
#[serde(rename_all = "UPPERCASE")]
pub enum IncidentSeverity {
    S1,
    S2,
    S3,
    S4,
}

impl IncidentSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentSeverity::S1 => "S1",
            IncidentSeverity::S2 => "S2",
            IncidentSeverity::S3 => "S3",
            IncidentSeverity::S4 => "S4",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "incident_action_type", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentActionType {
    UserFix,
    RetryLookup,
    BugReport,
    FallbackOk,
}

impl IncidentActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentActionType::UserFix => "USER_FIX",
            IncidentActionType::RetryLookup => "RETRY_LOOKUP",
            IncidentActionType::BugReport => "BUG_REPORT",
            IncidentActionType::FallbackOk => "FALLBACK_OK",
        }
    }

    /// Parse the wire form; anything unrecognized is None and the router
    /// treats it as UserFix.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "USER_FIX" => Some(IncidentActionType::UserFix),
            "RETRY_LOOKUP" => Some(IncidentActionType::RetryLookup),
            "BUG_REPORT" => Some(IncidentActionType::BugReport),
            "FALLBACK_OK" => Some(IncidentActionType::FallbackOk),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "incident_status", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentStatus {
    Open,
    PendingRetry,
    Reported,
    Acknowledged,
    Resolved,
    AutoResolved,
}

impl IncidentStatus {
    /// Conflict resolution weight. A dedupe hit may only move the status
    /// to equal-or-higher priority, except that `Open` can move anywhere.
    pub fn priority(&self) -> u8 {
        match self {
            IncidentStatus::Resolved => 100,
            IncidentStatus::Acknowledged => 80,
            IncidentStatus::Reported => 60,
            IncidentStatus::PendingRetry => 40,
            IncidentStatus::Open => 20,
            IncidentStatus::AutoResolved => 10,
        }
    }

    pub fn can_transition(current: IncidentStatus, new: IncidentStatus) -> bool {
        if current == IncidentStatus::Open {
            return true;
        }
        new.priority() >= current.priority()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Open => "OPEN",
            IncidentStatus::PendingRetry => "PENDING_RETRY",
            IncidentStatus::Reported => "REPORTED",
            IncidentStatus::Acknowledged => "ACK",
            IncidentStatus::Resolved => "RESOLVED",
            IncidentStatus::AutoResolved => "AUTO_RESOLVED",
        }
    }
}

// ============================================================================
// Incident row
// ============================================================================

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Incident {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,

    pub tenant_id: String,
    pub trace_id: String,
    pub provider: String,
    pub invoice_id: String,
    /// Invoice period, YYYY-MM.
    pub period: String,

    pub primary_flag: String,
    pub category: String,
    pub severity: IncidentSeverity,
    #[builder(default)]
    pub message: String,

    pub action_type: IncidentActionType,
    pub action_owner: String,
    pub action_code: String,

    #[builder(default)]
    pub all_flags: Vec<String>,
    #[builder(default)]
    pub secondary_flags: Vec<String>,
    #[builder(default = 0)]
    pub deduction_total: i32,

    #[builder(default, setter(strip_option))]
    pub routed_payload: Option<serde_json::Value>,
    #[builder(default, setter(strip_option))]
    pub details: Option<serde_json::Value>,

    pub dedupe_key: String,
    pub dedupe_bucket: i64,

    pub status: IncidentStatus,
    #[builder(default = 1)]
    pub occurrence_count: i32,

    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub resolved_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub resolution_note: Option<String>,
    #[builder(default, setter(strip_option))]
    pub resolved_by: Option<String>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}
