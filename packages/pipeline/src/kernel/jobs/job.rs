//! Job model for the DB-backed work queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;
use uuid::Uuid;

/// Diagnostics stored on failed jobs are bounded to this many characters.
pub const MAX_ERROR_LEN: usize = 2000;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Extract,
    Validate,
    ExtractAndValidate,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Extract => "extract",
            JobKind::Validate => "validate",
            JobKind::ExtractAndValidate => "extract_and_validate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    /// Queued and Running rows count against the active-uniqueness index.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }

    /// Terminal rows are immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }
}

// ============================================================================
// Job row
// ============================================================================

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,

    pub invoice_ref: String,
    pub kind: JobKind,
    #[builder(default)]
    pub status: JobStatus,

    #[builder(default, setter(strip_option))]
    pub payload: Option<serde_json::Value>,
    #[builder(default, setter(strip_option))]
    pub result: Option<serde_json::Value>,
    #[builder(default, setter(strip_option))]
    pub error: Option<String>,

    #[builder(default = 0)]
    pub attempt_count: i32,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub started_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub finished_at: Option<DateTime<Utc>>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

/// Clip a diagnostic to the storage bound at a UTF-8 boundary.
pub fn truncate_error(error: &str) -> String {
    if error.chars().count() <= MAX_ERROR_LEN {
        return error.to_string();
    }
    error.chars().take(MAX_ERROR_LEN).collect()
}
