//! Incident repository: dedup upsert and status transitions.
//!
//! Owns the `incidents` table. The upsert is read-then-write inside a
//! transaction with `FOR UPDATE` on the dedupe row, so concurrent
//! occurrences of the same defect serialize on the row instead of racing
//! the unique index.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use tracing::{info, warn};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::common::hash::{dedupe_key, epoch_day};

use super::model::{Incident, IncidentActionType, IncidentSeverity, IncidentStatus};
use super::router::RoutedAction;

const INCIDENT_COLUMNS: &str = r#"
    id, tenant_id, trace_id, provider, invoice_id, period,
    primary_flag, category, severity, message,
    action_type, action_owner, action_code,
    all_flags, secondary_flags, deduction_total,
    routed_payload, details, dedupe_key, dedupe_bucket,
    status, occurrence_count, first_seen_at, last_seen_at,
    resolved_at, resolution_note, resolved_by, created_at, updated_at
"#;

/// Inputs for one upsert, identity plus forensics.
#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct UpsertIncident {
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
    pub action_owner: String,
    pub action_code: String,
    #[builder(default)]
    pub all_flags: Vec<String>,
    #[builder(default)]
    pub secondary_flags: Vec<String>,
    #[builder(default = 0)]
    pub deduction_total: i32,
    #[builder(default, setter(strip_option))]
    pub details: Option<Value>,
}

pub struct IncidentRepository {
    pool: PgPool,
}

impl IncidentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Dedup upsert. Returns `(incident_id, is_new)`.
    ///
    /// A hit within the same UTC-day bucket bumps `occurrence_count`,
    /// refreshes `last_seen_at`, applies the status-priority rule and the
    /// per-action payload policy. A bucket advance creates a fresh row
    /// for the same key: the 24-hour re-alert TTL.
    pub async fn upsert(
        &self,
        input: &UpsertIncident,
        routed: &RoutedAction,
        now: DateTime<Utc>,
    ) -> Result<(Uuid, bool)> {
        let key = dedupe_key(
            &input.provider,
            &input.invoice_id,
            &input.primary_flag,
            &input.category,
            &input.action_code,
            &input.period,
        );
        let bucket = epoch_day(now);

        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, Incident>(&format!(
            r#"
            SELECT {INCIDENT_COLUMNS}
            FROM incidents
            WHERE tenant_id = $1 AND dedupe_key = $2 AND dedupe_bucket = $3
            FOR UPDATE
            "#
        ))
        .bind(&input.tenant_id)
        .bind(&key)
        .bind(bucket)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(existing) = existing {
            let next_status = if IncidentStatus::can_transition(existing.status, routed.status) {
                routed.status
            } else {
                existing.status
            };

            // Payload policy by action type:
            // - BugReport payload is written at most once; the original
            //   forensic snapshot is the richest one.
            // - UserFix/RetryLookup overwrite (retry_eligible_at must be
            //   re-evaluated on every hit).
            // - FallbackOk carries no payload; keep whatever is stored.
            let next_payload = match routed.action_type {
                IncidentActionType::BugReport => {
                    if existing.routed_payload.is_none() {
                        Some(routed.to_value())
                    } else {
                        existing.routed_payload.clone()
                    }
                }
                IncidentActionType::UserFix | IncidentActionType::RetryLookup => {
                    Some(routed.to_value())
                }
                IncidentActionType::FallbackOk => existing.routed_payload.clone(),
            };

            let next_details = merge_details(existing.details.as_ref(), input.details.as_ref());

            sqlx::query(
                r#"
                UPDATE incidents
                SET last_seen_at = $1,
                    occurrence_count = occurrence_count + 1,
                    status = $2,
                    routed_payload = $3,
                    details = $4,
                    updated_at = $1
                WHERE id = $5
                "#,
            )
            .bind(now)
            .bind(next_status)
            .bind(&next_payload)
            .bind(&next_details)
            .bind(existing.id)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;

            info!(
                incident_id = %existing.id,
                occurrence_count = existing.occurrence_count + 1,
                status = next_status.as_str(),
                "incident dedupe hit"
            );
            return Ok((existing.id, false));
        }

        let incident = Incident::builder()
            .tenant_id(input.tenant_id.clone())
            .trace_id(input.trace_id.clone())
            .provider(input.provider.clone())
            .invoice_id(input.invoice_id.clone())
            .period(input.period.clone())
            .primary_flag(input.primary_flag.clone())
            .category(input.category.clone())
            .severity(input.severity)
            .message(input.message.clone())
            .action_type(routed.action_type)
            .action_owner(input.action_owner.clone())
            .action_code(input.action_code.clone())
            .all_flags(input.all_flags.clone())
            .secondary_flags(input.secondary_flags.clone())
            .deduction_total(input.deduction_total)
            .dedupe_key(key)
            .dedupe_bucket(bucket)
            .status(routed.status)
            .first_seen_at(now)
            .last_seen_at(now)
            .created_at(now)
            .updated_at(now)
            .build();

        sqlx::query(
            r#"
            INSERT INTO incidents (
                id, tenant_id, trace_id, provider, invoice_id, period,
                primary_flag, category, severity, message,
                action_type, action_owner, action_code,
                all_flags, secondary_flags, deduction_total,
                routed_payload, details, dedupe_key, dedupe_bucket,
                status, occurrence_count, first_seen_at, last_seen_at,
                created_at, updated_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6,
                $7, $8, $9, $10,
                $11, $12, $13,
                $14, $15, $16,
                $17, $18, $19, $20,
                $21, 1, $22, $22,
                $22, $22
            )
            "#,
        )
        .bind(incident.id)
        .bind(&incident.tenant_id)
        .bind(&incident.trace_id)
        .bind(&incident.provider)
        .bind(&incident.invoice_id)
        .bind(&incident.period)
        .bind(&incident.primary_flag)
        .bind(&incident.category)
        .bind(incident.severity)
        .bind(&incident.message)
        .bind(incident.action_type)
        .bind(&incident.action_owner)
        .bind(&incident.action_code)
        .bind(&incident.all_flags)
        .bind(&incident.secondary_flags)
        .bind(incident.deduction_total)
        .bind(Some(routed.to_value()))
        .bind(&input.details)
        .bind(&incident.dedupe_key)
        .bind(incident.dedupe_bucket)
        .bind(incident.status)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        warn!(
            incident_id = %incident.id,
            severity = incident.severity.as_str(),
            category = %incident.category,
            primary_flag = %incident.primary_flag,
            status = incident.status.as_str(),
            trace_id = %incident.trace_id,
            "incident created"
        );
        Ok((incident.id, true))
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Incident>> {
        let incident = sqlx::query_as::<_, Incident>(&format!(
            "SELECT {INCIDENT_COLUMNS} FROM incidents WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(incident)
    }

    /// Apply the status-priority transition rule. Returns false when the
    /// incident is missing or the transition is not allowed.
    pub async fn update_status(
        &self,
        id: Uuid,
        new_status: IncidentStatus,
        resolution_note: Option<&str>,
        resolved_by: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, Incident>(&format!(
            "SELECT {INCIDENT_COLUMNS} FROM incidents WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let existing = match existing {
            Some(incident) => incident,
            None => return Ok(false),
        };

        if !IncidentStatus::can_transition(existing.status, new_status) {
            warn!(
                incident_id = %id,
                from = existing.status.as_str(),
                to = new_status.as_str(),
                "incident status transition not allowed"
            );
            return Ok(false);
        }

        let resolved_at = if new_status == IncidentStatus::Resolved {
            Some(now)
        } else {
            existing.resolved_at
        };

        sqlx::query(
            r#"
            UPDATE incidents
            SET status = $1,
                resolution_note = COALESCE($2, resolution_note),
                resolved_by = COALESCE($3, resolved_by),
                resolved_at = $4,
                updated_at = $5
            WHERE id = $6
            "#,
        )
        .bind(new_status)
        .bind(resolution_note)
        .bind(resolved_by)
        .bind(resolved_at)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(incident_id = %id, status = new_status.as_str(), "incident status updated");
        Ok(true)
    }

    /// Incidents for a tenant in one status, most recently seen first.
    pub async fn list_by_status(
        &self,
        tenant_id: &str,
        status: IncidentStatus,
        limit: i64,
    ) -> Result<Vec<Incident>> {
        let incidents = sqlx::query_as::<_, Incident>(&format!(
            r#"
            SELECT {INCIDENT_COLUMNS}
            FROM incidents
            WHERE tenant_id = $1 AND status = $2
            ORDER BY last_seen_at DESC
            LIMIT $3
            "#
        ))
        .bind(tenant_id)
        .bind(status)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(incidents)
    }

    pub async fn list_pending_retries(&self, tenant_id: &str, limit: i64) -> Result<Vec<Incident>> {
        self.list_by_status(tenant_id, IncidentStatus::PendingRetry, limit)
            .await
    }

    pub async fn count_by_action_type(
        &self,
        tenant_id: &str,
        action_type: IncidentActionType,
        since: Option<DateTime<Utc>>,
    ) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM incidents
            WHERE tenant_id = $1
              AND action_type = $2
              AND ($3::timestamptz IS NULL OR created_at >= $3)
            "#,
        )
        .bind(tenant_id)
        .bind(action_type)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

/// Shallow merge: new keys win, untouched keys survive.
fn merge_details(existing: Option<&Value>, incoming: Option<&Value>) -> Option<Value> {
    match (existing, incoming) {
        (_, None) => existing.cloned(),
        (None, Some(incoming)) => Some(incoming.clone()),
        (Some(existing), Some(incoming)) => {
            let mut merged = existing.as_object().cloned().unwrap_or_default();
            if let Some(incoming) = incoming.as_object() {
                for (k, v) in incoming {
                    merged.insert(k.clone(), v.clone());
                }
            }
            Some(Value::Object(merged))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_details_keeps_old_keys_and_overwrites_new() {
        let merged = merge_details(
            Some(&json!({"a": 1, "b": 2})),
            Some(&json!({"b": 20, "c": 3})),
        )
        .unwrap();
        assert_eq!(merged, json!({"a": 1, "b": 20, "c": 3}));
    }

    #[test]
    fn merge_details_handles_missing_sides() {
        assert_eq!(merge_details(None, None), None);
        assert_eq!(
            merge_details(Some(&json!({"a": 1})), None),
            Some(json!({"a": 1}))
        );
        assert_eq!(
            merge_details(None, Some(&json!({"b": 2}))),
            Some(json!({"b": 2}))
        );
    }
}
