//! PostgreSQL-backed job queue.
//!
//! Owns the `jobs` table. Enqueue idempotency rides on the partial unique
//! index over active rows; claim uses `FOR UPDATE SKIP LOCKED` so
//! concurrent workers never double-claim; terminal transitions are
//! guarded by status so repeating them is a no-op.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use super::job::{truncate_error, Job, JobKind, JobStatus};

const JOB_COLUMNS: &str = r#"
    id, invoice_ref, kind, status, payload, result, error,
    attempt_count, created_at, started_at, finished_at, updated_at
"#;

pub struct JobQueue {
    pool: PgPool,
}

impl JobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Idempotent enqueue.
    ///
    /// With `prevent_duplicate` the insert targets the active-rows partial
    /// unique index: if an active job already exists for
    /// `(invoice_ref, kind)` the insert is a no-op and the existing row
    /// comes back with `created = false`. Check and insert are a single
    /// statement, so concurrent submitters cannot both create.
    pub async fn enqueue(
        &self,
        invoice_ref: &str,
        kind: JobKind,
        payload: Option<Value>,
        prevent_duplicate: bool,
    ) -> Result<(Job, bool)> {
        let job = Job::builder()
            .invoice_ref(invoice_ref.to_string())
            .kind(kind)
            .build();

        if prevent_duplicate {
            let inserted = sqlx::query_as::<_, Job>(&format!(
                r#"
                INSERT INTO jobs (id, invoice_ref, kind, status, payload, attempt_count, created_at, updated_at)
                VALUES ($1, $2, $3, 'queued', $4, 0, NOW(), NOW())
                ON CONFLICT (invoice_ref, kind) WHERE status IN ('queued', 'running')
                DO NOTHING
                RETURNING {JOB_COLUMNS}
                "#
            ))
            .bind(job.id)
            .bind(invoice_ref)
            .bind(kind)
            .bind(&payload)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(job) = inserted {
                info!(job_id = %job.id, invoice_ref = %invoice_ref, kind = kind.as_str(), "job enqueued");
                return Ok((job, true));
            }

            // Insert lost to an existing active row; return it.
            let existing = self
                .find_active(invoice_ref, kind)
                .await?
                .ok_or_else(|| anyhow::anyhow!("active job vanished during enqueue"))?;
            debug!(job_id = %existing.id, invoice_ref = %invoice_ref, "enqueue deduplicated");
            return Ok((existing, false));
        }

        let inserted = sqlx::query_as::<_, Job>(&format!(
            r#"
            INSERT INTO jobs (id, invoice_ref, kind, status, payload, attempt_count, created_at, updated_at)
            VALUES ($1, $2, $3, 'queued', $4, 0, NOW(), NOW())
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job.id)
        .bind(invoice_ref)
        .bind(kind)
        .bind(&payload)
        .fetch_one(&self.pool)
        .await?;

        info!(job_id = %inserted.id, invoice_ref = %invoice_ref, kind = kind.as_str(), "job enqueued");
        Ok((inserted, true))
    }

    /// Claim the oldest queued job, FIFO by `created_at`.
    ///
    /// The CTE locks the candidate row with `SKIP LOCKED`, so under
    /// concurrent workers at most one claim succeeds per row. The claimed
    /// job transitions to Running with `started_at` set and the attempt
    /// counter bumped.
    pub async fn claim(&self) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(&format!(
            r#"
            WITH next_job AS (
                SELECT id
                FROM jobs
                WHERE status = 'queued'
                ORDER BY created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'running',
                started_at = NOW(),
                attempt_count = attempt_count + 1,
                updated_at = NOW()
            WHERE id IN (SELECT id FROM next_job)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .fetch_optional(&self.pool)
        .await?;

        if let Some(job) = &job {
            debug!(job_id = %job.id, invoice_ref = %job.invoice_ref, "job claimed");
        }
        Ok(job)
    }

    /// Transition Running -> Succeeded. Idempotent: already-terminal rows
    /// are untouched.
    pub async fn finish_ok(&self, job_id: Uuid, result: Option<Value>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'succeeded',
                result = $1,
                finished_at = NOW(),
                updated_at = NOW()
            WHERE id = $2 AND status = 'running'
            "#,
        )
        .bind(&result)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Transition Running -> Failed with a bounded diagnostic. Idempotent
    /// on terminal rows.
    pub async fn finish_fail(&self, job_id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed',
                error = $1,
                finished_at = NOW(),
                updated_at = NOW()
            WHERE id = $2 AND status = 'running'
            "#,
        )
        .bind(truncate_error(error))
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_by_id(&self, job_id: Uuid) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(job)
    }

    /// The active (queued/running) job for a pair, if any.
    pub async fn find_active(&self, invoice_ref: &str, kind: JobKind) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE invoice_ref = $1
              AND kind = $2
              AND status IN ('queued', 'running')
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(invoice_ref)
        .bind(kind)
        .fetch_optional(&self.pool)
        .await?;
        Ok(job)
    }

    /// Read-only filtered listing, newest first.
    pub async fn list(
        &self,
        invoice_ref: Option<&str>,
        status: Option<JobStatus>,
        kind: Option<JobKind>,
        limit: i64,
    ) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE ($1::text IS NULL OR invoice_ref = $1)
              AND ($2::job_status IS NULL OR status = $2)
              AND ($3::job_kind IS NULL OR kind = $3)
            ORDER BY created_at DESC
            LIMIT $4
            "#
        ))
        .bind(invoice_ref)
        .bind(status)
        .bind(kind)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    pub async fn count_by_status(&self, status: JobStatus) -> Result<i64> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM jobs WHERE status = $1")
                .bind(status)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Running jobs whose `started_at` is older than the threshold.
    /// A reaper watches these; the queue only surfaces them.
    pub async fn find_stale_running(&self, older_than: DateTime<Utc>) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE status = 'running' AND started_at < $1
            ORDER BY started_at ASC
            "#
        ))
        .bind(older_than)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }
}
