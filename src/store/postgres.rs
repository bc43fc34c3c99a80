//! PostgreSQL job store.
//!
//! Durable implementation of the [`JobStore`] trait backed by the
//! `email_jobs` table (see `migrations/`). The claim is a conditional
//! UPDATE keyed on `status = 'pending'`, which is what makes overlapping
//! processing cycles safe.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{QueueError, Result};
use crate::job::EmailJob;

use super::{JobStore, QueueStats};

/// PostgreSQL-backed job store.
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn create(&self, job: EmailJob) -> Result<Uuid> {
        sqlx::query(
            r#"
            INSERT INTO email_jobs (
                id, to_address, cc_address, bcc_address,
                subject, text_body, html_body,
                from_name, from_email, reply_to,
                priority, scheduled_at,
                attempts, max_attempts, next_retry_at,
                status, sent_at, failed_at, message_id, error,
                metadata, correlation_id, batch_id,
                created_at, updated_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15, $16, $17, $18, $19, $20,
                $21, $22, $23, $24, $25
            )
            "#,
        )
        .bind(job.id)
        .bind(&job.to)
        .bind(&job.cc)
        .bind(&job.bcc)
        .bind(&job.subject)
        .bind(&job.text_body)
        .bind(&job.html_body)
        .bind(&job.from_name)
        .bind(&job.from_email)
        .bind(&job.reply_to)
        .bind(job.priority.as_i16())
        .bind(job.scheduled_at)
        .bind(job.attempts)
        .bind(job.max_attempts)
        .bind(job.next_retry_at)
        .bind(job.status.as_str())
        .bind(job.sent_at)
        .bind(job.failed_at)
        .bind(&job.message_id)
        .bind(&job.error)
        .bind(&job.metadata)
        .bind(&job.correlation_id)
        .bind(job.batch_id)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(job.id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<EmailJob>> {
        let job = sqlx::query_as::<_, EmailJob>(
            "SELECT * FROM email_jobs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    async fn fetch_eligible(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<EmailJob>> {
        let jobs = sqlx::query_as::<_, EmailJob>(
            r#"
            SELECT * FROM email_jobs
            WHERE status = 'pending'
              AND scheduled_at <= $1
              AND (next_retry_at IS NULL OR next_retry_at <= $1)
              AND attempts < max_attempts
            ORDER BY priority DESC, scheduled_at ASC, attempts ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    async fn claim(&self, id: Uuid, now: DateTime<Utc>) -> Result<EmailJob> {
        // Compare-and-swap: the WHERE clause loses the race when the job is
        // no longer pending, so a second concurrent claim affects zero rows.
        let claimed = sqlx::query_as::<_, EmailJob>(
            r#"
            UPDATE email_jobs
            SET status = 'processing', attempts = attempts + 1, updated_at = $2
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        claimed.ok_or(QueueError::ClaimConflict(id))
    }

    async fn mark_sent(&self, id: Uuid, sent_at: DateTime<Utc>, message_id: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE email_jobs
            SET status = 'sent', sent_at = $2, message_id = $3,
                next_retry_at = NULL, error = NULL, updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(sent_at)
        .bind(message_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::NotFound(id));
        }
        Ok(())
    }

    async fn mark_retry(
        &self,
        id: Uuid,
        next_retry_at: DateTime<Utc>,
        error: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE email_jobs
            SET status = 'pending', next_retry_at = $2, error = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(next_retry_at)
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::NotFound(id));
        }
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, failed_at: DateTime<Utc>, error: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE email_jobs
            SET status = 'failed', failed_at = $2, error = $3,
                next_retry_at = NULL, updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(failed_at)
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::NotFound(id));
        }
        Ok(())
    }

    async fn retry_failed_since(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE email_jobs
            SET status = 'pending', next_retry_at = $2, error = NULL,
                failed_at = NULL, updated_at = $2
            WHERE status = 'failed'
              AND failed_at >= $1
              AND attempts < max_attempts
            "#,
        )
        .bind(cutoff)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM email_jobs
            WHERE (status = 'sent' AND sent_at < $1)
               OR (status = 'failed' AND failed_at < $1)
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn stats(&self, day_start: DateTime<Utc>) -> Result<QueueStats> {
        let row: (i64, i64, i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending'),
                COUNT(*) FILTER (WHERE status = 'processing'),
                COUNT(*) FILTER (WHERE status = 'sent'),
                COUNT(*) FILTER (WHERE status = 'failed'),
                COUNT(*) FILTER (WHERE status = 'sent' AND sent_at >= $1),
                COUNT(*) FILTER (WHERE status = 'failed' AND failed_at >= $1)
            FROM email_jobs
            "#,
        )
        .bind(day_start)
        .fetch_one(&self.pool)
        .await?;

        let (pending, processing, sent, failed, today_sent, today_failed) = row;

        Ok(QueueStats {
            total: (pending + processing + sent + failed) as u64,
            pending: pending as u64,
            processing: processing as u64,
            sent: sent as u64,
            failed: failed as u64,
            today_sent: today_sent as u64,
            today_failed: today_failed as u64,
            processor_running: false,
        })
    }
}
