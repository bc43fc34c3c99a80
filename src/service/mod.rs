//! Public queue API.
//!
//! Thin wrapper over the job store and the processor. Enqueue operations are
//! pure validation plus persistence; nothing dispatches synchronously.
//! Callers never see dispatch failures directly; they observe outcomes
//! through [`EmailQueueService::queue_stats`] or job state.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::job::{EmailPriority, NewEmailJob};
use crate::metrics::{JOBS_CLEANED_TOTAL, JOBS_ENQUEUED_TOTAL};
use crate::processor::QueueProcessor;
use crate::store::{JobStore, QueueStats};

/// Options applied to every item of a bulk enqueue.
#[derive(Debug, Clone, Default)]
pub struct BulkOptions {
    /// Shared batch id; generated when absent
    pub batch_id: Option<Uuid>,
    /// Priority applied to items that do not set their own
    pub priority: Option<EmailPriority>,
    /// Schedule applied to items that do not set their own
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Attempt cap applied to items that do not set their own
    pub max_attempts: Option<i32>,
}

/// Email queue service: enqueue, statistics, maintenance, lifecycle.
pub struct EmailQueueService {
    store: Arc<dyn JobStore>,
    /// Absent when transport configuration or verification failed at
    /// startup; enqueueing still works, nothing dispatches.
    processor: Option<Arc<QueueProcessor>>,
    default_max_attempts: i32,
}

impl EmailQueueService {
    pub fn new(
        store: Arc<dyn JobStore>,
        processor: Option<Arc<QueueProcessor>>,
        default_max_attempts: i32,
    ) -> Self {
        Self {
            store,
            processor,
            default_max_attempts,
        }
    }

    /// Validate and persist one email job in `Pending` state. Returns the
    /// job id. No dispatch happens synchronously.
    pub async fn queue_email(&self, input: NewEmailJob) -> Result<Uuid> {
        input.validate()?;

        let job = input.into_job(self.default_max_attempts, Utc::now());
        let id = self.store.create(job).await?;

        JOBS_ENQUEUED_TOTAL.inc();
        tracing::debug!(job_id = %id, "Email queued");

        Ok(id)
    }

    /// Enqueue one job per input item, all sharing one batch id. All items
    /// are validated before any job is created, so a bad item creates
    /// nothing.
    pub async fn queue_bulk_emails(
        &self,
        items: Vec<NewEmailJob>,
        options: BulkOptions,
    ) -> Result<Vec<Uuid>> {
        for item in &items {
            item.validate()?;
        }

        let batch_id = options.batch_id.unwrap_or_else(Uuid::new_v4);
        let mut ids = Vec::with_capacity(items.len());

        for mut item in items {
            item.batch_id = Some(batch_id);
            if item.priority.is_none() {
                item.priority = options.priority;
            }
            if item.scheduled_at.is_none() {
                item.scheduled_at = options.scheduled_at;
            }
            if item.max_attempts.is_none() {
                item.max_attempts = options.max_attempts;
            }
            ids.push(self.queue_email(item).await?);
        }

        tracing::info!(batch_id = %batch_id, count = ids.len(), "Bulk emails queued");
        Ok(ids)
    }

    /// Counts of jobs by status plus today's outcomes (UTC calendar day).
    pub async fn queue_stats(&self) -> Result<QueueStats> {
        let day_start = Utc::now()
            .date_naive()
            .and_time(NaiveTime::MIN)
            .and_utc();

        let mut stats = self.store.stats(day_start).await?;
        stats.processor_running = self.is_running().await;
        Ok(stats)
    }

    /// Revive failed jobs from the last `hours_back` hours that still have
    /// attempts left. Returns the number of jobs affected. This is the only
    /// sanctioned path from `Failed` back to `Pending`.
    pub async fn retry_failed(&self, hours_back: i64) -> Result<u64> {
        let now = Utc::now();
        let cutoff = now - Duration::hours(hours_back);

        let affected = self.store.retry_failed_since(cutoff, now).await?;
        if affected > 0 {
            tracing::info!(affected, hours_back, "Failed emails requeued");
        }
        Ok(affected)
    }

    /// Delete terminal jobs older than `days_to_keep`. Returns the number
    /// deleted.
    pub async fn cleanup_old(&self, days_to_keep: i64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(days_to_keep);

        let deleted = self.store.delete_terminal_before(cutoff).await?;
        if deleted > 0 {
            JOBS_CLEANED_TOTAL.inc_by(deleted);
            tracing::info!(deleted, days_to_keep, "Old emails cleaned up");
        }
        Ok(deleted)
    }

    /// Start the processor's poll timer. A no-op when dispatch is disabled
    /// (no transport configuration) or already running.
    pub async fn start(&self) {
        match &self.processor {
            Some(processor) => processor.start().await,
            None => {
                tracing::warn!("Dispatch disabled (no transport configuration), start ignored")
            }
        }
    }

    /// Stop the processor's poll timer; in-flight dispatches complete.
    pub async fn stop(&self) {
        if let Some(processor) = &self.processor {
            processor.stop().await;
        }
    }

    pub async fn is_running(&self) -> bool {
        match &self.processor {
            Some(processor) => processor.is_running().await,
            None => false,
        }
    }
}
