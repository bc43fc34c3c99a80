//! Job store abstraction.
//!
//! The persisted job table is the only shared mutable resource in the system.
//! All mutation goes through per-job conditional updates (the claim) or bulk
//! filtered updates (the maintenance operations); the processor never shares
//! in-memory state across cycles.
//!
//! Two implementations are provided:
//!
//! - `PostgresJobStore`: durable storage via sqlx (default in production)
//! - `MemoryJobStore`: DashMap-backed, used by tests and local runs

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::job::EmailJob;

pub use memory::MemoryJobStore;
pub use postgres::PostgresJobStore;

/// Counts of jobs by status plus today's terminal outcomes.
///
/// `total` always equals `pending + processing + sent + failed`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub total: u64,
    pub pending: u64,
    pub processing: u64,
    pub sent: u64,
    pub failed: u64,
    /// Jobs whose `sent_at` falls within the current UTC calendar day
    pub today_sent: u64,
    /// Jobs whose `failed_at` falls within the current UTC calendar day
    pub today_failed: u64,
    /// Whether the polling processor is currently running
    pub processor_running: bool,
}

/// Abstract persisted job table.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the store is shared between the
/// queue API and the processor task.
///
/// # Claim Semantics
///
/// [`JobStore::claim`] is the critical correctness contract: it must
/// transition a job from `Pending` to `Processing` and increment `attempts`
/// in one conditional write, failing with `ClaimConflict` when the job is no
/// longer `Pending`. Overlapping cycles or a second processor instance lose
/// the race harmlessly instead of double-dispatching.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job. Returns the job id.
    async fn create(&self, job: EmailJob) -> Result<Uuid>;

    /// Look up a single job by id.
    async fn get(&self, id: Uuid) -> Result<Option<EmailJob>>;

    /// Fetch up to `limit` eligible jobs: `Pending`, due (`scheduled_at <=
    /// now`), past any retry hold (`next_retry_at` absent or `<= now`) and
    /// not exhausted. Ordered by priority descending, then `scheduled_at`
    /// ascending, then `attempts` ascending.
    async fn fetch_eligible(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<EmailJob>>;

    /// Atomically claim a job for dispatch: `Pending -> Processing` with
    /// `attempts += 1`, conditioned on the job still being `Pending`.
    /// Returns the job as claimed, or `ClaimConflict` when another claim
    /// won the race.
    async fn claim(&self, id: Uuid, now: DateTime<Utc>) -> Result<EmailJob>;

    /// Record successful delivery: `Sent`, `sent_at`, `message_id`.
    async fn mark_sent(&self, id: Uuid, sent_at: DateTime<Utc>, message_id: &str) -> Result<()>;

    /// Schedule a retry after a failed attempt: back to `Pending` with
    /// `next_retry_at` and the error message retained.
    async fn mark_retry(
        &self,
        id: Uuid,
        next_retry_at: DateTime<Utc>,
        error: &str,
    ) -> Result<()>;

    /// Record terminal failure: `Failed`, `failed_at`, last error message.
    async fn mark_failed(&self, id: Uuid, failed_at: DateTime<Utc>, error: &str) -> Result<()>;

    /// Bulk-revive failed jobs whose `failed_at >= cutoff` and whose
    /// attempts are not exhausted: back to `Pending`, `next_retry_at = now`,
    /// error cleared. Returns the number of jobs affected.
    async fn retry_failed_since(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64>;

    /// Delete terminal jobs whose terminal timestamp is older than `cutoff`.
    /// Returns the number of jobs deleted.
    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Status counts plus today's outcomes; `day_start` is the beginning of
    /// the current UTC calendar day.
    async fn stats(&self, day_start: DateTime<Utc>) -> Result<QueueStats>;
}
