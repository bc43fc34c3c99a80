//! In-memory job store using DashMap.
//!
//! Jobs are held in memory and lost on restart. Used by the test suite and
//! available for local runs without a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::{QueueError, Result};
use crate::job::{EmailJob, JobStatus};

use super::{JobStore, QueueStats};

/// In-memory job store.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: DashMap<Uuid, EmailJob>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs currently held, any status.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: EmailJob) -> Result<Uuid> {
        let id = job.id;
        self.jobs.insert(id, job);
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<EmailJob>> {
        Ok(self.jobs.get(&id).map(|j| j.clone()))
    }

    async fn fetch_eligible(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<EmailJob>> {
        let mut eligible: Vec<EmailJob> = self
            .jobs
            .iter()
            .filter(|j| j.is_eligible(now))
            .map(|j| j.clone())
            .collect();

        // Priority descending, then longest-waiting, then fewest failures
        eligible.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.scheduled_at.cmp(&b.scheduled_at))
                .then(a.attempts.cmp(&b.attempts))
        });
        eligible.truncate(limit);

        Ok(eligible)
    }

    async fn claim(&self, id: Uuid, now: DateTime<Utc>) -> Result<EmailJob> {
        // The entry lock makes check-then-update atomic, mirroring the
        // conditional UPDATE of the Postgres store.
        let mut entry = self
            .jobs
            .get_mut(&id)
            .ok_or(QueueError::NotFound(id))?;

        if entry.status != JobStatus::Pending {
            return Err(QueueError::ClaimConflict(id));
        }

        entry.status = JobStatus::Processing;
        entry.attempts += 1;
        entry.updated_at = now;

        Ok(entry.clone())
    }

    async fn mark_sent(&self, id: Uuid, sent_at: DateTime<Utc>, message_id: &str) -> Result<()> {
        let mut entry = self
            .jobs
            .get_mut(&id)
            .ok_or(QueueError::NotFound(id))?;

        entry.status = JobStatus::Sent;
        entry.sent_at = Some(sent_at);
        entry.message_id = Some(message_id.to_string());
        entry.next_retry_at = None;
        entry.error = None;
        entry.updated_at = sent_at;

        Ok(())
    }

    async fn mark_retry(
        &self,
        id: Uuid,
        next_retry_at: DateTime<Utc>,
        error: &str,
    ) -> Result<()> {
        let mut entry = self
            .jobs
            .get_mut(&id)
            .ok_or(QueueError::NotFound(id))?;

        entry.status = JobStatus::Pending;
        entry.next_retry_at = Some(next_retry_at);
        entry.error = Some(error.to_string());
        entry.updated_at = Utc::now();

        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, failed_at: DateTime<Utc>, error: &str) -> Result<()> {
        let mut entry = self
            .jobs
            .get_mut(&id)
            .ok_or(QueueError::NotFound(id))?;

        entry.status = JobStatus::Failed;
        entry.failed_at = Some(failed_at);
        entry.error = Some(error.to_string());
        entry.next_retry_at = None;
        entry.updated_at = failed_at;

        Ok(())
    }

    async fn retry_failed_since(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64> {
        let mut affected = 0;

        for mut entry in self.jobs.iter_mut() {
            let revivable = entry.status == JobStatus::Failed
                && entry.failed_at.map_or(false, |t| t >= cutoff)
                && entry.attempts < entry.max_attempts;

            if revivable {
                entry.status = JobStatus::Pending;
                entry.next_retry_at = Some(now);
                entry.error = None;
                entry.failed_at = None;
                entry.updated_at = now;
                affected += 1;
            }
        }

        Ok(affected)
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        // Counted inside the closure: a create racing the retain can change
        // the map length mid-scan, so a length diff would miscount.
        let mut deleted = 0u64;

        self.jobs.retain(|_, job| {
            let expired = match job.status {
                JobStatus::Sent => job.sent_at.map_or(false, |t| t < cutoff),
                JobStatus::Failed => job.failed_at.map_or(false, |t| t < cutoff),
                _ => false,
            };
            if expired {
                deleted += 1;
            }
            !expired
        });

        Ok(deleted)
    }

    async fn stats(&self, day_start: DateTime<Utc>) -> Result<QueueStats> {
        let mut stats = QueueStats::default();

        for job in self.jobs.iter() {
            stats.total += 1;
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Sent => {
                    stats.sent += 1;
                    if job.sent_at.map_or(false, |t| t >= day_start) {
                        stats.today_sent += 1;
                    }
                }
                JobStatus::Failed => {
                    stats.failed += 1;
                    if job.failed_at.map_or(false, |t| t >= day_start) {
                        stats.today_failed += 1;
                    }
                }
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::NewEmailJob;

    async fn store_with_job(store: &MemoryJobStore) -> Uuid {
        let job = NewEmailJob::new("a@b.com", "Test").into_job(3, Utc::now());
        store.create(job).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemoryJobStore::new();
        let id = store_with_job(&store).await;

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
    }

    #[tokio::test]
    async fn test_claim_transitions_and_increments() {
        let store = MemoryJobStore::new();
        let id = store_with_job(&store).await;

        let claimed = store.claim(id, Utc::now()).await.unwrap();
        assert_eq!(claimed.status, JobStatus::Processing);
        assert_eq!(claimed.attempts, 1);
    }

    #[tokio::test]
    async fn test_double_claim_conflicts() {
        let store = MemoryJobStore::new();
        let id = store_with_job(&store).await;

        store.claim(id, Utc::now()).await.unwrap();
        let second = store.claim(id, Utc::now()).await;
        assert!(matches!(second, Err(QueueError::ClaimConflict(_))));

        // The loser must not have bumped attempts
        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.attempts, 1);
    }

    #[tokio::test]
    async fn test_fetch_eligible_ordering() {
        let store = MemoryJobStore::new();
        let now = Utc::now();

        let low = NewEmailJob::new("a@b.com", "low")
            .priority(crate::job::EmailPriority::Low)
            .into_job(3, now);
        let urgent = NewEmailJob::new("a@b.com", "urgent")
            .priority(crate::job::EmailPriority::Urgent)
            .into_job(3, now);
        let low_id = store.create(low).await.unwrap();
        let urgent_id = store.create(urgent).await.unwrap();

        let batch = store.fetch_eligible(now, 10).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].id, urgent_id);
        assert_eq!(batch[1].id, low_id);
    }

    #[tokio::test]
    async fn test_fetch_eligible_skips_scheduled_and_held() {
        let store = MemoryJobStore::new();
        let now = Utc::now();

        let future = NewEmailJob::new("a@b.com", "future")
            .scheduled_at(now + chrono::Duration::hours(1))
            .into_job(3, now);
        store.create(future).await.unwrap();

        let held_id = store_with_job(&store).await;
        store.claim(held_id, now).await.unwrap();
        store
            .mark_retry(held_id, now + chrono::Duration::minutes(5), "boom")
            .await
            .unwrap();

        let batch = store.fetch_eligible(now, 10).await.unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_mark_sent() {
        let store = MemoryJobStore::new();
        let id = store_with_job(&store).await;
        let now = Utc::now();

        store.claim(id, now).await.unwrap();
        store.mark_sent(id, now, "<msg-1@smtp>").await.unwrap();

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Sent);
        assert_eq!(job.sent_at, Some(now));
        assert_eq!(job.message_id.as_deref(), Some("<msg-1@smtp>"));
    }

    #[tokio::test]
    async fn test_retry_failed_since_window() {
        let store = MemoryJobStore::new();
        let now = Utc::now();

        // Recently failed, retryable
        let recent = store_with_job(&store).await;
        store.claim(recent, now).await.unwrap();
        store
            .mark_failed(recent, now - chrono::Duration::hours(1), "x")
            .await
            .unwrap();

        // Failed outside the window
        let old = store_with_job(&store).await;
        store.claim(old, now).await.unwrap();
        store
            .mark_failed(old, now - chrono::Duration::hours(48), "x")
            .await
            .unwrap();

        // Exhausted: attempts == max_attempts
        let spent = store_with_job(&store).await;
        for _ in 0..3 {
            store.claim(spent, now).await.unwrap();
            store.mark_retry(spent, now, "x").await.unwrap();
        }
        store
            .mark_failed(spent, now - chrono::Duration::hours(1), "x")
            .await
            .unwrap();

        let cutoff = now - chrono::Duration::hours(24);
        let affected = store.retry_failed_since(cutoff, now).await.unwrap();
        assert_eq!(affected, 1);

        let revived = store.get(recent).await.unwrap().unwrap();
        assert_eq!(revived.status, JobStatus::Pending);
        assert!(revived.error.is_none());
        assert_eq!(revived.next_retry_at, Some(now));

        let untouched = store.get(old).await.unwrap().unwrap();
        assert_eq!(untouched.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_delete_terminal_before() {
        let store = MemoryJobStore::new();
        let now = Utc::now();

        let old_sent = store_with_job(&store).await;
        store.claim(old_sent, now).await.unwrap();
        store
            .mark_sent(old_sent, now - chrono::Duration::days(31), "<m>")
            .await
            .unwrap();

        let fresh_sent = store_with_job(&store).await;
        store.claim(fresh_sent, now).await.unwrap();
        store
            .mark_sent(fresh_sent, now - chrono::Duration::days(10), "<m>")
            .await
            .unwrap();

        let pending = store_with_job(&store).await;

        let deleted = store
            .delete_terminal_before(now - chrono::Duration::days(30))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get(old_sent).await.unwrap().is_none());
        assert!(store.get(fresh_sent).await.unwrap().is_some());
        assert!(store.get(pending).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_count_exact_under_concurrent_creates() {
        let store = std::sync::Arc::new(MemoryJobStore::new());
        let now = Utc::now();

        for _ in 0..50 {
            let id = store_with_job(&store).await;
            store.claim(id, now).await.unwrap();
            store
                .mark_sent(id, now - chrono::Duration::days(31), "<m>")
                .await
                .unwrap();
        }

        // Enqueue fresh jobs while the cleanup scan runs
        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for _ in 0..50 {
                    store_with_job(&store).await;
                }
            })
        };

        let deleted = store
            .delete_terminal_before(now - chrono::Duration::days(30))
            .await
            .unwrap();
        writer.await.unwrap();

        assert_eq!(deleted, 50);
        assert_eq!(store.len(), 50);
    }

    #[tokio::test]
    async fn test_stats_identity() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        let day_start = now - chrono::Duration::hours(1);

        store_with_job(&store).await;

        let claimed = store_with_job(&store).await;
        store.claim(claimed, now).await.unwrap();

        let sent = store_with_job(&store).await;
        store.claim(sent, now).await.unwrap();
        store.mark_sent(sent, now, "<m>").await.unwrap();

        let failed = store_with_job(&store).await;
        store.claim(failed, now).await.unwrap();
        store.mark_failed(failed, now, "x").await.unwrap();

        let stats = store.stats(day_start).await.unwrap();
        assert_eq!(stats.total, 4);
        assert_eq!(
            stats.total,
            stats.pending + stats.processing + stats.sent + stats.failed
        );
        assert_eq!(stats.today_sent, 1);
        assert_eq!(stats.today_failed, 1);
    }
}
