//! Queue processor: polling lifecycle, claim, dispatch, retry.
//!
//! One processing cycle fetches eligible jobs, splits them into sub-batches
//! and dispatches the jobs of each sub-batch concurrently while sub-batches
//! run in sequence, bounding simultaneous transport usage. Every job is
//! claimed with a compare-and-swap before dispatch so that overlapping
//! cycles, or a second processor instance, never double-send.

mod backoff;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::delivery::{DeliveryOutcome, DeliveryRecorder};
use crate::error::QueueError;
use crate::job::EmailJob;
use crate::metrics::{
    CLAIM_CONFLICTS_TOTAL, DISPATCH_DURATION, JOBS_FAILED_TOTAL, JOBS_RETRIED_TOTAL,
    JOBS_SENT_TOTAL, PROCESSOR_RUNNING,
};
use crate::store::JobStore;
use crate::transport::{MailTransport, OutboundEmail};

pub use backoff::RetryPolicy;

/// Delivery channel name written to delivery records.
const DELIVERY_CHANNEL: &str = "email";

/// Processor tuning, resolved from settings at composition time.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Interval between processing cycles
    pub poll_interval: Duration,
    /// Maximum eligible jobs fetched per cycle
    pub batch_size: usize,
    /// Sub-batch size; jobs within one sub-batch dispatch concurrently
    pub concurrency: usize,
    /// Backoff policy for failed attempts
    pub retry: RetryPolicy,
    /// Default sender display name when a job has no override
    pub default_from_name: String,
    /// Default sender address when a job has no override
    pub default_from_email: String,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            batch_size: 20,
            concurrency: 5,
            retry: RetryPolicy::default(),
            default_from_name: String::new(),
            default_from_email: "noreply@localhost".to_string(),
        }
    }
}

/// Outcome of one job dispatch within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchOutcome {
    Sent,
    Retried,
    Failed,
    /// Lost the claim race; another worker owns the job
    Skipped,
}

/// Summary of one processing cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub fetched: usize,
    pub sent: usize,
    pub retried: usize,
    pub failed: usize,
    pub skipped: usize,
}

struct Running {
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// Timer-driven polling worker over the shared job store.
pub struct QueueProcessor {
    store: Arc<dyn JobStore>,
    transport: Arc<dyn MailTransport>,
    recorder: Arc<dyn DeliveryRecorder>,
    config: ProcessorConfig,
    running: Mutex<Option<Running>>,
}

impl QueueProcessor {
    pub fn new(
        store: Arc<dyn JobStore>,
        transport: Arc<dyn MailTransport>,
        recorder: Arc<dyn DeliveryRecorder>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            store,
            transport,
            recorder,
            config,
            running: Mutex::new(None),
        }
    }

    /// Begin the recurring poll timer. Starting an already-running
    /// processor is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut guard = self.running.lock().await;
        if guard.is_some() {
            tracing::debug!("Processor already running, start ignored");
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let processor = self.clone();
        let poll_interval = self.config.poll_interval;

        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(poll_interval);
            // Skip immediate first tick
            timer.tick().await;

            tracing::info!(
                poll_interval_secs = poll_interval.as_secs(),
                batch_size = processor.config.batch_size,
                concurrency = processor.config.concurrency,
                "Queue processor started"
            );

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Queue processor received shutdown signal");
                        break;
                    }
                    _ = timer.tick() => {
                        processor.run_cycle().await;
                    }
                }
            }

            tracing::info!("Queue processor stopped");
        });

        *guard = Some(Running {
            shutdown: shutdown_tx,
            handle,
        });
        PROCESSOR_RUNNING.set(1);
    }

    /// Cancel the poll timer and wait for the worker task to finish. A
    /// dispatch already in flight completes; there is no cooperative
    /// cancellation of an in-progress send. Stopping a stopped processor is
    /// a no-op.
    pub async fn stop(&self) {
        let running = self.running.lock().await.take();
        let Some(running) = running else {
            tracing::debug!("Processor not running, stop ignored");
            return;
        };

        let _ = running.shutdown.send(());
        if let Err(e) = running.handle.await {
            tracing::warn!(error = %e, "Processor task ended abnormally");
        }
        PROCESSOR_RUNNING.set(0);
    }

    /// Whether the poll timer is currently active.
    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .map_or(false, |r| !r.handle.is_finished())
    }

    /// Run one processing cycle: fetch eligible jobs and dispatch them in
    /// sequenced sub-batches. A failure in one job never aborts its
    /// siblings.
    pub async fn run_cycle(&self) -> CycleSummary {
        let now = Utc::now();
        let batch = match self.store.fetch_eligible(now, self.config.batch_size).await {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(error = %e, "Failed to fetch eligible jobs");
                return CycleSummary::default();
            }
        };

        if batch.is_empty() {
            return CycleSummary::default();
        }

        let mut summary = CycleSummary {
            fetched: batch.len(),
            ..Default::default()
        };

        tracing::debug!(fetched = batch.len(), "Processing cycle started");

        for sub_batch in batch.chunks(self.config.concurrency.max(1)) {
            let outcomes = join_all(sub_batch.iter().map(|job| self.dispatch_job(job))).await;
            for outcome in outcomes {
                match outcome {
                    DispatchOutcome::Sent => summary.sent += 1,
                    DispatchOutcome::Retried => summary.retried += 1,
                    DispatchOutcome::Failed => summary.failed += 1,
                    DispatchOutcome::Skipped => summary.skipped += 1,
                }
            }
        }

        tracing::info!(
            fetched = summary.fetched,
            sent = summary.sent,
            retried = summary.retried,
            failed = summary.failed,
            skipped = summary.skipped,
            "Processing cycle completed"
        );

        summary
    }

    /// Claim and dispatch one job. All errors are handled here; nothing
    /// propagates to the cycle.
    async fn dispatch_job(&self, job: &EmailJob) -> DispatchOutcome {
        let timer = DISPATCH_DURATION.start_timer();
        let now = Utc::now();

        // Claim if still pending; a concurrent claim wins harmlessly.
        let claimed = match self.store.claim(job.id, now).await {
            Ok(claimed) => claimed,
            Err(QueueError::ClaimConflict(_)) | Err(QueueError::NotFound(_)) => {
                CLAIM_CONFLICTS_TOTAL.inc();
                tracing::debug!(job_id = %job.id, "Job already claimed, skipping");
                timer.observe_duration();
                return DispatchOutcome::Skipped;
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to claim job");
                timer.observe_duration();
                return DispatchOutcome::Skipped;
            }
        };

        let email = self.compose(&claimed);
        let outcome = match self.transport.send(&email).await {
            Ok(receipt) => self.record_sent(&claimed, &receipt.message_id).await,
            Err(e) => self.record_failure(&claimed, &e.to_string()).await,
        };

        timer.observe_duration();
        outcome
    }

    /// Compose the outbound message, substituting configured defaults for
    /// the sender when the job carries no override.
    fn compose(&self, job: &EmailJob) -> OutboundEmail {
        OutboundEmail {
            from_name: job
                .from_name
                .clone()
                .unwrap_or_else(|| self.config.default_from_name.clone()),
            from_email: job
                .from_email
                .clone()
                .unwrap_or_else(|| self.config.default_from_email.clone()),
            to: job.to.clone(),
            cc: job.cc.clone(),
            bcc: job.bcc.clone(),
            reply_to: job.reply_to.clone(),
            subject: job.subject.clone(),
            text_body: job.text_body.clone(),
            html_body: job.html_body.clone(),
        }
    }

    async fn record_sent(&self, job: &EmailJob, message_id: &str) -> DispatchOutcome {
        let sent_at = Utc::now();

        if let Err(e) = self.store.mark_sent(job.id, sent_at, message_id).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to record sent outcome");
            return DispatchOutcome::Skipped;
        }

        JOBS_SENT_TOTAL.inc();
        tracing::info!(
            job_id = %job.id,
            message_id = %message_id,
            attempts = job.attempts,
            "Email sent"
        );

        if let Some(notification_id) = job.notification_id() {
            self.recorder
                .update_delivery_status(
                    notification_id,
                    DELIVERY_CHANNEL,
                    &job.to,
                    DeliveryOutcome::Sent {
                        sent_at,
                        message_id: message_id.to_string(),
                    },
                )
                .await;
        }

        DispatchOutcome::Sent
    }

    async fn record_failure(&self, job: &EmailJob, error: &str) -> DispatchOutcome {
        let now = Utc::now();

        if job.attempts >= job.max_attempts {
            if let Err(e) = self.store.mark_failed(job.id, now, error).await {
                tracing::error!(job_id = %job.id, error = %e, "Failed to record terminal failure");
                return DispatchOutcome::Skipped;
            }

            JOBS_FAILED_TOTAL.inc();
            tracing::warn!(
                job_id = %job.id,
                attempts = job.attempts,
                error = %error,
                "Email failed permanently, attempts exhausted"
            );

            if let Some(notification_id) = job.notification_id() {
                self.recorder
                    .update_delivery_status(
                        notification_id,
                        DELIVERY_CHANNEL,
                        &job.to,
                        DeliveryOutcome::Failed {
                            failed_at: now,
                            error: error.to_string(),
                        },
                    )
                    .await;
            }

            return DispatchOutcome::Failed;
        }

        let delay = self.config.retry.delay_for(job.attempts);
        let next_retry_at = now
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::hours(24));

        if let Err(e) = self.store.mark_retry(job.id, next_retry_at, error).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to schedule retry");
            return DispatchOutcome::Skipped;
        }

        JOBS_RETRIED_TOTAL.inc();
        tracing::warn!(
            job_id = %job.id,
            attempts = job.attempts,
            next_retry_at = %next_retry_at,
            error = %error,
            "Email dispatch failed, retry scheduled"
        );

        DispatchOutcome::Retried
    }
}
