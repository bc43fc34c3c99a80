//! Email job data model.
//!
//! An [`EmailJob`] is one queued outbound message awaiting delivery. Jobs are
//! created in `Pending` state, claimed by the processor (`Pending` ->
//! `Processing`) and finish in one of the terminal states `Sent` or `Failed`.
//! A failed-but-retryable job is returned to `Pending` with `next_retry_at`
//! set; only the explicit retry maintenance operation revives a `Failed` job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{QueueError, Result};

/// Delivery state of a job.
///
/// Transitions are monotonic: `Pending -> Processing -> Sent | Failed`, with
/// `Processing -> Pending` only when a retry has been scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be picked up (initial state, also post-retry-schedule)
    Pending,
    /// Claimed by a dispatch attempt
    Processing,
    /// Delivered successfully (terminal)
    Sent,
    /// Attempts exhausted (terminal)
    Failed,
}

impl JobStatus {
    /// Whether no further automatic transitions occur from this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

impl TryFrom<String> for JobStatus {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        match value.as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// Priority tier for scheduling. Higher tiers are fetched first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum EmailPriority {
    /// Can be delayed
    Low = 0,
    /// Default tier
    #[default]
    Medium = 1,
    /// Should go out promptly
    High = 2,
    /// Front of the queue
    Urgent = 3,
}

impl EmailPriority {
    pub fn as_i16(&self) -> i16 {
        *self as i16
    }
}

impl TryFrom<i16> for EmailPriority {
    type Error = String;

    fn try_from(value: i16) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Low),
            1 => Ok(Self::Medium),
            2 => Ok(Self::High),
            3 => Ok(Self::Urgent),
            other => Err(format!("unknown priority tier: {}", other)),
        }
    }
}

/// One queued outbound email.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EmailJob {
    /// Store-assigned identity
    pub id: Uuid,

    // Addressing
    #[sqlx(rename = "to_address")]
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[sqlx(rename = "cc_address")]
    pub cc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[sqlx(rename = "bcc_address")]
    pub bcc: Option<String>,

    // Content
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_body: Option<String>,
    /// Sender display-name override; configured default applies when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_name: Option<String>,
    /// Sender address override; configured default applies when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,

    // Scheduling
    #[sqlx(try_from = "i16")]
    pub priority: EmailPriority,
    /// Earliest eligible pickup time
    pub scheduled_at: DateTime<Utc>,

    // Retry bookkeeping
    /// Dispatch attempts so far
    pub attempts: i32,
    /// Attempt cap
    pub max_attempts: i32,
    /// Earliest time a failed-but-retryable job becomes eligible again
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,

    // Outcome
    #[sqlx(try_from = "String")]
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    /// Transport-assigned identifier of the delivered message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Last error message from a failed attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    // Correlation
    /// Opaque payload; may carry a `notification_id` linking a delivery record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Shared across one bulk-enqueue call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmailJob {
    /// Whether the job may be picked up at `now`.
    ///
    /// Pending, due, and either never retried or past its retry time. The
    /// `attempts < max_attempts` conjunct is implied by the state invariant
    /// but checked anyway so an exhausted job never re-enters dispatch.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending
            && self.scheduled_at <= now
            && self.attempts < self.max_attempts
            && self.next_retry_at.map_or(true, |t| t <= now)
    }

    /// Extract the linked notification id from metadata, if any.
    pub fn notification_id(&self) -> Option<Uuid> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("notification_id"))
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}

/// Input for enqueueing a single email.
///
/// Validation is pure and separate from persistence so it can be unit-tested
/// without a store; see [`NewEmailJob::validate`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewEmailJob {
    pub to: String,
    #[serde(default)]
    pub cc: Option<String>,
    #[serde(default)]
    pub bcc: Option<String>,
    pub subject: String,
    #[serde(default)]
    pub text_body: Option<String>,
    #[serde(default)]
    pub html_body: Option<String>,
    #[serde(default)]
    pub from_name: Option<String>,
    #[serde(default)]
    pub from_email: Option<String>,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub priority: Option<EmailPriority>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max_attempts: Option<i32>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub batch_id: Option<Uuid>,
}

impl NewEmailJob {
    /// Minimal enqueue input: recipient and subject.
    pub fn new(to: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            ..Default::default()
        }
    }

    pub fn text_body(mut self, body: impl Into<String>) -> Self {
        self.text_body = Some(body.into());
        self
    }

    pub fn html_body(mut self, body: impl Into<String>) -> Self {
        self.html_body = Some(body.into());
        self
    }

    pub fn priority(mut self, priority: EmailPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn max_attempts(mut self, max: i32) -> Self {
        self.max_attempts = Some(max);
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Check required fields. Fails with a `Validation` error when `to` or
    /// `subject` is missing; no job is created in that case.
    pub fn validate(&self) -> Result<()> {
        if self.to.trim().is_empty() {
            return Err(QueueError::Validation("recipient (to) is required".into()));
        }
        if self.subject.trim().is_empty() {
            return Err(QueueError::Validation("subject is required".into()));
        }
        Ok(())
    }

    /// Materialise a pending job, substituting defaults for unset fields.
    pub fn into_job(self, default_max_attempts: i32, now: DateTime<Utc>) -> EmailJob {
        EmailJob {
            id: Uuid::new_v4(),
            to: self.to,
            cc: self.cc,
            bcc: self.bcc,
            subject: self.subject,
            text_body: self.text_body,
            html_body: self.html_body,
            from_name: self.from_name,
            from_email: self.from_email,
            reply_to: self.reply_to,
            priority: self.priority.unwrap_or_default(),
            scheduled_at: self.scheduled_at.unwrap_or(now),
            attempts: 0,
            max_attempts: self.max_attempts.unwrap_or(default_max_attempts),
            next_retry_at: None,
            status: JobStatus::Pending,
            sent_at: None,
            failed_at: None,
            message_id: None,
            error: None,
            metadata: self.metadata,
            correlation_id: self.correlation_id,
            batch_id: self.batch_id,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_requires_recipient() {
        let input = NewEmailJob::new("", "Subject");
        assert!(matches!(
            input.validate(),
            Err(QueueError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_requires_subject() {
        let input = NewEmailJob::new("a@b.com", "   ");
        assert!(matches!(
            input.validate(),
            Err(QueueError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_accepts_minimal_input() {
        let input = NewEmailJob::new("a@b.com", "Test");
        assert!(input.validate().is_ok());
    }

    #[test]
    fn test_into_job_defaults() {
        let now = Utc::now();
        let job = NewEmailJob::new("a@b.com", "Test").into_job(3, now);

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_attempts, 3);
        assert_eq!(job.priority, EmailPriority::Medium);
        assert_eq!(job.scheduled_at, now);
        assert!(job.next_retry_at.is_none());
        assert!(job.sent_at.is_none());
    }

    #[test]
    fn test_into_job_keeps_overrides() {
        let now = Utc::now();
        let later = now + chrono::Duration::hours(2);
        let job = NewEmailJob::new("a@b.com", "Test")
            .priority(EmailPriority::Urgent)
            .scheduled_at(later)
            .max_attempts(5)
            .into_job(3, now);

        assert_eq!(job.priority, EmailPriority::Urgent);
        assert_eq!(job.scheduled_at, later);
        assert_eq!(job.max_attempts, 5);
    }

    #[test]
    fn test_eligibility_pending_and_due() {
        let now = Utc::now();
        let job = NewEmailJob::new("a@b.com", "Test").into_job(3, now);
        assert!(job.is_eligible(now));
    }

    #[test]
    fn test_eligibility_respects_scheduled_at() {
        let now = Utc::now();
        let job = NewEmailJob::new("a@b.com", "Test")
            .scheduled_at(now + chrono::Duration::minutes(10))
            .into_job(3, now);
        assert!(!job.is_eligible(now));
    }

    #[test]
    fn test_eligibility_respects_next_retry_at() {
        let now = Utc::now();
        let mut job = NewEmailJob::new("a@b.com", "Test").into_job(3, now);
        job.attempts = 1;
        job.next_retry_at = Some(now + chrono::Duration::seconds(30));
        assert!(!job.is_eligible(now));

        job.next_retry_at = Some(now - chrono::Duration::seconds(1));
        assert!(job.is_eligible(now));
    }

    #[test]
    fn test_eligibility_excludes_exhausted() {
        let now = Utc::now();
        let mut job = NewEmailJob::new("a@b.com", "Test").into_job(3, now);
        job.attempts = 3;
        assert!(!job.is_eligible(now));
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Sent.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(EmailPriority::Urgent > EmailPriority::High);
        assert!(EmailPriority::High > EmailPriority::Medium);
        assert!(EmailPriority::Medium > EmailPriority::Low);
    }

    #[test]
    fn test_notification_id_from_metadata() {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let job = NewEmailJob::new("a@b.com", "Test")
            .metadata(json!({ "notification_id": id.to_string() }))
            .into_job(3, now);

        assert_eq!(job.notification_id(), Some(id));

        let plain = NewEmailJob::new("a@b.com", "Test").into_job(3, now);
        assert_eq!(plain.notification_id(), None);
    }
}
