//! Delivery record collaborator.
//!
//! Higher-level notification logic tracks one delivery record per channel
//! and recipient. When a job's metadata carries a `notification_id`, the
//! processor mirrors the job outcome onto that record. Updates are
//! best-effort: a failed record write is logged and never disturbs the job
//! outcome itself.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Outcome mirrored onto a delivery record.
#[derive(Debug, Clone)]
pub enum DeliveryOutcome {
    Sent {
        sent_at: DateTime<Utc>,
        message_id: String,
    },
    Failed {
        failed_at: DateTime<Utc>,
        error: String,
    },
}

/// Collaborator updating per-notification, per-recipient delivery records.
#[async_trait]
pub trait DeliveryRecorder: Send + Sync {
    /// Update the delivery record for `notification_id` on `channel` to the
    /// given outcome. Best-effort.
    async fn update_delivery_status(
        &self,
        notification_id: Uuid,
        channel: &str,
        recipient: &str,
        outcome: DeliveryOutcome,
    );
}

/// Delivery records stored in PostgreSQL (`notification_deliveries` table).
pub struct PostgresDeliveryRecorder {
    pool: PgPool,
}

impl PostgresDeliveryRecorder {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeliveryRecorder for PostgresDeliveryRecorder {
    async fn update_delivery_status(
        &self,
        notification_id: Uuid,
        channel: &str,
        recipient: &str,
        outcome: DeliveryOutcome,
    ) {
        let result = match &outcome {
            DeliveryOutcome::Sent { sent_at, message_id } => {
                sqlx::query(
                    r#"
                    UPDATE notification_deliveries
                    SET status = 'sent', sent_at = $4, message_id = $5, updated_at = NOW()
                    WHERE notification_id = $1 AND channel = $2 AND recipient = $3
                    "#,
                )
                .bind(notification_id)
                .bind(channel)
                .bind(recipient)
                .bind(sent_at)
                .bind(message_id)
                .execute(&self.pool)
                .await
            }
            DeliveryOutcome::Failed { failed_at, error } => {
                sqlx::query(
                    r#"
                    UPDATE notification_deliveries
                    SET status = 'failed', failed_at = $4, error = $5, updated_at = NOW()
                    WHERE notification_id = $1 AND channel = $2 AND recipient = $3
                    "#,
                )
                .bind(notification_id)
                .bind(channel)
                .bind(recipient)
                .bind(failed_at)
                .bind(error)
                .execute(&self.pool)
                .await
            }
        };

        if let Err(e) = result {
            tracing::warn!(
                error = %e,
                notification_id = %notification_id,
                channel = %channel,
                "Failed to update delivery record"
            );
        }
    }
}

/// No-op recorder for deployments without delivery-record tracking.
#[derive(Default)]
pub struct NoopDeliveryRecorder;

#[async_trait]
impl DeliveryRecorder for NoopDeliveryRecorder {
    async fn update_delivery_status(
        &self,
        _notification_id: Uuid,
        _channel: &str,
        _recipient: &str,
        _outcome: DeliveryOutcome,
    ) {
    }
}
