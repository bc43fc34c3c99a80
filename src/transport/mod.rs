//! Mail transport abstraction.
//!
//! The transport is a black box to the queue: it either returns a delivery
//! identifier or fails. The processor imposes no timeout of its own and
//! relies on the transport's connection timeouts.

mod smtp;

use async_trait::async_trait;

use crate::error::Result;

pub use smtp::SmtpTransport;

/// A fully composed outbound message, defaults already substituted.
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub from_name: String,
    pub from_email: String,
    pub to: String,
    pub cc: Option<String>,
    pub bcc: Option<String>,
    pub reply_to: Option<String>,
    pub subject: String,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
}

/// Outcome of a successful send.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    /// Transport-assigned message identifier
    pub message_id: String,
}

/// Black-box delivery operation.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Credential/connectivity check, used at startup to gate the processor.
    async fn verify(&self) -> Result<()>;

    /// Attempt delivery of one message.
    async fn send(&self, email: &OutboundEmail) -> Result<SendReceipt>;
}
