//! SMTP transport via lettre.

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use uuid::Uuid;

use crate::config::SmtpConfig;
use crate::error::{QueueError, Result};

use super::{MailTransport, OutboundEmail, SendReceipt};

/// SMTP-backed mail transport.
pub struct SmtpTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    host: String,
}

impl SmtpTransport {
    /// Build a transport from resolved SMTP configuration.
    ///
    /// Port 465 uses implicit TLS; everything else negotiates STARTTLS,
    /// required when `secure` is set and opportunistic otherwise.
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let tls_params = TlsParameters::new(config.host.clone())
            .map_err(|e| QueueError::Transport(e.to_string()))?;

        let tls = if config.port == 465 {
            Tls::Wrapper(tls_params)
        } else if config.secure {
            Tls::Required(tls_params)
        } else {
            Tls::Opportunistic(tls_params)
        };

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
            .port(config.port)
            .tls(tls);

        if let (Some(user), Some(pass)) = (&config.user, &config.pass) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            host: config.host.clone(),
        })
    }

    fn parse_mailbox(name: Option<&str>, email: &str) -> Result<Mailbox> {
        let raw = match name {
            Some(name) if !name.is_empty() => format!("{} <{}>", name, email),
            _ => email.to_string(),
        };
        raw.parse::<Mailbox>()
            .map_err(|e| QueueError::Transport(format!("invalid address {}: {}", email, e)))
    }

    fn compose(&self, email: &OutboundEmail, message_id: &str) -> Result<Message> {
        let mut builder = Message::builder()
            .from(Self::parse_mailbox(
                Some(&email.from_name),
                &email.from_email,
            )?)
            .subject(email.subject.clone())
            .message_id(Some(message_id.to_string()));

        for addr in email.to.split(',') {
            builder = builder.to(Self::parse_mailbox(None, addr.trim())?);
        }
        if let Some(cc) = &email.cc {
            for addr in cc.split(',') {
                builder = builder.cc(Self::parse_mailbox(None, addr.trim())?);
            }
        }
        if let Some(bcc) = &email.bcc {
            for addr in bcc.split(',') {
                builder = builder.bcc(Self::parse_mailbox(None, addr.trim())?);
            }
        }
        if let Some(reply_to) = &email.reply_to {
            builder = builder.reply_to(Self::parse_mailbox(None, reply_to.trim())?);
        }

        let message = match (&email.text_body, &email.html_body) {
            (Some(text), Some(html)) => builder.multipart(MultiPart::alternative_plain_html(
                text.clone(),
                html.clone(),
            )),
            (None, Some(html)) => builder
                .header(ContentType::TEXT_HTML)
                .body(html.clone()),
            (Some(text), None) => builder
                .header(ContentType::TEXT_PLAIN)
                .body(text.clone()),
            (None, None) => builder
                .header(ContentType::TEXT_PLAIN)
                .body(String::new()),
        };

        message.map_err(|e| QueueError::Transport(format!("failed to compose message: {}", e)))
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn verify(&self) -> Result<()> {
        let ok = self
            .transport
            .test_connection()
            .await
            .map_err(|e| QueueError::Transport(e.to_string()))?;

        if !ok {
            return Err(QueueError::Transport(format!(
                "SMTP server {} rejected the connection test",
                self.host
            )));
        }
        Ok(())
    }

    async fn send(&self, email: &OutboundEmail) -> Result<SendReceipt> {
        let message_id = format!("<{}@{}>", Uuid::new_v4(), self.host);
        let message = self.compose(email, &message_id)?;

        self.transport
            .send(message)
            .await
            .map_err(|e| QueueError::Transport(e.to_string()))?;

        Ok(SendReceipt { message_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_email() -> OutboundEmail {
        OutboundEmail {
            from_name: "Casework".to_string(),
            from_email: "noreply@example.com".to_string(),
            to: "a@b.com".to_string(),
            cc: None,
            bcc: None,
            reply_to: None,
            subject: "Test".to_string(),
            text_body: Some("hello".to_string()),
            html_body: None,
        }
    }

    fn test_config() -> SmtpConfig {
        SmtpConfig {
            host: "smtp.example.com".to_string(),
            port: 587,
            secure: true,
            user: Some("user".to_string()),
            pass: Some("pass".to_string()),
            from_name: "Casework".to_string(),
            from_email: "noreply@example.com".to_string(),
        }
    }

    #[test]
    fn test_compose_plain_text() {
        let transport = SmtpTransport::new(&test_config()).unwrap();
        let message = transport
            .compose(&sample_email(), "<id@smtp.example.com>")
            .unwrap();

        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Subject: Test"));
        assert!(raw.contains("To: a@b.com"));
    }

    #[test]
    fn test_compose_multipart_when_both_bodies() {
        let transport = SmtpTransport::new(&test_config()).unwrap();
        let mut email = sample_email();
        email.html_body = Some("<p>hello</p>".to_string());

        let message = transport
            .compose(&email, "<id@smtp.example.com>")
            .unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("multipart/alternative"));
    }

    #[test]
    fn test_compose_rejects_bad_recipient() {
        let transport = SmtpTransport::new(&test_config()).unwrap();
        let mut email = sample_email();
        email.to = "not an address".to_string();

        assert!(matches!(
            transport.compose(&email, "<id@x>"),
            Err(QueueError::Transport(_))
        ));
    }

    #[test]
    fn test_compose_multiple_recipients() {
        let transport = SmtpTransport::new(&test_config()).unwrap();
        let mut email = sample_email();
        email.to = "a@b.com, c@d.com".to_string();
        email.cc = Some("e@f.com".to_string());

        let message = transport
            .compose(&email, "<id@smtp.example.com>")
            .unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("c@d.com"));
        assert!(raw.contains("Cc: e@f.com"));
    }
}
