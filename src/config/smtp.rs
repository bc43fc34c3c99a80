//! SMTP credential resolution.
//!
//! Credentials come from the environment first (`SMTP_HOST`, `SMTP_PORT`,
//! `SMTP_SECURE`, `SMTP_USER`, `SMTP_PASS`, `SMTP_FROM_NAME`,
//! `SMTP_FROM_EMAIL`); when the environment is incomplete, the same keys
//! lowercased are read from a persisted key/value configuration store.
//! `None` means the processor stays disabled: enqueueing keeps working but
//! nothing is dispatched until configuration becomes available.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use sqlx::PgPool;

use crate::error::Result;

/// Resolved SMTP transport configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    /// Require TLS (STARTTLS on submission ports, implicit on 465)
    pub secure: bool,
    pub user: Option<String>,
    pub pass: Option<String>,
    /// Default sender display name for jobs without an override
    pub from_name: String,
    /// Default sender address for jobs without an override
    pub from_email: String,
}

impl SmtpConfig {
    /// Build a config from a key lookup. A config is complete when it has a
    /// host and a usable sender address (`from_email`, falling back to
    /// `user`).
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let host = lookup("host").filter(|h| !h.trim().is_empty())?;

        let user = lookup("user").filter(|u| !u.is_empty());
        let from_email = lookup("from_email")
            .filter(|e| !e.is_empty())
            .or_else(|| user.clone())?;

        let port = lookup("port")
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(587);
        let secure = lookup("secure")
            .map(|s| matches!(s.to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false);

        Some(Self {
            host,
            port,
            secure,
            user,
            pass: lookup("pass").filter(|p| !p.is_empty()),
            from_name: lookup("from_name").unwrap_or_default(),
            from_email,
        })
    }

    /// Resolve from `SMTP_*` environment variables.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(format!("SMTP_{}", key.to_uppercase())).ok())
    }
}

/// Persisted key/value configuration source (the fallback behind the
/// environment).
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
}

/// Key/value configuration rows in PostgreSQL (`app_config` table).
pub struct PostgresConfigStore {
    pool: PgPool,
}

impl PostgresConfigStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConfigStore for PostgresConfigStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM app_config WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value)
    }
}

/// In-memory key/value configuration, used by tests.
#[derive(Default)]
pub struct MemoryConfigStore {
    values: DashMap<String, String>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(key).map(|v| v.clone()))
    }
}

/// Resolve SMTP configuration: environment first, persisted key/value store
/// second, `None` when neither yields a complete configuration.
pub async fn load_smtp_config(store: &dyn ConfigStore) -> Result<Option<SmtpConfig>> {
    if let Some(config) = SmtpConfig::from_env() {
        tracing::info!(host = %config.host, port = config.port, "SMTP configuration loaded from environment");
        return Ok(Some(config));
    }

    let mut values = std::collections::HashMap::new();
    for key in [
        "smtp_host",
        "smtp_port",
        "smtp_secure",
        "smtp_user",
        "smtp_pass",
        "smtp_from_name",
        "smtp_from_email",
    ] {
        if let Some(value) = store.get(key).await? {
            values.insert(key.trim_start_matches("smtp_").to_string(), value);
        }
    }

    let config = SmtpConfig::from_lookup(|key| values.get(key).cloned());
    match &config {
        Some(c) => {
            tracing::info!(host = %c.host, port = c.port, "SMTP configuration loaded from config store")
        }
        None => tracing::warn!("No complete SMTP configuration found; dispatch disabled"),
    }

    Ok(config)
}
