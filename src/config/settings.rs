use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub queue: QueueSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// Tuning knobs for the queue processor.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSettings {
    /// Poll interval in seconds between processing cycles
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Maximum eligible jobs fetched per cycle
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Sub-batch size; jobs within one sub-batch dispatch concurrently
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Default attempt cap for jobs that do not specify one
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: i32,
    /// Base retry delay in milliseconds
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Upper bound on the retry delay in milliseconds
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
}

fn default_database_url() -> String {
    "postgres://localhost/casework".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_poll_interval() -> u64 {
    30
}

fn default_batch_size() -> usize {
    20
}

fn default_concurrency() -> usize {
    5
}

fn default_max_attempts() -> i32 {
    3
}

fn default_retry_base_ms() -> u64 {
    1_000
}

fn default_retry_max_ms() -> u64 {
    24 * 60 * 60 * 1_000 // 24 hours
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("database.url", default_database_url())?
            .set_default("database.max_connections", default_max_connections() as i64)?
            .set_default("queue.poll_interval_secs", default_poll_interval() as i64)?
            .set_default("queue.batch_size", default_batch_size() as i64)?
            .set_default("queue.concurrency", default_concurrency() as i64)?
            .set_default("queue.default_max_attempts", default_max_attempts() as i64)?
            .set_default("queue.retry_base_ms", default_retry_base_ms() as i64)?
            .set_default("queue.retry_max_ms", default_retry_max_ms() as i64)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables; section and key are split on
            // a double underscore since key names themselves contain single
            // ones: DATABASE__URL, QUEUE__BATCH_SIZE, QUEUE__RETRY_BASE_MS
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true),
            );

        let mut settings: Settings = builder.build()?.try_deserialize()?;

        // Conventional single-variable form takes precedence
        if let Ok(url) = env::var("DATABASE_URL") {
            settings.database.url = url;
        }

        Ok(settings)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            default_max_attempts: default_max_attempts(),
            retry_base_ms: default_retry_base_ms(),
            retry_max_ms: default_retry_max_ms(),
        }
    }
}
