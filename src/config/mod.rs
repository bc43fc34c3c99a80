pub mod settings;
pub mod smtp;

pub use settings::{DatabaseConfig, QueueSettings, Settings};
pub use smtp::{load_smtp_config, ConfigStore, MemoryConfigStore, PostgresConfigStore, SmtpConfig};
