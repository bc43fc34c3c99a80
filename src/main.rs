use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use email_queue_service::config::{load_smtp_config, PostgresConfigStore, Settings};
use email_queue_service::delivery::PostgresDeliveryRecorder;
use email_queue_service::processor::{ProcessorConfig, QueueProcessor, RetryPolicy};
use email_queue_service::service::EmailQueueService;
use email_queue_service::store::PostgresJobStore;
use email_queue_service::transport::{MailTransport, SmtpTransport};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    init_tracing();

    // Load configuration
    let settings = Settings::new()?;
    tracing::info!("Configuration loaded");

    // Connect to PostgreSQL and apply migrations
    let pool = PgPoolOptions::new()
        .max_connections(settings.database.max_connections)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(&settings.database.url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!(
        max_connections = settings.database.max_connections,
        "Connected to PostgreSQL"
    );

    let store = Arc::new(PostgresJobStore::new(pool.clone()));

    // Resolve SMTP configuration: environment first, persisted key/value
    // fallback second. Without it the processor stays disabled and jobs
    // accumulate until configuration becomes available.
    let config_store = PostgresConfigStore::new(pool.clone());
    let smtp_config = load_smtp_config(&config_store).await?;

    let processor = match &smtp_config {
        Some(smtp) => match SmtpTransport::new(smtp) {
            Ok(transport) => {
                let transport = Arc::new(transport);
                match transport.verify().await {
                    Ok(()) => {
                        tracing::info!(host = %smtp.host, "SMTP transport verified");
                        Some(Arc::new(QueueProcessor::new(
                            store.clone(),
                            transport,
                            Arc::new(PostgresDeliveryRecorder::new(pool.clone())),
                            ProcessorConfig {
                                poll_interval: std::time::Duration::from_secs(
                                    settings.queue.poll_interval_secs,
                                ),
                                batch_size: settings.queue.batch_size,
                                concurrency: settings.queue.concurrency,
                                retry: RetryPolicy::new(
                                    settings.queue.retry_base_ms,
                                    settings.queue.retry_max_ms,
                                ),
                                default_from_name: smtp.from_name.clone(),
                                default_from_email: smtp.from_email.clone(),
                            },
                        )))
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "SMTP verification failed, dispatch disabled");
                        None
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to build SMTP transport, dispatch disabled");
                None
            }
        },
        None => None,
    };

    let service = EmailQueueService::new(
        store,
        processor,
        settings.queue.default_max_attempts,
    );

    service.start().await;
    tracing::info!(running = service.is_running().await, "Email queue service up");

    // Run until SIGINT/SIGTERM
    shutdown_signal().await;

    tracing::info!("Shutting down, stopping queue processor");
    service.stop().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
