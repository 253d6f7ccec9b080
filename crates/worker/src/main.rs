use std::sync::Arc;

use anyhow::Context;
use courier_events::{
    ConsumerGroup, DispatchChannel, EmailConfig, EmailDelivery, LogDelivery,
    NotificationConsumer, NotificationProcessor, NotificationStore, PgNotificationStore,
    PgRecipientDirectory, PgStreamStore,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use courier_worker::config::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    init_tracing();

    // --- Configuration ---
    let config = WorkerConfig::from_env()?;
    tracing::info!(
        consumer = %config.consumer_id,
        stream = %config.streams.stream,
        group = %config.streams.group,
        concurrency = config.concurrency,
        "Loaded worker configuration"
    );

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

    let pool = courier_db::create_pool(&database_url)
        .await
        .context("Failed to connect to database")?;
    courier_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    courier_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database ready");

    // --- Stream ---
    let store = Arc::new(PgStreamStore::new(pool.clone()));
    let group = Arc::new(
        ConsumerGroup::new(store, &config.streams.stream, &config.streams.group)
            .with_block(config.block),
    );
    group
        .ensure_group()
        .await
        .context("Failed to create consumer group")?;

    // --- Delivery ---
    let channel: Arc<dyn DispatchChannel> = match EmailConfig::from_env() {
        Some(email) => {
            tracing::info!(smtp_host = %email.smtp_host, "Dispatching notifications by email");
            Arc::new(EmailDelivery::new(&email).context("Failed to build SMTP transport")?)
        }
        None => {
            tracing::warn!("SMTP_HOST not set, notifications will only be logged");
            Arc::new(LogDelivery)
        }
    };

    let records: Arc<dyn NotificationStore> = Arc::new(PgNotificationStore::new(pool.clone()));
    let processor = NotificationProcessor::new(
        Arc::clone(&group),
        Arc::new(PgRecipientDirectory::new(pool)),
        channel,
        Arc::clone(&records),
    )
    .with_io_timeout(config.handler_timeout);

    // --- Run ---
    let handle = NotificationConsumer::new(
        group,
        Arc::new(processor),
        records,
        config.consumer_config(),
    )
    .spawn(CancellationToken::new());

    shutdown_signal().await;
    handle.shutdown().await;

    tracing::info!("Worker stopped");
    Ok(())
}

/// Install the global subscriber. `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "courier_worker=info,courier_events=info".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT, draining consumer"),
        () = terminate => tracing::info!("Received SIGTERM, draining consumer"),
    }
}
