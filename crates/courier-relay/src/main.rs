use std::sync::Arc;

use anyhow::{Context, Result};
use courier_outbox::{PgOutboxRepository, RelayWorker, MIGRATOR};
use courier_relay::{init_tracing, PubSubPublisher, RelaySettings};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let settings = RelaySettings::from_env().context("Failed to load relay configuration")?;
    init_tracing(settings.log_format);

    tracing::info!("courier-relay starting...");

    let pool = PgPoolOptions::new()
        .max_connections(settings.database_max_connections)
        .connect(&settings.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Connected to database");

    if settings.run_migrations {
        MIGRATOR
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;
        tracing::info!("Database migrations applied");
    }

    let repository = PgOutboxRepository::new(pool.clone())
        .with_backoff(settings.backoff.clone())
        .with_claim_lease(settings.claim_lease);

    let publisher =
        PubSubPublisher::new(settings.pubsub.clone()).context("Failed to build Pub/Sub client")?;
    tracing::info!(
        project_id = %settings.pubsub.project_id,
        endpoint = %settings.pubsub.endpoint,
        "Pub/Sub publisher configured"
    );

    let worker = RelayWorker::new(
        Arc::new(repository),
        Arc::new(publisher),
        settings.relay.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, finishing current batch");

    // The worker may already have exited; nothing to signal then
    let _ = shutdown_tx.send(true);
    handle.await.context("Relay worker task panicked")?;

    pool.close().await;
    tracing::info!("courier-relay shutdown complete");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
