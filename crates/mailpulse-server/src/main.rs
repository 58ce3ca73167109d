//! MailPulse - campaign engine entry point

use anyhow::{Context, Result};
use mailpulse_api::{create_router, AppState};
use mailpulse_common::config::{Config, LoggingConfig};
use mailpulse_core::{
    CampaignScheduler, Dispatcher, GmailApi, SendThrottle, TokenCipher, TokenStore, TrackingLinks,
};
use mailpulse_storage::{DatabasePool, Store};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting MailPulse on {}...", config.server.hostname);

    // Initialize database
    let db_pool = DatabasePool::new(&config.database).await?;

    // Run migrations
    db_pool.migrate().await?;

    let store = Store::postgres(db_pool);

    // Mailbox credentials
    let cipher = TokenCipher::from_hex_key(&config.security.resolve_token_key()?)
        .context("invalid security.token_key")?;
    let gmail = Arc::new(GmailApi::from_config(&config.oauth)?);
    let tokens = TokenStore::new(store.tokens.clone(), cipher, gmail.clone(), gmail)
        .with_refresh_skew(config.oauth.refresh_skew_secs);

    // Dispatch pipeline
    let shutdown = CancellationToken::new();
    let throttle = Arc::new(SendThrottle::from_config(&config.dispatch, shutdown.clone()));
    let links = TrackingLinks::new(&config.tracking.public_base_url)?;
    let dispatcher = Dispatcher::new(store.clone(), tokens, links, throttle);
    let scheduler = CampaignScheduler::new(store.clone(), dispatcher.clone())
        .with_poll_interval(config.scheduler.poll_interval_secs);

    info!(
        "Dispatch: {}ms between sends, at most {} concurrent campaigns",
        config.dispatch.send_delay_ms, config.dispatch.max_concurrent_campaigns
    );

    // Start background scheduler if enabled
    let scheduler_handle = if config.scheduler.enabled {
        let scheduler = scheduler.clone();
        let shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            scheduler.run(shutdown).await;
        }))
    } else {
        info!("Background scheduler disabled, relying on /cron/process-scheduled");
        None
    };

    // Start API server
    let state = AppState::new(store, dispatcher, scheduler)
        .with_internal_token(config.api.internal_token.clone())
        .with_cron_secret(config.scheduler.cron_secret.clone());
    let app = create_router(state, &config.api.cors_origins);

    let addr = format!("{}:{}", config.server.bind_address, config.api.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind API server on {}", addr))?;
    info!("Starting API server on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // Let an in-flight sweep record its results
    if let Some(handle) = scheduler_handle {
        if let Err(e) = handle.await {
            tracing::error!("Scheduler task failed: {}", e);
        }
    }

    info!("MailPulse shutdown complete");

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
    shutdown.cancel();
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
