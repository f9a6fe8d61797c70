// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Fieldops-Sync local server
//!
//! Runs the sync core and serves the facade to the UI over a local HTTP API.

use anyhow::Context;
use fieldops_sync::{config::Config, services::SyncFacade, AppState};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured JSON logging
    init_logging()?;

    // Load configuration from environment
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(
        port = config.port,
        dev_mode = config.dev_mode,
        demo_mode = config.demo_mode,
        "Starting Fieldops-Sync"
    );

    // Open the durable cache and wire up the services
    let facade = SyncFacade::builder(config.clone())
        .build()
        .await
        .context("Failed to initialize sync core")?;
    let counts = facade.store().snapshot_counts().await;
    tracing::info!(
        cache_path = %config.cache_path,
        sections = counts.sections,
        event_scopes = counts.event_scopes,
        "Cache opened"
    );

    // Watchdog, cross-context listener, queue stats
    let shutdown = CancellationToken::new();
    let background = facade.spawn_background_tasks(shutdown.clone());

    // Build shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        facade,
    });

    // Build router
    let app = fieldops_sync::routes::create_router(state);

    // Start server
    let addr = format!("127.0.0.1:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutting down");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    for task in background {
        let _ = task.await;
    }
    Ok(())
}

/// Initialize structured JSON logging.
fn init_logging() -> anyhow::Result<()> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fieldops_sync=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();
    Ok(())
}
