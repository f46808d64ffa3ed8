//! StreamPay registry node
//!
//! Deploys the configured ledgers, prints their addresses and logs every
//! event until interrupted.

use anyhow::Context;
use std::sync::Arc;
use stream_core::{Config, Metrics, Registry, SystemClock, Token};
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("loading config from {}", path))?,
        None => Config::from_env().context("loading config from environment")?,
    };

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    if config.logging.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        registry = %config.registry_address,
        "Starting StreamPay node"
    );

    let metrics = Arc::new(Metrics::new().context("registering metrics")?);
    let registry = Registry::with_capacity(
        config.registry_address,
        Arc::new(SystemClock),
        config.mailbox_capacity,
        config.event_capacity,
    )
    .with_metrics(metrics.clone());

    // Indexer: log every event as a JSON line
    let mut events = registry.subscribe();
    let indexer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(record) => match serde_json::to_string(&record) {
                    Ok(json) => tracing::info!(event = record.event.name(), %json, "Event"),
                    Err(e) => tracing::warn!(error = %e, "Failed to encode event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Indexer lagged behind event stream")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    for token in &config.tokens {
        let token = Token::from(*token);
        let (predicted, _) = registry.get_ledger_by_token(&token.address);
        match registry.create_ledger_contract(token) {
            Ok(address) => tracing::info!(%token, ledger = %address, "Ledger deployed"),
            Err(e) => tracing::error!(%token, %predicted, error = %e, "Ledger deployment failed"),
        }
    }

    tracing::info!(ledgers = registry.ledger_count(), "Registry ready");

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down StreamPay node");
    registry.shutdown().await?;
    match metrics.render() {
        Ok(text) => tracing::info!(metrics = %text, "Final metrics"),
        Err(e) => tracing::warn!(error = %e, "Failed to render metrics"),
    }
    indexer.abort();

    Ok(())
}
