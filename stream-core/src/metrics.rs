//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for the registry and its ledgers.
//!
//! # Metrics
//!
//! - `streampay_ledgers_created_total` - Ledgers deployed by the registry
//! - `streampay_commands_total{command, outcome}` - Ledger commands by kind and result
//! - `streampay_active_streams{token}` - Active streams per ledger

use crate::Result;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Ledgers deployed
    pub ledgers_created: IntCounter,

    /// Commands by kind and outcome
    pub commands: IntCounterVec,

    /// Active streams per token
    pub active_streams: IntGaugeVec,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("ledgers_created", &self.ledgers_created.get())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create new metrics collector on a private registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let ledgers_created = IntCounter::new(
            "streampay_ledgers_created_total",
            "Ledgers deployed by the registry",
        )?;
        registry.register(Box::new(ledgers_created.clone()))?;

        let commands = IntCounterVec::new(
            Opts::new("streampay_commands_total", "Ledger commands by kind and outcome"),
            &["command", "outcome"],
        )?;
        registry.register(Box::new(commands.clone()))?;

        let active_streams = IntGaugeVec::new(
            Opts::new("streampay_active_streams", "Active streams per ledger"),
            &["token"],
        )?;
        registry.register(Box::new(active_streams.clone()))?;

        Ok(Self {
            ledgers_created,
            commands,
            active_streams,
            registry,
        })
    }

    /// Record ledger deployment
    pub fn record_ledger_created(&self) {
        self.ledgers_created.inc();
    }

    /// Record a command outcome; `outcome` is `ok` or an error kind
    pub fn record_command(&self, command: &str, outcome: &str) {
        self.commands.with_label_values(&[command, outcome]).inc();
    }

    /// Update active stream gauge for a token
    pub fn set_active_streams(&self, token: &str, count: usize) {
        self.active_streams
            .with_label_values(&[token])
            .set(count as i64);
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| crate::Error::Config(format!("Failed to encode metrics: {}", e)))?;
        String::from_utf8(buffer)
            .map_err(|e| crate::Error::Config(format!("Metrics are not UTF-8: {}", e)))
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
