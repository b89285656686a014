//! Event sinks for dashboard updates.
//!
//! The aggregation loop hands every accepted update (the full product list,
//! not a delta) to one `EventSink`. Publication is fire-and-forget: an `Err`
//! is logged by the loop and never retried.

use anyhow::{anyhow, Result};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};

use crate::session::ProductEntry;

pub mod mqtt;

pub use mqtt::{MqttSettings, MqttSink};

/// Publish interface used by the aggregation loop.
///
/// Implementations must not block for long: the loop calls `publish` inline
/// between ticks.
pub trait EventSink: Send + Sync {
    /// Sink identifier (for logs).
    fn name(&self) -> &'static str;

    fn publish(&self, products: &[ProductEntry]) -> Result<()>;
}

/// Dashboard wire format: JSON list of `{label, quantity, price}`.
pub fn dashboard_payload(products: &[ProductEntry]) -> Result<String> {
    Ok(serde_json::to_string(products)?)
}

/// Writes each update to the log.
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn publish(&self, products: &[ProductEntry]) -> Result<()> {
        log::info!("detection_update {}", dashboard_payload(products)?);
        Ok(())
    }
}

/// Keeps the most recent update for polling clients.
#[derive(Debug, Default)]
pub struct LatestSink {
    latest: Mutex<Vec<ProductEntry>>,
}

impl LatestSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Vec<ProductEntry> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EventSink for LatestSink {
    fn name(&self) -> &'static str {
        "latest"
    }

    fn publish(&self, products: &[ProductEntry]) -> Result<()> {
        let update = products.to_vec();
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = update;
        Ok(())
    }
}

/// Forwards each update over an in-process channel.
#[derive(Debug)]
pub struct ChannelSink {
    tx: Sender<Vec<ProductEntry>>,
}

impl ChannelSink {
    pub fn new() -> (Self, Receiver<Vec<ProductEntry>>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn name(&self) -> &'static str {
        "channel"
    }

    fn publish(&self, products: &[ProductEntry]) -> Result<()> {
        self.tx
            .send(products.to_vec())
            .map_err(|_| anyhow!("update receiver dropped"))
    }
}

/// Publishes to every inner sink; one failing sink does not stop the others.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn name(&self) -> &'static str {
        "fanout"
    }

    fn publish(&self, products: &[ProductEntry]) -> Result<()> {
        let mut failed = Vec::new();
        for sink in &self.sinks {
            if let Err(err) = sink.publish(products) {
                log::warn!("{} sink publish failed: {:#}", sink.name(), err);
                failed.push(sink.name());
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("publish failed for sinks: {}", failed.join(", ")))
        }
    }
}
