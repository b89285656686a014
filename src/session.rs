//! Aggregation session: debounced product tally over sampled snapshots.
//!
//! `AggregationSession` is the pure state machine (`Idle` ⇄ `Active`, counts,
//! debounce clock). `SessionLoop` owns it on a dedicated thread, samples the
//! detection store every tick and forwards accepted updates to an `EventSink`.
//! Transport threads drive it through a cloneable `SessionHandle`; the product
//! list itself never leaves the loop thread except as published copies.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::catalog::{LabelTable, ProductCatalog};
use crate::detect::Detection;
use crate::sink::EventSink;
use crate::store::DetectionStore;
use crate::Shutdown;

/// Sampling tick.
pub const DEFAULT_TICK: Duration = Duration::from_millis(100);

/// Minimum gap between two accepted detection events.
pub const DEFAULT_MIN_DETECTION_GAP: Duration = Duration::from_secs(2);

/// One line of the running tally, as sent to the dashboard.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductEntry {
    #[serde(rename = "label")]
    pub name: String,
    pub quantity: u32,
    #[serde(rename = "price")]
    pub unit_price: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Idle,
    Active,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionCommand {
    Start,
    Stop,
}

/// What one sample did to the session.
#[derive(Clone, Debug, PartialEq)]
pub enum SampleOutcome {
    /// Session is idle; nothing was read.
    Inactive,
    /// Snapshot did not hold exactly one detection.
    Ambiguous { detections: usize },
    /// Inside the minimum gap since the last accepted event.
    Debounced,
    /// Category has no entry in the label table.
    UnknownCategory(u32),
    /// Quantity for `name` was incremented to `quantity`.
    Accepted { name: String, quantity: u32 },
}

// ----------------------------------------------------------------------------
// AggregationSession: state machine
// ----------------------------------------------------------------------------

pub struct AggregationSession {
    state: SessionState,
    products: Vec<ProductEntry>,
    last_event: Option<Instant>,
    min_gap: Duration,
    labels: Arc<LabelTable>,
    catalog: Arc<ProductCatalog>,
}

impl AggregationSession {
    pub fn new(labels: Arc<LabelTable>, catalog: Arc<ProductCatalog>, min_gap: Duration) -> Self {
        Self {
            state: SessionState::Idle,
            products: Vec::new(),
            last_event: None,
            min_gap,
            labels,
            catalog,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Current tally, in first-scanned order.
    pub fn products(&self) -> &[ProductEntry] {
        &self.products
    }

    pub fn quantity(&self, name: &str) -> u32 {
        self.products
            .iter()
            .find(|p| p.name == name)
            .map_or(0, |p| p.quantity)
    }

    pub fn last_event(&self) -> Option<Instant> {
        self.last_event
    }

    /// Enter `Active` with an empty tally. Idempotent.
    pub fn start(&mut self) {
        self.state = SessionState::Active;
        self.reset();
        log::info!("detection session started");
    }

    /// Enter `Idle`, discarding the tally. Idempotent; publishes nothing.
    pub fn stop(&mut self) {
        if self.state == SessionState::Active {
            log::info!(
                "detection session stopped ({} distinct products discarded)",
                self.products.len()
            );
        }
        self.state = SessionState::Idle;
        self.reset();
    }

    pub fn apply(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Start => self.start(),
            SessionCommand::Stop => self.stop(),
        }
    }

    /// Feed one snapshot observed at `now`.
    ///
    /// Only a snapshot with exactly one detection can count, and only once the
    /// minimum gap since the previous accepted event has elapsed.
    pub fn sample(&mut self, snapshot: &[Detection], now: Instant) -> SampleOutcome {
        if self.state == SessionState::Idle {
            return SampleOutcome::Inactive;
        }
        let [detection] = snapshot else {
            return SampleOutcome::Ambiguous {
                detections: snapshot.len(),
            };
        };
        if let Some(last) = self.last_event {
            if now.saturating_duration_since(last) < self.min_gap {
                return SampleOutcome::Debounced;
            }
        }
        let Some(name) = self.labels.name(detection.category) else {
            log::warn!(
                "ignoring detection with unknown category {} ({} labels loaded)",
                detection.category,
                self.labels.len()
            );
            return SampleOutcome::UnknownCategory(detection.category);
        };

        let quantity = match self.products.iter_mut().find(|p| p.name == name) {
            Some(entry) => {
                entry.quantity += 1;
                entry.quantity
            }
            None => {
                self.products.push(ProductEntry {
                    name: name.to_string(),
                    quantity: 1,
                    unit_price: self.catalog.price(name),
                });
                1
            }
        };
        self.last_event = Some(now);
        log::info!(
            "scanned {} (quantity {}, confidence {:.2})",
            name,
            quantity,
            detection.confidence
        );
        SampleOutcome::Accepted {
            name: name.to_string(),
            quantity,
        }
    }

    fn reset(&mut self) {
        self.products.clear();
        self.last_event = None;
    }
}

// ----------------------------------------------------------------------------
// SessionHandle: control commands from transport threads
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct SessionHandle {
    commands: Sender<SessionCommand>,
}

impl SessionHandle {
    pub fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| anyhow!("aggregation loop is not running"))
    }

    pub fn start_detection(&self) -> Result<()> {
        self.send(SessionCommand::Start)
    }

    pub fn stop_detection(&self) -> Result<()> {
        self.send(SessionCommand::Stop)
    }
}

// ----------------------------------------------------------------------------
// SessionLoop: fixed-tick sampler
// ----------------------------------------------------------------------------

pub struct SessionLoop {
    session: AggregationSession,
    store: Arc<DetectionStore>,
    sink: Arc<dyn EventSink>,
    tick: Duration,
    commands: Receiver<SessionCommand>,
}

impl SessionLoop {
    pub fn new(
        session: AggregationSession,
        store: Arc<DetectionStore>,
        sink: Arc<dyn EventSink>,
        tick: Duration,
    ) -> (Self, SessionHandle) {
        let (tx, rx) = mpsc::channel();
        let session_loop = Self {
            session,
            store,
            sink,
            tick,
            commands: rx,
        };
        (session_loop, SessionHandle { commands: tx })
    }

    pub fn session(&self) -> &AggregationSession {
        &self.session
    }

    /// One tick: apply pending commands, then sample if active.
    ///
    /// A publish failure is logged and does not affect the tally.
    pub fn tick_at(&mut self, now: Instant) -> SampleOutcome {
        self.drain_commands();
        if self.session.state() == SessionState::Idle {
            return SampleOutcome::Inactive;
        }

        let snapshot = self.store.read();
        let outcome = self.session.sample(&snapshot, now);
        if let SampleOutcome::Accepted { .. } = outcome {
            if let Err(err) = self.sink.publish(self.session.products()) {
                log::warn!("{} sink publish failed: {:#}", self.sink.name(), err);
            }
        }
        outcome
    }

    /// Sample every tick until shutdown.
    pub fn run(mut self, shutdown: &Shutdown) {
        log::info!(
            "aggregation loop running (tick {:?}, min gap {:?}, sink {})",
            self.tick,
            self.session.min_gap,
            self.sink.name()
        );
        while !shutdown.is_triggered() {
            self.tick_at(Instant::now());
            std::thread::sleep(self.tick);
        }
        log::info!("aggregation loop stopped");
    }

    pub fn spawn(self, shutdown: Shutdown) -> Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("checkout-aggregation".to_string())
            .spawn(move || self.run(&shutdown))
            .context("spawn aggregation loop")
    }

    fn drain_commands(&mut self) {
        loop {
            match self.commands.try_recv() {
                Ok(command) => self.session.apply(command),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
