//! MQTT event sink.
//!
//! Publishes each dashboard update (JSON list) to a topic with QoS 1. The
//! request queue is bounded; `publish` uses `try_publish` so a stalled broker
//! drops updates instead of blocking the aggregation loop.

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, MqttOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use super::{dashboard_payload, EventSink};
use crate::session::ProductEntry;

pub const DEFAULT_TOPIC: &str = "checkout/detection_update";
pub const DEFAULT_CLIENT_ID: &str = "checkoutd";

const REQUEST_QUEUE_CAPACITY: usize = 10;
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttSettings {
    /// `host:port`, optionally prefixed with `mqtt://` or `tcp://`.
    pub broker: String,
    pub topic: String,
    pub client_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
}

pub fn parse_mqtt_endpoint(addr: &str) -> Result<MqttEndpoint> {
    let mut remainder = addr.trim();
    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme {
            "mqtt" | "tcp" => {}
            "mqtts" | "ssl" => {
                return Err(anyhow!("TLS MQTT brokers are not supported: {}", addr));
            }
            other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
        }
        remainder = rest;
    }

    // IPv6 in brackets: [::1]:1883
    let (host, port) = if let Some(rest) = remainder.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
        (host, port)
    } else {
        remainder
            .rsplit_once(':')
            .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?
    };
    if host.is_empty() {
        return Err(anyhow!("missing MQTT host in {}", addr));
    }
    let port: u16 = port
        .parse()
        .with_context(|| format!("invalid MQTT port in {}", addr))?;
    Ok(MqttEndpoint {
        host: host.to_string(),
        port,
    })
}

pub struct MqttSink {
    client: Client,
    topic: String,
    closing: Arc<AtomicBool>,
    connection_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MqttSink {
    /// Create the client and start its connection thread. The broker is
    /// contacted lazily; connection errors are logged and retried.
    pub fn connect(settings: &MqttSettings) -> Result<Self> {
        let endpoint = parse_mqtt_endpoint(&settings.broker)?;
        let mut options = MqttOptions::new(&settings.client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_start(true);

        let (client, connection) = Client::new(options, REQUEST_QUEUE_CAPACITY);
        let closing = Arc::new(AtomicBool::new(false));
        let handle = spawn_connection(connection, closing.clone())?;
        log::info!(
            "mqtt sink publishing to {}:{} topic {}",
            endpoint.host,
            endpoint.port,
            settings.topic
        );
        Ok(Self {
            client,
            topic: settings.topic.clone(),
            closing,
            connection_handle: Mutex::new(Some(handle)),
        })
    }

    pub fn disconnect(&self) -> Result<()> {
        self.closing.store(true, Ordering::SeqCst);
        self.client.disconnect()?;
        let handle = self
            .connection_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle
                .join()
                .map_err(|_| anyhow!("mqtt connection thread panicked"))?;
        }
        Ok(())
    }
}

impl EventSink for MqttSink {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn publish(&self, products: &[ProductEntry]) -> Result<()> {
        let payload = dashboard_payload(products)?;
        self.client
            .try_publish(self.topic.as_str(), QoS::AtLeastOnce, false, payload.into_bytes())?;
        Ok(())
    }
}

fn spawn_connection(
    mut connection: Connection,
    closing: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("checkout-mqtt".to_string())
        .spawn(move || {
            for event in connection.iter() {
                match event {
                    Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
                    Err(e) => {
                        if closing.load(Ordering::SeqCst) {
                            break;
                        }
                        log::warn!("MQTT connection error: {}", e);
                        std::thread::sleep(RECONNECT_BACKOFF);
                    }
                }
            }
        })
        .context("spawn mqtt connection thread")
}
