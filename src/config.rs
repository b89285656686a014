use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::catalog::DEFAULT_UNIT_PRICE;
use crate::frame::{DEFAULT_BUFFER_CAPACITY, DEFAULT_POLL_INTERVAL};
use crate::ingest::{SyntheticConfig, SYNTHETIC_SCHEME};
use crate::pipeline::DEFAULT_THRESHOLD;
use crate::session::{DEFAULT_MIN_DETECTION_GAP, DEFAULT_TICK};
use crate::sink::mqtt::{DEFAULT_CLIENT_ID, DEFAULT_TOPIC};
use crate::sink::MqttSettings;
use crate::stream::DEFAULT_JPEG_QUALITY;

const DEFAULT_API_ADDR: &str = "127.0.0.1:5000";
/// Frames arrive from an external inference pipeline; nothing is synthesized.
pub const DEFAULT_CAMERA_SOURCE: &str = "external://camera";
/// Synthetic source used by `--test-mode`.
pub const TEST_MODE_SOURCE: &str = "stub://test_mode";
const DEFAULT_CAMERA_FPS: u32 = 15;
const DEFAULT_FRAME_WIDTH: u32 = 640;
const DEFAULT_FRAME_HEIGHT: u32 = 480;
const DEFAULT_LABELS_PATH: &str = "assets/labels.txt";
const DEFAULT_PRODUCTS_PATH: &str = "products.json";
const SYNTHETIC_CYCLE: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize, Default)]
struct CheckoutConfigFile {
    api: Option<ApiConfigFile>,
    camera: Option<CameraConfigFile>,
    detection: Option<DetectionConfigFile>,
    stream: Option<StreamConfigFile>,
    session: Option<SessionConfigFile>,
    mqtt: Option<MqttConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    source: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    threshold: Option<f32>,
    labels_path: Option<PathBuf>,
    products_path: Option<PathBuf>,
    default_price: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    buffer_capacity: Option<usize>,
    poll_interval_ms: Option<u64>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct SessionConfigFile {
    tick_ms: Option<u64>,
    min_detection_gap_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    broker: Option<String>,
    topic: Option<String>,
    client_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    pub api_addr: String,
    pub camera: CameraSettings,
    pub detection: DetectionSettings,
    pub stream: StreamSettings,
    pub session: SessionSettings,
    pub mqtt: Option<MqttSettings>,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub source: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub threshold: f32,
    pub labels_path: PathBuf,
    pub products_path: PathBuf,
    pub default_price: f64,
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub buffer_capacity: usize,
    pub poll_interval: Duration,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub tick: Duration,
    pub min_detection_gap: Duration,
}

impl CameraSettings {
    /// Synthetic source settings cycling through `label_count` categories.
    pub fn synthetic(&self, label_count: usize) -> SyntheticConfig {
        SyntheticConfig {
            url: self.source.clone(),
            width: self.width,
            height: self.height,
            fps: self.fps,
            label_count,
            cycle: SYNTHETIC_CYCLE,
        }
    }
}

impl CheckoutConfig {
    /// Load from the file named by `CHECKOUT_CONFIG` (if set), then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CHECKOUT_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Switch to the synthetic test-mode source. An explicit `stub://` source
    /// is kept as configured.
    pub fn enable_test_mode(&mut self) {
        if !self.camera.source.starts_with(SYNTHETIC_SCHEME) {
            self.camera.source = TEST_MODE_SOURCE.to_string();
        }
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CheckoutConfigFile) -> Self {
        let api_addr = file
            .api
            .and_then(|api| api.addr)
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());

        let camera = file.camera.unwrap_or_default();
        let camera = CameraSettings {
            source: camera
                .source
                .unwrap_or_else(|| DEFAULT_CAMERA_SOURCE.to_string()),
            width: camera.width.unwrap_or(DEFAULT_FRAME_WIDTH),
            height: camera.height.unwrap_or(DEFAULT_FRAME_HEIGHT),
            fps: camera.fps.unwrap_or(DEFAULT_CAMERA_FPS),
        };

        let detection = file.detection.unwrap_or_default();
        let detection = DetectionSettings {
            threshold: detection.threshold.unwrap_or(DEFAULT_THRESHOLD),
            labels_path: detection
                .labels_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LABELS_PATH)),
            products_path: detection
                .products_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PRODUCTS_PATH)),
            default_price: detection.default_price.unwrap_or(DEFAULT_UNIT_PRICE),
        };

        let stream = file.stream.unwrap_or_default();
        let stream = StreamSettings {
            buffer_capacity: stream.buffer_capacity.unwrap_or(DEFAULT_BUFFER_CAPACITY),
            poll_interval: stream
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_POLL_INTERVAL),
            jpeg_quality: stream.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
        };

        let session = file.session.unwrap_or_default();
        let session = SessionSettings {
            tick: session
                .tick_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_TICK),
            min_detection_gap: session
                .min_detection_gap_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_MIN_DETECTION_GAP),
        };

        let mqtt = file.mqtt.and_then(|mqtt| {
            mqtt.broker.map(|broker| MqttSettings {
                broker,
                topic: mqtt.topic.unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
                client_id: mqtt
                    .client_id
                    .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
            })
        });

        Self {
            api_addr,
            camera,
            detection,
            stream,
            session,
            mqtt,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("CHECKOUT_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(source) = std::env::var("CHECKOUT_SOURCE") {
            if !source.trim().is_empty() {
                self.camera.source = source;
            }
        }
        if let Ok(path) = std::env::var("CHECKOUT_LABELS_PATH") {
            if !path.trim().is_empty() {
                self.detection.labels_path = PathBuf::from(path);
            }
        }
        if let Ok(path) = std::env::var("CHECKOUT_PRODUCTS_PATH") {
            if !path.trim().is_empty() {
                self.detection.products_path = PathBuf::from(path);
            }
        }
        if let Ok(threshold) = std::env::var("CHECKOUT_THRESHOLD") {
            self.detection.threshold = threshold
                .parse()
                .map_err(|_| anyhow!("CHECKOUT_THRESHOLD must be a number between 0 and 1"))?;
        }
        if let Ok(gap) = std::env::var("CHECKOUT_MIN_DETECTION_GAP_MS") {
            let millis: u64 = gap.parse().map_err(|_| {
                anyhow!("CHECKOUT_MIN_DETECTION_GAP_MS must be an integer number of milliseconds")
            })?;
            self.session.min_detection_gap = Duration::from_millis(millis);
        }
        if let Ok(broker) = std::env::var("CHECKOUT_MQTT_BROKER") {
            if !broker.trim().is_empty() {
                match self.mqtt.as_mut() {
                    Some(mqtt) => mqtt.broker = broker,
                    None => {
                        self.mqtt = Some(MqttSettings {
                            broker,
                            topic: DEFAULT_TOPIC.to_string(),
                            client_id: DEFAULT_CLIENT_ID.to_string(),
                        })
                    }
                }
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.detection.threshold) {
            return Err(anyhow!(
                "detection threshold must be within [0, 1], got {}",
                self.detection.threshold
            ));
        }
        if !self.detection.default_price.is_finite() || self.detection.default_price < 0.0 {
            return Err(anyhow!("default price must be a non-negative number"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera frame size must be non-empty"));
        }
        if self.camera.fps == 0 {
            return Err(anyhow!("camera fps must be greater than zero"));
        }
        if self.stream.buffer_capacity == 0 {
            return Err(anyhow!("frame buffer capacity must be greater than zero"));
        }
        if self.stream.poll_interval.is_zero() {
            return Err(anyhow!("stream poll interval must be greater than zero"));
        }
        if !(1..=100).contains(&self.stream.jpeg_quality) {
            return Err(anyhow!("jpeg quality must be within 1..=100"));
        }
        if self.session.tick.is_zero() {
            return Err(anyhow!("session tick must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<CheckoutConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
