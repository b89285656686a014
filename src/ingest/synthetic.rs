//! Synthetic frame source (`stub://` URLs).
//!
//! Stands in for the camera + accelerator during demos and tests: produces
//! solid frames at the configured rate, each carrying one detection at
//! [`SYNTHETIC_CONFIDENCE`] whose category cycles through the label table.

use anyhow::{anyhow, Result};
use std::time::Duration;

use super::{FrameSource, SourceFrame};
use crate::detect::{CropRect, FrameMetadata, RawDetection};
use crate::frame::Frame;

/// Model input size reported in synthetic metadata.
const MODEL_INPUT: (u32, u32) = (320, 320);

/// Score of every synthetic detection.
pub const SYNTHETIC_CONFIDENCE: f32 = 0.95;

/// Synthetic item box in model-input pixels.
const ITEM_BOX: [f32; 4] = [112.0, 112.0, 96.0, 96.0];

/// Configuration for a synthetic source.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Number of categories to cycle through.
    pub label_count: usize,
    /// How long each category stays in view.
    pub cycle: Duration,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            url: "stub://checkout_lane".to_string(),
            width: 640,
            height: 480,
            fps: 15,
            label_count: 1,
            cycle: Duration::from_secs(2),
        }
    }
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    frame_count: u64,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("synthetic source needs a non-empty frame size"));
        }
        if config.fps == 0 {
            return Err(anyhow!("synthetic source fps must be >= 1"));
        }
        Ok(Self {
            config,
            frame_count: 0,
        })
    }

    /// Category shown in frame number `frame_index` (0-based).
    pub fn category_for(&self, frame_index: u64) -> Option<u32> {
        if self.config.label_count == 0 {
            return None;
        }
        let per_label = (self.config.cycle.as_secs_f64() * self.config.fps as f64)
            .round()
            .max(1.0) as u64;
        Some(((frame_index / per_label) % self.config.label_count as u64) as u32)
    }

    fn metadata(&self) -> FrameMetadata {
        let sensor = (self.config.width * 2, self.config.height * 2);
        FrameMetadata {
            frame_width: self.config.width,
            frame_height: self.config.height,
            sensor_size: Some(sensor),
            scaler_crop: Some(CropRect {
                x: 0,
                y: 0,
                width: sensor.0,
                height: sensor.1,
            }),
            input_size: Some(MODEL_INPUT),
        }
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> &str {
        &self.config.url
    }

    fn connect(&mut self) -> Result<()> {
        log::info!("SyntheticSource: connected to {} (synthetic)", self.config.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<SourceFrame> {
        let index = self.frame_count;
        self.frame_count += 1;

        let detections = match self.category_for(index) {
            Some(category) => vec![RawDetection::new(ITEM_BOX, category, SYNTHETIC_CONFIDENCE)],
            None => Vec::new(),
        };
        let shade = 96 + (index % 32) as u8;
        Ok(SourceFrame {
            detections,
            metadata: self.metadata(),
            frame: Frame::solid(self.config.width, self.config.height, [shade, shade, shade]),
        })
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.config.fps as f64)
    }

    fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}
