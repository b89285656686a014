//! Frame sources that drive the producer callback.
//!
//! A source stands in for the external camera + inference pipeline: every
//! `next_frame` yields raw detections, frame metadata and the rendered frame.
//! The producer thread feeds each one to `Pipeline::on_frame`.
//!
//! Source URLs:
//! - `external://...` frames are pushed by an external inference pipeline
//!   calling `Pipeline::on_frame`; no producer thread runs
//! - `stub://...` synthetic source (`--test-mode`, demos and tests)

use anyhow::{anyhow, Context, Result};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::detect::{FrameMetadata, RawDetection};
use crate::frame::Frame;
use crate::pipeline::Pipeline;
use crate::Shutdown;

pub mod synthetic;

pub use synthetic::{SyntheticConfig, SyntheticSource};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

pub const EXTERNAL_SCHEME: &str = "external://";
pub const SYNTHETIC_SCHEME: &str = "stub://";

/// Everything the inference pipeline delivers for one processed frame.
pub struct SourceFrame {
    pub detections: Vec<RawDetection>,
    pub metadata: FrameMetadata,
    pub frame: Frame,
}

pub trait FrameSource: Send {
    /// Source identifier (URL) for logs.
    fn name(&self) -> &str;

    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    /// Capture and process the next frame.
    fn next_frame(&mut self) -> Result<SourceFrame>;

    /// Pacing between frames.
    fn frame_interval(&self) -> Duration;

    fn frames_captured(&self) -> u64;
}

/// Open the source named by `config.url`.
///
/// `external://` sources yield `None`: nothing is produced in-process.
pub fn open_source(config: SyntheticConfig) -> Result<Option<Box<dyn FrameSource>>> {
    if config.url.starts_with(EXTERNAL_SCHEME) {
        return Ok(None);
    }
    if config.url.starts_with(SYNTHETIC_SCHEME) {
        return Ok(Some(Box::new(SyntheticSource::new(config)?)));
    }
    Err(anyhow!(
        "unsupported camera source '{}'; expected {} or {}",
        config.url,
        EXTERNAL_SCHEME,
        SYNTHETIC_SCHEME
    ))
}

/// Run the producer on its own thread until shutdown.
pub fn spawn_producer(
    mut source: Box<dyn FrameSource>,
    pipeline: Pipeline,
    shutdown: Shutdown,
) -> Result<JoinHandle<()>> {
    source.connect()?;
    std::thread::Builder::new()
        .name("checkout-producer".to_string())
        .spawn(move || run_producer(source.as_mut(), &pipeline, &shutdown))
        .context("spawn producer thread")
}

/// Pull frames from `source` and feed them to `pipeline`, paced to the
/// source's frame interval. A failing frame is logged and skipped.
pub fn run_producer(source: &mut dyn FrameSource, pipeline: &Pipeline, shutdown: &Shutdown) {
    let interval = source.frame_interval();
    let mut last_health_log = Instant::now();
    let mut dropped = 0u64;
    let mut fallbacks = 0u64;

    while !shutdown.is_triggered() {
        let started = Instant::now();
        match source.next_frame() {
            Ok(SourceFrame {
                detections,
                metadata,
                frame,
            }) => {
                let report = pipeline.on_frame(&detections, &metadata, frame);
                if !report.frame_queued {
                    dropped += 1;
                }
                fallbacks += report.fallbacks() as u64;
            }
            Err(err) => log::warn!("{} frame failed: {:#}", source.name(), err),
        }

        if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
            log::debug!(
                "source {} frames={} dropped={} mapping_fallbacks={} buffered_bytes={}",
                source.name(),
                source.frames_captured(),
                dropped,
                fallbacks,
                pipeline.frames().memory_bytes()
            );
            last_health_log = Instant::now();
        }

        if let Some(rest) = interval.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
    }
    log::info!("producer for {} stopped", source.name());
}
