//! Producer callback.
//!
//! Invoked once per processed frame with the raw detections, the frame's
//! metadata and the rendered frame. It maps every detection, publishes the
//! resulting snapshot, draws the labelled boxes and queues the frame for
//! streaming.
//! Nothing here returns an error: each detection either maps (possibly via
//! the fallback) or is skipped on its own.

use anyhow::{anyhow, Result};
use std::sync::Arc;

use crate::annotate;
use crate::catalog::LabelTable;
use crate::detect::{CoordinateMapper, Detection, FrameMetadata, MappingOutcome, RawDetection};
use crate::frame::{Frame, FrameBuffer};
use crate::store::DetectionStore;

/// Default minimum score for a raw detection to be considered.
pub const DEFAULT_THRESHOLD: f32 = 0.2;

/// Per-detection result of the producer callback.
#[derive(Clone, Debug, PartialEq)]
pub enum DetectionOutcome {
    BelowThreshold,
    Mapped(MappingOutcome),
    Skipped(String),
}

/// Summary of one producer callback.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameReport {
    pub outcomes: Vec<DetectionOutcome>,
    /// Detections published in the snapshot.
    pub published: usize,
    /// Whether the frame made it into the buffer.
    pub frame_queued: bool,
}

impl FrameReport {
    pub fn fallbacks(&self) -> usize {
        self.count(|o| *o == DetectionOutcome::Mapped(MappingOutcome::Fallback))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, DetectionOutcome::Skipped(_)))
    }

    fn count(&self, pred: impl Fn(&DetectionOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(o)).count()
    }
}

pub struct Pipeline {
    mapper: CoordinateMapper,
    store: Arc<DetectionStore>,
    frames: Arc<FrameBuffer>,
    labels: Arc<LabelTable>,
    threshold: f32,
}

impl Pipeline {
    pub fn new(
        mapper: CoordinateMapper,
        store: Arc<DetectionStore>,
        frames: Arc<FrameBuffer>,
        labels: Arc<LabelTable>,
        threshold: f32,
    ) -> Self {
        Self {
            mapper,
            store,
            frames,
            labels,
            threshold,
        }
    }

    /// Buffer the annotated frames are queued into.
    pub fn frames(&self) -> &FrameBuffer {
        &self.frames
    }

    pub fn on_frame(
        &self,
        raw: &[RawDetection],
        metadata: &FrameMetadata,
        mut frame: Frame,
    ) -> FrameReport {
        let mut report = FrameReport::default();
        let mut snapshot = Vec::with_capacity(raw.len());

        for detection in raw {
            if detection.score < self.threshold {
                report.outcomes.push(DetectionOutcome::BelowThreshold);
                continue;
            }
            match self.build_detection(detection, metadata) {
                Ok((built, outcome)) => {
                    snapshot.push(built);
                    report.outcomes.push(DetectionOutcome::Mapped(outcome));
                }
                Err(err) => {
                    log::warn!(
                        "skipping detection of category {}: {}",
                        detection.category,
                        err
                    );
                    report.outcomes.push(DetectionOutcome::Skipped(err.to_string()));
                }
            }
        }

        // Drawing happens before and outside the store's critical section.
        annotate::draw_detections(&mut frame, &snapshot, &self.labels);
        report.published = snapshot.len();
        self.store.replace(snapshot);

        report.frame_queued = self.frames.try_enqueue(frame);
        if !report.frame_queued {
            log::debug!(
                "frame buffer full ({} frames); dropping frame",
                self.frames.capacity()
            );
        }
        report
    }

    fn build_detection(
        &self,
        raw: &RawDetection,
        metadata: &FrameMetadata,
    ) -> Result<(Detection, MappingOutcome)> {
        if !raw.score.is_finite() || !(0.0..=1.0).contains(&raw.score) {
            return Err(anyhow!("confidence {} outside [0, 1]", raw.score));
        }
        if raw.coords.iter().any(|v| !v.is_finite()) {
            return Err(anyhow!("non-finite box {:?}", raw.coords));
        }
        if metadata.frame_width == 0 || metadata.frame_height == 0 {
            return Err(anyhow!(
                "frame metadata has empty display size {}x{}",
                metadata.frame_width,
                metadata.frame_height
            ));
        }
        let (bbox, outcome) = self.mapper.map(raw.coords, metadata);
        Ok((
            Detection {
                category: raw.category,
                confidence: raw.score,
                bbox,
            },
            outcome,
        ))
    }
}
