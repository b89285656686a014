//! Smart Checkout detection kernel
//!
//! This crate implements the concurrent core behind a camera-driven checkout
//! lane: detections produced by an external inference pipeline are mapped into
//! display space, published as a single "latest" snapshot, and sampled by a
//! debounced aggregation session that keeps a running tally of scanned products.
//!
//! # Architecture
//!
//! The pipeline is built from a handful of owned objects shared between
//! threads by `Arc`:
//!
//! 1. **Coordinate Mapper** (`detect::mapping`): inference space to display pixels,
//!    with a normalized-scaling fallback that never fails.
//! 2. **Detection Store** (`store`): latest-write-wins snapshot behind one lock.
//! 3. **Frame Buffer** (`frame`): bounded FIFO with drop-on-full enqueue.
//! 4. **Aggregation Session** (`session`): `Idle`/`Active` state machine sampling
//!    the store on a fixed tick.
//! 5. **Event Sink** (`sink`): fire-and-forget publication of the product list.
//!
//! # Module Structure
//!
//! - `pipeline`: the producer callback (map, store, annotate, enqueue)
//! - `ingest`: frame sources that drive the producer (`external://`, synthetic `stub://`)
//! - `stream`: MJPEG chunk iterator over the frame buffer
//! - `api`: thin HTTP surface (video feed, dashboard, session control)
//! - `config`: file + environment configuration for `checkoutd`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub mod annotate;
pub mod api;
pub mod catalog;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod session;
pub mod sink;
pub mod store;
pub mod stream;

pub use catalog::{LabelTable, ProductCatalog};
pub use detect::{
    CoordinateMapper, CoordinateTransform, CropRect, Detection, FrameMetadata, MappingOutcome,
    PixelBox, RawDetection, ScalerCropTransform,
};
pub use frame::{Frame, FrameBuffer, DEFAULT_BUFFER_CAPACITY, DEFAULT_POLL_INTERVAL};
pub use ingest::{FrameSource, SourceFrame, SyntheticSource};
pub use pipeline::{DetectionOutcome, FrameReport, Pipeline};
pub use session::{
    AggregationSession, ProductEntry, SampleOutcome, SessionCommand, SessionHandle, SessionLoop,
    SessionState, DEFAULT_MIN_DETECTION_GAP, DEFAULT_TICK,
};
pub use sink::{ChannelSink, EventSink, FanoutSink, LatestSink, LogSink, MqttSink};
pub use store::DetectionStore;
pub use stream::MjpegStream;

// -------------------- Shutdown --------------------

/// Pipeline-wide shutdown signal.
///
/// Every loop in the kernel (producer, aggregation, stream consumers, API
/// accept loop) checks this on each wake-up, so raising it bounds exit latency
/// to one polling interval per loop.
#[derive(Clone, Debug, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_is_shared_between_clones() {
        let shutdown = Shutdown::new();
        let observer = shutdown.clone();
        assert!(!observer.is_triggered());

        shutdown.trigger();
        assert!(observer.is_triggered());
    }
}
