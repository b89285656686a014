//! checkoutd - Smart Checkout lane daemon
//!
//! This daemon:
//! 1. Loads configuration, the label table and the product catalog
//! 2. Runs the producer (frame source → mapper → detection store + frame buffer)
//!    when a synthetic source is selected; `external://` sources are fed by
//!    the inference pipeline instead
//! 3. Runs the aggregation loop, publishing product updates to the sinks
//! 4. Serves the video feed, dashboard and session control over HTTP
//! 5. Shuts every thread down on Ctrl-C

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;

use checkout_kernel::{
    api::{ApiConfig, ApiServer, ApiState},
    config::CheckoutConfig,
    ingest::{open_source, spawn_producer},
    AggregationSession, CoordinateMapper, DetectionStore, EventSink, FanoutSink, FrameBuffer,
    LabelTable, LatestSink, LogSink, MqttSink, Pipeline, ProductCatalog, SessionLoop, Shutdown,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Smart Checkout detection daemon")]
struct Args {
    /// JSON config file.
    #[arg(long, env = "CHECKOUT_CONFIG")]
    config: Option<PathBuf>,

    /// Run with synthetic detections instead of a camera.
    #[arg(long)]
    test_mode: bool,

    /// Override the camera frame rate.
    #[arg(long)]
    fps: Option<u32>,

    /// Override the detection confidence threshold.
    #[arg(long)]
    threshold: Option<f32>,

    /// Override the label table path.
    #[arg(long)]
    labels: Option<PathBuf>,

    /// Override the product catalog path.
    #[arg(long)]
    products: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = CheckoutConfig::load_from(args.config.as_deref())?;
    if args.test_mode {
        config.enable_test_mode();
    }
    if let Some(fps) = args.fps {
        if fps == 0 {
            return Err(anyhow!("--fps must be greater than zero"));
        }
        config.camera.fps = fps;
    }
    if let Some(threshold) = args.threshold {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!("--threshold must be within [0, 1]"));
        }
        config.detection.threshold = threshold;
    }
    if let Some(path) = args.labels {
        config.detection.labels_path = path;
    }
    if let Some(path) = args.products {
        config.detection.products_path = path;
    }

    let labels = Arc::new(LabelTable::load(&config.detection.labels_path)?);
    let catalog = Arc::new(ProductCatalog::load(
        &config.detection.products_path,
        config.detection.default_price,
    )?);

    let shutdown = Shutdown::new();
    let store = Arc::new(DetectionStore::new());
    let frames = Arc::new(FrameBuffer::new(
        config.stream.buffer_capacity,
        config.stream.poll_interval,
    ));

    // Sinks: dashboard polling + log, plus MQTT when a broker is configured.
    let latest = Arc::new(LatestSink::new());
    let mut fanout = FanoutSink::new()
        .with(latest.clone())
        .with(Arc::new(LogSink));
    let mqtt = match &config.mqtt {
        Some(settings) => {
            let sink = Arc::new(MqttSink::connect(settings)?);
            fanout = fanout.with(sink.clone());
            Some(sink)
        }
        None => None,
    };
    let sink: Arc<dyn EventSink> = Arc::new(fanout);

    let session = AggregationSession::new(
        labels.clone(),
        catalog,
        config.session.min_detection_gap,
    );
    let (session_loop, session_handle) =
        SessionLoop::new(session, store.clone(), sink, config.session.tick);
    let aggregation = session_loop.spawn(shutdown.clone())?;

    let pipeline = Pipeline::new(
        CoordinateMapper::default(),
        store.clone(),
        frames.clone(),
        labels.clone(),
        config.detection.threshold,
    );
    let producer = match open_source(config.camera.synthetic(labels.len()))? {
        Some(source) => {
            log::info!(
                "camera source {} at {}x{} {} fps (threshold {:.2})",
                source.name(),
                config.camera.width,
                config.camera.height,
                config.camera.fps,
                config.detection.threshold
            );
            Some(spawn_producer(source, pipeline, shutdown.clone())?)
        }
        None => {
            log::info!(
                "camera source {}: waiting for the external inference pipeline \
                 (run with --test-mode for synthetic detections)",
                config.camera.source
            );
            None
        }
    };

    let api_handle = ApiServer::new(
        ApiConfig {
            addr: config.api_addr.clone(),
            jpeg_quality: config.stream.jpeg_quality,
        },
        ApiState {
            store,
            frames: frames.clone(),
            session: session_handle,
            latest,
        },
    )
    .spawn(shutdown.clone())?;
    log::info!(
        "frame buffer capacity: {} frames (poll {:?}); POST /start_detection to begin a session",
        frames.capacity(),
        frames.poll_interval()
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("error setting Ctrl-C handler")?;

    log::info!("checkoutd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping pipeline...");
    shutdown.trigger();

    api_handle.stop()?;
    if let Some(producer) = producer {
        join_thread("producer", producer)?;
    }
    join_thread("aggregation", aggregation)?;
    if let Some(sink) = mqtt {
        sink.disconnect()?;
    }
    log::info!("checkoutd stopped");
    Ok(())
}

fn join_thread(name: &str, handle: JoinHandle<()>) -> Result<()> {
    handle
        .join()
        .map_err(|_| anyhow!("{} thread panicked", name))
}
