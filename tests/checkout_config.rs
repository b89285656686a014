use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use checkout_kernel::config::{CheckoutConfig, DEFAULT_CAMERA_SOURCE, TEST_MODE_SOURCE};
use checkout_kernel::ingest::open_source;
use checkout_kernel::FrameSource;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "CHECKOUT_CONFIG",
        "CHECKOUT_API_ADDR",
        "CHECKOUT_LABELS_PATH",
        "CHECKOUT_PRODUCTS_PATH",
        "CHECKOUT_THRESHOLD",
        "CHECKOUT_SOURCE",
        "CHECKOUT_MQTT_BROKER",
        "CHECKOUT_MIN_DETECTION_GAP_MS",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = CheckoutConfig::load().expect("load defaults");

    assert_eq!(cfg.api_addr, "127.0.0.1:5000");
    assert_eq!(cfg.camera.source, "external://camera");
    assert_eq!((cfg.camera.width, cfg.camera.height, cfg.camera.fps), (640, 480, 15));
    assert!((cfg.detection.threshold - 0.2).abs() < f32::EPSILON);
    assert_eq!(cfg.detection.default_price, 10.0);
    assert_eq!(cfg.stream.buffer_capacity, 10);
    assert_eq!(cfg.stream.poll_interval, Duration::from_millis(10));
    assert_eq!(cfg.session.tick, Duration::from_millis(100));
    assert_eq!(cfg.session.min_detection_gap, Duration::from_secs(2));
    assert!(cfg.mqtt.is_none());

    clear_env();
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "api": { "addr": "0.0.0.0:8080" },
            "camera": { "source": "stub://lane_2", "width": 320, "height": 240, "fps": 30 },
            "detection": {
                "threshold": 0.5,
                "labels_path": "/opt/checkout/labels.txt",
                "products_path": "/opt/checkout/products.json",
                "default_price": 12.5
            },
            "stream": { "buffer_capacity": 4, "poll_interval_ms": 20, "jpeg_quality": 70 },
            "session": { "tick_ms": 50, "min_detection_gap_ms": 1500 },
            "mqtt": { "broker": "127.0.0.1:1883", "topic": "lane2/updates" }
        }"#,
    );

    std::env::set_var("CHECKOUT_CONFIG", file.path());
    std::env::set_var("CHECKOUT_THRESHOLD", "0.35");
    std::env::set_var("CHECKOUT_MIN_DETECTION_GAP_MS", "3000");
    std::env::set_var("CHECKOUT_MQTT_BROKER", "mqtt://broker.local:1884");

    let cfg = CheckoutConfig::load().expect("load config");

    assert_eq!(cfg.api_addr, "0.0.0.0:8080");
    assert_eq!(cfg.camera.source, "stub://lane_2");
    assert_eq!((cfg.camera.width, cfg.camera.height, cfg.camera.fps), (320, 240, 30));
    assert!((cfg.detection.threshold - 0.35).abs() < f32::EPSILON);
    assert_eq!(
        cfg.detection.labels_path,
        std::path::PathBuf::from("/opt/checkout/labels.txt")
    );
    assert_eq!(cfg.detection.default_price, 12.5);
    assert_eq!(cfg.stream.buffer_capacity, 4);
    assert_eq!(cfg.stream.poll_interval, Duration::from_millis(20));
    assert_eq!(cfg.stream.jpeg_quality, 70);
    assert_eq!(cfg.session.tick, Duration::from_millis(50));
    assert_eq!(cfg.session.min_detection_gap, Duration::from_secs(3));

    let mqtt = cfg.mqtt.expect("mqtt settings");
    assert_eq!(mqtt.broker, "mqtt://broker.local:1884");
    assert_eq!(mqtt.topic, "lane2/updates");
    assert_eq!(mqtt.client_id, "checkoutd");

    let synthetic = cfg.camera.synthetic(3);
    assert_eq!(synthetic.url, "stub://lane_2");
    assert_eq!(synthetic.label_count, 3);

    clear_env();
}

#[test]
fn default_source_runs_no_synthetic_producer() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = CheckoutConfig::load().expect("load defaults");
    assert_eq!(cfg.camera.source, DEFAULT_CAMERA_SOURCE);
    assert!(open_source(cfg.camera.synthetic(5)).unwrap().is_none());

    clear_env();
}

#[test]
fn test_mode_switches_to_the_synthetic_source() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut cfg = CheckoutConfig::load().expect("load defaults");
    cfg.enable_test_mode();
    assert_eq!(cfg.camera.source, TEST_MODE_SOURCE);

    let mut source = open_source(cfg.camera.synthetic(5))
        .unwrap()
        .expect("synthetic source");
    let frame = source.next_frame().unwrap();
    assert_eq!(frame.detections.len(), 1);
    assert_eq!(frame.detections[0].score, 0.95);

    // An explicit stub source survives test mode.
    std::env::set_var("CHECKOUT_SOURCE", "stub://lane_3");
    let mut cfg = CheckoutConfig::load().expect("load config");
    cfg.enable_test_mode();
    assert_eq!(cfg.camera.source, "stub://lane_3");

    clear_env();
}

#[test]
fn mqtt_broker_from_env_uses_default_topic() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("CHECKOUT_MQTT_BROKER", "127.0.0.1:1883");
    let cfg = CheckoutConfig::load().expect("load config");
    let mqtt = cfg.mqtt.expect("mqtt settings");
    assert_eq!(mqtt.topic, "checkout/detection_update");

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("CHECKOUT_THRESHOLD", "1.5");
    assert!(CheckoutConfig::load().is_err());

    std::env::set_var("CHECKOUT_THRESHOLD", "high");
    assert!(CheckoutConfig::load().is_err());
    clear_env();

    let file = write_config(r#"{ "stream": { "buffer_capacity": 0 } }"#);
    assert!(CheckoutConfig::load_from(Some(file.path())).is_err());

    let file = write_config(r#"{ "stream": { "jpeg_quality": 0 } }"#);
    assert!(CheckoutConfig::load_from(Some(file.path())).is_err());

    let file = write_config(r#"{ "camera": { "fps": 0 } }"#);
    assert!(CheckoutConfig::load_from(Some(file.path())).is_err());

    let file = write_config(r#"{ "session": { "tick_ms": 0 } }"#);
    assert!(CheckoutConfig::load_from(Some(file.path())).is_err());

    let file = write_config("{ not json");
    let err = CheckoutConfig::load_from(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("invalid config file"));

    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let err = CheckoutConfig::load_from(Some(std::path::Path::new(
        "/nonexistent/checkout/config.json",
    )))
    .unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));

    clear_env();
}
