//! Thin HTTP surface for the checkout lane.
//!
//! Routes:
//! - `GET /health`
//! - `GET /video_feed`: MJPEG stream (`multipart/x-mixed-replace`), one thread per viewer
//! - `GET /detections`: latest detection snapshot
//! - `GET /dashboard`: latest published product list
//! - `POST /start_detection`, `POST /stop_detection`: session control
//!
//! Viewers of `/video_feed` share one frame buffer, so concurrent viewers
//! compete for frames rather than each receiving every frame.

use anyhow::{anyhow, Context, Result};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::frame::FrameBuffer;
use crate::session::SessionHandle;
use crate::sink::LatestSink;
use crate::store::DetectionStore;
use crate::stream::{MjpegStream, DEFAULT_JPEG_QUALITY, MJPEG_CONTENT_TYPE};
use crate::Shutdown;

const MAX_REQUEST_BYTES: usize = 8192;
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);
const STREAM_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub jpeg_quality: u8,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5000".to_string(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Shared objects the routes read from or signal.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<DetectionStore>,
    pub frames: Arc<FrameBuffer>,
    pub session: SessionHandle,
    pub latest: Arc<LatestSink>,
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Shutdown,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Raise the shutdown signal and wait for the accept loop to exit.
    /// Open video streams end on their next wake-up.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.trigger();
        if let Some(join) = self.join.take() {
            join.join().map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    state: ApiState,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, state: ApiState) -> Self {
        Self { cfg, state }
    }

    pub fn spawn(self, shutdown: Shutdown) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .with_context(|| format!("invalid api address '{}'", self.cfg.addr))?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("bind api listener on {configured_addr}"))?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg;
        let state = self.state;
        let join = std::thread::Builder::new()
            .name("checkout-api".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, &cfg, &state, &shutdown_thread) {
                    log::error!("checkout api stopped: {}", err);
                }
            })
            .context("spawn api thread")?;

        log::info!("checkout api listening on http://{}", addr);
        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: &ApiConfig,
    state: &ApiState,
    shutdown: &Shutdown,
) -> Result<()> {
    while !shutdown.is_triggered() {
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, cfg, state, shutdown) {
                    log::warn!("checkout api request rejected: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_BACKOFF);
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(
    mut stream: TcpStream,
    cfg: &ApiConfig,
    state: &ApiState,
    shutdown: &Shutdown,
) -> Result<()> {
    // Accepted sockets may inherit the listener's non-blocking mode.
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, r#"{"error":"forbidden"}"#)?;
        return Ok(());
    }

    let request = read_request(&mut stream)?;
    let route = match Route::resolve(&request.path) {
        Some(route) => route,
        None => {
            write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#)?;
            return Ok(());
        }
    };
    if request.method != route.method() {
        write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(());
    }

    match route {
        Route::Health => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        Route::Detections => {
            let payload = serde_json::to_vec(&state.store.read())?;
            write_response(&mut stream, 200, "application/json", &payload)
        }
        Route::Dashboard => {
            let payload = serde_json::to_vec(&state.latest.latest())?;
            write_response(&mut stream, 200, "application/json", &payload)
        }
        Route::StartDetection => match state.session.start_detection() {
            Ok(()) => write_json_response(&mut stream, 200, r#"{"status":"started"}"#),
            Err(err) => {
                log::warn!("start_detection failed: {}", err);
                write_json_response(&mut stream, 503, r#"{"error":"session_unavailable"}"#)
            }
        },
        Route::StopDetection => match state.session.stop_detection() {
            Ok(()) => write_json_response(&mut stream, 200, r#"{"status":"stopped"}"#),
            Err(err) => {
                log::warn!("stop_detection failed: {}", err);
                write_json_response(&mut stream, 503, r#"{"error":"session_unavailable"}"#)
            }
        },
        Route::VideoFeed => {
            spawn_video_feed(stream, cfg.jpeg_quality, state.frames.clone(), shutdown.clone())
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Route {
    Health,
    VideoFeed,
    Detections,
    Dashboard,
    StartDetection,
    StopDetection,
}

impl Route {
    fn resolve(path: &str) -> Option<Self> {
        match path {
            "/health" => Some(Self::Health),
            "/video_feed" => Some(Self::VideoFeed),
            "/detections" => Some(Self::Detections),
            "/dashboard" => Some(Self::Dashboard),
            "/start_detection" => Some(Self::StartDetection),
            "/stop_detection" => Some(Self::StopDetection),
            _ => None,
        }
    }

    fn method(self) -> &'static str {
        match self {
            Self::StartDetection | Self::StopDetection => "POST",
            _ => "GET",
        }
    }
}

// -------------------- Video feed --------------------

fn spawn_video_feed(
    stream: TcpStream,
    quality: u8,
    frames: Arc<FrameBuffer>,
    shutdown: Shutdown,
) -> Result<()> {
    let peer = stream.peer_addr()?;
    std::thread::Builder::new()
        .name("checkout-video-feed".to_string())
        .spawn(move || {
            let chunks = MjpegStream::new(frames, shutdown, quality);
            match serve_video_feed(stream, chunks) {
                Ok(sent) => log::info!("video feed to {} closed after {} frames", peer, sent),
                Err(err) => log::debug!("video feed to {} ended: {:#}", peer, err),
            }
        })
        .context("spawn video feed thread")?;
    Ok(())
}

/// Write the multipart response header, then every chunk until the stream
/// ends or the client goes away.
fn serve_video_feed(
    mut stream: TcpStream,
    chunks: impl Iterator<Item = Vec<u8>>,
) -> Result<u64> {
    stream.set_write_timeout(Some(STREAM_WRITE_TIMEOUT))?;
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {MJPEG_CONTENT_TYPE}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n"
    );
    stream.write_all(header.as_bytes())?;
    let mut sent = 0u64;
    for chunk in chunks {
        stream.write_all(&chunk).context("client disconnected")?;
        stream.flush()?;
        sent += 1;
    }
    Ok(sent)
}

// -------------------- HTTP plumbing --------------------

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let request_line = text.split("\r\n").next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{LabelTable, ProductCatalog};
    use crate::detect::{Detection, PixelBox};
    use crate::frame::{Frame, DEFAULT_POLL_INTERVAL};
    use crate::session::{AggregationSession, ProductEntry, SessionLoop, DEFAULT_TICK};
    use crate::sink::EventSink;
    use std::time::Instant;

    struct Fixture {
        handle: ApiHandle,
        store: Arc<DetectionStore>,
        frames: Arc<FrameBuffer>,
        latest: Arc<LatestSink>,
        session_loop: Option<SessionLoop>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(DetectionStore::new());
        let frames = Arc::new(FrameBuffer::new(4, DEFAULT_POLL_INTERVAL));
        let latest = Arc::new(LatestSink::new());
        let session = AggregationSession::new(
            Arc::new(LabelTable::from_lines("apple\nbanana")),
            Arc::new(ProductCatalog::default()),
            Duration::from_secs(2),
        );
        let (session_loop, session_handle) =
            SessionLoop::new(session, store.clone(), latest.clone(), DEFAULT_TICK);
        let state = ApiState {
            store: store.clone(),
            frames: frames.clone(),
            session: session_handle,
            latest: latest.clone(),
        };
        let cfg = ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            ..ApiConfig::default()
        };
        let handle = ApiServer::new(cfg, state).spawn(Shutdown::new()).unwrap();
        Fixture {
            handle,
            store,
            frames,
            latest,
            session_loop: Some(session_loop),
        }
    }

    fn request(addr: SocketAddr, method: &str, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        write!(
            stream,
            "{method} {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"
        )
        .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    fn body(response: &str) -> &str {
        response.split("\r\n\r\n").nth(1).unwrap_or("")
    }

    #[test]
    fn health_and_unknown_routes() {
        let fx = fixture();
        let health = request(fx.handle.addr, "GET", "/health");
        assert!(health.starts_with("HTTP/1.1 200 OK"));
        assert_eq!(body(&health), r#"{"status":"ok"}"#);

        let missing = request(fx.handle.addr, "GET", "/events");
        assert!(missing.starts_with("HTTP/1.1 404"));

        let wrong_method = request(fx.handle.addr, "GET", "/start_detection");
        assert!(wrong_method.starts_with("HTTP/1.1 405"));
        fx.handle.stop().unwrap();
    }

    #[test]
    fn serves_detection_snapshot_and_dashboard() {
        let fx = fixture();
        fx.store.replace(vec![Detection {
            category: 1,
            confidence: 0.75,
            bbox: PixelBox {
                x: 1,
                y: 2,
                w: 3,
                h: 4,
            },
        }]);
        fx.latest
            .publish(&[ProductEntry {
                name: "banana".to_string(),
                quantity: 2,
                unit_price: 10.0,
            }])
            .unwrap();

        let detections = request(fx.handle.addr, "GET", "/detections");
        let parsed: serde_json::Value = serde_json::from_str(body(&detections)).unwrap();
        assert_eq!(parsed[0]["category"], 1);
        assert_eq!(parsed[0]["box"]["w"], 3);

        let dashboard = request(fx.handle.addr, "GET", "/dashboard");
        let parsed: serde_json::Value = serde_json::from_str(body(&dashboard)).unwrap();
        assert_eq!(parsed[0]["label"], "banana");
        assert_eq!(parsed[0]["quantity"], 2);
        fx.handle.stop().unwrap();
    }

    #[test]
    fn session_control_reaches_the_loop() {
        let mut fx = fixture();
        let started = request(fx.handle.addr, "POST", "/start_detection");
        assert!(started.starts_with("HTTP/1.1 200 OK"));

        let mut session_loop = fx.session_loop.take().unwrap();
        session_loop.tick_at(Instant::now());
        assert_eq!(
            session_loop.session().state(),
            crate::session::SessionState::Active
        );

        // Once the loop is gone the commands have nowhere to go.
        drop(session_loop);
        let stopped = request(fx.handle.addr, "POST", "/stop_detection");
        assert!(stopped.starts_with("HTTP/1.1 503"));
        fx.handle.stop().unwrap();
    }

    #[test]
    fn video_feed_streams_multipart_jpeg() {
        let fx = fixture();
        assert!(fx.frames.try_enqueue(Frame::solid(16, 8, [0, 0, 255])));

        let mut stream = TcpStream::connect(fx.handle.addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        write!(stream, "GET /video_feed HTTP/1.1\r\nHost: localhost\r\n\r\n").unwrap();

        let marker = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\xff\xd8";
        let mut received = Vec::new();
        let mut buf = [0u8; 4096];
        while !received.windows(marker.len()).any(|w| w == marker) {
            let n = stream.read(&mut buf).unwrap();
            assert!(n > 0, "stream closed before first frame");
            received.extend_from_slice(&buf[..n]);
        }
        let text = String::from_utf8_lossy(&received);
        assert!(text.starts_with("HTTP/1.1 200 OK"));
        assert!(text.contains(MJPEG_CONTENT_TYPE));
        assert!(fx.frames.is_empty());

        // Shutdown ends the stream and closes the connection.
        fx.handle.stop().unwrap();
        let mut rest = Vec::new();
        let _ = stream.read_to_end(&mut rest);
    }
}
