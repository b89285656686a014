//! Rendered frames and the bounded streaming buffer.
//!
//! - `Frame`: owned BGR pixel buffer. Not `Clone`; ownership moves producer →
//!   buffer → consumer.
//! - `FrameBuffer`: bounded FIFO. The producer never blocks (a full buffer
//!   drops the new frame), the consumer polls at a short fixed interval so it
//!   can observe shutdown.

use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::Shutdown;

/// Default frame buffer capacity.
pub const DEFAULT_BUFFER_CAPACITY: usize = 10;

/// Default consumer polling interval while the buffer is empty.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

const BYTES_PER_PIXEL: usize = 3;

// ----------------------------------------------------------------------------
// Frame: rendered display frame
// ----------------------------------------------------------------------------

/// Rendered display frame, 8-bit BGR, row-major, no padding.
///
/// Explicitly NOT implementing `Clone`: a frame has exactly one owner.
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Wrap BGR pixel bytes. Fails when the length does not match the
    /// dimensions.
    pub fn from_bgr(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(BYTES_PER_PIXEL))
            .ok_or_else(|| anyhow!("BGR frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "BGR frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Frame filled with a single BGR color.
    pub fn solid(width: u32, height: u32, bgr: [u8; 3]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * BYTES_PER_PIXEL);
        for _ in 0..pixels {
            data.extend_from_slice(&bgr);
        }
        Self {
            data,
            width,
            height,
        }
    }

    pub fn as_bgr(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bgr_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// BGR pixel at `(x, y)`, if inside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        let offset = self.offset(x, y)?;
        Some([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ])
    }

    /// Overwrite the pixel at `(x, y)`. Out-of-bounds writes are ignored.
    pub fn put_pixel(&mut self, x: u32, y: u32, bgr: [u8; 3]) {
        if let Some(offset) = self.offset(x, y) {
            self.data[offset..offset + BYTES_PER_PIXEL].copy_from_slice(&bgr);
        }
    }

    /// Color-converted copy for encoders that expect RGB.
    pub fn to_rgb(&self) -> Vec<u8> {
        let mut rgb = Vec::with_capacity(self.data.len());
        for px in self.data.chunks_exact(BYTES_PER_PIXEL) {
            rgb.extend_from_slice(&[px[2], px[1], px[0]]);
        }
        rgb
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    fn offset(&self, x: u32, y: u32) -> Option<usize> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some((y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL)
    }
}

// ----------------------------------------------------------------------------
// FrameBuffer: bounded FIFO with drop-on-full
// ----------------------------------------------------------------------------

/// Bounded FIFO of rendered frames awaiting encoding.
///
/// - `try_enqueue` never blocks; a full buffer rejects the new frame
/// - `dequeue_or_wait` polls every `poll_interval` while empty and returns
///   `None` once shutdown is raised
/// - accepted frames leave in the order they arrived
pub struct FrameBuffer {
    queue: Mutex<VecDeque<Frame>>,
    capacity: usize,
    poll_interval: Duration,
}

impl FrameBuffer {
    pub fn new(capacity: usize, poll_interval: Duration) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            poll_interval,
        }
    }

    /// Enqueue without blocking. Returns `false` (and drops `frame`) when full.
    pub fn try_enqueue(&self, frame: Frame) -> bool {
        let rejected = {
            let mut queue = self.lock();
            if queue.len() >= self.capacity {
                Some(frame)
            } else {
                queue.push_back(frame);
                None
            }
        };
        rejected.is_none()
    }

    /// Take the oldest frame, if any.
    pub fn try_dequeue(&self) -> Option<Frame> {
        self.lock().pop_front()
    }

    /// Take the oldest frame, polling while empty.
    ///
    /// Returns `None` once `shutdown` is raised; the signal is checked on every
    /// wake-up.
    pub fn dequeue_or_wait(&self, shutdown: &Shutdown) -> Option<Frame> {
        loop {
            if shutdown.is_triggered() {
                return None;
            }
            if let Some(frame) = self.try_dequeue() {
                return Some(frame);
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    /// Current buffer length.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Memory usage estimate.
    pub fn memory_bytes(&self) -> usize {
        self.lock().iter().map(|f| f.byte_len()).sum()
    }

    // Queue operations are single push/pop calls, so a poisoned queue is
    // still consistent.
    fn lock(&self) -> MutexGuard<'_, VecDeque<Frame>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY, DEFAULT_POLL_INTERVAL)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
