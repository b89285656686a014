//! MJPEG output over the frame buffer.
//!
//! `MjpegStream` is the buffer's consumer: each item is one multipart segment
//! (`--frame` boundary, JPEG headers, encoded bytes). The stream is lazy,
//! infinite until shutdown, and not restartable.

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use std::iter::FusedIterator;
use std::sync::Arc;

use crate::frame::{Frame, FrameBuffer};
use crate::Shutdown;

/// Multipart boundary token.
pub const MJPEG_BOUNDARY: &str = "frame";

/// `Content-Type` for the whole response.
pub const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Default JPEG quality.
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

pub struct MjpegStream {
    frames: Arc<FrameBuffer>,
    shutdown: Shutdown,
    quality: u8,
    finished: bool,
}

impl MjpegStream {
    pub fn new(frames: Arc<FrameBuffer>, shutdown: Shutdown, quality: u8) -> Self {
        Self {
            frames,
            shutdown,
            quality,
            finished: false,
        }
    }
}

impl Iterator for MjpegStream {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        if self.finished {
            return None;
        }
        loop {
            let Some(frame) = self.frames.dequeue_or_wait(&self.shutdown) else {
                self.finished = true;
                return None;
            };
            match encode_jpeg(&frame, self.quality) {
                Ok(jpeg) => return Some(multipart_segment(&jpeg)),
                Err(err) => log::warn!("dropping frame that failed to encode: {:#}", err),
            }
        }
    }
}

impl FusedIterator for MjpegStream {}

/// Color-convert BGR → RGB and encode as JPEG.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    let rgb = frame.to_rgb();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode(&rgb, frame.width, frame.height, ExtendedColorType::Rgb8)
        .context("encode jpeg")?;
    Ok(out)
}

/// Wrap encoded bytes in one multipart segment.
pub fn multipart_segment(jpeg: &[u8]) -> Vec<u8> {
    let header = format!("--{MJPEG_BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n");
    let mut segment = Vec::with_capacity(header.len() + jpeg.len() + 2);
    segment.extend_from_slice(header.as_bytes());
    segment.extend_from_slice(jpeg);
    segment.extend_from_slice(b"\r\n");
    segment
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn segment_is_framed_with_boundary() {
        let segment = multipart_segment(b"JPEG");
        assert_eq!(
            segment,
            b"--frame\r\nContent-Type: image/jpeg\r\n\r\nJPEG\r\n".to_vec()
        );
    }

    #[test]
    fn encodes_frames_in_buffer_order() {
        let frames = Arc::new(FrameBuffer::new(4, Duration::from_millis(5)));
        assert!(frames.try_enqueue(Frame::solid(16, 8, [0, 0, 255])));
        assert!(frames.try_enqueue(Frame::solid(16, 8, [255, 0, 0])));
        let shutdown = Shutdown::new();
        let mut stream = MjpegStream::new(frames.clone(), shutdown.clone(), 90);

        for _ in 0..2 {
            let segment = stream.next().expect("segment");
            let header = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
            assert!(segment.starts_with(header));
            // JPEG SOI marker follows the headers.
            assert_eq!(&segment[header.len()..header.len() + 2], &[0xFF, 0xD8]);
            assert!(segment.ends_with(b"\r\n"));
        }
        assert!(frames.is_empty());

        shutdown.trigger();
        assert!(stream.next().is_none());
        assert!(stream.next().is_none());
    }

    #[test]
    fn encoded_colors_are_converted_to_rgb() {
        // Pure BGR red must decode as RGB red.
        let frame = Frame::solid(8, 8, [0, 0, 255]);
        let jpeg = encode_jpeg(&frame, 95).unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap().to_rgb8();
        let px = decoded.get_pixel(4, 4);
        assert!(px[0] > 200 && px[1] < 60 && px[2] < 60, "got {:?}", px);
    }
}
