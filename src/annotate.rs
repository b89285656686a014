//! Overlays drawn on the rendered frame before it is queued for streaming:
//! one outline per detection plus a `"name (0.93)"` caption inside its
//! top-left corner.

use crate::catalog::LabelTable;
use crate::detect::Detection;
use crate::frame::Frame;

/// Overlay color (BGR green).
pub const BOX_COLOR: [u8; 3] = [0, 255, 0];

/// Outline thickness in pixels.
pub const BOX_THICKNESS: u32 = 2;

/// Caption offset from the box's top-left corner; `y` is the text baseline.
pub const CAPTION_OFFSET: (u32, u32) = (5, 15);

pub const GLYPH_WIDTH: u32 = 5;
pub const GLYPH_HEIGHT: u32 = 7;
const GLYPH_ADVANCE: u32 = GLYPH_WIDTH + 1;

/// Draw one outline and caption per detection.
pub fn draw_detections(frame: &mut Frame, detections: &[Detection], labels: &LabelTable) {
    for detection in detections {
        let b = detection.bbox;
        let (x, y) = caption_origin(detection);
        draw_text(frame, x, y, &caption(detection, labels), BOX_COLOR);
        draw_rectangle(
            frame,
            b.x,
            b.y,
            b.x.saturating_add(b.w),
            b.y.saturating_add(b.h),
            BOX_COLOR,
        );
    }
}

/// `"<name> (<confidence>)"`; unknown categories show their index.
pub fn caption(detection: &Detection, labels: &LabelTable) -> String {
    match labels.name(detection.category) {
        Some(name) if !name.is_empty() => format!("{} ({:.2})", name, detection.confidence),
        _ => format!("{} ({:.2})", detection.category, detection.confidence),
    }
}

/// Top-left pixel of the caption's first glyph.
pub fn caption_origin(detection: &Detection) -> (u32, u32) {
    let b = detection.bbox;
    (
        b.x.saturating_add(CAPTION_OFFSET.0),
        b.y.saturating_add(CAPTION_OFFSET.1).saturating_sub(GLYPH_HEIGHT),
    )
}

/// Outline `(x0, y0)..=(x1, y1)`, clamped to the frame.
pub fn draw_rectangle(frame: &mut Frame, x0: u32, y0: u32, x1: u32, y1: u32, color: [u8; 3]) {
    if frame.width == 0 || frame.height == 0 {
        return;
    }
    let max_x = frame.width - 1;
    let max_y = frame.height - 1;
    let (left, right) = (x0.min(x1).min(max_x), x0.max(x1).min(max_x));
    let (top, bottom) = (y0.min(y1).min(max_y), y0.max(y1).min(max_y));

    for t in 0..BOX_THICKNESS {
        for x in left..=right {
            frame.put_pixel(x, top.saturating_add(t).min(bottom), color);
            frame.put_pixel(x, bottom.saturating_sub(t).max(top), color);
        }
        for y in top..=bottom {
            frame.put_pixel(left.saturating_add(t).min(right), y, color);
            frame.put_pixel(right.saturating_sub(t).max(left), y, color);
        }
    }
}

/// Render `text` with the built-in 5x7 font, top-left at `(x, y)`.
///
/// Letters are drawn upper-case; characters without a glyph leave a gap.
/// Pixels past the frame edge are dropped.
pub fn draw_text(frame: &mut Frame, x: u32, y: u32, text: &str, color: [u8; 3]) {
    let mut cursor = x;
    for ch in text.chars() {
        if let Some(rows) = glyph(ch.to_ascii_uppercase()) {
            for (row, bits) in rows.iter().enumerate() {
                for col in 0..GLYPH_WIDTH {
                    if (bits >> (GLYPH_WIDTH - 1 - col)) & 1 == 1 {
                        frame.put_pixel(cursor + col, y + row as u32, color);
                    }
                }
            }
        }
        cursor = cursor.saturating_add(GLYPH_ADVANCE);
        if cursor >= frame.width {
            break;
        }
    }
}

// 5x7 patterns, one byte per row, bit 4 is the leftmost column.
fn glyph(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '(' => [0x02, 0x04, 0x08, 0x08, 0x08, 0x04, 0x02],
        ')' => [0x08, 0x04, 0x02, 0x02, 0x02, 0x04, 0x08],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        _ => return None,
    };
    Some(rows)
}
