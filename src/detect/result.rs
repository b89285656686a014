use serde::Serialize;

/// Detection as emitted by the inference pipeline, before mapping.
///
/// `coords` is `(x, y, w, h)` in inference space (model-input pixels for the
/// scaler-crop transform, or normalized `0..1` on the fallback path).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawDetection {
    pub coords: [f32; 4],
    pub category: u32,
    pub score: f32,
}

impl RawDetection {
    pub fn new(coords: [f32; 4], category: u32, score: f32) -> Self {
        Self {
            coords,
            category,
            score,
        }
    }
}

/// Box in display-frame pixels. Always inside the frame it was mapped for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PixelBox {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// One observed object in one frame. No identity across frames.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub category: u32,
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bbox: PixelBox,
}

/// Sensor-space crop applied by the ISP before the model input was scaled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Per-frame metadata delivered alongside raw detections.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameMetadata {
    /// Display frame dimensions (the rendered frame the boxes are drawn on).
    pub frame_width: u32,
    pub frame_height: u32,
    /// Full sensor dimensions.
    pub sensor_size: Option<(u32, u32)>,
    /// Crop of the sensor that fed the model input.
    pub scaler_crop: Option<CropRect>,
    /// Model input tensor dimensions.
    pub input_size: Option<(u32, u32)>,
}

impl FrameMetadata {
    /// Metadata carrying only the display frame size. Every transform that
    /// needs sensor geometry will fail and fall back to normalized scaling.
    pub fn for_frame(frame_width: u32, frame_height: u32) -> Self {
        Self {
            frame_width,
            frame_height,
            ..Self::default()
        }
    }
}
