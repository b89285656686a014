use anyhow::{anyhow, bail, Result};

use crate::detect::result::{FrameMetadata, PixelBox};

/// Inference-space to display-pixel transform.
///
/// Implementations may fail for any reason (missing metadata, degenerate
/// geometry). Failure is never fatal: `CoordinateMapper` falls back to
/// normalized scaling.
pub trait CoordinateTransform: Send + Sync {
    /// Transform identifier (for logs).
    fn name(&self) -> &'static str;

    /// Convert `(x, y, w, h)` into display-frame pixels. The result does not
    /// need to be clamped.
    fn to_pixels(&self, coords: [f32; 4], metadata: &FrameMetadata) -> Result<[f32; 4]>;
}

/// Maps model-input coordinates through the ISP scaler crop into the display
/// frame.
///
/// Model input pixels are first scaled onto the crop rectangle (sensor space),
/// offset by the crop origin, then scaled from sensor space onto the display
/// frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScalerCropTransform;

impl CoordinateTransform for ScalerCropTransform {
    fn name(&self) -> &'static str {
        "scaler_crop"
    }

    fn to_pixels(&self, coords: [f32; 4], metadata: &FrameMetadata) -> Result<[f32; 4]> {
        let crop = metadata
            .scaler_crop
            .ok_or_else(|| anyhow!("frame metadata has no scaler crop"))?;
        let (input_w, input_h) = metadata
            .input_size
            .ok_or_else(|| anyhow!("frame metadata has no model input size"))?;
        let (sensor_w, sensor_h) = metadata
            .sensor_size
            .ok_or_else(|| anyhow!("frame metadata has no sensor size"))?;
        if input_w == 0 || input_h == 0 || sensor_w == 0 || sensor_h == 0 {
            bail!("degenerate inference geometry (input {input_w}x{input_h}, sensor {sensor_w}x{sensor_h})");
        }
        if crop.width == 0 || crop.height == 0 {
            bail!("degenerate scaler crop {}x{}", crop.width, crop.height);
        }

        let crop_sx = crop.width as f32 / input_w as f32;
        let crop_sy = crop.height as f32 / input_h as f32;
        let frame_sx = metadata.frame_width as f32 / sensor_w as f32;
        let frame_sy = metadata.frame_height as f32 / sensor_h as f32;

        let [x, y, w, h] = coords;
        Ok([
            (crop.x as f32 + x * crop_sx) * frame_sx,
            (crop.y as f32 + y * crop_sy) * frame_sy,
            w * crop_sx * frame_sx,
            h * crop_sy * frame_sy,
        ])
    }
}

/// Which path produced a mapped box.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MappingOutcome {
    Transformed,
    Fallback,
}

/// Coordinate Mapper: primary transform with a normalized-scaling fallback.
pub struct CoordinateMapper {
    transform: Box<dyn CoordinateTransform>,
}

impl CoordinateMapper {
    pub fn new<T: CoordinateTransform + 'static>(transform: T) -> Self {
        Self {
            transform: Box::new(transform),
        }
    }

    /// Map a raw box into display pixels. Never fails.
    ///
    /// Both paths are clamped to `[0, frame_width)` / `[0, frame_height)`.
    pub fn map(&self, coords: [f32; 4], metadata: &FrameMetadata) -> (PixelBox, MappingOutcome) {
        match self.transform.to_pixels(coords, metadata) {
            Ok(pixels) if pixels.iter().all(|v| v.is_finite()) => (
                clamp_box(pixels, metadata.frame_width, metadata.frame_height),
                MappingOutcome::Transformed,
            ),
            Ok(pixels) => {
                log::warn!(
                    "{} transform produced non-finite box {:?}; scaling as normalized",
                    self.transform.name(),
                    pixels
                );
                (fallback_box(coords, metadata), MappingOutcome::Fallback)
            }
            Err(err) => {
                log::warn!(
                    "{} transform failed: {}; scaling as normalized",
                    self.transform.name(),
                    err
                );
                (fallback_box(coords, metadata), MappingOutcome::Fallback)
            }
        }
    }
}

impl Default for CoordinateMapper {
    fn default() -> Self {
        Self::new(ScalerCropTransform)
    }
}

/// Treat `coords` as normalized `[0,1]` and scale by the frame size.
pub fn fallback_box(coords: [f32; 4], metadata: &FrameMetadata) -> PixelBox {
    let width = metadata.frame_width as f32;
    let height = metadata.frame_height as f32;
    let [x, y, w, h] = coords;
    clamp_box(
        [x * width, y * height, w * width, h * height],
        metadata.frame_width,
        metadata.frame_height,
    )
}

fn clamp_box(pixels: [f32; 4], frame_width: u32, frame_height: u32) -> PixelBox {
    let [x, y, w, h] = pixels;
    PixelBox {
        x: clamp_axis(x, frame_width),
        y: clamp_axis(y, frame_height),
        w: clamp_axis(w, frame_width),
        h: clamp_axis(h, frame_height),
    }
}

// Truncates toward zero, then clamps into [0, limit).
fn clamp_axis(value: f32, limit: u32) -> u32 {
    if limit == 0 || !value.is_finite() {
        return 0;
    }
    let max = (limit - 1) as f32;
    value.clamp(0.0, max) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::CropRect;

    struct FailingTransform;

    impl CoordinateTransform for FailingTransform {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn to_pixels(&self, _coords: [f32; 4], _metadata: &FrameMetadata) -> Result<[f32; 4]> {
            Err(anyhow!("forced failure"))
        }
    }

    fn full_sensor_metadata() -> FrameMetadata {
        FrameMetadata {
            frame_width: 640,
            frame_height: 480,
            sensor_size: Some((1280, 960)),
            scaler_crop: Some(CropRect {
                x: 0,
                y: 0,
                width: 1280,
                height: 960,
            }),
            input_size: Some((320, 320)),
        }
    }

    #[test]
    fn forced_failure_scales_normalized_box() {
        let mapper = CoordinateMapper::new(FailingTransform);
        let metadata = FrameMetadata::for_frame(640, 480);

        let (bbox, outcome) = mapper.map([0.5, 0.5, 0.2, 0.2], &metadata);

        assert_eq!(outcome, MappingOutcome::Fallback);
        assert_eq!(
            bbox,
            PixelBox {
                x: 320,
                y: 240,
                w: 128,
                h: 96
            }
        );
    }

    #[test]
    fn scaler_crop_maps_model_input_into_frame() {
        let mapper = CoordinateMapper::default();
        let metadata = full_sensor_metadata();

        let (bbox, outcome) = mapper.map([160.0, 160.0, 32.0, 64.0], &metadata);

        assert_eq!(outcome, MappingOutcome::Transformed);
        // 320x320 input over a 1280x960 crop, then halved into 640x480.
        assert_eq!(
            bbox,
            PixelBox {
                x: 320,
                y: 240,
                w: 64,
                h: 96
            }
        );
    }

    #[test]
    fn scaler_crop_applies_crop_offset() {
        let metadata = FrameMetadata {
            scaler_crop: Some(CropRect {
                x: 320,
                y: 240,
                width: 640,
                height: 480,
            }),
            ..full_sensor_metadata()
        };

        let pixels = ScalerCropTransform
            .to_pixels([0.0, 0.0, 320.0, 320.0], &metadata)
            .unwrap();

        assert_eq!(pixels, [160.0, 120.0, 320.0, 240.0]);
    }

    #[test]
    fn missing_metadata_falls_back() {
        let mapper = CoordinateMapper::default();
        let metadata = FrameMetadata::for_frame(640, 480);

        let (_, outcome) = mapper.map([0.1, 0.1, 0.1, 0.1], &metadata);
        assert_eq!(outcome, MappingOutcome::Fallback);
    }

    #[test]
    fn both_paths_clamp_into_frame() {
        let metadata = full_sensor_metadata();
        let (bbox, _) = CoordinateMapper::default().map([-40.0, 400.0, 900.0, 10.0], &metadata);
        assert_eq!(bbox.x, 0);
        assert_eq!(bbox.y, 479);
        assert_eq!(bbox.w, 639);

        let (bbox, _) = CoordinateMapper::new(FailingTransform)
            .map([1.5, -0.2, 2.0, 1.0], &FrameMetadata::for_frame(640, 480));
        assert_eq!(
            bbox,
            PixelBox {
                x: 639,
                y: 0,
                w: 639,
                h: 479
            }
        );
    }

    #[test]
    fn degenerate_geometry_is_a_transform_error() {
        let metadata = FrameMetadata {
            input_size: Some((0, 320)),
            ..full_sensor_metadata()
        };
        assert!(ScalerCropTransform
            .to_pixels([1.0, 1.0, 1.0, 1.0], &metadata)
            .is_err());
    }
}
