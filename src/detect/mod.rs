mod mapping;
mod result;

pub use mapping::{
    fallback_box, CoordinateMapper, CoordinateTransform, MappingOutcome, ScalerCropTransform,
};
pub use result::{CropRect, Detection, FrameMetadata, PixelBox, RawDetection};
