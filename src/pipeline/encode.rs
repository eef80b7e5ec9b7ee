//! Image encoding: cropped image file → base64 PNG for the vision request.
//!
//! Whatever format the cropper (or a caller) wrote, the image is decoded and
//! re-encoded as PNG before transmission. PNG is lossless, so chart labels
//! and small print survive intact.

use crate::error::VisionError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

pub const PNG_MIME: &str = "image/png";

/// A base64-encoded image plus its MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub data: String,
    pub mime_type: String,
}

impl EncodedImage {
    /// `data:` URI as accepted by OpenAI-style `image_url` parts.
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    /// Wrap for an `edgequake_llm` provider. `detail: "high"` asks the model
    /// for full-resolution tiling.
    pub fn to_image_data(&self) -> ImageData {
        ImageData::new(self.data.clone(), self.mime_type.as_str()).with_detail("high")
    }
}

/// Encode an in-memory image as base64 PNG.
pub fn encode_image(img: &DynamicImage) -> Result<EncodedImage, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let data = STANDARD.encode(&buf);
    debug!("Encoded image → {} bytes base64", data.len());

    Ok(EncodedImage {
        data,
        mime_type: PNG_MIME.to_string(),
    })
}

/// Load an image file of any supported format and encode it as base64 PNG.
pub fn encode_image_file(path: &Path) -> Result<EncodedImage, VisionError> {
    let load_error = |detail: String| VisionError::ImageLoad {
        path: path.display().to_string(),
        detail,
    };

    let img = image::open(path).map_err(|e| load_error(e.to_string()))?;
    encode_image(&img).map_err(|e| load_error(e.to_string()))
}
