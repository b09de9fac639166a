//! Image encoding: raster file → base64 PNG payload for multimodal requests.
//!
//! Images are decoded and re-encoded as 8-bit RGB PNG, whatever the
//! rasteriser produced (greyscale, RGBA, 16-bit). PNG is lossless, which
//! keeps small table text legible for the model.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// A base64-encoded image ready to embed in a request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub mime_type: String,
    pub data: String,
    pub width: u32,
    pub height: u32,
}

/// Encode a decoded image as base64 RGB PNG.
pub fn encode_image(img: &DynamicImage) -> Result<ImagePayload, image::ImageError> {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buf = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let data = STANDARD.encode(&buf);
    debug!("Encoded image {}x{} → {} bytes base64", rgb.width(), rgb.height(), data.len());

    Ok(ImagePayload {
        mime_type: "image/png".to_string(),
        data,
        width: rgb.width(),
        height: rgb.height(),
    })
}

/// Load an image file and encode it. Blocking; decoding a 300 DPI page is
/// CPU-heavy, so async callers go through `spawn_blocking`.
pub fn encode_file(path: &Path) -> Result<ImagePayload, image::ImageError> {
    let img = image::open(path)?;
    encode_image(&img)
}
