//! Image preparation: uploaded bytes → bounded RGB JPEG, base64 wrapped.
//!
//! Phone photos of prescriptions arrive as anything from 12 MP HEIC-derived
//! JPEGs to palette PNG scans. Before upload every image is decoded, forced to
//! 8-bit RGB (alpha and palettes confuse some vision endpoints), scaled so its
//! longest edge fits `max_image_dimension`, and re-encoded as a high-quality
//! JPEG.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use tracing::debug;

/// An image ready to be attached to an extraction request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedImage {
    /// Base64 (standard alphabet) of the encoded bytes.
    pub data: String,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
}

/// Decode, normalise and re-encode an uploaded image.
///
/// CPU-bound; async callers should run it under `spawn_blocking`.
pub fn prepare_image(
    bytes: &[u8],
    max_dimension: u32,
    jpeg_quality: u8,
) -> Result<PreparedImage, image::ImageError> {
    let img = image::load_from_memory(bytes)?;
    let (orig_w, orig_h) = (img.width(), img.height());

    let img = bound_dimensions(img, max_dimension);
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());

    let mut buf = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, jpeg_quality))?;

    debug!(
        "Prepared image {}x{} → {}x{}, {} bytes JPEG",
        orig_w,
        orig_h,
        rgb.width(),
        rgb.height(),
        buf.len()
    );

    Ok(PreparedImage {
        data: STANDARD.encode(&buf),
        mime_type: "image/jpeg",
        width: rgb.width(),
        height: rgb.height(),
    })
}

/// Shrink so the longest edge is at most `max_dimension`, keeping the aspect
/// ratio. Smaller images are returned untouched.
fn bound_dimensions(img: DynamicImage, max_dimension: u32) -> DynamicImage {
    if img.width().max(img.height()) <= max_dimension {
        return img;
    }
    img.resize(max_dimension, max_dimension, FilterType::Lanczos3)
}
