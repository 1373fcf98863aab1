//! Downscale and embed article images as base64 JPEG data URIs.

use crate::error::{PanelistError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::GenericImageView;

/// Images are scaled to fit inside this square.
pub const MAX_IMAGE_SIDE: u32 = 512;
const JPEG_QUALITY: u8 = 80;

/// Decode any supported image, fit it into 512x512, and re-encode as a JPEG data URI.
pub fn to_jpeg_data_uri(bytes: &[u8]) -> Result<String> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| PanelistError::Resolve(format!("Unreadable image: {}", e)))?;
    let (width, height) = decoded.dimensions();
    let fitted = if width > MAX_IMAGE_SIDE || height > MAX_IMAGE_SIDE {
        decoded.thumbnail(MAX_IMAGE_SIDE, MAX_IMAGE_SIDE)
    } else {
        decoded
    };

    let rgb = fitted.to_rgb8();
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(|e| PanelistError::Resolve(format!("JPEG encoding failed: {}", e)))?;
    Ok(format!("data:image/jpeg;base64,{}", STANDARD.encode(&jpeg)))
}

/// Fetch and embed an image.
pub async fn fetch_and_embed(http: &reqwest::Client, url: &str) -> Result<String> {
    let response = http.get(url).send().await?;
    if !response.status().is_success() {
        return Err(PanelistError::Resolve(format!(
            "Image {} returned {}",
            url,
            response.status()
        )));
    }
    let bytes = response.bytes().await?;
    to_jpeg_data_uri(&bytes)
}
