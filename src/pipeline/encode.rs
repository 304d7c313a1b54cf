//! Image encoding: `DynamicImage` → JPEG bytes, optionally wrapped in `ImageData`.
//!
//! The archival PDF embeds the page as a JPEG (DCTDecode) stream, and the
//! vision model receives the same encoding as a base64 data URI. Photographs
//! compress far better as JPEG than PNG at no visible loss for filing.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use tracing::debug;

/// Encode a page as baseline JPEG. Alpha is dropped.
pub fn jpeg_bytes(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let rgb = img.to_rgb8();
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)).encode_image(&rgb)?;
    Ok(buf)
}

/// Encode a page as a base64 JPEG ready for a multimodal request.
///
/// `detail: "high"` lets GPT-4-class models tile the image instead of
/// reading a single 512 px overview, which keeps names on ID cards legible.
pub fn encode_for_model(img: &DynamicImage, quality: u8) -> Result<ImageData, image::ImageError> {
    let buf = jpeg_bytes(img, quality)?;
    let b64 = STANDARD.encode(&buf);
    debug!("Encoded image → {} bytes base64", b64.len());

    Ok(ImageData::new(b64, "image/jpeg").with_detail("high"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let data = encode_for_model(&img, 85).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/jpeg");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(&decoded[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn jpeg_round_trips_dimensions() {
        let img = DynamicImage::new_rgb8(33, 17);
        let bytes = jpeg_bytes(&img, 70).unwrap();
        let back = image::load_from_memory(&bytes).unwrap();
        assert_eq!((back.width(), back.height()), (33, 17));
    }
}
