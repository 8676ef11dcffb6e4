//! Raster encoding: rasteriser PNG bytes → base64 PNG for the oracle.
//!
//! Vision APIs accept images as base64 payloads embedded in the JSON request
//! body. `pdftoppm` already emits PNG, so the common path is a straight base64
//! wrap. Pages larger than `max_pixels` on their longest edge are downscaled
//! first: a Letter page at 150 DPI is 1275 × 1650 px and passes untouched,
//! while an oversized page size or a high DPI would otherwise blow up the
//! image-token cost of every condensation request.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::imageops::FilterType;
use std::io::Cursor;
use tracing::debug;

/// Encode one rendered page as base64 PNG, capping its longest edge.
pub fn encode_png(png: &[u8], max_pixels: u32) -> Result<String, image::ImageError> {
    let img = image::load_from_memory_with_format(png, image::ImageFormat::Png)?;
    let longest = img.width().max(img.height());

    if longest <= max_pixels {
        let b64 = STANDARD.encode(png);
        debug!("Encoded {}x{} page → {} bytes base64", img.width(), img.height(), b64.len());
        return Ok(b64);
    }

    let resized = img.resize(max_pixels, max_pixels, FilterType::Lanczos3);
    let mut buf = Vec::new();
    resized.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    let b64 = STANDARD.encode(&buf);
    debug!(
        "Downscaled {}x{} → {}x{} page → {} bytes base64",
        img.width(),
        img.height(),
        resized.width(),
        resized.height(),
        b64.len()
    );
    Ok(b64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgba, RgbaImage};

    fn png_of(w: u32, h: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([255, 255, 255, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .expect("png encode");
        buf
    }

    #[test]
    fn small_page_passes_through() {
        let png = png_of(10, 20);
        let b64 = encode_png(&png, 2000).expect("encode should succeed");
        assert_eq!(STANDARD.decode(&b64).expect("valid base64"), png);
    }

    #[test]
    fn large_page_is_capped() {
        let png = png_of(400, 200);
        let b64 = encode_png(&png, 100).expect("encode should succeed");
        let decoded = STANDARD.decode(&b64).expect("valid base64");
        let img = image::load_from_memory(&decoded).expect("valid png");
        assert_eq!(img.width(), 100);
        assert_eq!(img.height(), 50);
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(encode_png(b"not a png", 2000).is_err());
    }
}
