//! Image normalisation: arbitrary source bytes → bounded, opaque JPEG.
//!
//! Every stored photo goes through the same three steps:
//!
//! 1. **Bound**: shrink to fit a square bounding box, keeping the aspect
//!    ratio. Photos already inside the box are never enlarged.
//! 2. **Flatten**: composite any alpha channel onto a solid background.
//!    The output format has no transparency.
//! 3. **Encode**: JPEG at one fixed quality.
//!
//! Width, height and byte size in the result are read back from the encoded
//! buffer rather than assumed from the resize arithmetic.
//!
//! Decoding and encoding are CPU-bound, so [`transcode`] runs them on the
//! blocking pool to keep the runtime's timer (and with it the per-case
//! timeout) responsive.

use crate::error::ImageError;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader, RgbImage};
use std::io::Cursor;
use tracing::debug;

/// File extension of every normalised photo.
pub const OUTPUT_EXTENSION: &str = "jpg";

/// MIME type of every normalised photo.
pub const OUTPUT_MIME: &str = "image/jpeg";

/// Fixed normalisation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscodeSettings {
    /// Bounding box edge in pixels.
    pub max_dimension: u32,
    /// JPEG quality, 1–100.
    pub quality: u8,
    /// RGB colour transparent pixels are composited onto.
    pub background: [u8; 3],
}

impl Default for TranscodeSettings {
    fn default() -> Self {
        Self {
            max_dimension: 1000,
            quality: 80,
            background: [255, 255, 255],
        }
    }
}

/// A normalised photo ready for upload.
#[derive(Debug, Clone)]
pub struct TranscodedImage {
    pub width: u32,
    pub height: u32,
    pub byte_size: usize,
    pub buffer: Vec<u8>,
}

/// Normalise `bytes` fetched from `url` on the blocking pool.
pub async fn transcode(
    url: &str,
    bytes: Vec<u8>,
    settings: TranscodeSettings,
) -> Result<TranscodedImage, ImageError> {
    let owned_url = url.to_string();
    tokio::task::spawn_blocking(move || transcode_blocking(&owned_url, &bytes, &settings))
        .await
        .map_err(|e| ImageError::Decode {
            url: url.to_string(),
            detail: format!("transcode task panicked: {e}"),
        })?
}

/// Blocking implementation of [`transcode`].
pub fn transcode_blocking(
    url: &str,
    bytes: &[u8],
    settings: &TranscodeSettings,
) -> Result<TranscodedImage, ImageError> {
    let decode_err = |detail: String| ImageError::Decode {
        url: url.to_string(),
        detail,
    };

    let img = image::load_from_memory(bytes).map_err(|e| decode_err(e.to_string()))?;
    let (src_w, src_h) = (img.width(), img.height());

    let bounded = fit_within(img, settings.max_dimension);
    let flat = flatten(&bounded, settings.background);

    let mut buffer = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buffer, settings.quality);
    flat.write_with_encoder(encoder)
        .map_err(|e| decode_err(format!("JPEG encoding failed: {e}")))?;

    let (width, height) = ImageReader::with_format(Cursor::new(&buffer), ImageFormat::Jpeg)
        .into_dimensions()
        .map_err(|e| decode_err(format!("encoded buffer unreadable: {e}")))?;

    debug!(
        url,
        src = %format!("{src_w}x{src_h}"),
        out = %format!("{width}x{height}"),
        bytes = buffer.len(),
        "Transcoded photo"
    );

    Ok(TranscodedImage {
        width,
        height,
        byte_size: buffer.len(),
        buffer,
    })
}

/// Shrink to fit a `max × max` box, preserving aspect ratio. Never upscales.
fn fit_within(img: DynamicImage, max: u32) -> DynamicImage {
    if img.width() <= max && img.height() <= max {
        return img;
    }
    img.resize(max, max, FilterType::Lanczos3)
}

/// Composite every pixel onto an opaque background.
fn flatten(img: &DynamicImage, background: [u8; 3]) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }

    let rgba = img.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, px) in rgba.enumerate_pixels() {
        let [r, g, b, a] = px.0;
        let alpha = a as u32;
        let blend = |fg: u8, bg: u8| -> u8 {
            ((fg as u32 * alpha + bg as u32 * (255 - alpha) + 127) / 255) as u8
        };
        out.put_pixel(
            x,
            y,
            image::Rgb([
                blend(r, background[0]),
                blend(g, background[1]),
                blend(b, background[2]),
            ]),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn png(img: &DynamicImage) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .expect("png encode");
        buf
    }

    #[test]
    fn large_image_is_bounded_preserving_aspect() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(1600, 800, Rgba([10, 20, 30, 255])));
        let out = transcode_blocking("u", &png(&img), &TranscodeSettings::default())
            .expect("transcode");
        assert_eq!((out.width, out.height), (1000, 500));
        assert_eq!(out.byte_size, out.buffer.len());
        assert_eq!(
            image::guess_format(&out.buffer).expect("format"),
            ImageFormat::Jpeg
        );
    }

    #[test]
    fn small_image_is_not_upscaled() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(300, 200, image::Rgb([1, 2, 3])));
        let out = transcode_blocking("u", &png(&img), &TranscodeSettings::default())
            .expect("transcode");
        assert_eq!((out.width, out.height), (300, 200));
    }

    #[test]
    fn transparency_is_flattened_onto_background() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([0, 0, 0, 0])));
        let flat = flatten(&img, [255, 255, 255]);
        assert_eq!(flat.get_pixel(3, 3).0, [255, 255, 255]);

        let half = DynamicImage::ImageRgba8(RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 128])));
        let flat = flatten(&half, [255, 255, 255]);
        assert_eq!(flat.get_pixel(0, 0).0, [127, 127, 127]);
    }

    #[test]
    fn transparent_source_encodes_to_opaque_jpeg() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(40, 40, Rgba([0, 0, 0, 0])));
        let out = transcode_blocking("u", &png(&img), &TranscodeSettings::default())
            .expect("transcode");
        let decoded = image::load_from_memory(&out.buffer).expect("decode jpeg");
        assert!(!decoded.color().has_alpha());
        let px = decoded.to_rgb8().get_pixel(20, 20).0;
        assert!(px.iter().all(|&c| c > 240), "expected near-white, got {px:?}");
    }

    #[test]
    fn garbage_bytes_are_decode_error() {
        let err = transcode_blocking("https://h/a.jpg", b"<html>404</html>", &TranscodeSettings::default())
            .unwrap_err();
        assert_eq!(err.kind(), "decode");
        assert!(err.to_string().contains("https://h/a.jpg"));
    }

    #[tokio::test]
    async fn async_wrapper_runs_on_blocking_pool() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(20, 10, image::Rgb([9, 9, 9])));
        let out = transcode("u", png(&img), TranscodeSettings::default())
            .await
            .expect("transcode");
        assert_eq!((out.width, out.height), (20, 10));
    }
}
