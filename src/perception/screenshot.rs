use std::io::Cursor;

use serde::{Deserialize, Serialize};

use crate::errors::{PilotError, PilotResult};

/// On-disk format for step screenshots. Devices always deliver PNG; anything
/// else is a re-encode on our side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenshotFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
}

impl ScreenshotFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ScreenshotFormat::Png => "png",
            ScreenshotFormat::Jpeg => "jpg",
            ScreenshotFormat::Webp => "webp",
        }
    }

    fn image_format(&self) -> image::ImageFormat {
        match self {
            ScreenshotFormat::Png => image::ImageFormat::Png,
            ScreenshotFormat::Jpeg => image::ImageFormat::Jpeg,
            ScreenshotFormat::Webp => image::ImageFormat::WebP,
        }
    }
}

/// Re-encodes PNG bytes into the configured format. PNG input with PNG
/// configured passes through untouched.
pub fn reencode(png_bytes: &[u8], format: ScreenshotFormat) -> PilotResult<Vec<u8>> {
    if format == ScreenshotFormat::Png {
        return Ok(png_bytes.to_vec());
    }
    let decoded = image::load_from_memory(png_bytes)?;
    let mut out = Cursor::new(Vec::new());
    // JPEG has no alpha channel.
    let decoded = match format {
        ScreenshotFormat::Jpeg => image::DynamicImage::ImageRgb8(decoded.to_rgb8()),
        _ => decoded,
    };
    decoded.write_to(&mut out, format.image_format())?;
    Ok(out.into_inner())
}

/// Exact stuck-screen comparison: same dimensions and every pixel equal.
/// A fast byte-equality path avoids decoding when the encoder output is
/// already identical.
pub fn screens_identical(a: &[u8], b: &[u8]) -> PilotResult<bool> {
    if a == b {
        return Ok(true);
    }
    let img_a = image::load_from_memory(a)?;
    let img_b = image::load_from_memory(b)?;
    if img_a.width() != img_b.width() || img_a.height() != img_b.height() {
        return Ok(false);
    }
    Ok(img_a.to_rgba8().as_raw() == img_b.to_rgba8().as_raw())
}

/// Feedback text injected when the screen did not change after an action.
pub fn stuck_screen_feedback() -> String {
    "The screen did not change after the last action. The previous action had no \
     visible effect. Choose a different action to make progress."
        .to_string()
}

pub fn encode_base64(bytes: &[u8]) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn decode_screenshot(bytes: &[u8]) -> PilotResult<image::DynamicImage> {
    image::load_from_memory(bytes).map_err(PilotError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgba};

    fn png_with_pixel(x: u32, y: u32, value: u8) -> Vec<u8> {
        let mut img: ImageBuffer<Rgba<u8>, Vec<u8>> =
            ImageBuffer::from_pixel(4, 4, Rgba([10, 20, 30, 255]));
        img.put_pixel(x, y, Rgba([value, value, value, 255]));
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn identical_screens_detected() {
        let a = png_with_pixel(0, 0, 99);
        let b = png_with_pixel(0, 0, 99);
        assert!(screens_identical(&a, &b).unwrap());
    }

    #[test]
    fn single_pixel_difference_is_not_stuck() {
        let a = png_with_pixel(0, 0, 99);
        let b = png_with_pixel(0, 0, 98);
        assert!(!screens_identical(&a, &b).unwrap());
    }

    #[test]
    fn dimension_mismatch_is_not_stuck() {
        let a = png_with_pixel(0, 0, 99);
        let mut img: ImageBuffer<Rgba<u8>, Vec<u8>> =
            ImageBuffer::from_pixel(8, 8, Rgba([10, 20, 30, 255]));
        img.put_pixel(0, 0, Rgba([99, 99, 99, 255]));
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        assert!(!screens_identical(&a, &out.into_inner()).unwrap());
    }

    #[test]
    fn png_passthrough_keeps_bytes() {
        let a = png_with_pixel(1, 1, 7);
        assert_eq!(reencode(&a, ScreenshotFormat::Png).unwrap(), a);
    }

    #[test]
    fn jpeg_reencode_produces_jpeg() {
        let a = png_with_pixel(1, 1, 7);
        let jpeg = reencode(&a, ScreenshotFormat::Jpeg).unwrap();
        assert_eq!(image::guess_format(&jpeg).unwrap(), image::ImageFormat::Jpeg);
    }
}
