//! Frame serialization for the photo submission.

use anyhow::{anyhow, Context, Result};
use image::{codecs::jpeg::JpegEncoder, DynamicImage, RgbaImage};
use shared::domain::Frame;

const JPEG_QUALITY: u8 = 100;

pub fn encode_jpeg(frame: &Frame) -> Result<Vec<u8>> {
    if !frame.is_well_formed() {
        return Err(anyhow!(
            "frame buffer of {} bytes does not match {}x{} rgba",
            frame.rgba.len(),
            frame.width,
            frame.height
        ));
    }
    let rgba = RgbaImage::from_raw(frame.width, frame.height, frame.rgba.clone())
        .ok_or_else(|| anyhow!("frame buffer rejected by image encoder"))?;
    let rgb = DynamicImage::ImageRgba8(rgba).to_rgb8();

    let mut encoded = Vec::new();
    JpegEncoder::new_with_quality(&mut encoded, JPEG_QUALITY)
        .encode_image(&rgb)
        .context("failed to encode frame as jpeg")?;
    Ok(encoded)
}
