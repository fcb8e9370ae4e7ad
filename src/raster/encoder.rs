//! PNG raster encoder.
//!
//! Frames are written losslessly as stored: no windowing, no LUTs, no
//! MONOCHROME1 inversion. Signed samples keep their two's complement bit
//! pattern.
//!
//! # Supported Layouts
//!
//! | Bits allocated | Samples per pixel | PNG color type |
//! |----------------|-------------------|----------------|
//! | 8              | 1                 | Gray 8         |
//! | 16             | 1                 | Gray 16        |
//! | 8              | 3                 | RGB 8          |
//! | 16             | 3                 | RGB 16         |
//!
//! Output carries no timestamps or text chunks, so encoding the same frame
//! twice yields identical bytes.

use bytes::Bytes;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ImageBuffer, Luma, Rgb};

use crate::error::EncodeError;
use crate::format::pixel::RasterFrame;

/// PNG encoder for raster frames.
#[derive(Debug, Clone, Default)]
pub struct PngFrameEncoder {}

impl PngFrameEncoder {
    pub fn new() -> Self {
        Self {}
    }

    /// Encode one frame as PNG.
    ///
    /// # Errors
    ///
    /// - `UnsupportedPixelFormat` if the layout has no lossless PNG mapping
    /// - `InvalidPixelData` if the buffer length does not match the geometry
    /// - `EncodingFailed` if the PNG encoder itself fails
    pub fn encode(&self, frame: &RasterFrame) -> Result<Bytes, EncodeError> {
        let image = to_dynamic_image(frame)?;

        let mut output = Vec::new();
        image
            .write_with_encoder(PngEncoder::new(&mut output))
            .map_err(|e| EncodeError::EncodingFailed(e.to_string()))?;

        Ok(Bytes::from(output))
    }
}

fn to_dynamic_image(frame: &RasterFrame) -> Result<DynamicImage, EncodeError> {
    let unsupported = || EncodeError::UnsupportedPixelFormat {
        bits_allocated: frame.bits_allocated,
        samples_per_pixel: frame.samples_per_pixel,
    };

    let channels = match frame.samples_per_pixel {
        1 | 3 => frame.samples_per_pixel as usize,
        _ => return Err(unsupported()),
    };
    let bytes_per_sample = match frame.bits_allocated {
        8 => 1,
        16 => 2,
        _ => return Err(unsupported()),
    };

    // An unaddressable size can never match a real buffer
    let expected = (frame.width as usize)
        .checked_mul(frame.height as usize)
        .and_then(|n| n.checked_mul(channels * bytes_per_sample))
        .unwrap_or(usize::MAX);
    if frame.pixels.len() != expected {
        return Err(EncodeError::InvalidPixelData {
            expected,
            actual: frame.pixels.len(),
        });
    }

    let invalid = || EncodeError::InvalidPixelData {
        expected,
        actual: frame.pixels.len(),
    };
    let (width, height) = (frame.width, frame.height);

    let image = match (bytes_per_sample, channels) {
        (1, 1) => DynamicImage::ImageLuma8(
            ImageBuffer::<Luma<u8>, _>::from_raw(width, height, frame.pixels.clone())
                .ok_or_else(invalid)?,
        ),
        (1, _) => DynamicImage::ImageRgb8(
            ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, frame.pixels.clone())
                .ok_or_else(invalid)?,
        ),
        (_, 1) => DynamicImage::ImageLuma16(
            ImageBuffer::<Luma<u16>, _>::from_raw(width, height, samples_u16(&frame.pixels))
                .ok_or_else(invalid)?,
        ),
        _ => DynamicImage::ImageRgb16(
            ImageBuffer::<Rgb<u16>, _>::from_raw(width, height, samples_u16(&frame.pixels))
                .ok_or_else(invalid)?,
        ),
    };

    Ok(image)
}

fn samples_u16(pixels: &[u8]) -> Vec<u16> {
    pixels
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
