//! Pixel frame extraction.
//!
//! Turns the pixel-data element of a decoded stream into an ordered,
//! finite sequence of raster frames.
//!
//! # Frame Layout
//!
//! - **Native** payloads are one contiguous buffer holding
//!   `number_of_frames` equally sized frames back to back.
//! - **Encapsulated** payloads are codec fragments. The Basic Offset Table,
//!   when present, gives the offset of each frame's first fragment; without
//!   it, fragments map one-to-one to frames, or all fragments form the only
//!   frame of a single-frame image.
//!
//! Structural checks (buffer length, fragment framing, codec support) run
//! when the [`FrameSequence`] is built. Frames themselves decode lazily, so
//! a corrupt frame does not prevent earlier frames from being used.

use std::io::Cursor;

use bytes::{Bytes, BytesMut};
use image::{ImageFormat, ImageReader};
use serde::Serialize;

use super::dicom::{ByteOrder, Element, ElementStream, PixelCodec, PixelDataPayload, Tag, TransferSyntax};
use super::rle;
use crate::error::DecodeError;

// =============================================================================
// Image Geometry
// =============================================================================

/// Declared geometry of every frame in a pixel-data payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageGeometry {
    pub rows: u32,
    pub columns: u32,
    pub bits_allocated: u16,
    pub samples_per_pixel: u16,
    /// 0 = interleaved (RGBRGB...), 1 = planar (RR..GG..BB..)
    pub planar_configuration: u16,
    pub number_of_frames: u32,
    pub photometric_interpretation: String,
    /// 0 = unsigned, 1 = two's complement
    pub pixel_representation: u16,
}

impl ImageGeometry {
    /// Read the image pixel attributes from a decoded stream.
    ///
    /// Rows, columns and bits allocated are required. Samples per pixel
    /// defaults to 1, number of frames to 1, photometric interpretation to
    /// MONOCHROME2.
    pub fn from_stream(stream: &ElementStream) -> Result<Self, DecodeError> {
        let required = |tag: Tag| stream.u32(tag).ok_or(DecodeError::MissingAttribute(tag));
        let optional = |tag: Tag, default: u32| stream.u32(tag).unwrap_or(default);

        let geometry = Self {
            rows: required(Tag::ROWS)?,
            columns: required(Tag::COLUMNS)?,
            bits_allocated: narrow(Tag::BITS_ALLOCATED, required(Tag::BITS_ALLOCATED)?)?,
            samples_per_pixel: narrow(Tag::SAMPLES_PER_PIXEL, optional(Tag::SAMPLES_PER_PIXEL, 1))?,
            planar_configuration: narrow(
                Tag::PLANAR_CONFIGURATION,
                optional(Tag::PLANAR_CONFIGURATION, 0),
            )?,
            number_of_frames: optional(Tag::NUMBER_OF_FRAMES, 1),
            photometric_interpretation: stream
                .string(Tag::PHOTOMETRIC_INTERPRETATION)
                .unwrap_or("MONOCHROME2")
                .to_string(),
            pixel_representation: narrow(
                Tag::PIXEL_REPRESENTATION,
                optional(Tag::PIXEL_REPRESENTATION, 0),
            )?,
        };

        geometry.validate()?;
        Ok(geometry)
    }

    fn validate(&self) -> Result<(), DecodeError> {
        let checks = [
            (Tag::ROWS, self.rows == 0, "rows must be non-zero"),
            (Tag::COLUMNS, self.columns == 0, "columns must be non-zero"),
            (
                Tag::BITS_ALLOCATED,
                self.bits_allocated == 0,
                "bits allocated must be non-zero",
            ),
            (
                Tag::SAMPLES_PER_PIXEL,
                self.samples_per_pixel == 0,
                "samples per pixel must be non-zero",
            ),
            (
                Tag::NUMBER_OF_FRAMES,
                self.number_of_frames == 0,
                "number of frames must be at least 1",
            ),
        ];

        for (tag, failed, reason) in checks {
            if failed {
                return Err(DecodeError::MalformedElement {
                    tag,
                    reason: reason.to_string(),
                });
            }
        }

        self.checked_sizes().map(|_| ())
    }

    /// Number of pixels in one frame, or `None` if it overflows `usize`.
    #[inline]
    pub fn pixel_count(&self) -> Option<usize> {
        (self.rows as usize).checked_mul(self.columns as usize)
    }

    /// Bytes per sample, or `None` if samples are not byte aligned.
    pub fn bytes_per_sample(&self) -> Option<usize> {
        (self.bits_allocated % 8 == 0).then(|| self.bits_allocated as usize / 8)
    }

    /// Size in bytes of one native frame, or `None` if it overflows `usize`.
    pub fn frame_len(&self) -> Option<usize> {
        let bits = self
            .pixel_count()?
            .checked_mul(self.samples_per_pixel as usize)?
            .checked_mul(self.bits_allocated as usize)?;
        Some(bits.div_ceil(8))
    }

    /// Size in bytes of every native frame together, or `None` if it
    /// overflows `usize`.
    pub fn total_len(&self) -> Option<usize> {
        self.frame_len()?.checked_mul(self.number_of_frames as usize)
    }

    /// Frame and total sizes; declared geometries whose sizes are not
    /// addressable are malformed.
    fn checked_sizes(&self) -> Result<(usize, usize), DecodeError> {
        match (self.frame_len(), self.total_len()) {
            (Some(frame), Some(total)) => Ok((frame, total)),
            (frame, _) => Err(DecodeError::MalformedElement {
                tag: if frame.is_none() {
                    Tag::ROWS
                } else {
                    Tag::NUMBER_OF_FRAMES
                },
                reason: format!(
                    "{} frame(s) of {}x{}x{} at {} bits overflow the addressable size",
                    self.number_of_frames,
                    self.columns,
                    self.rows,
                    self.samples_per_pixel,
                    self.bits_allocated
                ),
            }),
        }
    }

    #[inline]
    pub fn is_signed(&self) -> bool {
        self.pixel_representation == 1
    }
}

fn narrow(tag: Tag, value: u32) -> Result<u16, DecodeError> {
    u16::try_from(value).map_err(|_| DecodeError::MalformedElement {
        tag,
        reason: format!("value {} out of range", value),
    })
}

// =============================================================================
// Raster Frame
// =============================================================================

/// One decoded frame.
///
/// Samples are pixel-interleaved; multi-byte samples are little endian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterFrame {
    pub width: u32,
    pub height: u32,
    pub bits_allocated: u16,
    pub samples_per_pixel: u16,
    pub pixels: Vec<u8>,
}

// =============================================================================
// Pixel Frame Extractor
// =============================================================================

/// Builds frame sequences for the transfer syntax of one object.
#[derive(Debug, Clone)]
pub struct PixelFrameExtractor {
    transfer_syntax: TransferSyntax,
}

impl PixelFrameExtractor {
    pub fn new(transfer_syntax: TransferSyntax) -> Self {
        Self { transfer_syntax }
    }

    /// Extractor for the transfer syntax declared in `stream`'s meta header.
    pub fn for_stream(stream: &ElementStream) -> Self {
        Self::new(
            stream
                .transfer_syntax()
                .unwrap_or(TransferSyntax::ExplicitVrLittleEndian),
        )
    }

    /// Validate the payload framing and return a lazily decoded frame sequence.
    ///
    /// # Errors
    /// - `GeometryMismatch` if a native buffer does not hold exactly
    ///   `number_of_frames` frames of the declared geometry
    /// - `UnsupportedEncoding` if the fragments use a codec we cannot decode
    /// - `MalformedElement` if fragments cannot be grouped into frames
    pub fn frames(
        &self,
        element: &Element,
        geometry: &ImageGeometry,
    ) -> Result<FrameSequence, DecodeError> {
        let payload = element
            .pixel_data()
            .ok_or_else(|| DecodeError::MalformedElement {
                tag: element.tag(),
                reason: "element does not carry pixel data".to_string(),
            })?;

        let (frame_len, total_len) = geometry.checked_sizes()?;

        let layout = match payload {
            PixelDataPayload::Native(bytes) => native_layout(bytes, total_len)?,
            PixelDataPayload::Encapsulated {
                offset_table,
                fragments,
            } => {
                let codec = match self.transfer_syntax.codec() {
                    PixelCodec::Native => {
                        return Err(DecodeError::UnsupportedEncoding(format!(
                            "encapsulated pixel data under native transfer syntax {}",
                            self.transfer_syntax
                        )))
                    }
                    PixelCodec::Unsupported(uid) => {
                        return Err(DecodeError::UnsupportedEncoding(format!(
                            "no decoder for transfer syntax {}",
                            uid
                        )))
                    }
                    codec => codec,
                };
                let frames = group_fragments(offset_table, fragments, geometry.number_of_frames)?;
                FrameLayout::Encoded { codec, frames }
            }
        };

        Ok(FrameSequence {
            geometry: geometry.clone(),
            frame_len,
            byte_order: self.transfer_syntax.encoding().byte_order,
            layout,
        })
    }

    /// Decode every frame eagerly, in source order.
    pub fn extract(
        &self,
        element: &Element,
        geometry: &ImageGeometry,
    ) -> Result<Vec<RasterFrame>, DecodeError> {
        self.frames(element, geometry)?.iter().collect()
    }
}

fn native_layout(bytes: &Bytes, expected: usize) -> Result<FrameLayout, DecodeError> {
    let actual = bytes.len();

    // Values are padded to even length
    let padded = expected % 2 == 1 && actual == expected + 1;
    if actual != expected && !padded {
        return Err(DecodeError::GeometryMismatch { expected, actual });
    }

    Ok(FrameLayout::Native(bytes.slice(..expected)))
}

/// Group fragments into frames, in source order.
fn group_fragments(
    offset_table: &[u32],
    fragments: &[Bytes],
    number_of_frames: u32,
) -> Result<Vec<Vec<Bytes>>, DecodeError> {
    let malformed = |reason: String| DecodeError::MalformedElement {
        tag: Tag::PIXEL_DATA,
        reason,
    };
    let frame_count = number_of_frames as usize;

    if fragments.is_empty() {
        return Err(malformed("encapsulated pixel data has no fragments".to_string()));
    }

    if !offset_table.is_empty() {
        if offset_table.len() != frame_count {
            return Err(malformed(format!(
                "{} frames declared but the offset table lists {}",
                frame_count,
                offset_table.len()
            )));
        }

        // Offset of each fragment item, measured from the first one
        let mut starts = Vec::with_capacity(fragments.len());
        let mut offset = 0usize;
        for fragment in fragments {
            starts.push(offset);
            offset += 8 + fragment.len();
        }

        let mut first_fragments = Vec::with_capacity(frame_count);
        for (frame, &entry) in offset_table.iter().enumerate() {
            let index = starts
                .iter()
                .position(|&start| start == entry as usize)
                .ok_or_else(|| {
                    malformed(format!(
                        "offset table entry {} ({}) does not point at a fragment",
                        frame + 1,
                        entry
                    ))
                })?;
            if first_fragments.last().is_some_and(|&previous| index <= previous) {
                return Err(malformed("offset table is not increasing".to_string()));
            }
            first_fragments.push(index);
        }

        return Ok(first_fragments
            .iter()
            .enumerate()
            .map(|(i, &start)| {
                let end = first_fragments.get(i + 1).copied().unwrap_or(fragments.len());
                fragments[start..end].to_vec()
            })
            .collect());
    }

    if fragments.len() == frame_count {
        return Ok(fragments.iter().map(|f| vec![f.clone()]).collect());
    }

    if frame_count == 1 {
        return Ok(vec![fragments.to_vec()]);
    }

    Err(malformed(format!(
        "cannot map {} fragments onto {} frames without an offset table",
        fragments.len(),
        frame_count
    )))
}

// =============================================================================
// Frame Sequence
// =============================================================================

#[derive(Debug, Clone)]
enum FrameLayout {
    Native(Bytes),
    Encoded {
        codec: PixelCodec,
        frames: Vec<Vec<Bytes>>,
    },
}

/// Ordered, finite sequence of frames from one pixel-data element.
#[derive(Debug, Clone)]
pub struct FrameSequence {
    geometry: ImageGeometry,
    /// Checked size of one decoded frame
    frame_len: usize,
    byte_order: ByteOrder,
    layout: FrameLayout,
}

impl FrameSequence {
    /// Number of frames; always at least 1.
    pub fn len(&self) -> usize {
        match &self.layout {
            FrameLayout::Native(_) => self.geometry.number_of_frames as usize,
            FrameLayout::Encoded { frames, .. } => frames.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn geometry(&self) -> &ImageGeometry {
        &self.geometry
    }

    /// Decode the frame at `index` (0-based).
    ///
    /// Failures report the 1-based frame number.
    pub fn decode_frame(&self, index: usize) -> Result<RasterFrame, DecodeError> {
        let frame = index + 1;
        if index >= self.len() {
            return Err(DecodeError::CorruptFrame {
                frame,
                message: format!("payload has only {} frames", self.len()),
            });
        }

        let pixels = match &self.layout {
            FrameLayout::Native(bytes) => self.native_frame(bytes, index),
            FrameLayout::Encoded { codec, frames } => {
                self.encoded_frame(codec, &frames[index], frame)?
            }
        };

        Ok(RasterFrame {
            width: self.geometry.columns,
            height: self.geometry.rows,
            bits_allocated: self.geometry.bits_allocated,
            samples_per_pixel: self.geometry.samples_per_pixel,
            pixels,
        })
    }

    /// Lazily decode frames in source order.
    pub fn iter(&self) -> impl Iterator<Item = Result<RasterFrame, DecodeError>> + '_ {
        (0..self.len()).map(move |index| self.decode_frame(index))
    }

    fn native_frame(&self, bytes: &Bytes, index: usize) -> Vec<u8> {
        let frame_len = self.frame_len;
        let mut pixels = bytes[index * frame_len..(index + 1) * frame_len].to_vec();

        let Some(width) = self.geometry.bytes_per_sample() else {
            return pixels;
        };

        if self.byte_order == ByteOrder::BigEndian && width > 1 {
            for sample in pixels.chunks_exact_mut(width) {
                sample.reverse();
            }
        }

        let samples = self.geometry.samples_per_pixel as usize;
        if self.geometry.planar_configuration == 1 && samples > 1 {
            pixels = interleave(&pixels, frame_len / (samples * width), samples, width);
        }

        pixels
    }

    fn encoded_frame(
        &self,
        codec: &PixelCodec,
        fragments: &[Bytes],
        frame: usize,
    ) -> Result<Vec<u8>, DecodeError> {
        let data = concat(fragments);
        let geometry = &self.geometry;

        let pixels = match codec {
            PixelCodec::Rle => {
                let width = geometry.bytes_per_sample().ok_or_else(|| {
                    DecodeError::UnsupportedEncoding(format!(
                        "RLE with {} bits allocated",
                        geometry.bits_allocated
                    ))
                })?;
                rle::decode_frame(
                    &data,
                    geometry.columns as usize,
                    geometry.rows as usize,
                    geometry.samples_per_pixel as usize,
                    width,
                )
                .map_err(|e| DecodeError::CorruptFrame {
                    frame,
                    message: e.to_string(),
                })?
            }
            PixelCodec::Jpeg => decode_jpeg(&data, geometry, frame)?,
            PixelCodec::Native | PixelCodec::Unsupported(_) => {
                return Err(DecodeError::UnsupportedEncoding(format!(
                    "no decoder for {:?} fragments",
                    codec
                )))
            }
        };

        let expected = self.frame_len;
        if pixels.len() != expected {
            return Err(DecodeError::GeometryMismatch {
                expected,
                actual: pixels.len(),
            });
        }

        Ok(pixels)
    }
}

fn concat(fragments: &[Bytes]) -> Bytes {
    match fragments {
        [single] => single.clone(),
        _ => {
            let mut joined = BytesMut::with_capacity(fragments.iter().map(Bytes::len).sum());
            for fragment in fragments {
                joined.extend_from_slice(fragment);
            }
            joined.freeze()
        }
    }
}

/// Convert planar samples (RR..GG..BB..) to interleaved (RGBRGB...).
fn interleave(planar: &[u8], pixels: usize, samples: usize, width: usize) -> Vec<u8> {
    let mut out = vec![0u8; planar.len()];
    for sample in 0..samples {
        for pixel in 0..pixels {
            let src = (sample * pixels + pixel) * width;
            let dst = (pixel * samples + sample) * width;
            out[dst..dst + width].copy_from_slice(&planar[src..src + width]);
        }
    }
    out
}

fn decode_jpeg(data: &[u8], geometry: &ImageGeometry, frame: usize) -> Result<Vec<u8>, DecodeError> {
    let corrupt = |message: String| DecodeError::CorruptFrame { frame, message };

    if geometry.bits_allocated != 8 {
        return Err(DecodeError::UnsupportedEncoding(format!(
            "JPEG with {} bits allocated",
            geometry.bits_allocated
        )));
    }

    let reader = ImageReader::with_format(Cursor::new(data), ImageFormat::Jpeg);
    let image = reader.decode().map_err(|e| corrupt(e.to_string()))?;

    if image.width() != geometry.columns || image.height() != geometry.rows {
        return Err(corrupt(format!(
            "decoded {}x{}, declared {}x{}",
            image.width(),
            image.height(),
            geometry.columns,
            geometry.rows
        )));
    }

    Ok(match geometry.samples_per_pixel {
        1 => image.into_luma8().into_raw(),
        _ => image.into_rgb8().into_raw(),
    })
}

// =============================================================================
// Tests
// =============================================================================
