//! DICOM RLE Lossless frame decoding.
//!
//! # Frame Layout
//! ```text
//! Bytes 0-3:   Number of segments (1-15), little endian
//! Bytes 4-63:  Byte offset of each segment from the start of the frame
//! Bytes 64-..: PackBits-compressed segments
//! ```
//!
//! Each segment holds one byte plane of one sample: for 16-bit data the
//! most significant bytes of every pixel come first, then the least
//! significant bytes. Segments are ordered sample by sample.

use thiserror::Error;

use crate::io::read_u32_le;

/// Size of the RLE segment header
pub const RLE_HEADER_LEN: usize = 64;

/// Maximum number of segments the header can describe
pub const MAX_SEGMENTS: usize = 15;

/// Largest expansion PackBits allows: a 2-byte replicate run yields 128 bytes
pub const MAX_EXPANSION: usize = 64;

/// Errors that can occur while decoding an RLE frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RleError {
    #[error("RLE frame is {0} bytes, shorter than the 64-byte header")]
    MissingHeader(usize),

    #[error("RLE header declares {actual} segments, expected {expected}")]
    SegmentCount { expected: usize, actual: usize },

    #[error("RLE segment {segment} has invalid offset {offset}")]
    SegmentOffset { segment: usize, offset: usize },

    #[error("RLE segment {segment} of {available} bytes cannot expand to {needed} bytes")]
    SegmentTooShort {
        segment: usize,
        needed: usize,
        available: usize,
    },

    #[error("RLE frame of {width}x{height} is not addressable")]
    Oversized { width: usize, height: usize },

    #[error("RLE segment {segment} decoded to {actual} bytes, expected {expected}")]
    SegmentLength {
        segment: usize,
        expected: usize,
        actual: usize,
    },
}

/// Decode one RLE-compressed frame into pixel-interleaved samples.
///
/// Multi-byte samples are written little endian. The caller supplies the
/// declared geometry; the number of segments must equal
/// `samples_per_pixel * bytes_per_sample`.
pub fn decode_frame(
    data: &[u8],
    width: usize,
    height: usize,
    samples_per_pixel: usize,
    bytes_per_sample: usize,
) -> Result<Vec<u8>, RleError> {
    if data.len() < RLE_HEADER_LEN {
        return Err(RleError::MissingHeader(data.len()));
    }

    let expected = samples_per_pixel * bytes_per_sample;
    let count = read_u32_le(data) as usize;
    if count != expected || count == 0 || count > MAX_SEGMENTS {
        return Err(RleError::SegmentCount {
            expected,
            actual: count,
        });
    }

    let offsets: Vec<usize> = (0..count)
        .map(|i| read_u32_le(&data[4 + i * 4..]) as usize)
        .collect();

    let pixels = width
        .checked_mul(height)
        .ok_or(RleError::Oversized { width, height })?;

    // Validate every segment before allocating the declared frame size
    let mut segments = Vec::with_capacity(count);
    for (segment, &start) in offsets.iter().enumerate() {
        let end = offsets.get(segment + 1).copied().unwrap_or(data.len());
        if start < RLE_HEADER_LEN || start > end || end > data.len() {
            return Err(RleError::SegmentOffset {
                segment,
                offset: start,
            });
        }
        let available = end - start;
        if available.saturating_mul(MAX_EXPANSION) < pixels {
            return Err(RleError::SegmentTooShort {
                segment,
                needed: pixels,
                available,
            });
        }
        segments.push(&data[start..end]);
    }

    let mut out = vec![0u8; pixels * expected];

    for (segment, input) in segments.into_iter().enumerate() {
        let plane = unpack_bits(input, pixels);
        if plane.len() < pixels {
            return Err(RleError::SegmentLength {
                segment,
                expected: pixels,
                actual: plane.len(),
            });
        }

        // Segment order is MSB first; output is little endian
        let sample = segment / bytes_per_sample;
        let byte = bytes_per_sample - 1 - segment % bytes_per_sample;
        for (pixel, value) in plane.iter().take(pixels).enumerate() {
            out[(pixel * samples_per_pixel + sample) * bytes_per_sample + byte] = *value;
        }
    }

    Ok(out)
}

/// Expand a PackBits segment, stopping once `limit` bytes are produced.
///
/// Segments are padded to even length, so trailing bytes past the limit
/// are ignored.
pub fn unpack_bits(input: &[u8], limit: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(limit);
    let mut i = 0;

    while i < input.len() && out.len() < limit {
        let header = input[i] as i8;
        i += 1;

        match header {
            0..=127 => {
                let run = header as usize + 1;
                let end = (i + run).min(input.len());
                out.extend_from_slice(&input[i..end]);
                i = end;
            }
            -127..=-1 => {
                let run = 1 - header as isize;
                if let Some(&value) = input.get(i) {
                    out.extend(std::iter::repeat(value).take(run as usize));
                }
                i += 1;
            }
            // -128 is a no-op
            _ => {}
        }
    }

    out.truncate(limit);
    out
}
