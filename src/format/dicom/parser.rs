//! Element stream decoding.
//!
//! # File Layout
//! ```text
//! Bytes 0-127:   Preamble (ignored)
//! Bytes 128-131: "DICM"
//! Bytes 132-...: File meta group (0002,xxxx), always Explicit VR Little Endian
//! Remainder:     Dataset, encoded per the transfer syntax UID (0002,0010)
//! ```
//!
//! # Element Headers
//! ```text
//! Explicit VR, short length: tag(4) VR(2) length(2)
//! Explicit VR, long length:  tag(4) VR(2) reserved(2) length(4)
//! Implicit VR:               tag(4) length(4)
//! Item / delimiter:          tag(4) length(4)
//! ```
//!
//! A length of `0xFFFFFFFF` means "undefined": the value runs until a
//! delimiter. Only sequences, UN elements and encapsulated pixel data may
//! use it.

use bytes::Bytes;
use tracing::debug;

use super::tags::{implicit_vr, Tag, Vr};
use super::transfer_syntax::{Encoding, TransferSyntax};
use super::values::{Element, ElementStream, PixelDataPayload, Value};
use crate::error::DecodeError;
use crate::io::{read_u16_be, read_u16_le, read_u32_be, read_u32_le, read_u64_be, read_u64_le};

// =============================================================================
// Constants
// =============================================================================

/// Length of the preamble preceding the `DICM` marker
pub const PREAMBLE_LEN: usize = 128;

/// Marker that identifies a DICOM file
pub const MAGIC: &[u8; 4] = b"DICM";

/// Offset of the first file meta element
pub const DATASET_START: usize = PREAMBLE_LEN + 4;

/// Length value meaning "runs until a delimiter"
pub const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;

/// Maximum sequence nesting accepted before the stream is rejected
const MAX_NESTING_DEPTH: usize = 16;

// =============================================================================
// ByteOrder
// =============================================================================

/// Byte order of multi-byte values in a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

impl ByteOrder {
    /// Read a u16 from a byte slice using this byte order.
    #[inline]
    pub fn read_u16(self, bytes: &[u8]) -> u16 {
        match self {
            ByteOrder::LittleEndian => read_u16_le(bytes),
            ByteOrder::BigEndian => read_u16_be(bytes),
        }
    }

    /// Read a u32 from a byte slice using this byte order.
    #[inline]
    pub fn read_u32(self, bytes: &[u8]) -> u32 {
        match self {
            ByteOrder::LittleEndian => read_u32_le(bytes),
            ByteOrder::BigEndian => read_u32_be(bytes),
        }
    }

    /// Read a u64 from a byte slice using this byte order.
    #[inline]
    pub fn read_u64(self, bytes: &[u8]) -> u64 {
        match self {
            ByteOrder::LittleEndian => read_u64_le(bytes),
            ByteOrder::BigEndian => read_u64_be(bytes),
        }
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode a complete DICOM object into its element stream.
///
/// The stream holds the file meta elements followed by the dataset
/// elements, in the order they appear in the buffer. The function is pure:
/// it either returns the fully materialized stream or the first structural
/// error encountered.
///
/// # Errors
/// - `NotADicomObject` if the `DICM` marker or the transfer syntax is missing
/// - `TruncatedStream` if a declared length runs past the end of the buffer
/// - `MalformedElement` if an element's VR is inconsistent with its length or framing
/// - `UnsupportedEncoding` for deflated datasets
pub fn decode(data: Bytes) -> Result<ElementStream, DecodeError> {
    if data.len() < DATASET_START {
        return Err(DecodeError::NotADicomObject {
            reason: format!(
                "{} bytes is too short for the preamble and DICM marker",
                data.len()
            ),
        });
    }

    if &data[PREAMBLE_LEN..DATASET_START] != MAGIC {
        return Err(DecodeError::NotADicomObject {
            reason: "missing DICM marker after the 128-byte preamble".to_string(),
        });
    }

    let mut reader = ElementReader::new(data, DATASET_START, Encoding::EXPLICIT_LITTLE_ENDIAN);
    let mut elements = Vec::new();

    while reader.peek_group() == Some(0x0002) {
        elements.push(reader.read_element()?);
    }

    let transfer_syntax = elements
        .iter()
        .find(|e| e.tag() == Tag::TRANSFER_SYNTAX_UID)
        .and_then(|e| e.value().first_string())
        .map(TransferSyntax::from_uid)
        .ok_or_else(|| DecodeError::NotADicomObject {
            reason: "file meta header has no transfer syntax UID".to_string(),
        })?;

    if transfer_syntax.is_deflated() {
        return Err(DecodeError::UnsupportedEncoding(format!(
            "deflated transfer syntax {}",
            transfer_syntax
        )));
    }

    reader.encoding = transfer_syntax.encoding();
    while !reader.is_at_end() {
        elements.push(reader.read_element()?);
    }

    debug!(
        elements = elements.len(),
        transfer_syntax = %transfer_syntax,
        "Decoded element stream"
    );

    Ok(ElementStream::new(elements))
}

// =============================================================================
// ElementReader
// =============================================================================

/// Sequential reader over a DICOM buffer.
///
/// `end` is the end of the innermost defined-length container being read;
/// at the top level it is the end of the buffer. `container` names the
/// sequence that owns that boundary, for error reporting.
struct ElementReader {
    data: Bytes,
    pos: usize,
    end: usize,
    container: Option<Tag>,
    encoding: Encoding,
    depth: usize,
}

impl ElementReader {
    fn new(data: Bytes, pos: usize, encoding: Encoding) -> Self {
        let end = data.len();
        Self {
            data,
            pos,
            end,
            container: None,
            encoding,
            depth: 0,
        }
    }

    #[inline]
    fn is_at_end(&self) -> bool {
        self.pos >= self.end
    }

    /// Group number of the next element, read as little endian.
    fn peek_group(&self) -> Option<u16> {
        if self.end.saturating_sub(self.pos) < 2 {
            return None;
        }
        Some(read_u16_le(&self.data[self.pos..]))
    }

    /// Ensure `n` bytes can be read at the current position.
    fn check_span(&self, n: usize) -> Result<(), DecodeError> {
        let in_buffer = self.data.len().saturating_sub(self.pos);
        if n > in_buffer {
            return Err(DecodeError::TruncatedStream {
                offset: self.pos,
                needed: n,
                available: in_buffer,
            });
        }

        if n > self.end.saturating_sub(self.pos) {
            let tag = self.container.unwrap_or(Tag::ITEM);
            return Err(DecodeError::MalformedElement {
                tag,
                reason: format!(
                    "{} bytes at offset {} overrun the enclosing item",
                    n, self.pos
                ),
            });
        }

        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<Bytes, DecodeError> {
        self.check_span(n)?;
        let bytes = self.data.slice(self.pos..self.pos + n);
        self.pos += n;
        Ok(bytes)
    }

    fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.take(2)?;
        Ok(self.encoding.byte_order.read_u16(&bytes))
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.take(4)?;
        Ok(self.encoding.byte_order.read_u32(&bytes))
    }

    fn read_tag(&mut self) -> Result<Tag, DecodeError> {
        let group = self.read_u16()?;
        let element = self.read_u16()?;
        Ok(Tag::new(group, element))
    }

    fn peek_tag(&self) -> Result<Tag, DecodeError> {
        self.check_span(4)?;
        let bytes = &self.data[self.pos..self.pos + 4];
        let order = self.encoding.byte_order;
        Ok(Tag::new(order.read_u16(&bytes[0..2]), order.read_u16(&bytes[2..4])))
    }

    /// Consume an item or sequence delimitation (tag plus zero length).
    fn skip_delimiter(&mut self) -> Result<(), DecodeError> {
        self.read_tag()?;
        self.read_u32()?;
        Ok(())
    }

    /// Run `read` with the container boundary narrowed to the next `length` bytes.
    fn within<T>(
        &mut self,
        tag: Tag,
        length: u32,
        read: impl FnOnce(&mut Self) -> Result<T, DecodeError>,
    ) -> Result<T, DecodeError> {
        let length = length as usize;
        self.check_span(length)?;

        let outer_end = std::mem::replace(&mut self.end, self.pos + length);
        let outer_container = self.container.replace(tag);
        let result = read(self);
        self.end = outer_end;
        self.container = outer_container;
        result
    }

    // -------------------------------------------------------------------------
    // Elements
    // -------------------------------------------------------------------------

    fn read_element(&mut self) -> Result<Element, DecodeError> {
        let tag = self.read_tag()?;
        if tag.is_delimiter() {
            return Err(DecodeError::MalformedElement {
                tag,
                reason: "item or delimiter tag outside of a sequence".to_string(),
            });
        }

        let (vr, length) = self.read_vr_and_length(tag)?;
        let value_start = self.pos;

        if length == UNDEFINED_LENGTH {
            if !vr.allows_undefined_length() {
                return Err(DecodeError::MalformedElement {
                    tag,
                    reason: format!("undefined length is not allowed for VR {}", vr),
                });
            }

            let value = if tag == Tag::PIXEL_DATA {
                Value::PixelData(self.read_fragments(tag)?)
            } else if vr == Vr::SQ {
                Value::Sequence(self.read_sequence(tag, length)?)
            } else if vr == Vr::UN {
                let outer =
                    std::mem::replace(&mut self.encoding, Encoding::IMPLICIT_LITTLE_ENDIAN);
                let items = self.read_sequence(tag, length);
                self.encoding = outer;
                Value::Sequence(items?)
            } else {
                return Err(DecodeError::MalformedElement {
                    tag,
                    reason: format!("undefined length on a non-pixel-data {} element", vr),
                });
            };

            let raw = self.data.slice(value_start..self.pos);
            return Ok(Element::new(tag, vr, raw, value));
        }

        if vr == Vr::SQ {
            let items = self.read_sequence(tag, length)?;
            let raw = self.data.slice(value_start..self.pos);
            return Ok(Element::new(tag, vr, raw, Value::Sequence(items)));
        }

        if let Some(width) = vr.value_width() {
            if length as usize % width != 0 {
                return Err(DecodeError::MalformedElement {
                    tag,
                    reason: format!(
                        "length {} is not a multiple of {} for VR {}",
                        length, width, vr
                    ),
                });
            }
        }

        let raw = self.take(length as usize)?;
        let value = if tag == Tag::PIXEL_DATA {
            Value::PixelData(PixelDataPayload::Native(raw.clone()))
        } else {
            Value::decode(vr, &raw, self.encoding.byte_order)
        };

        Ok(Element::new(tag, vr, raw, value))
    }

    fn read_vr_and_length(&mut self, tag: Tag) -> Result<(Vr, u32), DecodeError> {
        if !self.encoding.explicit_vr {
            let length = self.read_u32()?;
            return Ok((implicit_vr(tag), length));
        }

        let code = self.take(2)?;
        let vr = Vr::from_bytes([code[0], code[1]]).ok_or_else(|| DecodeError::MalformedElement {
            tag,
            reason: format!("invalid VR code {:?}", String::from_utf8_lossy(&code)),
        })?;

        if vr.has_long_length() {
            self.take(2)?;
            Ok((vr, self.read_u32()?))
        } else {
            Ok((vr, u32::from(self.read_u16()?)))
        }
    }

    // -------------------------------------------------------------------------
    // Sequences
    // -------------------------------------------------------------------------

    fn read_sequence(&mut self, tag: Tag, length: u32) -> Result<Vec<ElementStream>, DecodeError> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(DecodeError::MalformedElement {
                tag,
                reason: format!("sequences nested deeper than {} levels", MAX_NESTING_DEPTH),
            });
        }

        self.depth += 1;
        let items = if length == UNDEFINED_LENGTH {
            self.read_items_until_delimiter(tag)
        } else {
            self.within(tag, length, |reader| {
                let mut items = Vec::new();
                while !reader.is_at_end() {
                    items.push(reader.read_item(tag)?);
                }
                Ok(items)
            })
        };
        self.depth -= 1;

        items
    }

    fn read_items_until_delimiter(&mut self, tag: Tag) -> Result<Vec<ElementStream>, DecodeError> {
        let mut items = Vec::new();
        loop {
            if self.peek_tag()? == Tag::SEQUENCE_DELIMITATION {
                self.skip_delimiter()?;
                return Ok(items);
            }
            items.push(self.read_item(tag)?);
        }
    }

    fn read_item(&mut self, sequence: Tag) -> Result<ElementStream, DecodeError> {
        let item_tag = self.read_tag()?;
        if item_tag != Tag::ITEM {
            return Err(DecodeError::MalformedElement {
                tag: sequence,
                reason: format!("expected item tag, found {}", item_tag),
            });
        }

        let length = self.read_u32()?;
        if length == UNDEFINED_LENGTH {
            let mut elements = Vec::new();
            loop {
                if self.peek_tag()? == Tag::ITEM_DELIMITATION {
                    self.skip_delimiter()?;
                    return Ok(ElementStream::new(elements));
                }
                elements.push(self.read_element()?);
            }
        }

        self.within(sequence, length, |reader| {
            let mut elements = Vec::new();
            while !reader.is_at_end() {
                elements.push(reader.read_element()?);
            }
            Ok(ElementStream::new(elements))
        })
    }

    // -------------------------------------------------------------------------
    // Encapsulated Pixel Data
    // -------------------------------------------------------------------------

    /// Read the Basic Offset Table item and the fragment items that follow it.
    fn read_fragments(&mut self, tag: Tag) -> Result<PixelDataPayload, DecodeError> {
        if self.read_tag()? != Tag::ITEM {
            return Err(DecodeError::MalformedElement {
                tag,
                reason: "encapsulated pixel data does not start with a basic offset table item"
                    .to_string(),
            });
        }

        let table_len = self.read_u32()?;
        if table_len == UNDEFINED_LENGTH || table_len % 4 != 0 {
            return Err(DecodeError::MalformedElement {
                tag,
                reason: format!(
                    "basic offset table length {:#X} is not a multiple of 4",
                    table_len
                ),
            });
        }

        let order = self.encoding.byte_order;
        let table = self.take(table_len as usize)?;
        let offset_table = table.chunks_exact(4).map(|c| order.read_u32(c)).collect();

        let mut fragments = Vec::new();
        loop {
            let item = self.read_tag()?;
            let length = self.read_u32()?;
            match item {
                Tag::SEQUENCE_DELIMITATION => break,
                Tag::ITEM if length != UNDEFINED_LENGTH => {
                    fragments.push(self.take(length as usize)?);
                }
                Tag::ITEM => {
                    return Err(DecodeError::MalformedElement {
                        tag,
                        reason: "pixel data fragment with undefined length".to_string(),
                    });
                }
                other => {
                    return Err(DecodeError::MalformedElement {
                        tag,
                        reason: format!("unexpected {} among pixel data fragments", other),
                    });
                }
            }
        }

        Ok(PixelDataPayload::Encapsulated {
            offset_table,
            fragments,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
