//! Decoded element values and the element stream.
//!
//! An [`Element`] keeps both its raw value bytes, exactly as they appeared in
//! the stream, and a decoded [`Value`]. Elements are immutable once parsed.
//!
//! An [`ElementStream`] is the ordered sequence of elements of one object.
//! Stream order is preserved for display; lookups treat the first
//! occurrence of a tag as authoritative.

use bytes::Bytes;

use super::parser::ByteOrder;
use super::tags::{Tag, Vr};
use super::transfer_syntax::TransferSyntax;

// =============================================================================
// Pixel Data Payload
// =============================================================================

/// The image payload carried by the pixel-data element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PixelDataPayload {
    /// One contiguous buffer holding every frame back to back
    Native(Bytes),

    /// Codec fragments with explicit framing
    Encapsulated {
        /// Basic Offset Table: byte offset of each frame's first fragment,
        /// measured from the first fragment item. Empty when absent.
        offset_table: Vec<u32>,

        /// Fragment payloads in stream order
        fragments: Vec<Bytes>,
    },
}

impl PixelDataPayload {
    /// Total number of payload bytes (fragments summed for encapsulated data).
    pub fn len(&self) -> usize {
        match self {
            PixelDataPayload::Native(bytes) => bytes.len(),
            PixelDataPayload::Encapsulated { fragments, .. } => {
                fragments.iter().map(Bytes::len).sum()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_encapsulated(&self) -> bool {
        matches!(self, PixelDataPayload::Encapsulated { .. })
    }
}

// =============================================================================
// Value
// =============================================================================

/// A decoded element value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Zero-length value
    Empty,
    /// Character string values, padding trimmed, split on backslash
    Strings(Vec<String>),
    U16(Vec<u16>),
    I16(Vec<i16>),
    U32(Vec<u32>),
    I32(Vec<i32>),
    U64(Vec<u64>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    /// Attribute tag values (AT)
    Tags(Vec<Tag>),
    /// Opaque binary values (OB, OW, UN, ...)
    Bytes(Bytes),
    /// Sequence items, each a nested element stream
    Sequence(Vec<ElementStream>),
    /// The pixel-data payload
    PixelData(PixelDataPayload),
}

impl Value {
    /// Decode a non-sequence, non-pixel value from its raw bytes.
    ///
    /// The caller guarantees that the length of `raw` is a multiple of the
    /// VR's value width.
    pub fn decode(vr: Vr, raw: &Bytes, byte_order: ByteOrder) -> Value {
        if raw.is_empty() {
            return Value::Empty;
        }

        if vr.is_text() {
            return Value::Strings(decode_strings(vr, raw));
        }

        match vr {
            Vr::US => Value::U16(raw.chunks_exact(2).map(|c| byte_order.read_u16(c)).collect()),
            Vr::SS => Value::I16(
                raw.chunks_exact(2)
                    .map(|c| byte_order.read_u16(c) as i16)
                    .collect(),
            ),
            Vr::UL => Value::U32(raw.chunks_exact(4).map(|c| byte_order.read_u32(c)).collect()),
            Vr::SL => Value::I32(
                raw.chunks_exact(4)
                    .map(|c| byte_order.read_u32(c) as i32)
                    .collect(),
            ),
            Vr::UV => Value::U64(raw.chunks_exact(8).map(|c| byte_order.read_u64(c)).collect()),
            Vr::SV => Value::I64(
                raw.chunks_exact(8)
                    .map(|c| byte_order.read_u64(c) as i64)
                    .collect(),
            ),
            Vr::FL => Value::F32(
                raw.chunks_exact(4)
                    .map(|c| f32::from_bits(byte_order.read_u32(c)))
                    .collect(),
            ),
            Vr::FD => Value::F64(
                raw.chunks_exact(8)
                    .map(|c| f64::from_bits(byte_order.read_u64(c)))
                    .collect(),
            ),
            Vr::AT => Value::Tags(
                raw.chunks_exact(4)
                    .map(|c| Tag::new(byte_order.read_u16(&c[0..2]), byte_order.read_u16(&c[2..4])))
                    .collect(),
            ),
            _ => Value::Bytes(raw.clone()),
        }
    }

    /// String values, if this is a text value.
    pub fn strings(&self) -> Option<&[String]> {
        match self {
            Value::Strings(values) => Some(values),
            _ => None,
        }
    }

    /// The first string value, if any.
    pub fn first_string(&self) -> Option<&str> {
        self.strings()
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// The first value interpreted as an unsigned integer.
    ///
    /// Works for binary integer VRs and for integer strings (IS).
    pub fn to_u32(&self) -> Option<u32> {
        match self {
            Value::U16(v) => v.first().map(|&x| x as u32),
            Value::U32(v) => v.first().copied(),
            Value::I16(v) => v.first().and_then(|&x| u32::try_from(x).ok()),
            Value::I32(v) => v.first().and_then(|&x| u32::try_from(x).ok()),
            Value::Strings(v) => v.first().and_then(|s| s.trim().parse().ok()),
            _ => None,
        }
    }

    /// Number of values held (items for sequences, 1 for opaque payloads).
    pub fn multiplicity(&self) -> usize {
        match self {
            Value::Empty => 0,
            Value::Strings(v) => v.len(),
            Value::U16(v) => v.len(),
            Value::I16(v) => v.len(),
            Value::U32(v) => v.len(),
            Value::I32(v) => v.len(),
            Value::U64(v) => v.len(),
            Value::I64(v) => v.len(),
            Value::F32(v) => v.len(),
            Value::F64(v) => v.len(),
            Value::Tags(v) => v.len(),
            Value::Sequence(items) => items.len(),
            Value::Bytes(_) | Value::PixelData(_) => 1,
        }
    }
}

fn decode_strings(vr: Vr, raw: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(raw);
    let pad: &[char] = &['\0', ' '];

    if vr.is_multi_valued_text() {
        text.split('\\')
            .map(|part| part.trim_matches(pad).to_string())
            .collect()
    } else {
        // Free text keeps leading spaces
        vec![text.trim_end_matches(pad).to_string()]
    }
}

// =============================================================================
// Element
// =============================================================================

/// One tagged element of an element stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    tag: Tag,
    vr: Vr,
    raw_value: Bytes,
    value: Value,
}

impl Element {
    pub(crate) fn new(tag: Tag, vr: Vr, raw_value: Bytes, value: Value) -> Self {
        Self {
            tag,
            vr,
            raw_value,
            value,
        }
    }

    #[inline]
    pub fn tag(&self) -> Tag {
        self.tag
    }

    #[inline]
    pub fn vr(&self) -> Vr {
        self.vr
    }

    /// Value bytes exactly as they appeared in the stream.
    #[inline]
    pub fn raw_value(&self) -> &Bytes {
        &self.raw_value
    }

    #[inline]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// The pixel payload, if this is the pixel-data element.
    pub fn pixel_data(&self) -> Option<&PixelDataPayload> {
        match &self.value {
            Value::PixelData(payload) => Some(payload),
            _ => None,
        }
    }
}

// =============================================================================
// Element Stream
// =============================================================================

/// Ordered sequence of elements, in stream order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementStream {
    elements: Vec<Element>,
}

impl ElementStream {
    pub fn new(elements: Vec<Element>) -> Self {
        Self { elements }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Element> {
        self.elements.iter()
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// First occurrence of `tag`, which is authoritative for lookups.
    pub fn first(&self, tag: Tag) -> Option<&Element> {
        self.elements.iter().find(|e| e.tag == tag)
    }

    /// The pixel-data element, if present.
    pub fn pixel_data(&self) -> Option<&Element> {
        self.first(Tag::PIXEL_DATA)
    }

    /// First string value of `tag`.
    pub fn string(&self, tag: Tag) -> Option<&str> {
        self.first(tag).and_then(|e| e.value.first_string())
    }

    /// First value of `tag` as an unsigned integer.
    pub fn u32(&self, tag: Tag) -> Option<u32> {
        self.first(tag).and_then(|e| e.value.to_u32())
    }

    /// Transfer syntax declared in the file meta header.
    pub fn transfer_syntax(&self) -> Option<TransferSyntax> {
        self.string(Tag::TRANSFER_SYNTAX_UID)
            .map(TransferSyntax::from_uid)
    }

    /// Copy of this stream without the pixel-data element.
    ///
    /// Header attributes recorded in the lineage registry never carry
    /// image bytes; those live in the blob store.
    pub fn without_pixel_data(&self) -> ElementStream {
        self.elements
            .iter()
            .filter(|e| e.tag != Tag::PIXEL_DATA)
            .cloned()
            .collect()
    }
}

impl FromIterator<Element> for ElementStream {
    fn from_iter<I: IntoIterator<Item = Element>>(iter: I) -> Self {
        Self {
            elements: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for ElementStream {
    type Item = Element;
    type IntoIter = std::vec::IntoIter<Element>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.into_iter()
    }
}

impl<'a> IntoIterator for &'a ElementStream {
    type Item = &'a Element;
    type IntoIter = std::slice::Iter<'a, Element>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.iter()
    }
}

// =============================================================================
// Tests
// =============================================================================
