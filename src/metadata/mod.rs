//! Metadata index and filtered retrieval.
//!
//! The index maps each tag to its first occurrence in a decoded stream.
//! Later duplicates stay in the stream (and in unfiltered output) but are
//! never returned by a lookup or a filtered query.
//!
//! # Query Semantics
//!
//! - A non-empty tag set returns the authoritative element of each
//!   requested tag, in original stream order. Absent tags contribute
//!   nothing.
//! - An empty tag set means "no filtering" and returns the whole stream.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Serialize, Serializer};
use serde_json::{json, Value as JsonValue};

use crate::format::dicom::{keyword, Element, ElementStream, PixelDataPayload, Tag, TagParseError, Value, Vr};

/// Set of requested tags.
pub type TagSet = BTreeSet<Tag>;

/// Binary values up to this size are rendered as hex in metadata documents.
const MAX_INLINE_BINARY: usize = 64;

// =============================================================================
// Metadata Index
// =============================================================================

/// Tag to element mapping over a borrowed stream.
#[derive(Debug, Clone)]
pub struct MetadataIndex<'a> {
    stream: &'a ElementStream,
    positions: BTreeMap<Tag, usize>,
}

impl<'a> MetadataIndex<'a> {
    /// Index `stream`, keeping the first occurrence of each tag.
    pub fn new(stream: &'a ElementStream) -> Self {
        let mut positions = BTreeMap::new();
        for (position, element) in stream.iter().enumerate() {
            positions.entry(element.tag()).or_insert(position);
        }
        Self { stream, positions }
    }

    /// Authoritative element for `tag`.
    pub fn get(&self, tag: Tag) -> Option<&'a Element> {
        self.positions
            .get(&tag)
            .map(|&position| &self.stream.elements()[position])
    }

    pub fn contains(&self, tag: Tag) -> bool {
        self.positions.contains_key(&tag)
    }

    /// Number of distinct tags.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Distinct tags in ascending order.
    pub fn tags(&self) -> impl Iterator<Item = Tag> + '_ {
        self.positions.keys().copied()
    }

    /// Elements for the requested tags, in stream order.
    ///
    /// An empty request returns the entire stream unfiltered.
    pub fn filter(&self, requested: &TagSet) -> ElementStream {
        if requested.is_empty() {
            return self.stream.clone();
        }

        let mut positions: Vec<usize> = requested
            .iter()
            .filter_map(|tag| self.positions.get(tag).copied())
            .collect();
        positions.sort_unstable();

        positions
            .into_iter()
            .map(|position| self.stream.elements()[position].clone())
            .collect()
    }
}

/// Parse a tag list such as `(0010,0010),(0008,0020)`.
///
/// Tags may also be written `00100010`; separators are commas and whitespace.
pub fn parse_tag_list(input: &str) -> Result<TagSet, TagParseError> {
    let mut tags = TagSet::new();
    let mut rest = input.trim();

    while !rest.is_empty() {
        let (token, tail) = if rest.starts_with('(') {
            match rest.find(')') {
                Some(end) => rest.split_at(end + 1),
                None => return Err(TagParseError(rest.to_string())),
            }
        } else {
            let end = rest
                .find(|c: char| c == ',' || c.is_whitespace())
                .unwrap_or(rest.len());
            rest.split_at(end)
        };

        tags.insert(token.parse()?);
        rest = tail.trim_start_matches(|c: char| c == ',' || c.is_whitespace());
    }

    Ok(tags)
}

// =============================================================================
// Metadata Document
// =============================================================================

/// One record of a metadata document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetadataRecord {
    pub tag: Tag,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword: Option<&'static str>,
    #[serde(rename = "valueRepresentation")]
    pub vr: Vr,
    pub length: usize,
    pub value: JsonValue,
}

impl MetadataRecord {
    pub fn from_element(element: &Element) -> Self {
        Self {
            tag: element.tag(),
            keyword: keyword(element.tag()),
            vr: element.vr(),
            length: element.raw_value().len(),
            value: value_to_json(element.value()),
        }
    }
}

/// Ordered metadata document for a stream.
pub fn document(stream: &ElementStream) -> Vec<MetadataRecord> {
    stream.iter().map(MetadataRecord::from_element).collect()
}

impl Serialize for ElementStream {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter().map(MetadataRecord::from_element))
    }
}

fn value_to_json(value: &Value) -> JsonValue {
    match value {
        Value::Empty => JsonValue::Null,
        Value::Strings(v) => json!(v),
        Value::U16(v) => json!(v),
        Value::I16(v) => json!(v),
        Value::U32(v) => json!(v),
        Value::I32(v) => json!(v),
        Value::U64(v) => json!(v),
        Value::I64(v) => json!(v),
        Value::F32(v) => json!(v),
        Value::F64(v) => json!(v),
        Value::Tags(v) => json!(v.iter().map(Tag::to_string).collect::<Vec<_>>()),
        Value::Bytes(bytes) if bytes.len() <= MAX_INLINE_BINARY => json!(hex::encode(bytes)),
        Value::Bytes(_) => JsonValue::Null,
        Value::Sequence(items) => json!(items),
        Value::PixelData(payload) => {
            let fragments = match payload {
                PixelDataPayload::Native(_) => 0,
                PixelDataPayload::Encapsulated { fragments, .. } => fragments.len(),
            };
            json!({
                "encapsulated": payload.is_encapsulated(),
                "fragments": fragments,
                "length": payload.len(),
            })
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
