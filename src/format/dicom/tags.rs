//! DICOM tag and value representation definitions.
//!
//! This module defines the vocabulary for element parsing:
//! - Tags that identify attributes (`(group, element)` pairs)
//! - Value representations (VRs) that determine how values are encoded
//! - A small data dictionary used to recover VRs in implicit-VR streams
//!
//! Only the attributes this system needs to understand are named here.
//! Every other tag is still parsed; it simply decodes as `UN` when the
//! stream does not carry an explicit VR.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

// =============================================================================
// Tag
// =============================================================================

/// A DICOM attribute tag: a `(group, element)` pair.
///
/// Tags are totally ordered by group then element, which is also the order
/// attributes appear in a well-formed dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag {
    /// Group number (e.g. 0x0010 for patient attributes)
    pub group: u16,

    /// Element number within the group
    pub element: u16,
}

impl Tag {
    // -------------------------------------------------------------------------
    // File Meta Information (group 0002)
    // -------------------------------------------------------------------------
    pub const FILE_META_GROUP_LENGTH: Tag = Tag::new(0x0002, 0x0000);
    pub const MEDIA_STORAGE_SOP_CLASS_UID: Tag = Tag::new(0x0002, 0x0002);
    pub const MEDIA_STORAGE_SOP_INSTANCE_UID: Tag = Tag::new(0x0002, 0x0003);
    pub const TRANSFER_SYNTAX_UID: Tag = Tag::new(0x0002, 0x0010);

    // -------------------------------------------------------------------------
    // Identification
    // -------------------------------------------------------------------------
    pub const SPECIFIC_CHARACTER_SET: Tag = Tag::new(0x0008, 0x0005);
    pub const SOP_CLASS_UID: Tag = Tag::new(0x0008, 0x0016);
    pub const SOP_INSTANCE_UID: Tag = Tag::new(0x0008, 0x0018);
    pub const STUDY_DATE: Tag = Tag::new(0x0008, 0x0020);
    pub const SERIES_DATE: Tag = Tag::new(0x0008, 0x0021);
    pub const STUDY_TIME: Tag = Tag::new(0x0008, 0x0030);
    pub const ACCESSION_NUMBER: Tag = Tag::new(0x0008, 0x0050);
    pub const MODALITY: Tag = Tag::new(0x0008, 0x0060);
    pub const MANUFACTURER: Tag = Tag::new(0x0008, 0x0070);
    pub const STUDY_DESCRIPTION: Tag = Tag::new(0x0008, 0x1030);
    pub const SERIES_DESCRIPTION: Tag = Tag::new(0x0008, 0x103E);

    // -------------------------------------------------------------------------
    // Patient
    // -------------------------------------------------------------------------
    pub const PATIENT_NAME: Tag = Tag::new(0x0010, 0x0010);
    pub const PATIENT_ID: Tag = Tag::new(0x0010, 0x0020);
    pub const PATIENT_BIRTH_DATE: Tag = Tag::new(0x0010, 0x0030);
    pub const PATIENT_SEX: Tag = Tag::new(0x0010, 0x0040);

    // -------------------------------------------------------------------------
    // Study / Series / Instance
    // -------------------------------------------------------------------------
    pub const STUDY_INSTANCE_UID: Tag = Tag::new(0x0020, 0x000D);
    pub const SERIES_INSTANCE_UID: Tag = Tag::new(0x0020, 0x000E);
    pub const STUDY_ID: Tag = Tag::new(0x0020, 0x0010);
    pub const SERIES_NUMBER: Tag = Tag::new(0x0020, 0x0011);
    pub const INSTANCE_NUMBER: Tag = Tag::new(0x0020, 0x0013);

    // -------------------------------------------------------------------------
    // Image Pixel Module
    // -------------------------------------------------------------------------
    pub const SAMPLES_PER_PIXEL: Tag = Tag::new(0x0028, 0x0002);
    pub const PHOTOMETRIC_INTERPRETATION: Tag = Tag::new(0x0028, 0x0004);
    pub const PLANAR_CONFIGURATION: Tag = Tag::new(0x0028, 0x0006);
    pub const NUMBER_OF_FRAMES: Tag = Tag::new(0x0028, 0x0008);
    pub const ROWS: Tag = Tag::new(0x0028, 0x0010);
    pub const COLUMNS: Tag = Tag::new(0x0028, 0x0011);
    pub const BITS_ALLOCATED: Tag = Tag::new(0x0028, 0x0100);
    pub const BITS_STORED: Tag = Tag::new(0x0028, 0x0101);
    pub const HIGH_BIT: Tag = Tag::new(0x0028, 0x0102);
    pub const PIXEL_REPRESENTATION: Tag = Tag::new(0x0028, 0x0103);
    pub const WINDOW_CENTER: Tag = Tag::new(0x0028, 0x1050);
    pub const WINDOW_WIDTH: Tag = Tag::new(0x0028, 0x1051);
    pub const RESCALE_INTERCEPT: Tag = Tag::new(0x0028, 0x1052);
    pub const RESCALE_SLOPE: Tag = Tag::new(0x0028, 0x1053);

    /// The single element carrying image payload.
    pub const PIXEL_DATA: Tag = Tag::new(0x7FE0, 0x0010);

    // -------------------------------------------------------------------------
    // Delimitation items (group FFFE, never carry a VR)
    // -------------------------------------------------------------------------
    pub const ITEM: Tag = Tag::new(0xFFFE, 0xE000);
    pub const ITEM_DELIMITATION: Tag = Tag::new(0xFFFE, 0xE00D);
    pub const SEQUENCE_DELIMITATION: Tag = Tag::new(0xFFFE, 0xE0DD);

    /// Create a tag from its group and element numbers.
    #[inline]
    pub const fn new(group: u16, element: u16) -> Self {
        Self { group, element }
    }

    /// Whether this tag belongs to the file meta information group.
    #[inline]
    pub const fn is_file_meta(self) -> bool {
        self.group == 0x0002
    }

    /// Whether this is an item or delimitation tag (group FFFE).
    #[inline]
    pub const fn is_delimiter(self) -> bool {
        self.group == 0xFFFE
    }

    /// Whether this is a group length element `(gggg,0000)`.
    #[inline]
    pub const fn is_group_length(self) -> bool {
        self.element == 0x0000
    }

    /// Whether this tag lives in a private (odd-numbered) group.
    #[inline]
    pub const fn is_private(self) -> bool {
        self.group % 2 == 1
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:04X},{:04X})", self.group, self.element)
    }
}

/// Error returned when a tag string is not of the form `(gggg,eeee)`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid tag '{0}': expected \"(gggg,eeee)\" with hexadecimal group and element")]
pub struct TagParseError(pub String);

impl FromStr for Tag {
    type Err = TagParseError;

    /// Parse `(gggg,eeee)`, `gggg,eeee` or `ggggeeee` (hex, case-insensitive).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || TagParseError(s.to_string());
        let trimmed = s.trim();
        let inner = trimmed
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
            .unwrap_or(trimmed);

        let (group, element) = match inner.split_once(',') {
            Some((g, e)) => (g.trim(), e.trim()),
            None if inner.len() == 8 => inner.split_at(4),
            None => return Err(err()),
        };

        if group.len() != 4 || element.len() != 4 {
            return Err(err());
        }

        let group = u16::from_str_radix(group, 16).map_err(|_| err())?;
        let element = u16::from_str_radix(element, 16).map_err(|_| err())?;
        Ok(Tag::new(group, element))
    }
}

impl Serialize for Tag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Tag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Value Representation
// =============================================================================

/// DICOM value representations.
///
/// The VR determines the encoding of an element's value and, in explicit-VR
/// transfer syntaxes, the width of the length field that precedes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vr {
    AE,
    AS,
    AT,
    CS,
    DA,
    DS,
    DT,
    FD,
    FL,
    IS,
    LO,
    LT,
    OB,
    OD,
    OF,
    OL,
    OV,
    OW,
    PN,
    SH,
    SL,
    SQ,
    SS,
    ST,
    SV,
    TM,
    UC,
    UI,
    UL,
    UN,
    UR,
    US,
    UT,
    UV,
}

impl Vr {
    /// Create a VR from its two-character code.
    ///
    /// Returns `None` for codes that are not part of the standard.
    pub fn from_bytes(code: [u8; 2]) -> Option<Self> {
        let vr = match &code {
            b"AE" => Vr::AE,
            b"AS" => Vr::AS,
            b"AT" => Vr::AT,
            b"CS" => Vr::CS,
            b"DA" => Vr::DA,
            b"DS" => Vr::DS,
            b"DT" => Vr::DT,
            b"FD" => Vr::FD,
            b"FL" => Vr::FL,
            b"IS" => Vr::IS,
            b"LO" => Vr::LO,
            b"LT" => Vr::LT,
            b"OB" => Vr::OB,
            b"OD" => Vr::OD,
            b"OF" => Vr::OF,
            b"OL" => Vr::OL,
            b"OV" => Vr::OV,
            b"OW" => Vr::OW,
            b"PN" => Vr::PN,
            b"SH" => Vr::SH,
            b"SL" => Vr::SL,
            b"SQ" => Vr::SQ,
            b"SS" => Vr::SS,
            b"ST" => Vr::ST,
            b"SV" => Vr::SV,
            b"TM" => Vr::TM,
            b"UC" => Vr::UC,
            b"UI" => Vr::UI,
            b"UL" => Vr::UL,
            b"UN" => Vr::UN,
            b"UR" => Vr::UR,
            b"US" => Vr::US,
            b"UT" => Vr::UT,
            b"UV" => Vr::UV,
            _ => return None,
        };
        Some(vr)
    }

    /// The two-character code of this VR.
    pub const fn as_str(self) -> &'static str {
        match self {
            Vr::AE => "AE",
            Vr::AS => "AS",
            Vr::AT => "AT",
            Vr::CS => "CS",
            Vr::DA => "DA",
            Vr::DS => "DS",
            Vr::DT => "DT",
            Vr::FD => "FD",
            Vr::FL => "FL",
            Vr::IS => "IS",
            Vr::LO => "LO",
            Vr::LT => "LT",
            Vr::OB => "OB",
            Vr::OD => "OD",
            Vr::OF => "OF",
            Vr::OL => "OL",
            Vr::OV => "OV",
            Vr::OW => "OW",
            Vr::PN => "PN",
            Vr::SH => "SH",
            Vr::SL => "SL",
            Vr::SQ => "SQ",
            Vr::SS => "SS",
            Vr::ST => "ST",
            Vr::SV => "SV",
            Vr::TM => "TM",
            Vr::UC => "UC",
            Vr::UI => "UI",
            Vr::UL => "UL",
            Vr::UN => "UN",
            Vr::UR => "UR",
            Vr::US => "US",
            Vr::UT => "UT",
            Vr::UV => "UV",
        }
    }

    /// Whether explicit-VR encoding uses 2 reserved bytes and a 4-byte length.
    ///
    /// All other VRs use a 2-byte length field directly after the VR code.
    #[inline]
    pub const fn has_long_length(self) -> bool {
        matches!(
            self,
            Vr::OB
                | Vr::OD
                | Vr::OF
                | Vr::OL
                | Vr::OV
                | Vr::OW
                | Vr::SQ
                | Vr::SV
                | Vr::UC
                | Vr::UN
                | Vr::UR
                | Vr::UT
                | Vr::UV
        )
    }

    /// Whether an element of this VR may declare an undefined length.
    #[inline]
    pub const fn allows_undefined_length(self) -> bool {
        matches!(self, Vr::SQ | Vr::UN | Vr::OB | Vr::OW)
    }

    /// Width in bytes of a single binary value, for fixed-width VRs.
    ///
    /// A declared length that is not a multiple of this width is malformed.
    pub const fn value_width(self) -> Option<usize> {
        match self {
            Vr::SS | Vr::US | Vr::OW => Some(2),
            Vr::AT | Vr::FL | Vr::SL | Vr::UL | Vr::OF | Vr::OL => Some(4),
            Vr::FD | Vr::SV | Vr::UV | Vr::OD | Vr::OV => Some(8),
            _ => None,
        }
    }

    /// Whether values of this VR are character strings.
    #[inline]
    pub const fn is_text(self) -> bool {
        matches!(
            self,
            Vr::AE
                | Vr::AS
                | Vr::CS
                | Vr::DA
                | Vr::DS
                | Vr::DT
                | Vr::IS
                | Vr::LO
                | Vr::LT
                | Vr::PN
                | Vr::SH
                | Vr::ST
                | Vr::TM
                | Vr::UC
                | Vr::UI
                | Vr::UR
                | Vr::UT
        )
    }

    /// Whether multiple values are separated by backslashes.
    ///
    /// LT, ST, UT and UR are single-valued free text and keep backslashes.
    #[inline]
    pub const fn is_multi_valued_text(self) -> bool {
        self.is_text() && !matches!(self, Vr::LT | Vr::ST | Vr::UT | Vr::UR)
    }
}

impl fmt::Display for Vr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Vr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

// =============================================================================
// Implicit VR Dictionary
// =============================================================================

/// Look up the VR of a tag for implicit-VR streams.
///
/// Group length elements are always UL. Tags outside the dictionary decode
/// as UN, which keeps their raw bytes without interpretation.
pub fn implicit_vr(tag: Tag) -> Vr {
    if tag.is_group_length() {
        return Vr::UL;
    }

    match (tag.group, tag.element) {
        (0x0002, 0x0001) => Vr::OB,
        (0x0002, 0x0002) | (0x0002, 0x0003) | (0x0002, 0x0010) | (0x0002, 0x0012) => Vr::UI,
        (0x0002, 0x0013) => Vr::SH,
        (0x0008, 0x0005) => Vr::CS,
        (0x0008, 0x0008) => Vr::CS,
        (0x0008, 0x0016) | (0x0008, 0x0018) => Vr::UI,
        (0x0008, 0x0020) | (0x0008, 0x0021) | (0x0008, 0x0022) | (0x0008, 0x0023) => Vr::DA,
        (0x0008, 0x0030) | (0x0008, 0x0031) | (0x0008, 0x0032) | (0x0008, 0x0033) => Vr::TM,
        (0x0008, 0x0050) => Vr::SH,
        (0x0008, 0x0060) => Vr::CS,
        (0x0008, 0x0070) | (0x0008, 0x0080) => Vr::LO,
        (0x0008, 0x0090) => Vr::PN,
        (0x0008, 0x1030) | (0x0008, 0x103E) => Vr::LO,
        (0x0008, 0x1140) => Vr::SQ,
        (0x0008, 0x1150) | (0x0008, 0x1155) => Vr::UI,
        (0x0010, 0x0010) => Vr::PN,
        (0x0010, 0x0020) => Vr::LO,
        (0x0010, 0x0030) => Vr::DA,
        (0x0010, 0x0040) => Vr::CS,
        (0x0010, 0x1010) => Vr::AS,
        (0x0018, 0x0050) => Vr::DS,
        (0x0018, 0x0015) => Vr::CS,
        (0x0020, 0x000D) | (0x0020, 0x000E) => Vr::UI,
        (0x0020, 0x0010) => Vr::SH,
        (0x0020, 0x0011) | (0x0020, 0x0012) | (0x0020, 0x0013) => Vr::IS,
        (0x0020, 0x0032) | (0x0020, 0x0037) => Vr::DS,
        (0x0028, 0x0002) => Vr::US,
        (0x0028, 0x0004) => Vr::CS,
        (0x0028, 0x0006) => Vr::US,
        (0x0028, 0x0008) => Vr::IS,
        (0x0028, 0x0010) | (0x0028, 0x0011) => Vr::US,
        (0x0028, 0x0030) => Vr::DS,
        (0x0028, 0x0100) | (0x0028, 0x0101) | (0x0028, 0x0102) | (0x0028, 0x0103) => Vr::US,
        (0x0028, 0x1050) | (0x0028, 0x1051) | (0x0028, 0x1052) | (0x0028, 0x1053) => Vr::DS,
        (0x7FE0, 0x0010) => Vr::OW,
        _ => Vr::UN,
    }
}

/// Human-readable keyword for well-known tags, used in log output.
pub fn keyword(tag: Tag) -> Option<&'static str> {
    let name = match tag {
        Tag::TRANSFER_SYNTAX_UID => "TransferSyntaxUID",
        Tag::SOP_CLASS_UID => "SOPClassUID",
        Tag::SOP_INSTANCE_UID => "SOPInstanceUID",
        Tag::STUDY_DATE => "StudyDate",
        Tag::MODALITY => "Modality",
        Tag::PATIENT_NAME => "PatientName",
        Tag::PATIENT_ID => "PatientID",
        Tag::STUDY_INSTANCE_UID => "StudyInstanceUID",
        Tag::SERIES_INSTANCE_UID => "SeriesInstanceUID",
        Tag::SAMPLES_PER_PIXEL => "SamplesPerPixel",
        Tag::PHOTOMETRIC_INTERPRETATION => "PhotometricInterpretation",
        Tag::PLANAR_CONFIGURATION => "PlanarConfiguration",
        Tag::NUMBER_OF_FRAMES => "NumberOfFrames",
        Tag::ROWS => "Rows",
        Tag::COLUMNS => "Columns",
        Tag::BITS_ALLOCATED => "BitsAllocated",
        Tag::BITS_STORED => "BitsStored",
        Tag::PIXEL_REPRESENTATION => "PixelRepresentation",
        Tag::PIXEL_DATA => "PixelData",
        _ => return None,
    };
    Some(name)
}

// =============================================================================
// Tests
// =============================================================================
