//! Transfer syntax identification.
//!
//! The transfer syntax UID in the file meta header decides how the rest of
//! the dataset is encoded: byte order, whether VRs are explicit, and whether
//! pixel data is a contiguous buffer or a sequence of codec fragments.

use std::fmt;

use super::parser::ByteOrder;

/// Transfer syntaxes recognised by the decoder.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TransferSyntax {
    /// 1.2.840.10008.1.2
    ImplicitVrLittleEndian,
    /// 1.2.840.10008.1.2.1
    ExplicitVrLittleEndian,
    /// 1.2.840.10008.1.2.2 (retired, still found in archives)
    ExplicitVrBigEndian,
    /// 1.2.840.10008.1.2.1.99
    DeflatedExplicitVrLittleEndian,
    /// 1.2.840.10008.1.2.5
    RleLossless,
    /// 1.2.840.10008.1.2.4.50
    JpegBaseline,
    /// 1.2.840.10008.1.2.4.51
    JpegExtended,
    /// Any other UID. Decoded as explicit VR little endian with
    /// encapsulated pixel data whose codec is not supported.
    Other(String),
}

/// How a frame's bytes are stored inside the pixel-data element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PixelCodec {
    /// Uncompressed contiguous buffer
    Native,
    /// DICOM RLE Lossless fragments
    Rle,
    /// JPEG baseline/extended 8-bit fragments
    Jpeg,
    /// Encapsulated fragments in a codec we cannot decode
    Unsupported(String),
}

/// Element-level encoding rules implied by a transfer syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encoding {
    pub byte_order: ByteOrder,
    pub explicit_vr: bool,
}

impl Encoding {
    /// Encoding of the file meta header, regardless of transfer syntax.
    pub const EXPLICIT_LITTLE_ENDIAN: Encoding = Encoding {
        byte_order: ByteOrder::LittleEndian,
        explicit_vr: true,
    };

    /// Encoding of items nested in an undefined-length UN element.
    pub const IMPLICIT_LITTLE_ENDIAN: Encoding = Encoding {
        byte_order: ByteOrder::LittleEndian,
        explicit_vr: false,
    };
}

impl TransferSyntax {
    /// Identify a transfer syntax from its UID.
    ///
    /// Trailing NUL/space padding (UIDs are padded to even length) is ignored.
    pub fn from_uid(uid: &str) -> Self {
        match uid.trim_end_matches(['\0', ' ']).trim() {
            "1.2.840.10008.1.2" => TransferSyntax::ImplicitVrLittleEndian,
            "1.2.840.10008.1.2.1" => TransferSyntax::ExplicitVrLittleEndian,
            "1.2.840.10008.1.2.2" => TransferSyntax::ExplicitVrBigEndian,
            "1.2.840.10008.1.2.1.99" => TransferSyntax::DeflatedExplicitVrLittleEndian,
            "1.2.840.10008.1.2.5" => TransferSyntax::RleLossless,
            "1.2.840.10008.1.2.4.50" => TransferSyntax::JpegBaseline,
            "1.2.840.10008.1.2.4.51" => TransferSyntax::JpegExtended,
            other => TransferSyntax::Other(other.to_string()),
        }
    }

    /// The UID of this transfer syntax.
    pub fn uid(&self) -> &str {
        match self {
            TransferSyntax::ImplicitVrLittleEndian => "1.2.840.10008.1.2",
            TransferSyntax::ExplicitVrLittleEndian => "1.2.840.10008.1.2.1",
            TransferSyntax::ExplicitVrBigEndian => "1.2.840.10008.1.2.2",
            TransferSyntax::DeflatedExplicitVrLittleEndian => "1.2.840.10008.1.2.1.99",
            TransferSyntax::RleLossless => "1.2.840.10008.1.2.5",
            TransferSyntax::JpegBaseline => "1.2.840.10008.1.2.4.50",
            TransferSyntax::JpegExtended => "1.2.840.10008.1.2.4.51",
            TransferSyntax::Other(uid) => uid,
        }
    }

    /// Element encoding used for the dataset body.
    pub fn encoding(&self) -> Encoding {
        match self {
            TransferSyntax::ImplicitVrLittleEndian => Encoding::IMPLICIT_LITTLE_ENDIAN,
            TransferSyntax::ExplicitVrBigEndian => Encoding {
                byte_order: ByteOrder::BigEndian,
                explicit_vr: true,
            },
            _ => Encoding::EXPLICIT_LITTLE_ENDIAN,
        }
    }

    /// Whether the dataset body is deflate-compressed.
    #[inline]
    pub fn is_deflated(&self) -> bool {
        matches!(self, TransferSyntax::DeflatedExplicitVrLittleEndian)
    }

    /// Whether pixel data is stored as encapsulated fragments.
    pub fn is_encapsulated(&self) -> bool {
        !matches!(
            self,
            TransferSyntax::ImplicitVrLittleEndian
                | TransferSyntax::ExplicitVrLittleEndian
                | TransferSyntax::ExplicitVrBigEndian
                | TransferSyntax::DeflatedExplicitVrLittleEndian
        )
    }

    /// The codec frames are stored in.
    pub fn codec(&self) -> PixelCodec {
        match self {
            TransferSyntax::RleLossless => PixelCodec::Rle,
            TransferSyntax::JpegBaseline | TransferSyntax::JpegExtended => PixelCodec::Jpeg,
            TransferSyntax::Other(uid) => PixelCodec::Unsupported(uid.clone()),
            _ => PixelCodec::Native,
        }
    }
}

impl fmt::Display for TransferSyntax {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.uid())
    }
}
