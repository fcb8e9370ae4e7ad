//! DICOM element stream parsing.
//!
//! - [`parser`] walks the binary buffer and produces an [`ElementStream`]
//! - [`tags`] defines [`Tag`], [`Vr`] and the implicit-VR dictionary
//! - [`values`] holds the decoded element model
//! - [`transfer_syntax`] maps transfer syntax UIDs to encoding rules

mod parser;
mod tags;
mod transfer_syntax;
mod values;

pub use parser::{decode, ByteOrder, DATASET_START, MAGIC, PREAMBLE_LEN, UNDEFINED_LENGTH};
pub use tags::{implicit_vr, keyword, Tag, TagParseError, Vr};
pub use transfer_syntax::{Encoding, PixelCodec, TransferSyntax};
pub use values::{Element, ElementStream, PixelDataPayload, Value};
