//! Format decoding for DICOM objects.
//!
//! - [`dicom`] decodes the binary element stream
//! - [`pixel`] turns the pixel-data element into raster frames
//! - [`rle`] implements the RLE Lossless frame codec
//!
//! # Supported Transfer Syntaxes
//!
//! - **Implicit / Explicit VR Little Endian** and **Explicit VR Big Endian**
//!   with native pixel data
//! - **RLE Lossless** with encapsulated fragments
//! - **JPEG Baseline / Extended** (8-bit) with encapsulated fragments

pub mod dicom;
pub mod pixel;
pub mod rle;

pub use dicom::{decode, Element, ElementStream, PixelDataPayload, Tag, TransferSyntax, Value, Vr};
pub use pixel::{FrameSequence, ImageGeometry, PixelFrameExtractor, RasterFrame};
