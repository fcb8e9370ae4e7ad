use thiserror::Error;

use crate::format::dicom::Tag;
use crate::ingest::IngestStep;
use crate::lineage::{ImageId, PatientId};

/// Errors raised by blob store collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The backend could not be reached or rejected the request.
    ///
    /// This is the only error class a caller may reasonably retry.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// No object exists at the requested location
    #[error("Object not found: {0}")]
    NotFound(String),

    /// The key cannot name an object in this store
    #[error("Invalid object key: {0}")]
    InvalidKey(String),
}

/// Errors that can occur when decoding an element stream or its pixel data.
///
/// These are structural: they describe the input object itself and are
/// never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// No preamble/`DICM` marker or no usable file meta header
    #[error("Not a DICOM object: {reason}")]
    NotADicomObject { reason: String },

    /// The buffer ends before a declared length is satisfied
    #[error("Truncated stream: need {needed} bytes at offset {offset}, only {available} available")]
    TruncatedStream {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// An element's declared VR is inconsistent with its length or framing
    #[error("Malformed element {tag}: {reason}")]
    MalformedElement { tag: Tag, reason: String },

    /// An attribute needed to interpret pixel data is absent
    #[error("Missing required attribute {0}")]
    MissingAttribute(Tag),

    /// Pixel data does not match the declared image geometry
    #[error("Pixel geometry mismatch: expected {expected} bytes, got {actual}")]
    GeometryMismatch { expected: usize, actual: usize },

    /// Transfer syntax or fragment codec is not recognised
    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    /// A single frame failed to decode (1-based frame number)
    #[error("Frame {frame} could not be decoded: {message}")]
    CorruptFrame { frame: usize, message: String },
}

/// Errors that can occur when serializing a raster frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// Bit depth / sample layout has no lossless PNG mapping
    #[error("Unsupported pixel format: {bits_allocated} bits allocated, {samples_per_pixel} samples per pixel")]
    UnsupportedPixelFormat {
        bits_allocated: u16,
        samples_per_pixel: u16,
    },

    /// Pixel buffer length does not match width * height * bytes per pixel
    #[error("Invalid pixel data: expected {expected} bytes, got {actual}")]
    InvalidPixelData { expected: usize, actual: usize },

    /// The PNG encoder itself failed
    #[error("PNG encoding failed: {0}")]
    EncodingFailed(String),
}

/// Errors raised by the lineage registry.
///
/// These indicate caller misuse (e.g. a replayed id) and are surfaced as-is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A source image with this id is already registered
    #[error("Duplicate image id: {0}")]
    DuplicateId(ImageId),

    /// A derived image referenced a source that is not registered
    #[error("Unknown source image: {0}")]
    UnknownSource(ImageId),

    /// No source or derived image has this id
    #[error("Image not found: {0}")]
    NotFound(ImageId),

    /// A derived image named a different patient than its source
    #[error("Patient {actual} does not own source image {source_id} (owned by {expected})")]
    PatientMismatch {
        source_id: ImageId,
        expected: PatientId,
        actual: PatientId,
    },
}

/// Errors that can end an ingestion (or one frame of it).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IngestError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The object has no pixel-data element and cannot be converted
    #[error("Object has no pixel data element")]
    MissingPixelData,

    /// The authorization policy refused the request
    #[error("Access denied: {reason}")]
    AccessDenied { reason: String },
}

impl IngestError {
    /// Whether the caller may retry the same request later.
    ///
    /// Only storage outages qualify; everything else describes the input
    /// or the caller and would fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, IngestError::Storage(StorageError::Unavailable(_)))
    }
}

/// Terminal failure of an ingestion: the step that failed and why.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Ingestion failed during {stage}: {cause}")]
pub struct IngestFailure {
    /// Step that failed
    pub stage: IngestStep,

    /// 1-based frame the failure belongs to, for per-frame steps
    pub frame: Option<usize>,

    /// Source record that carries the failure reason, if one was created
    pub source_image_id: Option<ImageId>,

    /// Underlying cause
    pub cause: IngestError,
}

impl IngestFailure {
    pub fn new(stage: IngestStep, source_image_id: Option<ImageId>, cause: IngestError) -> Self {
        Self {
            stage,
            frame: None,
            source_image_id,
            cause,
        }
    }

    pub fn with_frame(mut self, frame: usize) -> Self {
        self.frame = Some(frame);
        self
    }
}
