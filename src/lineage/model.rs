//! Lineage records and identifiers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::format::dicom::ElementStream;
use crate::ingest::IngestStep;

// =============================================================================
// Identifiers
// =============================================================================

/// Identifier of a source or derived image.
///
/// Source and derived images draw from the same id space but never share
/// an id: one source yields many derived images, each with its own id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(Uuid);

impl ImageId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ImageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ImageId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

macro_rules! opaque_string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }
    };
}

opaque_string_id!(
    /// Authenticated user who uploaded a source image.
    UserId
);

opaque_string_id!(
    /// Patient an image belongs to. Opaque to this crate.
    PatientId
);

// =============================================================================
// Storage Location Prefix
// =============================================================================

/// Prefix under which source objects and artifacts are stored.
///
/// Object keys are derived from image ids alone, so readers can fetch any
/// artifact knowing only its id:
///
/// ```text
/// {prefix}/{id}.dcm   source object
/// {prefix}/{id}.png   derived raster
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageLocationPrefix(String);

impl StorageLocationPrefix {
    /// Create a prefix; surrounding slashes are ignored.
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self(prefix.trim_matches('/').to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key of the stored source object for `id`.
    pub fn source_key(&self, id: ImageId) -> String {
        self.key(id, "dcm")
    }

    /// Key of the derived raster for `id`.
    pub fn derived_key(&self, id: ImageId) -> String {
        self.key(id, "png")
    }

    fn key(&self, id: ImageId, extension: &str) -> String {
        if self.0.is_empty() {
            format!("{}.{}", id, extension)
        } else {
            format!("{}/{}.{}", self.0, id, extension)
        }
    }
}

impl Default for StorageLocationPrefix {
    fn default() -> Self {
        Self::new("images")
    }
}

impl fmt::Display for StorageLocationPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Records
// =============================================================================

/// Outcome of the ingestion that created a source image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum IngestStatus {
    /// Ingestion still running
    Pending,

    /// Every frame was converted
    Complete,

    /// Frames before `failed_frame` (1-based) were converted; the rest were not attempted
    PartiallyComplete { failed_frame: usize, reason: String },

    /// Ingestion stopped before any artifact could be kept
    Failed {
        stage: IngestStep,
        /// 1-based frame, when a per-frame step failed
        #[serde(skip_serializing_if = "Option::is_none")]
        frame: Option<usize>,
        reason: String,
    },
}

impl IngestStatus {
    #[inline]
    pub fn is_pending(&self) -> bool {
        matches!(self, IngestStatus::Pending)
    }
}

/// An uploaded DICOM object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceImage {
    pub id: ImageId,
    pub uploaded_by: UserId,
    pub patient_id: PatientId,
    pub storage_location: String,

    /// Decoded header, without the pixel-data element. `None` until attached.
    #[serde(skip)]
    pub header_attributes: Option<ElementStream>,

    pub status: IngestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A raster artifact produced from one frame of a source image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DerivedImage {
    pub id: ImageId,
    pub source_image_id: ImageId,
    pub patient_id: PatientId,
    pub storage_location: String,
    pub created_at: DateTime<Utc>,
}

/// Either kind of lineage record.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageRecord {
    Source(SourceImage),
    Derived(DerivedImage),
}

impl ImageRecord {
    pub fn id(&self) -> ImageId {
        match self {
            ImageRecord::Source(source) => source.id,
            ImageRecord::Derived(derived) => derived.id,
        }
    }

    pub fn patient_id(&self) -> &PatientId {
        match self {
            ImageRecord::Source(source) => &source.patient_id,
            ImageRecord::Derived(derived) => &derived.patient_id,
        }
    }

    pub fn storage_location(&self) -> &str {
        match self {
            ImageRecord::Source(source) => &source.storage_location,
            ImageRecord::Derived(derived) => &derived.storage_location,
        }
    }
}
