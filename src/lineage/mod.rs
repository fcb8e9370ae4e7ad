//! Lineage between uploaded objects, their artifacts and their patient.
//!
//! One [`SourceImage`] owns zero or more [`DerivedImage`]s, one per
//! converted frame. Each record has its own [`ImageId`]; derived images
//! reference their source rather than sharing its key.

mod model;
mod registry;

pub use model::{
    DerivedImage, ImageId, ImageRecord, IngestStatus, PatientId, SourceImage,
    StorageLocationPrefix, UserId,
};
pub use registry::LineageRegistry;
