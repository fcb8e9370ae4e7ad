//! Lineage registry.
//!
//! The registry exclusively owns the [`SourceImage`] and [`DerivedImage`]
//! records it creates. It holds storage locations, never image bytes.
//!
//! # Concurrency
//!
//! All state lives behind one `RwLock`, so every mutating call is atomic
//! with respect to the others. Derived ids are assigned while the write lock
//! is held, which keeps them unique when several ingestions (or several
//! frames of one ingestion) register concurrently.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::RegistryError;
use crate::format::dicom::ElementStream;

use super::model::{
    DerivedImage, ImageId, ImageRecord, IngestStatus, PatientId, SourceImage,
    StorageLocationPrefix, UserId,
};

#[derive(Default)]
struct RegistryState {
    sources: HashMap<ImageId, SourceImage>,
    derived: HashMap<ImageId, DerivedImage>,
    /// Derived ids per source, in creation order
    by_source: HashMap<ImageId, Vec<ImageId>>,
}

impl RegistryState {
    fn contains(&self, id: &ImageId) -> bool {
        self.sources.contains_key(id) || self.derived.contains_key(id)
    }
}

/// In-process store of lineage records.
#[derive(Default)]
pub struct LineageRegistry {
    state: RwLock<RegistryState>,
}

impl LineageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly uploaded source image with a `Pending` status.
    ///
    /// # Errors
    /// `DuplicateId` if any record already uses `id`.
    pub async fn register_source(
        &self,
        id: ImageId,
        uploaded_by: UserId,
        patient_id: PatientId,
        storage_location: impl Into<String>,
    ) -> Result<SourceImage, RegistryError> {
        let mut state = self.state.write().await;
        if state.contains(&id) {
            return Err(RegistryError::DuplicateId(id));
        }

        let now = Utc::now();
        let source = SourceImage {
            id,
            uploaded_by,
            patient_id,
            storage_location: storage_location.into(),
            header_attributes: None,
            status: IngestStatus::Pending,
            created_at: now,
            updated_at: now,
        };

        state.sources.insert(id, source.clone());
        state.by_source.insert(id, Vec::new());
        debug!(source_image_id = %id, "Registered source image");

        Ok(source)
    }

    /// Attach the decoded header to a source image.
    ///
    /// Re-attaching an identical stream leaves the record untouched.
    ///
    /// # Errors
    /// `NotFound` if no source image has this id.
    pub async fn attach_header_attributes(
        &self,
        id: ImageId,
        stream: ElementStream,
    ) -> Result<SourceImage, RegistryError> {
        let mut state = self.state.write().await;
        let source = state
            .sources
            .get_mut(&id)
            .ok_or(RegistryError::NotFound(id))?;

        if source.header_attributes.as_ref() != Some(&stream) {
            source.header_attributes = Some(stream);
            source.updated_at = Utc::now();
        }

        Ok(source.clone())
    }

    /// Register a derived image with a freshly assigned id.
    ///
    /// The storage location is derived from the new id under `prefix`.
    ///
    /// # Errors
    /// - `UnknownSource` if `source_id` is not a registered source image
    /// - `PatientMismatch` if `patient_id` does not own the source
    pub async fn register_derived(
        &self,
        source_id: ImageId,
        patient_id: PatientId,
        prefix: &StorageLocationPrefix,
    ) -> Result<DerivedImage, RegistryError> {
        let mut state = self.state.write().await;
        let source = state
            .sources
            .get(&source_id)
            .ok_or(RegistryError::UnknownSource(source_id))?;

        if source.patient_id != patient_id {
            return Err(RegistryError::PatientMismatch {
                source_id,
                expected: source.patient_id.clone(),
                actual: patient_id,
            });
        }

        let id = loop {
            let candidate = ImageId::new();
            if !state.contains(&candidate) {
                break candidate;
            }
        };

        let derived = DerivedImage {
            id,
            source_image_id: source_id,
            patient_id,
            storage_location: prefix.derived_key(id),
            created_at: Utc::now(),
        };

        state.derived.insert(id, derived.clone());
        state.by_source.entry(source_id).or_default().push(id);
        debug!(source_image_id = %source_id, derived_image_id = %id, "Registered derived image");

        Ok(derived)
    }

    /// Remove a derived image whose bytes could not be persisted.
    ///
    /// # Errors
    /// `NotFound` if no derived image has this id.
    pub async fn retract_derived(&self, id: ImageId) -> Result<DerivedImage, RegistryError> {
        let mut state = self.state.write().await;
        let derived = state
            .derived
            .remove(&id)
            .ok_or(RegistryError::NotFound(id))?;

        if let Some(ids) = state.by_source.get_mut(&derived.source_image_id) {
            ids.retain(|d| *d != id);
        }
        debug!(derived_image_id = %id, "Retracted derived image");

        Ok(derived)
    }

    /// Record the final status of the ingestion that created `id`.
    ///
    /// # Errors
    /// `NotFound` if no source image has this id.
    pub async fn record_outcome(
        &self,
        id: ImageId,
        status: IngestStatus,
    ) -> Result<SourceImage, RegistryError> {
        let mut state = self.state.write().await;
        let source = state
            .sources
            .get_mut(&id)
            .ok_or(RegistryError::NotFound(id))?;

        source.status = status;
        source.updated_at = Utc::now();
        Ok(source.clone())
    }

    /// Resolve a source or derived image id to its owning patient.
    ///
    /// # Errors
    /// `NotFound` if neither kind of record has this id.
    pub async fn lookup_patient_for(&self, id: ImageId) -> Result<PatientId, RegistryError> {
        let state = self.state.read().await;
        if let Some(source) = state.sources.get(&id) {
            return Ok(source.patient_id.clone());
        }
        state
            .derived
            .get(&id)
            .map(|derived| derived.patient_id.clone())
            .ok_or(RegistryError::NotFound(id))
    }

    /// Look up either kind of record.
    pub async fn lookup(&self, id: ImageId) -> Option<ImageRecord> {
        let state = self.state.read().await;
        if let Some(source) = state.sources.get(&id) {
            return Some(ImageRecord::Source(source.clone()));
        }
        state.derived.get(&id).cloned().map(ImageRecord::Derived)
    }

    pub async fn get_source(&self, id: ImageId) -> Option<SourceImage> {
        self.state.read().await.sources.get(&id).cloned()
    }

    pub async fn get_derived(&self, id: ImageId) -> Option<DerivedImage> {
        self.state.read().await.derived.get(&id).cloned()
    }

    /// Derived images of a source, in creation order.
    ///
    /// # Errors
    /// `NotFound` if no source image has this id.
    pub async fn derived_for(&self, source_id: ImageId) -> Result<Vec<DerivedImage>, RegistryError> {
        let state = self.state.read().await;
        let ids = state
            .by_source
            .get(&source_id)
            .ok_or(RegistryError::NotFound(source_id))?;

        Ok(ids
            .iter()
            .filter_map(|id| state.derived.get(id).cloned())
            .collect())
    }

    pub async fn source_count(&self) -> usize {
        self.state.read().await.sources.len()
    }

    pub async fn derived_count(&self) -> usize {
        self.state.read().await.derived.len()
    }
}

// =============================================================================
// Tests
// =============================================================================
