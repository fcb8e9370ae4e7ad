//! Ingestion service: the pipeline from uploaded bytes to registered artifacts.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          IngestService                            │
//! │  ┌──────────────────────────────────────────────────────────┐    │
//! │  │                        ingest()                          │    │
//! │  │  1. Authorize          5. Attach header attributes       │    │
//! │  │  2. Store source       6. Split pixel data into frames   │    │
//! │  │  3. Register source    7. Per frame: encode, register,   │    │
//! │  │  4. Decode stream         store                          │    │
//! │  │                        8. Record outcome                 │    │
//! │  └──────────────────────────────────────────────────────────┘    │
//! │         │                 │                  │             │      │
//! │         ▼                 ▼                  ▼             ▼      │
//! │  ┌─────────────┐  ┌────────────────┐  ┌─────────────┐  ┌───────┐ │
//! │  │ Authorization│  │ LineageRegistry│  │ PngFrame    │  │ Blob  │ │
//! │  │ Policy       │  └────────────────┘  │ Encoder     │  │ Store │ │
//! │  └─────────────┘                       └─────────────┘  └───────┘ │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Frames are processed in source order and the derived images are
//! registered in that order. When frame *k* fails, frames before it stay
//! registered and stored, frames after it are never attempted, and the
//! outcome names frame *k*.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::error::{IngestError, IngestFailure, RegistryError};
use crate::format::dicom::{self, ElementStream};
use crate::format::pixel::{ImageGeometry, PixelFrameExtractor, RasterFrame};
use crate::io::BlobStore;
use crate::lineage::{
    DerivedImage, ImageId, ImageRecord, IngestStatus, LineageRegistry, PatientId, SourceImage,
    StorageLocationPrefix, UserId,
};
use crate::metadata::{MetadataIndex, TagSet};
use crate::raster::{ArtifactCache, PngFrameEncoder};

use super::policy::{AccessDecision, AuthorizationPolicy, Role, FETCH_ROLES, INGEST_ROLES};
use super::state::{IngestStage, IngestStep};

// =============================================================================
// Ingest Request
// =============================================================================

/// One uploaded object and the context it was uploaded in.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    /// Raw DICOM Part 10 bytes
    pub data: Bytes,

    /// Authenticated uploader
    pub uploaded_by: UserId,

    /// Patient the object belongs to
    pub patient_id: PatientId,

    /// Prefix for the keys of every object this ingestion stores
    pub prefix: StorageLocationPrefix,
}

impl IngestRequest {
    pub fn new(data: Bytes, uploaded_by: UserId, patient_id: PatientId) -> Self {
        Self {
            data,
            uploaded_by,
            patient_id,
            prefix: StorageLocationPrefix::default(),
        }
    }

    pub fn with_prefix(mut self, prefix: StorageLocationPrefix) -> Self {
        self.prefix = prefix;
        self
    }
}

// =============================================================================
// Ingest Outcome
// =============================================================================

/// The first frame that could not be converted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameFailure {
    /// 1-based frame number
    pub frame_number: usize,

    #[serde(serialize_with = "serialize_display")]
    pub error: IngestError,
}

fn serialize_display<S: Serializer>(error: &IngestError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

/// Lineage produced by an ingestion that converted at least one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestOutcome {
    pub source: SourceImage,

    /// Derived images in source frame order
    pub derived: Vec<DerivedImage>,

    /// 1-based numbers of the converted frames
    pub succeeded_frames: Vec<usize>,

    /// Set when conversion stopped before the last frame
    pub failure: Option<FrameFailure>,
}

impl IngestOutcome {
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

/// A stored object fetched by image id.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub record: ImageRecord,
    pub data: Bytes,
    pub cache_hit: bool,
}

// =============================================================================
// Ingest Service
// =============================================================================

/// Runs ingestions and serves their results.
///
/// # Type Parameters
///
/// * `B` - The blob store holding source objects and artifacts
pub struct IngestService<B: BlobStore> {
    store: B,
    registry: Arc<LineageRegistry>,
    policy: Arc<dyn AuthorizationPolicy>,
    encoder: PngFrameEncoder,
    cache: ArtifactCache,
}

impl<B: BlobStore> IngestService<B> {
    /// Create a service with a fresh registry and the default artifact cache.
    pub fn new(store: B, policy: Arc<dyn AuthorizationPolicy>) -> Self {
        Self::with_registry(store, Arc::new(LineageRegistry::new()), policy)
    }

    /// Create a service over a shared registry.
    pub fn with_registry(
        store: B,
        registry: Arc<LineageRegistry>,
        policy: Arc<dyn AuthorizationPolicy>,
    ) -> Self {
        Self {
            store,
            registry,
            policy,
            encoder: PngFrameEncoder::new(),
            cache: ArtifactCache::new(),
        }
    }

    /// Replace the artifact cache with one of `capacity` bytes.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache = ArtifactCache::with_capacity(capacity);
        self
    }

    pub fn registry(&self) -> &Arc<LineageRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &B {
        &self.store
    }

    /// Ingest one object.
    ///
    /// Returns the lineage when at least one frame was converted; the
    /// outcome's `failure` names the first frame that was not.
    ///
    /// # Errors
    ///
    /// Returns an `IngestFailure` naming the step that failed, and the frame
    /// for per-frame steps. Once the source record exists, its status
    /// carries the same failure.
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestOutcome, IngestFailure> {
        let IngestRequest {
            data,
            uploaded_by,
            patient_id,
            prefix,
        } = request;

        self.authorize(&uploaded_by, INGEST_ROLES, &patient_id)
            .await
            .map_err(|e| IngestFailure::new(IngestStep::Intake, None, e))?;

        let id = ImageId::new();
        let key = prefix.source_key(id);
        let uri = self
            .store
            .put(&key, data.clone())
            .await
            .map_err(|e| IngestFailure::new(IngestStep::Intake, None, e.into()))?;

        let source = self
            .registry
            .register_source(id, uploaded_by.clone(), patient_id.clone(), key)
            .await
            .map_err(|e| IngestFailure::new(IngestStep::Intake, None, e.into()))?;
        info!(
            source_image_id = %id,
            patient_id = %patient_id,
            uploaded_by = %uploaded_by,
            location = %uri,
            bytes = data.len(),
            "Received source object"
        );

        match self.convert(&source, data, &prefix).await {
            Ok((derived, failure)) => {
                let status = match &failure {
                    None => IngestStatus::Complete,
                    Some(f) => IngestStatus::PartiallyComplete {
                        failed_frame: f.frame_number,
                        reason: f.error.to_string(),
                    },
                };
                let source = self
                    .registry
                    .record_outcome(id, status)
                    .await
                    .map_err(|e| {
                        IngestFailure::new(IngestStep::Finalize, Some(id), e.into())
                    })?;

                info!(
                    source_image_id = %id,
                    derived = derived.len(),
                    complete = failure.is_none(),
                    "Ingestion finished"
                );

                Ok(IngestOutcome {
                    source,
                    succeeded_frames: (1..=derived.len()).collect(),
                    derived,
                    failure,
                })
            }
            Err(failure) => {
                warn!(
                    source_image_id = %id,
                    stage = %failure.stage,
                    frame = ?failure.frame,
                    error = %failure.cause,
                    "Ingestion failed"
                );
                let status = IngestStatus::Failed {
                    stage: failure.stage,
                    frame: failure.frame,
                    reason: failure.cause.to_string(),
                };
                if let Err(e) = self.registry.record_outcome(id, status).await {
                    warn!(source_image_id = %id, error = %e, "Could not record ingestion failure");
                }
                Err(failure)
            }
        }
    }

    /// Decode the object and convert its frames.
    ///
    /// Returns the registered artifacts in frame order and the first frame
    /// failure, or the failure that stopped the pipeline outright.
    async fn convert(
        &self,
        source: &SourceImage,
        data: Bytes,
        prefix: &StorageLocationPrefix,
    ) -> Result<(Vec<DerivedImage>, Option<FrameFailure>), IngestFailure> {
        let fail = |stage: IngestStage, cause: IngestError| {
            let step = stage.step().unwrap_or(IngestStep::Finalize);
            IngestFailure::new(step, Some(source.id), cause)
        };
        let mut stage = IngestStage::Received;

        // Received -> Decoded
        let stream = dicom::decode(data).map_err(|e| fail(stage, e.into()))?;
        stage = IngestStage::Decoded;
        debug!(source_image_id = %source.id, elements = stream.len(), "Decoded element stream");

        // Decoded -> MetadataAttached
        let index = MetadataIndex::new(&stream);
        let header = index.filter(&TagSet::new()).without_pixel_data();
        debug!(source_image_id = %source.id, attributes = index.len(), "Indexed header attributes");
        self.registry
            .attach_header_attributes(source.id, header)
            .await
            .map_err(|e| fail(stage, e.into()))?;
        stage = IngestStage::MetadataAttached;

        // MetadataAttached -> FramesExtracted
        let pixel_data = stream
            .pixel_data()
            .ok_or_else(|| fail(stage, IngestError::MissingPixelData))?;
        let geometry = ImageGeometry::from_stream(&stream).map_err(|e| fail(stage, e.into()))?;
        let frames = PixelFrameExtractor::for_stream(&stream)
            .frames(pixel_data, &geometry)
            .map_err(|e| fail(stage, e.into()))?;
        debug!(
            source_image_id = %source.id,
            frames = frames.len(),
            rows = geometry.rows,
            columns = geometry.columns,
            "Extracted frames"
        );

        // FramesExtracted -> ArtifactsPersisted. Frames decode lazily, so a
        // frame's own decode failure is still an extraction failure.
        let mut derived = Vec::new();
        for index in 0..frames.len() {
            let frame_number = index + 1;
            let result = match frames.decode_frame(index) {
                Ok(frame) => self
                    .persist_frame(source, &frame, prefix)
                    .await
                    .map_err(|e| (IngestStep::Persist, e)),
                Err(e) => Err((IngestStep::Extract, IngestError::from(e))),
            };

            match result {
                Ok(image) => {
                    debug!(
                        source_image_id = %source.id,
                        derived_image_id = %image.id,
                        frame = frame_number,
                        "Persisted frame"
                    );
                    derived.push(image);
                }
                // Nothing was kept, so the ingestion as a whole failed
                Err((step, error)) if derived.is_empty() => {
                    return Err(
                        IngestFailure::new(step, Some(source.id), error).with_frame(frame_number)
                    )
                }
                Err((_, error)) => {
                    warn!(
                        source_image_id = %source.id,
                        frame = frame_number,
                        error = %error,
                        "Frame failed; later frames not attempted"
                    );
                    return Ok((
                        derived,
                        Some(FrameFailure {
                            frame_number,
                            error,
                        }),
                    ));
                }
            }
        }

        Ok((derived, None))
    }

    /// Encode one frame, register it, and store its bytes.
    ///
    /// A derived record whose bytes could not be stored is retracted.
    async fn persist_frame(
        &self,
        source: &SourceImage,
        frame: &RasterFrame,
        prefix: &StorageLocationPrefix,
    ) -> Result<DerivedImage, IngestError> {
        let png = self.encoder.encode(frame)?;

        let image = self
            .registry
            .register_derived(source.id, source.patient_id.clone(), prefix)
            .await?;

        if let Err(e) = self.store.put(&image.storage_location, png).await {
            if let Err(retract) = self.registry.retract_derived(image.id).await {
                warn!(derived_image_id = %image.id, error = %retract, "Could not retract derived image");
            }
            return Err(e.into());
        }

        Ok(image)
    }

    // =========================================================================
    // Retrieval
    // =========================================================================

    /// Fetch the stored bytes of a source or derived image.
    ///
    /// Derived artifacts are served through the artifact cache.
    pub async fn fetch(&self, user: &UserId, id: ImageId) -> Result<FetchedImage, IngestError> {
        let record = self
            .registry
            .lookup(id)
            .await
            .ok_or(RegistryError::NotFound(id))?;
        self.authorize(user, FETCH_ROLES, record.patient_id()).await?;

        if let ImageRecord::Derived(_) = record {
            if let Some(data) = self.cache.get(&id).await {
                return Ok(FetchedImage {
                    record,
                    data,
                    cache_hit: true,
                });
            }
        }

        let data = self.store.get(record.storage_location()).await?;
        if let ImageRecord::Derived(_) = record {
            self.cache.put(id, data.clone()).await;
        }

        Ok(FetchedImage {
            record,
            data,
            cache_hit: false,
        })
    }

    /// Header attributes of a source image, restricted to `tags`.
    ///
    /// An empty tag set returns every attribute.
    pub async fn metadata(
        &self,
        user: &UserId,
        id: ImageId,
        tags: &TagSet,
    ) -> Result<ElementStream, IngestError> {
        let source = self
            .registry
            .get_source(id)
            .await
            .ok_or(RegistryError::NotFound(id))?;
        self.authorize(user, FETCH_ROLES, &source.patient_id).await?;

        Ok(match &source.header_attributes {
            Some(stream) => MetadataIndex::new(stream).filter(tags),
            None => ElementStream::default(),
        })
    }

    /// Derived images of a source, in frame order.
    pub async fn derived(
        &self,
        user: &UserId,
        source_id: ImageId,
    ) -> Result<Vec<DerivedImage>, IngestError> {
        let patient_id = self.registry.lookup_patient_for(source_id).await?;
        self.authorize(user, FETCH_ROLES, &patient_id).await?;
        Ok(self.registry.derived_for(source_id).await?)
    }

    /// Get artifact cache statistics.
    ///
    /// Returns `(current_size, capacity, entry_count)`.
    pub async fn cache_stats(&self) -> (usize, usize, usize) {
        let size = self.cache.size().await;
        let capacity = self.cache.capacity();
        let count = self.cache.len().await;
        (size, capacity, count)
    }

    async fn authorize(
        &self,
        user: &UserId,
        roles: &[Role],
        patient: &PatientId,
    ) -> Result<(), IngestError> {
        match self.policy.check(user, roles, patient).await {
            AccessDecision::Allow => Ok(()),
            AccessDecision::Deny(reason) => {
                warn!(user = %user, patient_id = %patient, reason = %reason, "Access denied");
                Err(IngestError::AccessDenied { reason })
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
