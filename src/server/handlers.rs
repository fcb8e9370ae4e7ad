//! HTTP request handlers for the ingestion API.
//!
//! # Endpoints
//!
//! - `POST /images?patient_id=...` - Ingest a DICOM object
//! - `GET /images/{id}` - Fetch a stored object (PNG or DICOM)
//! - `GET /images/{id}/metadata?tags=...` - Header attributes of a source image
//! - `GET /images/{id}/derived` - Derived images of a source, in frame order
//! - `GET /health` - Health check endpoint

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::{IngestError, IngestFailure, RegistryError, StorageError};
use crate::ingest::{IngestOutcome, IngestRequest, IngestService, IngestStep};
use crate::io::BlobStore;
use crate::lineage::{DerivedImage, ImageId, ImageRecord, PatientId, StorageLocationPrefix};
use crate::metadata::{self, parse_tag_list, MetadataRecord, TagSet};

use super::auth::Identity;

/// Content type of stored source objects.
pub const DICOM_CONTENT_TYPE: &str = "application/dicom";

/// Content type of derived artifacts.
pub const PNG_CONTENT_TYPE: &str = "image/png";

// =============================================================================
// Application State
// =============================================================================

/// Shared application state containing the ingestion service.
pub struct AppState<B: BlobStore> {
    pub service: Arc<IngestService<B>>,

    /// Prefix for the keys of every object stored by this server
    pub prefix: StorageLocationPrefix,

    /// Cache-Control max-age in seconds for fetched artifacts
    pub cache_max_age: u32,
}

impl<B: BlobStore> AppState<B> {
    pub fn new(service: IngestService<B>) -> Self {
        Self {
            service: Arc::new(service),
            prefix: StorageLocationPrefix::default(),
            cache_max_age: 3600,
        }
    }

    pub fn with_prefix(mut self, prefix: StorageLocationPrefix) -> Self {
        self.prefix = prefix;
        self
    }

    pub fn with_cache_max_age(mut self, cache_max_age: u32) -> Self {
        self.cache_max_age = cache_max_age;
        self
    }
}

impl<B: BlobStore> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            prefix: self.prefix.clone(),
            cache_max_age: self.cache_max_age,
        }
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Query parameters for uploads.
#[derive(Debug, Deserialize)]
pub struct IngestQueryParams {
    /// Patient the uploaded object belongs to
    #[serde(default)]
    pub patient_id: Option<String>,
}

/// Query parameters for metadata requests.
#[derive(Debug, Deserialize)]
pub struct MetadataQueryParams {
    /// Comma-separated `(gggg,eeee)` tags; absent or empty returns everything
    #[serde(default)]
    pub tags: Option<String>,
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "unprocessable_object")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    /// Pipeline step an ingestion failed in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<IngestStep>,

    /// 1-based frame the failure belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<usize>,

    /// Source record carrying the failure, if one was created
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_image_id: Option<ImageId>,
}

impl ErrorResponse {
    /// Create a new error response.
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
            stage: None,
            frame: None,
            source_image_id: None,
        }
    }

    /// Create a new error response with status code.
    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            status: Some(status.as_u16()),
            ..Self::new(error, message)
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Derived images of one source.
#[derive(Debug, Serialize)]
pub struct DerivedListResponse {
    pub source_image_id: ImageId,
    pub derived: Vec<DerivedImage>,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Map an ingestion error to its HTTP status and error type.
fn classify(error: &IngestError) -> (StatusCode, &'static str) {
    match error {
        IngestError::AccessDenied { .. } => (StatusCode::FORBIDDEN, "access_denied"),
        IngestError::Decode(_) | IngestError::Encode(_) | IngestError::MissingPixelData => {
            (StatusCode::UNPROCESSABLE_ENTITY, "unprocessable_object")
        }
        IngestError::Storage(StorageError::Unavailable(_)) => {
            (StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable")
        }
        IngestError::Storage(StorageError::NotFound(_)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "artifact_missing")
        }
        IngestError::Storage(StorageError::InvalidKey(_)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "storage_error")
        }
        IngestError::Registry(RegistryError::NotFound(_)) => (StatusCode::NOT_FOUND, "not_found"),
        IngestError::Registry(_) => (StatusCode::CONFLICT, "lineage_conflict"),
    }
}

/// Log by severity and render the error body.
fn error_response(status: StatusCode, body: ErrorResponse) -> Response {
    if status.is_server_error() {
        error!(
            error_type = %body.error,
            status = status.as_u16(),
            "Server error: {}",
            body.message
        );
    } else if status == StatusCode::NOT_FOUND {
        debug!(
            error_type = %body.error,
            status = status.as_u16(),
            "Resource not found: {}",
            body.message
        );
    } else {
        warn!(
            error_type = %body.error,
            status = status.as_u16(),
            "Client error: {}",
            body.message
        );
    }

    (status, Json(body)).into_response()
}

impl IntoResponse for IngestFailure {
    fn into_response(self) -> Response {
        let (status, error_type) = classify(&self.cause);
        let body = ErrorResponse {
            stage: Some(self.stage),
            frame: self.frame,
            source_image_id: self.source_image_id,
            ..ErrorResponse::with_status(error_type, self.cause.to_string(), status)
        };
        error_response(status, body)
    }
}

/// Errors returned by the handlers.
#[derive(Debug)]
pub enum ApiError {
    /// The service rejected or failed the request
    Ingest(IngestError),

    /// A path or query parameter could not be parsed
    InvalidParameter { name: &'static str, message: String },

    /// A required query parameter is absent
    MissingParameter(&'static str),
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        ApiError::Ingest(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            ApiError::Ingest(err) => {
                let (status, error_type) = classify(err);
                (status, error_type, err.to_string())
            }
            ApiError::InvalidParameter { name, message } => (
                StatusCode::BAD_REQUEST,
                "invalid_parameter",
                format!("Invalid {}: {}", name, message),
            ),
            ApiError::MissingParameter(name) => (
                StatusCode::BAD_REQUEST,
                "missing_parameter",
                format!("Missing required parameter: {}", name),
            ),
        };

        error_response(status, ErrorResponse::with_status(error_type, message, status))
    }
}

fn parse_image_id(raw: &str) -> Result<ImageId, ApiError> {
    raw.parse().map_err(|e: uuid::Error| ApiError::InvalidParameter {
        name: "image id",
        message: e.to_string(),
    })
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle uploads.
///
/// # Endpoint
///
/// `POST /images?patient_id={patient_id}`
///
/// The body is the raw DICOM object. The acting user is read from
/// `X-User-Id`.
///
/// # Response
///
/// - `201 Created`: every frame converted; body is the lineage record
/// - `207 Multi-Status`: some frames converted; `failure` names the first
///   frame that was not
/// - `403 Forbidden`: the authorization policy denied the upload
/// - `422 Unprocessable Entity`: the object cannot be decoded or converted
/// - `503 Service Unavailable`: the blob store is unreachable; retry later
pub async fn ingest_handler<B: BlobStore + 'static>(
    State(state): State<AppState<B>>,
    Identity(user): Identity,
    Query(query): Query<IngestQueryParams>,
    body: Bytes,
) -> Result<(StatusCode, Json<IngestOutcome>), Response> {
    let patient_id = query
        .patient_id
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ApiError::MissingParameter("patient_id").into_response())?;

    let request = IngestRequest::new(body, user, PatientId::new(patient_id))
        .with_prefix(state.prefix.clone());

    let outcome = state
        .service
        .ingest(request)
        .await
        .map_err(IntoResponse::into_response)?;

    let status = if outcome.is_complete() {
        StatusCode::CREATED
    } else {
        StatusCode::MULTI_STATUS
    };
    Ok((status, Json(outcome)))
}

/// Handle fetches of stored objects.
///
/// # Endpoint
///
/// `GET /images/{id}`
///
/// # Response
///
/// - `200 OK`: `image/png` for a derived image, `application/dicom` for a
///   source image
/// - `400 Bad Request`: the id is not a UUID
/// - `403 Forbidden`: the authorization policy denied access
/// - `404 Not Found`: no image has this id
///
/// # Headers
///
/// - `Cache-Control: private, max-age={cache_max_age}`
/// - `X-Artifact-Cache-Hit: true|false`
pub async fn image_handler<B: BlobStore + 'static>(
    State(state): State<AppState<B>>,
    Identity(user): Identity,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_image_id(&id)?;
    let fetched = state.service.fetch(&user, id).await?;

    let content_type = match fetched.record {
        ImageRecord::Source(_) => DICOM_CONTENT_TYPE,
        ImageRecord::Derived(_) => PNG_CONTENT_TYPE,
    };

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CACHE_CONTROL,
                format!("private, max-age={}", state.cache_max_age),
            ),
        ],
        [("X-Artifact-Cache-Hit", fetched.cache_hit.to_string())],
        Body::from(fetched.data),
    )
        .into_response())
}

/// Handle metadata requests.
///
/// # Endpoint
///
/// `GET /images/{id}/metadata?tags=(0010,0010),(0008,0020)`
///
/// # Response
///
/// `200 OK` with an ordered JSON array of `{tag, keyword, vr, length, value}`
/// records. An absent or empty `tags` parameter returns every attribute.
pub async fn metadata_handler<B: BlobStore + 'static>(
    State(state): State<AppState<B>>,
    Identity(user): Identity,
    Path(id): Path<String>,
    Query(query): Query<MetadataQueryParams>,
) -> Result<Json<Vec<MetadataRecord>>, ApiError> {
    let id = parse_image_id(&id)?;
    let tags = match query.tags.as_deref() {
        Some(list) => parse_tag_list(list).map_err(|e| ApiError::InvalidParameter {
            name: "tags",
            message: e.to_string(),
        })?,
        None => TagSet::new(),
    };

    let stream = state.service.metadata(&user, id, &tags).await?;
    Ok(Json(metadata::document(&stream)))
}

/// Handle derived image listings.
///
/// # Endpoint
///
/// `GET /images/{id}/derived`
pub async fn derived_handler<B: BlobStore + 'static>(
    State(state): State<AppState<B>>,
    Identity(user): Identity,
    Path(id): Path<String>,
) -> Result<Json<DerivedListResponse>, ApiError> {
    let id = parse_image_id(&id)?;
    let derived = state.service.derived(&user, id).await?;
    Ok(Json(DerivedListResponse {
        source_image_id: id,
        derived,
    }))
}

/// Handle health check requests.
///
/// # Endpoint
///
/// `GET /health`
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// =============================================================================
// Tests
// =============================================================================
