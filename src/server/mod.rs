//! HTTP server layer for the ingestion service.
//!
//! Requests pass through the identity middleware (`auth`) before reaching
//! the handlers; `routes` wires both into an axum router together with CORS,
//! request tracing and the upload size limit.
//!
//! | Route | Handler |
//! |-------|---------|
//! | `POST /images?patient_id=` | [`ingest_handler`] |
//! | `GET /images/{id}` | [`image_handler`] |
//! | `GET /images/{id}/metadata?tags=` | [`metadata_handler`] |
//! | `GET /images/{id}/derived` | [`derived_handler`] |
//! | `GET /health` | [`health_handler`] |

pub mod auth;
pub mod handlers;
pub mod routes;

pub use auth::{identity_middleware, AuthError, Identity, IdentityVerifier};
pub use handlers::{
    derived_handler, health_handler, image_handler, ingest_handler, metadata_handler, ApiError,
    AppState, DerivedListResponse, ErrorResponse, HealthResponse, IngestQueryParams,
    MetadataQueryParams,
};
pub use routes::{create_router, RouterConfig, DEFAULT_MAX_UPLOAD_BYTES};
