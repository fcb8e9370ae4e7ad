//! Router configuration for the ingestion API.
//!
//! This module defines the HTTP routes and applies middleware for identity
//! verification, body limits and CORS.
//!
//! # Route Structure
//!
//! ```text
//! /health                        - Health check (public)
//! POST /images                   - Upload (identified)
//! GET  /images/{id}              - Stored object (identified)
//! GET  /images/{id}/metadata     - Header attributes (identified)
//! GET  /images/{id}/derived      - Derived images (identified)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use dicom_ingest::ingest::{AllowAllPolicy, IngestService};
//! use dicom_ingest::io::MemoryBlobStore;
//! use dicom_ingest::server::{create_router, RouterConfig};
//!
//! let service = IngestService::new(MemoryBlobStore::new(), Arc::new(AllowAllPolicy));
//! let router = create_router(service, RouterConfig::new().with_identity_secret("secret"));
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::auth::{
    identity_middleware, IdentityVerifier, IDENTITY_EXP_HEADER, IDENTITY_SIG_HEADER,
    USER_ID_HEADER,
};
use super::handlers::{
    derived_handler, health_handler, image_handler, ingest_handler, metadata_handler, AppState,
};
use crate::ingest::IngestService;
use crate::io::BlobStore;
use crate::lineage::StorageLocationPrefix;

/// Default maximum upload size: 256MB
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

// =============================================================================
// Router Configuration
// =============================================================================

/// Settings for [`create_router`].
#[derive(Clone)]
pub struct RouterConfig {
    /// Secret for verifying signed identity assertions (None = trust `X-User-Id`)
    pub identity_secret: Option<String>,

    /// Prefix for the keys of stored objects
    pub prefix: StorageLocationPrefix,

    /// Origins allowed by CORS; `None` admits every origin
    pub cors_origins: Option<Vec<String>>,

    /// `max-age` sent with retrieved images
    pub cache_max_age: u32,

    /// Maximum accepted upload size in bytes
    pub max_upload_bytes: usize,

    /// Wrap the router in a `TraceLayer`
    pub enable_tracing: bool,
}

impl RouterConfig {
    /// Create a configuration with default settings.
    ///
    /// By default:
    /// - Identity headers are trusted without a signature
    /// - Every CORS origin is admitted
    /// - Retrieved images may be cached privately for an hour
    /// - Uploads are limited to 256MB
    /// - Tracing is enabled
    pub fn new() -> Self {
        Self {
            identity_secret: None,
            prefix: StorageLocationPrefix::default(),
            cors_origins: None,
            cache_max_age: 3600,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            enable_tracing: true,
        }
    }

    /// Require identity assertions signed with `secret`.
    pub fn with_identity_secret(mut self, secret: impl Into<String>) -> Self {
        self.identity_secret = Some(secret.into());
        self
    }

    pub fn with_prefix(mut self, prefix: StorageLocationPrefix) -> Self {
        self.prefix = prefix;
        self
    }

    /// Restrict CORS to `origins`; an empty list blocks cross-origin callers.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }

    pub fn with_max_upload_bytes(mut self, bytes: usize) -> Self {
        self.max_upload_bytes = bytes;
        self
    }

    /// Toggle the `TraceLayer`.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Assemble the ingestion API router around `service`.
pub fn create_router<B>(service: IngestService<B>, config: RouterConfig) -> Router
where
    B: BlobStore + 'static,
{
    let app_state = AppState::new(service)
        .with_prefix(config.prefix.clone())
        .with_cache_max_age(config.cache_max_age);

    let image_routes = Router::new()
        .route("/images", post(ingest_handler::<B>))
        .route("/images/{id}", get(image_handler::<B>))
        .route("/images/{id}/metadata", get(metadata_handler::<B>))
        .route("/images/{id}/derived", get(derived_handler::<B>))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .with_state(app_state);

    let image_routes = match &config.identity_secret {
        Some(secret) => image_routes.layer(middleware::from_fn_with_state(
            IdentityVerifier::new(secret),
            identity_middleware,
        )),
        None => image_routes,
    };

    let router = Router::new()
        .merge(image_routes)
        .route("/health", get(health_handler))
        .layer(build_cors_layer(&config));

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// CORS for the configured origins; unparsable origins are skipped.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::HEAD, Method::OPTIONS])
        .allow_headers([
            CONTENT_TYPE,
            HeaderName::from_static(USER_ID_HEADER),
            HeaderName::from_static(IDENTITY_EXP_HEADER),
            HeaderName::from_static(IDENTITY_SIG_HEADER),
        ])
        .max_age(Duration::from_secs(86400));

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let allowed: Vec<HeaderValue> =
                origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(allowed)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
