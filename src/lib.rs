//! # DICOM Ingest
//!
//! An ingestion service for DICOM medical images.
//!
//! Each uploaded object is stored as-is, decoded into its element stream,
//! and converted frame by frame into PNG artifacts. Every artifact is
//! recorded against its source object and the source's patient, so the
//! lineage of any stored image can be answered from its id alone.
//!
//! ## Features
//!
//! - **Native decoding**: explicit and implicit VR, little and big endian,
//!   nested sequences and undefined lengths
//! - **Pixel data**: native frames, RLE Lossless and baseline JPEG fragments
//! - **Metadata queries**: filter header attributes by tag
//! - **Pluggable storage**: local directory, S3-compatible bucket or memory
//! - **Identity**: optional HMAC-SHA256 signed identity assertions
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`mod@format`] - DICOM element stream parser and pixel frame extraction
//! - [`raster`] - PNG encoding and the artifact cache
//! - [`metadata`] - Tag index and metadata documents
//! - [`lineage`] - Image records and the lineage registry
//! - [`ingest`] - Ingestion pipeline and authorization seam
//! - [`io`] - Blob stores and byte-order helpers
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use dicom_ingest::ingest::{AllowAllPolicy, IngestService};
//! use dicom_ingest::io::LocalBlobStore;
//! use dicom_ingest::server::{create_router, RouterConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let service = IngestService::new(LocalBlobStore::new("./data"), Arc::new(AllowAllPolicy));
//!     let router = create_router(service, RouterConfig::new());
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, router).await.unwrap();
//! }
//! ```

pub mod config;
pub mod error;
pub mod format;
pub mod ingest;
pub mod io;
pub mod lineage;
pub mod metadata;
pub mod raster;
pub mod server;

// Re-export commonly used types
pub use config::{Cli, Command, ConvertConfig, InspectConfig, ServeConfig, StorageBackend};
pub use error::{
    DecodeError, EncodeError, IngestError, IngestFailure, RegistryError, StorageError,
};
pub use format::{
    decode, Element, ElementStream, FrameSequence, ImageGeometry, PixelDataPayload,
    PixelFrameExtractor, RasterFrame, Tag, TransferSyntax, Value, Vr,
};
pub use ingest::{
    AccessDecision, AllowAllPolicy, AuthorizationPolicy, IngestOutcome, IngestRequest,
    IngestService, IngestStage, IngestStep, Role,
};
pub use io::{create_s3_client, BlobStore, LocalBlobStore, MemoryBlobStore, S3BlobStore};
pub use lineage::{
    DerivedImage, ImageId, ImageRecord, IngestStatus, LineageRegistry, PatientId, SourceImage,
    StorageLocationPrefix, UserId,
};
pub use metadata::{parse_tag_list, MetadataIndex, MetadataRecord, TagSet};
pub use raster::{ArtifactCache, PngFrameEncoder};
pub use server::{create_router, AppState, RouterConfig};
