//! Configuration management for the ingestion service.
//!
//! Every option is a clap flag. Options of the `serve` subcommand can also be
//! supplied through `DICOM_`-prefixed environment variables.
//!
//! # Subcommands
//!
//! - `serve` - Run the HTTP ingestion service
//! - `convert` - Ingest a local file into a local storage root
//! - `inspect` - Print the metadata document of a local file
//!
//! # Environment Variables
//!
//! - `DICOM_HOST` - Server bind address (default: 0.0.0.0)
//! - `DICOM_PORT` - Server port (default: 3000)
//! - `DICOM_STORAGE` - Storage backend: local, s3 or memory (default: local)
//! - `DICOM_STORAGE_ROOT` - Root directory of the local backend (default: ./data)
//! - `DICOM_S3_BUCKET` - S3 bucket name (required for the s3 backend)
//! - `DICOM_S3_ENDPOINT` - Custom S3 endpoint for S3-compatible services
//! - `DICOM_S3_REGION` - AWS region (default: us-east-1)
//! - `DICOM_STORAGE_PREFIX` - Key prefix of stored objects (default: images)
//! - `DICOM_IDENTITY_SECRET` - HMAC secret for signed identity assertions
//! - `DICOM_CACHE_SIZE` - Artifact cache capacity in bytes (default: 100MB)
//! - `DICOM_MAX_UPLOAD` - Maximum upload size in bytes (default: 256MB)
//! - `DICOM_CACHE_MAX_AGE` - HTTP cache max-age seconds (default: 3600)
//! - `DICOM_CORS_ORIGINS` - Allowed CORS origins, comma-separated

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::lineage::StorageLocationPrefix;
use crate::metadata::TagSet;
use crate::raster::DEFAULT_ARTIFACT_CACHE_CAPACITY;
use crate::server::DEFAULT_MAX_UPLOAD_BYTES;

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default root directory of the local storage backend.
pub const DEFAULT_STORAGE_ROOT: &str = "./data";

/// Default key prefix of stored objects.
pub const DEFAULT_STORAGE_PREFIX: &str = "images";

/// Default `max-age` of retrieved images, one hour.
pub const DEFAULT_CACHE_MAX_AGE: u32 = 3600;

// =============================================================================
// CLI Arguments
// =============================================================================

/// DICOM ingestion service.
///
/// Accepts DICOM objects, converts every frame to PNG and records the
/// lineage between the upload, its artifacts and its patient.
#[derive(Parser, Debug, Clone)]
#[command(name = "dicom-ingest")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP ingestion service.
    Serve(ServeConfig),

    /// Ingest a local DICOM file and print its lineage as JSON.
    Convert(ConvertConfig),

    /// Print the metadata document of a local DICOM file as JSON.
    Inspect(InspectConfig),
}

/// Where stored objects live.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// Files under a local directory
    Local,
    /// An S3 or S3-compatible bucket
    S3,
    /// Process memory; lost on exit
    Memory,
}

// =============================================================================
// Serve
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Interface to listen on.
    #[arg(long, default_value = DEFAULT_HOST, env = "DICOM_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "DICOM_PORT")]
    pub port: u16,

    // =========================================================================
    // Storage Configuration
    // =========================================================================
    /// Storage backend for source objects and artifacts.
    #[arg(long, value_enum, default_value_t = StorageBackend::Local, env = "DICOM_STORAGE")]
    pub storage: StorageBackend,

    /// Root directory of the local storage backend.
    #[arg(long, default_value = DEFAULT_STORAGE_ROOT, env = "DICOM_STORAGE_ROOT")]
    pub storage_root: PathBuf,

    /// S3 bucket name (s3 backend only).
    #[arg(long, env = "DICOM_S3_BUCKET")]
    pub s3_bucket: Option<String>,

    /// Endpoint override for S3-compatible object stores.
    #[arg(long, env = "DICOM_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// AWS region for S3.
    #[arg(long, default_value = DEFAULT_REGION, env = "DICOM_S3_REGION")]
    pub s3_region: String,

    /// Key prefix of every stored object.
    #[arg(long, default_value = DEFAULT_STORAGE_PREFIX, env = "DICOM_STORAGE_PREFIX")]
    pub storage_prefix: String,

    // =========================================================================
    // Identity Configuration
    // =========================================================================
    /// Secret for HMAC-SHA256 signed identity assertions.
    ///
    /// When unset, the `X-User-Id` header is trusted as sent.
    #[arg(long, env = "DICOM_IDENTITY_SECRET")]
    pub identity_secret: Option<String>,

    // =========================================================================
    // Limits and Caching
    // =========================================================================
    /// Artifact cache capacity in bytes.
    #[arg(long, default_value_t = DEFAULT_ARTIFACT_CACHE_CAPACITY, env = "DICOM_CACHE_SIZE")]
    pub cache_size: usize,

    /// Maximum upload size in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_UPLOAD_BYTES, env = "DICOM_MAX_UPLOAD")]
    pub max_upload: usize,

    /// `max-age` sent with retrieved images.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "DICOM_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    /// Origins admitted by CORS, comma-separated.
    ///
    /// Every origin is admitted when unset.
    #[arg(long, env = "DICOM_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Log at debug level.
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Skip the per-request `TraceLayer`.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Reject option combinations the service cannot start with.
    pub fn validate(&self) -> Result<(), String> {
        if self.storage == StorageBackend::S3
            && self.s3_bucket.as_deref().map_or(true, str::is_empty)
        {
            return Err(
                "The s3 backend needs a bucket. Set --s3-bucket or DICOM_S3_BUCKET".to_string(),
            );
        }

        if matches!(self.identity_secret.as_deref(), Some("")) {
            return Err("identity_secret must not be empty when set".to_string());
        }

        if self.cache_size == 0 {
            return Err("cache_size must be greater than 0".to_string());
        }
        if self.max_upload == 0 {
            return Err("max_upload must be greater than 0".to_string());
        }

        Ok(())
    }

    /// `host:port` for the listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn prefix(&self) -> StorageLocationPrefix {
        StorageLocationPrefix::new(self.storage_prefix.as_str())
    }
}

// =============================================================================
// Convert
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct ConvertConfig {
    /// DICOM file to ingest.
    pub input: PathBuf,

    /// Patient the object belongs to.
    #[arg(long)]
    pub patient_id: String,

    /// User recorded as the uploader.
    #[arg(long, default_value = "local")]
    pub user: String,

    /// Storage root to write the source object and artifacts under.
    #[arg(short, long, default_value = DEFAULT_STORAGE_ROOT, env = "DICOM_STORAGE_ROOT")]
    pub output: PathBuf,

    /// Key prefix of the written objects.
    #[arg(long, default_value = DEFAULT_STORAGE_PREFIX, env = "DICOM_STORAGE_PREFIX")]
    pub storage_prefix: String,

    /// Log at debug level.
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl ConvertConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.patient_id.trim().is_empty() {
            return Err("patient_id must not be empty".to_string());
        }
        if self.user.trim().is_empty() {
            return Err("user must not be empty".to_string());
        }
        Ok(())
    }

    pub fn prefix(&self) -> StorageLocationPrefix {
        StorageLocationPrefix::new(self.storage_prefix.as_str())
    }
}

// =============================================================================
// Inspect
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct InspectConfig {
    /// DICOM file to inspect.
    pub input: PathBuf,

    /// Only print this tag, written as "(gggg,eeee)". Repeatable.
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// Log at debug level.
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl InspectConfig {
    /// Parse the requested tags; none requested means every element.
    pub fn tag_set(&self) -> Result<TagSet, String> {
        self.tags
            .iter()
            .map(|tag| tag.parse().map_err(|e| format!("{}", e)))
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
