//! DICOM Ingest - converts uploaded DICOM objects into PNG artifacts.
//!
//! This binary starts the HTTP server or runs one-shot local commands.

use std::process::ExitCode;
use std::sync::Arc;

use bytes::Bytes;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dicom_ingest::{
    config::{Cli, Command, ConvertConfig, InspectConfig, ServeConfig, StorageBackend},
    create_s3_client,
    format::decode,
    ingest::{AllowAllPolicy, IngestRequest, IngestService},
    io::{BlobStore, LocalBlobStore, MemoryBlobStore, S3BlobStore},
    lineage::{PatientId, UserId},
    metadata::{self, MetadataIndex},
    server::{create_router, RouterConfig},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config).await,
        Command::Convert(config) => run_convert(config).await,
        Command::Inspect(config) => run_inspect(config).await,
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Invalid serve configuration: {}", e);
        return ExitCode::FAILURE;
    }

    info!("DICOM Ingest v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Storage prefix: {}", config.prefix().as_str());
    info!("  Artifact cache: {}MB", config.cache_size / (1024 * 1024));
    info!("  Max upload: {}MB", config.max_upload / (1024 * 1024));

    if config.identity_secret.is_some() {
        info!("  Identity: signed assertions required");
    } else {
        warn!("  Identity: X-User-Id is trusted as sent");
        warn!("        Require signatures in production: --identity-secret=<secret>");
    }

    let store = build_store(&config).await;

    let service = IngestService::new(store, Arc::new(AllowAllPolicy))
        .with_cache_capacity(config.cache_size);
    let router = create_router(service, build_router_config(&config));

    let addr = config.bind_address();

    info!(
        "Accepting uploads at http://{}/images?patient_id=<patient> (X-User-Id required)",
        addr
    );

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(address = %addr, error = %e, "Could not bind listener");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = axum::serve(listener, router).await {
        error!(error = %e, "Server terminated");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Build the configured storage backend.
async fn build_store(config: &ServeConfig) -> Arc<dyn BlobStore> {
    match config.storage {
        StorageBackend::Local => {
            info!("  Storage: local ({})", config.storage_root.display());
            Arc::new(LocalBlobStore::new(config.storage_root.clone()))
        }
        StorageBackend::Memory => {
            warn!("  Storage: memory - objects are lost on shutdown");
            Arc::new(MemoryBlobStore::new())
        }
        StorageBackend::S3 => {
            let bucket = config.s3_bucket.clone().unwrap_or_default();
            info!("  Storage: s3 (bucket {}, region {})", bucket, config.s3_region);
            if let Some(endpoint) = config.s3_endpoint.as_deref() {
                info!("  Storage endpoint override: {}", endpoint);
            }
            let client = create_s3_client(config.s3_endpoint.as_deref(), &config.s3_region).await;
            Arc::new(S3BlobStore::new(client, bucket))
        }
    }
}

/// Install the stderr tracing subscriber; `RUST_LOG` overrides the defaults.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "dicom_ingest=debug,tower_http=debug"
    } else {
        "dicom_ingest=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Translate serve flags into router settings.
fn build_router_config(config: &ServeConfig) -> RouterConfig {
    let mut router_config = RouterConfig::new()
        .with_prefix(config.prefix())
        .with_cache_max_age(config.cache_max_age)
        .with_max_upload_bytes(config.max_upload)
        .with_tracing(!config.no_tracing);

    if let Some(ref secret) = config.identity_secret {
        router_config = router_config.with_identity_secret(secret.clone());
    }

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config
}

// =============================================================================
// Convert Command
// =============================================================================

async fn run_convert(config: ConvertConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let data = match read_input(&config.input).await {
        Ok(data) => data,
        Err(code) => return code,
    };

    let service = IngestService::new(
        LocalBlobStore::new(config.output.clone()),
        Arc::new(AllowAllPolicy),
    );
    let request = IngestRequest::new(
        data,
        UserId::new(config.user.as_str()),
        PatientId::new(config.patient_id.as_str()),
    )
    .with_prefix(config.prefix());

    match service.ingest(request).await {
        Ok(outcome) => {
            let complete = outcome.is_complete();
            if !print_json(&outcome) {
                return ExitCode::FAILURE;
            }
            if complete {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(failure) => {
            eprintln!("Error: {}", failure);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Inspect Command
// =============================================================================

async fn run_inspect(config: InspectConfig) -> ExitCode {
    if config.verbose {
        init_logging(true);
    }

    let tags = match config.tag_set() {
        Ok(tags) => tags,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let data = match read_input(&config.input).await {
        Ok(data) => data,
        Err(code) => return code,
    };

    let stream = match decode(data) {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let filtered = MetadataIndex::new(&stream).filter(&tags);
    if print_json(&metadata::document(&filtered)) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

// =============================================================================
// Helpers
// =============================================================================

async fn read_input(path: &std::path::Path) -> Result<Bytes, ExitCode> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(Bytes::from(data)),
        Err(e) => {
            eprintln!("Error: cannot read {}: {}", path.display(), e);
            Err(ExitCode::FAILURE)
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> bool {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            true
        }
        Err(e) => {
            eprintln!("Error: cannot serialize output: {}", e);
            false
        }
    }
}
