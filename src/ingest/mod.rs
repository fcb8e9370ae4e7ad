//! Ingestion pipeline.
//!
//! - [`IngestService`]: drives one upload through decode, metadata
//!   attachment, frame extraction and artifact persistence
//! - [`IngestStage`]: the states of that pipeline, and [`IngestStep`]: the
//!   work between them that a failure is reported against
//! - [`AuthorizationPolicy`]: the access decision consulted first

mod policy;
mod service;
mod state;

pub use policy::{AccessDecision, AllowAllPolicy, AuthorizationPolicy, Role, FETCH_ROLES, INGEST_ROLES};
pub use service::{FetchedImage, FrameFailure, IngestOutcome, IngestRequest, IngestService};
pub use state::{IngestStage, IngestStep};
