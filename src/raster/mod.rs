//! Raster artifacts: PNG encoding and caching.

mod cache;
mod encoder;

pub use cache::{ArtifactCache, DEFAULT_ARTIFACT_CACHE_CAPACITY};
pub use encoder::PngFrameEncoder;
