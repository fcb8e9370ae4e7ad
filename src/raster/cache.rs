//! Artifact cache for encoded PNG frames.
//!
//! Fetching a derived image by id goes to the blob store on a miss; hot
//! artifacts are kept here, keyed by their image id.
//!
//! # Size-Based Eviction
//!
//! The cache tracks the total size of cached artifacts in bytes and evicts
//! least-recently-used entries when the capacity is exceeded.

use std::num::NonZeroUsize;

use bytes::Bytes;
use lru::LruCache;
use tokio::sync::Mutex;

use crate::lineage::ImageId;

/// Default cache capacity: 100MB
pub const DEFAULT_ARTIFACT_CACHE_CAPACITY: usize = 100 * 1024 * 1024;

/// Default maximum number of entries (to bound LRU overhead)
const DEFAULT_MAX_ENTRIES: NonZeroUsize = match NonZeroUsize::new(10_000) {
    Some(n) => n,
    None => NonZeroUsize::MIN,
};

struct CacheState {
    entries: LruCache<ImageId, Bytes>,
    size: usize,
}

/// LRU cache of encoded artifacts with a byte-size capacity.
///
/// Safe to share across tasks via `Arc`.
pub struct ArtifactCache {
    state: Mutex<CacheState>,
    max_size: usize,
}

impl ArtifactCache {
    /// Create a cache with the default capacity (100MB).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_ARTIFACT_CACHE_CAPACITY)
    }

    /// Create a cache holding at most `max_size` bytes.
    pub fn with_capacity(max_size: usize) -> Self {
        Self::with_capacity_and_entries(max_size, DEFAULT_MAX_ENTRIES)
    }

    /// Create a cache bounded by both bytes and entry count.
    pub fn with_capacity_and_entries(max_size: usize, max_entries: NonZeroUsize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::new(max_entries),
                size: 0,
            }),
            max_size,
        }
    }

    /// Get an artifact, marking it as recently used.
    pub async fn get(&self, id: &ImageId) -> Option<Bytes> {
        self.state.lock().await.entries.get(id).cloned()
    }

    /// Check for an artifact without updating LRU order.
    pub async fn contains(&self, id: &ImageId) -> bool {
        self.state.lock().await.entries.contains(id)
    }

    /// Store an artifact, evicting least-recently-used entries as needed.
    ///
    /// Artifacts larger than the whole capacity are not cached.
    pub async fn put(&self, id: ImageId, data: Bytes) {
        if data.len() > self.max_size {
            return;
        }

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let size = data.len();

        if let Some(old) = state.entries.peek(&id) {
            state.size = state.size.saturating_sub(old.len());
        }

        // Entry-count evictions are returned by push
        if let Some((evicted_id, evicted)) = state.entries.push(id, data) {
            if evicted_id != id {
                state.size = state.size.saturating_sub(evicted.len());
            }
        }
        state.size += size;

        while state.size > self.max_size {
            match state.entries.pop_lru() {
                Some((_, evicted)) => state.size = state.size.saturating_sub(evicted.len()),
                None => break,
            }
        }
    }

    /// Remove an artifact, returning it if it was cached.
    pub async fn remove(&self, id: &ImageId) -> Option<Bytes> {
        let mut state = self.state.lock().await;
        let data = state.entries.pop(id)?;
        state.size = state.size.saturating_sub(data.len());
        Some(data)
    }

    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.entries.clear();
        state.size = 0;
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.entries.is_empty()
    }

    /// Current total size of cached artifacts in bytes.
    pub async fn size(&self) -> usize {
        self.state.lock().await.size
    }

    /// Maximum capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.max_size
    }
}

impl Default for ArtifactCache {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
