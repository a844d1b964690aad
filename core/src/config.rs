use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::net::HttpOptions;

pub const DEFAULT_CHUNK_SIZE_CAP: u64 = 10 * 1024 * 1024;

/// What to do when the resolved destination already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExistBehavior {
    /// Derive a sibling name with a `(COPY)` suffix.
    NewFile,
    Overwrite,
    /// Keep the existing file and end the session silently.
    Ignore,
}

#[derive(Clone)]
pub enum ChunkSizePolicy {
    Fixed(u64),
    Computed(Arc<dyn Fn(u64) -> u64 + Send + Sync>),
}

impl ChunkSizePolicy {
    pub fn resolve(&self, size: u64) -> u64 {
        match self {
            ChunkSizePolicy::Fixed(bytes) => *bytes,
            ChunkSizePolicy::Computed(f) => f(size),
        }
    }
}

impl fmt::Debug for ChunkSizePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkSizePolicy::Fixed(bytes) => f.debug_tuple("Fixed").field(bytes).finish(),
            ChunkSizePolicy::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

impl Default for ChunkSizePolicy {
    fn default() -> Self {
        ChunkSizePolicy::Computed(Arc::new(|size| (size / 10).min(DEFAULT_CHUNK_SIZE_CAP)))
    }
}

#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub connections: u32,
    pub exist_behavior: ExistBehavior,
    pub follow_redirect: bool,
    pub http: HttpOptions,
    pub chunk_size: ChunkSizePolicy,
    pub max_retry: u32,
    pub retry_delay_ms: u64,
    pub retry_backoff_ms: u64,
    pub report_interval_ms: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            connections: 5,
            exist_behavior: ExistBehavior::NewFile,
            follow_redirect: true,
            http: HttpOptions::default(),
            chunk_size: ChunkSizePolicy::default(),
            max_retry: 3,
            retry_delay_ms: 2000,
            retry_backoff_ms: 3000,
            report_interval_ms: 2500,
        }
    }
}
