#![forbid(unsafe_code)]

//! Decode worker pool.
//!
//! Converts raw compressed blobs into structured geometry/material payloads
//! on a fixed pool of worker threads, off the coordinator context. Dispatch
//! is round-robin; materials go out individually (low volume, latency
//! sensitive) while geometries are batched up to a byte threshold so a burst
//! of cache hits spreads across the whole pool instead of serializing
//! through one worker.

mod codec;
mod geometry;
mod material;
mod pool;

use std::sync::Arc;

use lodestream_core::AssetHandle;
use thiserror::Error;

pub use codec::{compress_blob, decompress_blob};
pub use geometry::Geometry;
pub use material::Material;
pub use pool::{DecodeOptions, DecodePool};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed geometry blob: {0}")]
    Geometry(String),

    #[error("malformed material blob: {0}")]
    Material(#[from] serde_json::Error),

    #[error("decode pool is shut down")]
    PoolClosed,
}

pub type DecodeResult<T> = Result<T, DecodeError>;

/// A decoded in-memory asset, shared between all waiters of a hash.
#[derive(Clone, Debug, PartialEq)]
pub enum DecodedAsset {
    Geometry(Geometry),
    Material(Material),
}

impl DecodedAsset {
    /// Approximate resident size, used for the memory budget.
    #[must_use]
    pub fn byte_size(&self) -> u64 {
        match self {
            Self::Geometry(g) => g.byte_size(),
            Self::Material(m) => m.byte_size(),
        }
    }
}

/// Result of decoding one blob, routed back to the coordinator.
#[derive(Debug)]
pub struct DecodeOutcome {
    pub handle: AssetHandle,
    pub result: DecodeResult<Arc<DecodedAsset>>,
}
