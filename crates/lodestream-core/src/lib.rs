#![forbid(unsafe_code)]

//! Shared identity types for the lodestream asset pipeline.
//!
//! Assets are immutable and content-addressed: the hash of the encoded bytes
//! is the identity. Identical bytes always map to the same [`AssetHandle`].

mod handle;

pub use handle::{AssetHandle, AssetHash, AssetKind};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid asset hash: {0}")]
    InvalidHash(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
