#![forbid(unsafe_code)]

//! # lodestream-store
//!
//! Durable local blob store keyed by asset hash, used as a second-chance
//! cache before network fetch.
//!
//! ## Public contract
//!
//! The explicit public contract is the [`BlobStore`] trait and its three
//! implementations: [`DiskBlobStore`] (persistent), [`MemBlobStore`]
//! (tests and tooling), and [`DisabledStore`] (environments where
//! persistence is known to be unreliable).
//!
//! ## Disk mapping (normative)
//!
//! - blobs: `<root>/content/<first-2-hex>/<hash-hex>.bin`
//! - index: `<root>/index/lru.bin`
//!
//! ## Index (best-effort)
//!
//! The LRU index is best-effort metadata; the filesystem is the source of
//! truth. A missing or corrupted index file is treated as empty and
//! rebuilt as entries are touched.

mod disk;
mod index;
mod mem;
mod membership;
mod store;

pub use disk::{DiskBlobStore, DiskStoreOptions};
pub use index::{LruEntry, LruState};
pub use mem::{DisabledStore, MemBlobStore};
pub use membership::{MembershipEstimate, MembershipVerdict};
pub use store::BlobStore;

use thiserror::Error;

/// Blob store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index encode error: {0}")]
    IndexEncode(#[from] bincode::error::EncodeError),

    #[error("store quota exceeded after eviction retry")]
    QuotaExhausted,
}

pub type StoreResult<T> = Result<T, StoreError>;
