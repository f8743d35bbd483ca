use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{CoreError, CoreResult};

/// Content digest identifying an asset.
///
/// Two assets with identical encoded bytes always produce the same hash, so
/// the hash alone is a complete identity (content-addressing invariant).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetHash([u8; 32]);

impl AssetHash {
    /// Digest raw encoded bytes into a hash.
    #[must_use]
    pub fn digest(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    /// Parse a 64-character lowercase hex string.
    pub fn from_hex(s: &str) -> CoreResult<Self> {
        let raw = s.as_bytes();
        if raw.len() != 64 {
            return Err(CoreError::InvalidHash(s.to_string()));
        }
        let mut out = [0u8; 32];
        for (byte, pair) in out.iter_mut().zip(raw.chunks_exact(2)) {
            match (hex_nibble(pair[0]), hex_nibble(pair[1])) {
                (Some(hi), Some(lo)) => *byte = hi << 4 | lo,
                _ => return Err(CoreError::InvalidHash(s.to_string())),
            }
        }
        Ok(Self(out))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Leading 16 bits of the digest, used by the store's membership
    /// estimation (hash space is assumed uniformly distributed).
    #[must_use]
    pub fn prefix16(&self) -> u16 {
        u16::from_be_bytes([self.0[0], self.0[1]])
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in &self.0 {
            use fmt::Write;
            let _ = write!(s, "{b:02x}");
        }
        s
    }
}

fn hex_nibble(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}

impl fmt::Display for AssetHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for AssetHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetHash({}..)", &self.to_hex()[..8])
    }
}

/// What a blob decodes into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetKind {
    Geometry,
    Material,
}

/// Immutable asset identity: content hash plus payload kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetHandle {
    pub hash: AssetHash,
    pub kind: AssetKind,
}

impl AssetHandle {
    #[must_use]
    pub fn new(hash: AssetHash, kind: AssetKind) -> Self {
        Self { hash, kind }
    }

    #[must_use]
    pub fn geometry(hash: AssetHash) -> Self {
        Self::new(hash, AssetKind::Geometry)
    }

    #[must_use]
    pub fn material(hash: AssetHash) -> Self {
        Self::new(hash, AssetKind::Material)
    }
}
