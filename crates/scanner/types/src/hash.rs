//! Fixed-width digests.

use derive_more::{From, Into};
use sha2::{Digest, Sha256};
use std::{fmt, str::FromStr};

/// A 32-byte digest: block key roots, transaction ids and RCD hashes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, From, Into)]
pub struct Bytes32(pub [u8; 32]);

impl Bytes32 {
    /// The all-zero digest.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Returns the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Copies a digest out of a slice, returning `None` unless it is exactly 32 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; 32]>::try_from(bytes).ok().map(Self)
    }
}

impl AsRef<[u8]> for Bytes32 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Bytes32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Bytes32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bytes32({self})")
    }
}

impl FromStr for Bytes32 {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out)?;
        Ok(Self(out))
    }
}

/// Single SHA-256 over `data`.
pub fn sha256(data: impl AsRef<[u8]>) -> Bytes32 {
    Bytes32(Sha256::digest(data.as_ref()).into())
}

/// Double SHA-256 over `data`.
pub fn sha256d(data: impl AsRef<[u8]>) -> Bytes32 {
    sha256(sha256(data))
}

/// Merkle root over `leaves` as factomd builds it: each parent is the single SHA-256 of its
/// two children concatenated, and a level with an odd count pairs its last node with
/// itself. A lone leaf is its own root. No leaves give [`Bytes32::ZERO`].
pub fn merkle_root(leaves: &[Bytes32]) -> Bytes32 {
    let mut level = leaves.to_vec();
    if level.is_empty() {
        return Bytes32::ZERO;
    }
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let right = pair.get(1).unwrap_or(&pair[0]);
                let mut preimage = [0u8; 64];
                preimage[..32].copy_from_slice(pair[0].as_bytes());
                preimage[32..].copy_from_slice(right.as_bytes());
                sha256(preimage)
            })
            .collect();
    }
    level[0]
}
