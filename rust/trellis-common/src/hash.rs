use std::{array::TryFromSliceError, fmt::Display};

use base58::ToBase58;
use serde::{Deserialize, Serialize};

/// The size of a BLAKE3 digest in bytes.
pub const BLAKE3_HASH_SIZE: usize = 32;

/// A BLAKE3 digest.
///
/// Every chunk of a set is addressed by the [`Blake3Hash`] of its canonical
/// encoding, and the same digest of an encoded value drives the boundary
/// function that decides where chunks end.
///
/// ```rust
/// use trellis_common::Blake3Hash;
///
/// let hash = Blake3Hash::hash(b"hello world");
/// assert_eq!(hash, Blake3Hash::hash(b"hello world"));
/// ```
#[derive(
    Clone, Default, Debug, PartialEq, Eq, PartialOrd, Ord, std::hash::Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Blake3Hash(#[serde(with = "serde_bytes")] [u8; BLAKE3_HASH_SIZE]);

impl Blake3Hash {
    /// Computes the BLAKE3 digest of the given bytes.
    pub fn hash(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).into())
    }

    /// The raw bytes of the digest
    pub fn bytes(&self) -> &[u8; BLAKE3_HASH_SIZE] {
        &self.0
    }
}

impl From<[u8; BLAKE3_HASH_SIZE]> for Blake3Hash {
    fn from(value: [u8; BLAKE3_HASH_SIZE]) -> Self {
        Blake3Hash(value)
    }
}

impl TryFrom<&[u8]> for Blake3Hash {
    type Error = TryFromSliceError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Ok(Blake3Hash(value.try_into()?))
    }
}

impl AsRef<[u8]> for Blake3Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for Blake3Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0.to_base58())
    }
}
