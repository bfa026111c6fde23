//! Canonical chunk and value encoding.
//!
//! Chunks and values are encoded as DAG-CBOR, which is deterministic for a
//! given value: equal trees always produce byte-identical chunks and so the
//! same hashes.

use serde::{Serialize, de::DeserializeOwned};
use trellis_common::Blake3Hash;
use trellis_storage::TrellisStorageError;

use crate::TrellisSetError;

/// Encode a serializable item into its canonical bytes
pub fn encode<T>(item: &T) -> Result<Vec<u8>, TrellisSetError>
where
    T: Serialize,
{
    serde_ipld_dagcbor::to_vec(item)
        .map_err(|error| TrellisStorageError::EncodeFailed(format!("{error}")).into())
}

/// Decode canonical bytes back into an item
pub fn decode<T>(bytes: &[u8]) -> Result<T, TrellisSetError>
where
    T: DeserializeOwned,
{
    serde_ipld_dagcbor::from_slice(bytes)
        .map_err(|error| TrellisStorageError::DecodeFailed(format!("{error}")).into())
}

/// The [`Blake3Hash`] of the canonical encoding of an item
pub fn digest<T>(item: &T) -> Result<Blake3Hash, TrellisSetError>
where
    T: Serialize,
{
    Ok(Blake3Hash::hash(&encode(item)?))
}
