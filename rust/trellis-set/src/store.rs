use trellis_common::{Blake3Hash, ConditionalSync};
use trellis_storage::{StorageBackend, TrellisStorageError};

use crate::TrellisSetError;

/// Any [`StorageBackend`] that stores encoded chunks under their
/// [`Blake3Hash`] can back a [`Set`](crate::Set).
///
/// Reads happen when a cursor descends into a child that is not held in
/// memory; writes happen when the chunker finalizes a chunk under
/// [`WritePolicy::WriteThrough`](crate::WritePolicy::WriteThrough) or when a
/// set is flushed.
pub trait ChunkStore:
    StorageBackend<Key = Blake3Hash, Value = Vec<u8>> + ConditionalSync + 'static
{
}

impl<S> ChunkStore for S where
    S: StorageBackend<Key = Blake3Hash, Value = Vec<u8>> + ConditionalSync + 'static
{
}

pub(crate) async fn read_chunk<S>(store: &S, hash: &Blake3Hash) -> Result<Vec<u8>, TrellisSetError>
where
    S: ChunkStore,
{
    let bytes = store
        .get(hash)
        .await
        .map_err(|error| TrellisSetError::Storage(error.into()))?
        .ok_or_else(|| TrellisSetError::MissingChunk(format!("{hash}")))?;

    if Blake3Hash::hash(&bytes) != *hash {
        return Err(TrellisStorageError::Verification(format!(
            "Bytes read for {hash} hash to something else"
        ))
        .into());
    }

    Ok(bytes)
}

pub(crate) async fn write_chunk<S>(
    store: &mut S,
    hash: Blake3Hash,
    bytes: Vec<u8>,
) -> Result<(), TrellisSetError>
where
    S: ChunkStore,
{
    store
        .set(hash, bytes)
        .await
        .map_err(|error| TrellisSetError::Storage(error.into()))
}
