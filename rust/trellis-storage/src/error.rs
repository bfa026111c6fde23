use thiserror::Error;

/// The common error type used by this crate
#[derive(Error, Debug)]
pub enum TrellisStorageError {
    /// A chunk could not be encoded for storage
    #[error("Failed to encode a chunk: {0}")]
    EncodeFailed(String),

    /// Stored bytes could not be decoded into a chunk
    #[error("Failed to decode a chunk: {0}")]
    DecodeFailed(String),

    /// An error that occurs when working with a storage backend
    #[error("Storage backend error: {0}")]
    StorageBackend(String),

    /// Stored bytes did not hash to the address they were read from
    #[error("Chunk hash verification failed: {0}")]
    Verification(String),
}
