use thiserror::Error;
use trellis_storage::TrellisStorageError;

/// The common error type used by this crate
#[derive(Error, Debug)]
pub enum TrellisSetError {
    /// A caller broke a precondition: values handed to a builder were out of
    /// order or duplicated. Nothing is built when this is returned.
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    /// A positional access went past the end of the set
    #[error("Index {index} is out of range for a set of length {length}")]
    OutOfRange {
        /// The requested position
        index: usize,
        /// The length of the set that was accessed
        length: usize,
    },

    /// There was a problem when accessing storage
    #[error("Storage error: {0}")]
    Storage(TrellisStorageError),

    /// A required chunk is missing from storage
    #[error("Chunk not found in storage: {0}")]
    MissingChunk(String),

    /// The tree did not match the expected shape
    #[error("Tree did not match expected shape: {0}")]
    UnexpectedTreeShape(String),

    /// A background build stopped without delivering a set
    #[error("Background build was interrupted")]
    BuildInterrupted,
}

impl From<TrellisStorageError> for TrellisSetError {
    fn from(value: TrellisStorageError) -> Self {
        TrellisSetError::Storage(value)
    }
}

impl TrellisSetError {
    /// Whether this error reports a broken caller precondition rather than a
    /// failure of the environment
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            TrellisSetError::ContractViolation(_) | TrellisSetError::OutOfRange { .. }
        )
    }
}
