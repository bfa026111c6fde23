#![warn(missing_docs)]

//! This crate contains the chunk store collaborator used by trellis sets: a
//! generalized [StorageBackend] API plus a handful of composable backends.
//!
//! Backends compose by wrapping one another:
//!
//! ```rust
//! use trellis_common::Blake3Hash;
//! use trellis_storage::{MeasuredStorageBackend, MemoryStorageBackend, StorageCache};
//!
//! # fn example() -> Result<(), trellis_storage::TrellisStorageError> {
//! // Chunks kept in memory, with reads and writes counted
//! let measured = MeasuredStorageBackend::new(
//!     MemoryStorageBackend::<Blake3Hash, Vec<u8>>::default()
//! );
//!
//! // Fronted by a read cache holding up to 1024 chunks
//! let backend = StorageCache::new(measured.clone(), 1024)?;
//! # Ok(())
//! # }
//! ```

mod error;
pub use error::*;

mod backend;
pub use backend::*;

mod cache;
pub use cache::*;

mod measure;
pub use measure::*;

#[cfg(any(test, feature = "helpers"))]
mod helpers;
#[cfg(any(test, feature = "helpers"))]
pub use helpers::*;
