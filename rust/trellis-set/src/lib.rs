#![warn(missing_docs)]

//! This crate provides an immutable, content-addressed ordered set. A set is
//! stored as a tree of chunks whose boundaries are chosen by the values
//! themselves, so the same values always produce the same tree. Sets derived
//! from one another share every chunk that did not change, equality is a
//! hash comparison, and diffs skip whatever two sets share.
//!
//! To use it, pick a [`ChunkStore`] and build a [`Set`]:
//!
//! ```rust
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use tokio::sync::mpsc;
//! use tokio_util::sync::CancellationToken;
//! use trellis_common::Blake3Hash;
//! use trellis_set::{Change, GeometricDistribution, Set};
//! use trellis_storage::MemoryStorageBackend;
//!
//! type NumberSet = Set<GeometricDistribution, u64, MemoryStorageBackend<Blake3Hash, Vec<u8>>>;
//!
//! let store = MemoryStorageBackend::default();
//! let last = NumberSet::from_values([1, 2, 3, 5, 8], store.clone()).await?;
//!
//! let mut editor = last.edit();
//! editor.remove(3).insert(4);
//! let current = editor.finish().await?;
//!
//! let (sink, mut changes) = mpsc::channel(16);
//! current.diff_left_right(&last, &sink, &CancellationToken::new()).await?;
//! drop(sink);
//!
//! assert_eq!(changes.recv().await, Some(Change::Removed(3)));
//! assert_eq!(changes.recv().await, Some(Change::Added(4)));
//! # Ok(())
//! # }
//! ```

mod error;
pub use error::*;

pub mod codec;

mod key;
pub use key::*;

mod reference;
pub use reference::*;

mod block;
pub use block::*;

mod distribution;
pub use distribution::*;

mod store;
pub use store::*;

mod sequence;
pub use sequence::*;

mod chunker;
pub use chunker::*;

mod cursor;
pub use cursor::*;

mod set;
pub use set::*;

mod editor;
pub use editor::*;

mod streaming;
pub use streaming::*;

mod traversal;
pub use traversal::*;

pub mod differential;
pub use differential::*;
