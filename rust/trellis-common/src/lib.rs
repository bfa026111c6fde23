#![warn(missing_docs)]

//! This crate constitutes a library of light weight helpers that are shared
//! across the other trellis crates: cross-target bound traits, the BLAKE3
//! digest type that addresses every chunk, and a task spawning shim.

mod sync;
pub use sync::*;

mod hash;
pub use hash::*;

mod r#async;
pub use r#async::*;
