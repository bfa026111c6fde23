mod geometric;
pub use geometric::*;

use trellis_common::{Blake3Hash, ConditionalSync};

/// A rank determines where a set's chunks end: a chunk at level `L` closes
/// right after an item whose rank is greater than `L + 1`.
pub type Rank = u32;

/// A trait that may be implemented by any type that defines how to derive the
/// [`Rank`] of a value from the digest of its canonical encoding.
///
/// Ranks depend on nothing but the digest, so chunk boundaries are a pure
/// function of chunk contents.
pub trait Distribution: Clone + std::fmt::Debug + Default + ConditionalSync + 'static {
    /// The parameter `m` of the distribution. The expected number of items
    /// per chunk is the largest power of two not above `m + 1`, so 254 gives
    /// chunks of about 128 items.
    const BRANCH_FACTOR: u32;

    /// Compute the [`Rank`] of a value given the digest of its encoding
    fn rank(digest: &Blake3Hash) -> Rank;
}
