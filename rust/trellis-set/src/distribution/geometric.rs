use trellis_common::Blake3Hash;

use super::{Distribution, Rank};

/// Simulate a geometric distribution with probability p = 1 - (1 / m) using a
/// series of fair Bernoulli trials (p = 1 / 2) read from a digest. The digest
/// supplies 256 fair trials, grouped into batches of floor(log2(m + 1))
/// trials, so a batch is all zeroes with probability 1 / 2^k where 2^k is the
/// largest power of two not above m + 1.
///
/// `BRANCH_FACTOR` is `m`; smaller factors give smaller chunks and taller
/// trees.
#[derive(Clone, Copy, Debug, Default)]
pub struct Geometric<const BRANCH_FACTOR: u32>;

/// The default distribution, targetting chunks of roughly 128 items
pub type GeometricDistribution = Geometric<254>;

impl<const BRANCH_FACTOR: u32> Distribution for Geometric<BRANCH_FACTOR> {
    const BRANCH_FACTOR: u32 = BRANCH_FACTOR;

    fn rank(digest: &Blake3Hash) -> Rank {
        compute_geometric_rank(digest.bytes(), BRANCH_FACTOR)
    }
}

pub(crate) fn compute_geometric_rank(bytes: &[u8; 32], m: u32) -> Rank {
    // A batch of k fair trials is all zeroes with probability 1 / 2^k. The
    // batch width is floor(log2(m + 1)), at least one bit, so a batch is
    // nonzero with probability 1 - 1 / 2^k where 2^k <= m + 1.
    let k = (m + 1).ilog2().max(1);
    let batch_count = 256 / k;

    // The rank is the number of leading all-zero batches, plus one because
    // the geometric distribution starts at 1.
    for batch_index in 0..batch_count {
        let mut batch = 0u32;
        for bit in batch_index * k..(batch_index + 1) * k {
            let byte = bytes[(bit / 8) as usize];
            batch = (batch << 1) | u32::from((byte >> (bit % 8)) & 1);
        }
        if batch != 0 {
            return batch_index + 1;
        }
    }
    batch_count + 1
}
