use std::fmt::Display;

use serde::{Deserialize, Serialize};
use trellis_common::Blake3Hash;

use crate::{OrderedKey, ValueType};

/// A serializable reference to a child [`Sequence`](crate::Sequence), as
/// held by a meta node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference<Value> {
    key: OrderedKey<Value>,
    hash: Blake3Hash,
    count: u64,
}

impl<Value> Reference<Value>
where
    Value: ValueType,
{
    /// Create a new [`Reference`].
    pub fn new(key: OrderedKey<Value>, hash: Blake3Hash, count: u64) -> Self {
        Reference { key, hash, count }
    }

    /// The greatest key within the referenced subtree
    pub fn key(&self) -> &OrderedKey<Value> {
        &self.key
    }

    /// The hash of the referenced chunk
    pub fn hash(&self) -> &Blake3Hash {
        &self.hash
    }

    /// The number of values under the referenced subtree
    pub fn count(&self) -> u64 {
        self.count
    }
}

impl<Value> Display for Reference<Value>
where
    Value: ValueType,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)
    }
}
