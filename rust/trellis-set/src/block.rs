use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};

use crate::{Reference, TrellisSetError, ValueType};

/// The serializable construct representing a [`Sequence`](crate::Sequence).
/// A [`Block`] is what is encoded, hashed and written to a chunk store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Block<Value> {
    /// A level 0 chunk holding a strictly increasing run of values. Only the
    /// root of an empty set may hold no values.
    Leaf(Vec<Value>),
    /// A chunk at `level` > 0 holding strictly increasing references to its
    /// children, which all sit at `level - 1`.
    Meta {
        /// Height of this chunk above the leaves
        level: u32,
        /// One reference per child subtree
        references: NonEmpty<Reference<Value>>,
    },
}

impl<Value> Block<Value>
where
    Value: ValueType,
{
    /// Whether this block is a leaf.
    pub fn is_leaf(&self) -> bool {
        matches!(self, Block::Leaf(_))
    }

    /// Whether this block is a meta block.
    pub fn is_meta(&self) -> bool {
        !self.is_leaf()
    }

    /// Height of this block above the leaves
    pub fn level(&self) -> u32 {
        match self {
            Block::Leaf(_) => 0,
            Block::Meta { level, .. } => *level,
        }
    }

    /// The number of items (values or references) held directly by this block
    pub fn len(&self) -> usize {
        match self {
            Block::Leaf(values) => values.len(),
            Block::Meta { references, .. } => references.len(),
        }
    }

    /// Whether this block holds no items at all
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of values in the subtree rooted at this block
    pub fn count(&self) -> u64 {
        match self {
            Block::Leaf(values) => values.len() as u64,
            Block::Meta { references, .. } => {
                references.iter().map(|reference| reference.count()).sum()
            }
        }
    }

    /// The greatest value in the subtree rooted at this block, if any
    pub fn last_value(&self) -> Option<&Value> {
        match self {
            Block::Leaf(values) => values.last(),
            Block::Meta { references, .. } => Some(references.last().key().value()),
        }
    }

    /// Get the values of a leaf.
    ///
    /// The result is an error if this is a meta block.
    pub fn values(&self) -> Result<&[Value], TrellisSetError> {
        match self {
            Block::Leaf(values) => Ok(values),
            Block::Meta { .. } => Err(TrellisSetError::UnexpectedTreeShape(
                "Cannot read values from a meta block".into(),
            )),
        }
    }

    /// Get the child [`Reference`]s of a meta block.
    ///
    /// The result is an error if this is a leaf.
    pub fn references(&self) -> Result<&NonEmpty<Reference<Value>>, TrellisSetError> {
        match self {
            Block::Meta { references, .. } => Ok(references),
            Block::Leaf(_) => Err(TrellisSetError::UnexpectedTreeShape(
                "Cannot read references from a leaf".into(),
            )),
        }
    }

    /// Check the ordering invariants of a block that was read from storage
    pub fn verify(&self) -> Result<(), TrellisSetError> {
        let ordered = match self {
            Block::Leaf(values) => values.windows(2).all(|pair| pair[0] < pair[1]),
            Block::Meta { level, references } => {
                *level > 0
                    && references
                        .iter()
                        .zip(references.iter().skip(1))
                        .all(|(left, right)| left.key() < right.key())
            }
        };

        if ordered {
            Ok(())
        } else {
            Err(TrellisSetError::UnexpectedTreeShape(
                "Block contents are not strictly increasing".into(),
            ))
        }
    }
}
