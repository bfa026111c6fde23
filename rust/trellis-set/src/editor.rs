use std::{collections::BTreeMap, iter::Peekable, sync::Arc};

use tracing::debug;

use crate::{ChunkStore, Sequence, SequenceChunker, Set, TrellisSetError, ValueType};

/// A staged change to a single value
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Edit {
    /// The value will be present in the finished set
    Insert,
    /// The value will be absent from the finished set
    Remove,
}

type Overrides<Value> = Peekable<std::collections::btree_map::IntoIter<Value, Edit>>;

/// Collects insertions and removals against a base [`Set`] and produces a
/// new [`Set`] with one rebuild when finished.
///
/// The later of two edits to the same value wins. The base set is never
/// changed.
pub struct SetEditor<Distribution, Value, Store>
where
    Distribution: crate::Distribution,
    Value: ValueType,
    Store: ChunkStore,
{
    base: Set<Distribution, Value, Store>,
    edits: BTreeMap<Value, Edit>,
}

impl<Distribution, Value, Store> SetEditor<Distribution, Value, Store>
where
    Distribution: crate::Distribution,
    Value: ValueType,
    Store: ChunkStore,
{
    /// Start editing `base`
    pub fn new(base: Set<Distribution, Value, Store>) -> Self {
        Self {
            base,
            edits: BTreeMap::new(),
        }
    }

    /// Stage the insertion of `value`
    pub fn insert(&mut self, value: Value) -> &mut Self {
        self.edits.insert(value, Edit::Insert);
        self
    }

    /// Stage the removal of `value`
    pub fn remove(&mut self, value: Value) -> &mut Self {
        self.edits.insert(value, Edit::Remove);
        self
    }

    /// The number of values with a staged edit
    pub fn pending(&self) -> usize {
        self.edits.len()
    }

    /// Whether `value` would be a member of the finished set
    pub async fn has(&self, value: &Value) -> Result<bool, TrellisSetError> {
        match self.edits.get(value) {
            Some(Edit::Insert) => Ok(true),
            Some(Edit::Remove) => Ok(false),
            None => self.base.has(value).await,
        }
    }

    /// Apply every staged edit, producing a new [`Set`].
    ///
    /// The base tree is walked in order and merged with the staged edits
    /// into a single chunking pass. Whole subtrees that no edit touches, and
    /// that begin and end on chunk boundaries, are handed to the chunker by
    /// reference instead of being re-chunked value by value. The result is
    /// identical to building the edited values from scratch.
    pub async fn finish(self) -> Result<Set<Distribution, Value, Store>, TrellisSetError> {
        let SetEditor { base, edits } = self;
        if edits.is_empty() {
            return Ok(base);
        }

        let edit_count = edits.len();
        let store = base.store().clone();
        let policy = base.policy();
        let mut chunker = SequenceChunker::<Distribution, Value, Store>::new(store.clone(), policy);
        let mut overrides = edits.into_iter().peekable();

        let root = base.root().clone();
        if root.is_leaf() {
            merge_leaf(&mut chunker, root.values()?, &mut overrides).await?;
        } else {
            let mut pending = children(&root);
            let mut reused = 0usize;

            while let Some((parent, index)) = pending.pop() {
                let reference = parent
                    .references()?
                    .get(index)
                    .ok_or_else(|| {
                        TrellisSetError::UnexpectedTreeShape(format!(
                            "Missing reference {index} while editing"
                        ))
                    })?
                    .clone();
                let level = parent.level();

                let untouched = overrides
                    .peek()
                    .is_none_or(|(next, _)| next > reference.key().value());
                let on_boundary = Distribution::rank(&reference.key().value().digest()?) > level;

                if untouched && on_boundary && chunker.is_clear_below(level) {
                    let child = parent.materialized_child(index).cloned();
                    chunker.append_subtree(level, reference, child).await?;
                    reused += 1;
                    continue;
                }

                let child = parent.child(index, &store).await?;
                if child.is_leaf() {
                    merge_leaf(&mut chunker, child.values()?, &mut overrides).await?;
                } else {
                    pending.extend(children(&child));
                }
            }

            debug!(reused, "reused unchanged subtrees");
        }

        for (value, edit) in overrides {
            if edit == Edit::Insert {
                chunker.append(value).await?;
            }
        }

        let chunks = chunker.chunks();
        let root = chunker.done().await?;
        debug!(edits = edit_count, chunks, "finished edit");

        Set::from_root(root, store, policy)
    }
}

/// The children of a meta node as `(parent, index)` pairs, last child first,
/// so that popping yields them in order
fn children<Value>(node: &Arc<Sequence<Value>>) -> Vec<(Arc<Sequence<Value>>, usize)>
where
    Value: ValueType,
{
    (0..node.len()).rev().map(|index| (node.clone(), index)).collect()
}

async fn merge_leaf<Distribution, Value, Store>(
    chunker: &mut SequenceChunker<Distribution, Value, Store>,
    values: &[Value],
    overrides: &mut Overrides<Value>,
) -> Result<(), TrellisSetError>
where
    Distribution: crate::Distribution,
    Value: ValueType,
    Store: ChunkStore,
{
    for value in values {
        while let Some((next, _)) = overrides.peek() {
            if next >= value {
                break;
            }
            if let Some((next, Edit::Insert)) = overrides.next() {
                chunker.append(next).await?;
            }
        }

        match overrides.peek() {
            Some((next, edit)) if next == value => {
                let keep = *edit == Edit::Insert;
                overrides.next();
                if keep {
                    chunker.append(value.clone()).await?;
                }
            }
            _ => chunker.append(value.clone()).await?,
        }
    }
    Ok(())
}
