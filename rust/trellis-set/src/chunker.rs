use std::{marker::PhantomData, sync::Arc};

use nonempty::NonEmpty;
use tracing::{debug, error, trace};

use crate::{
    ChunkStore, Rank, Reference, Sequence, TrellisSetError, ValueType, store::write_chunk,
};

/// Whether chunks are written to the [`ChunkStore`] as the chunker finalizes
/// them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WritePolicy {
    /// Write every chunk as soon as it is closed. A build either persists the
    /// whole tree or fails before a set exists.
    #[default]
    WriteThrough,
    /// Keep new chunks in memory only; they can be persisted later with
    /// [`Set::flush`](crate::Set::flush).
    Deferred,
}

struct Level<Value>
where
    Value: ValueType,
{
    references: Vec<Reference<Value>>,
    children: Vec<Option<Arc<Sequence<Value>>>>,
}

impl<Value> Default for Level<Value>
where
    Value: ValueType,
{
    fn default() -> Self {
        Self {
            references: Vec::new(),
            children: Vec::new(),
        }
    }
}

impl<Value> Level<Value>
where
    Value: ValueType,
{
    fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    fn push(&mut self, reference: Reference<Value>, child: Option<Arc<Sequence<Value>>>) {
        self.references.push(reference);
        self.children.push(child);
    }
}

/// Builds a tree bottom-up from a strictly increasing stream of values.
///
/// One open buffer is kept per level. A buffer at level `L` closes right
/// after an item whose [`Rank`] is greater than `L + 1`; the closed chunk is
/// frozen into a [`Sequence`] and its [`Reference`] is appended one level up,
/// where the same rule applies. A reference takes the rank of its greatest
/// key, so every boundary at level `L + 1` is also a boundary at level `L`.
///
/// Boundaries depend on nothing but the items themselves, so the same values
/// always produce the same tree.
pub struct SequenceChunker<Distribution, Value, Store>
where
    Distribution: crate::Distribution,
    Value: ValueType,
    Store: ChunkStore,
{
    store: Store,
    policy: WritePolicy,
    leaves: Vec<Value>,
    /// `levels[i]` buffers the items of level `i + 1`
    levels: Vec<Level<Value>>,
    last: Option<Value>,
    chunks: usize,

    distribution_type: PhantomData<Distribution>,
}

impl<Distribution, Value, Store> SequenceChunker<Distribution, Value, Store>
where
    Distribution: crate::Distribution,
    Value: ValueType,
    Store: ChunkStore,
{
    /// Create a [`SequenceChunker`] that finalizes chunks according to
    /// `policy`
    pub fn new(store: Store, policy: WritePolicy) -> Self {
        Self {
            store,
            policy,
            leaves: Vec::new(),
            levels: Vec::new(),
            last: None,
            chunks: 0,

            distribution_type: PhantomData,
        }
    }

    /// The [`ChunkStore`] chunks are written to
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The number of chunks closed so far
    pub fn chunks(&self) -> usize {
        self.chunks
    }

    /// Append the next value. It must sort strictly after every value
    /// appended before it.
    pub async fn append(&mut self, value: Value) -> Result<(), TrellisSetError> {
        self.check_order(&value)?;

        let rank = Distribution::rank(&value.digest()?);
        self.last = Some(value.clone());
        self.leaves.push(value);

        if rank > 1 {
            let leaves = std::mem::take(&mut self.leaves);
            let sequence = Arc::new(Sequence::leaf(leaves));
            let reference = self.finalize(&sequence).await?;
            self.push(1, reference, Some(sequence), rank).await?;
        }

        Ok(())
    }

    /// Append a whole subtree, whose root sits at `level - 1`, as one item of
    /// `level`. Every buffer below `level` must be empty, which is the case
    /// exactly when the values appended so far end on a boundary at the
    /// subtree's height.
    pub(crate) async fn append_subtree(
        &mut self,
        level: u32,
        reference: Reference<Value>,
        child: Option<Arc<Sequence<Value>>>,
    ) -> Result<(), TrellisSetError> {
        if level == 0 || !self.is_clear_below(level) {
            return Err(TrellisSetError::UnexpectedTreeShape(format!(
                "Cannot append a subtree at level {level} while lower levels are open"
            )));
        }
        let key = reference.key().value().clone();
        self.check_order(&key)?;

        let rank = Distribution::rank(&key.digest()?);
        self.last = Some(key);
        self.push(level, reference, child, rank).await
    }

    /// Whether no buffer below `level` holds an item
    pub(crate) fn is_clear_below(&self, level: u32) -> bool {
        self.leaves.is_empty()
            && self
                .levels
                .iter()
                .take((level as usize).saturating_sub(1))
                .all(Level::is_empty)
    }

    /// Close every open buffer and return the root of the tree.
    ///
    /// The highest level holding anything becomes the root. A root with a
    /// single child is replaced by that child until the tree has minimum
    /// height, and a stream with no values yields an empty leaf.
    pub async fn done(mut self) -> Result<Arc<Sequence<Value>>, TrellisSetError> {
        let top = match self.levels.iter().rposition(|level| !level.is_empty()) {
            Some(index) => index as u32 + 1,
            None => 0,
        };

        let root = if top == 0 {
            let root = Arc::new(Sequence::leaf(std::mem::take(&mut self.leaves)));
            self.finalize_root(&root).await?;
            root
        } else {
            if !self.leaves.is_empty() {
                let leaves = std::mem::take(&mut self.leaves);
                let sequence = Arc::new(Sequence::leaf(leaves));
                let reference = self.finalize(&sequence).await?;
                self.level_mut(1).push(reference, Some(sequence));
            }

            for level in 1..top {
                if !self.level_mut(level).is_empty() {
                    let (reference, sequence) = self.close(level).await?;
                    self.level_mut(level + 1).push(reference, Some(sequence));
                }
            }

            let mut root = match self.level_mut(top).references.len() {
                1 => {
                    let Level {
                        mut references,
                        mut children,
                    } = std::mem::take(self.level_mut(top));
                    match (children.pop().flatten(), references.pop()) {
                        (Some(child), _) => child,
                        (None, Some(reference)) => {
                            Arc::new(Sequence::load(reference.hash(), &self.store).await?)
                        }
                        (None, None) => {
                            return Err(TrellisSetError::UnexpectedTreeShape(
                                "Top level lost its only item".into(),
                            ));
                        }
                    }
                }
                _ => {
                    let (_, root) = self.close(top).await?;
                    root
                }
            };

            while !root.is_leaf() && root.len() == 1 {
                root = root.child(0, &self.store).await?;
            }
            root
        };

        debug!(
            chunks = self.chunks,
            level = root.level(),
            count = root.count(),
            "chunker finished"
        );

        Ok(root)
    }

    fn check_order(&self, value: &Value) -> Result<(), TrellisSetError> {
        match &self.last {
            Some(last) if value <= last => {
                error!(?value, ?last, "value appended out of order");
                Err(TrellisSetError::ContractViolation(format!(
                    "{value:?} does not sort strictly after {last:?}"
                )))
            }
            _ => Ok(()),
        }
    }

    fn level_mut(&mut self, level: u32) -> &mut Level<Value> {
        let index = level as usize - 1;
        while self.levels.len() <= index {
            self.levels.push(Level::default());
        }
        &mut self.levels[index]
    }

    async fn push(
        &mut self,
        mut level: u32,
        mut reference: Reference<Value>,
        mut child: Option<Arc<Sequence<Value>>>,
        rank: Rank,
    ) -> Result<(), TrellisSetError> {
        loop {
            self.level_mut(level).push(reference, child);
            if rank <= level + 1 {
                return Ok(());
            }

            let (closed_reference, closed) = self.close(level).await?;
            reference = closed_reference;
            child = Some(closed);
            level += 1;
        }
    }

    async fn close(
        &mut self,
        level: u32,
    ) -> Result<(Reference<Value>, Arc<Sequence<Value>>), TrellisSetError> {
        let Level {
            references,
            children,
        } = std::mem::take(self.level_mut(level));
        let references = NonEmpty::from_vec(references).ok_or_else(|| {
            TrellisSetError::UnexpectedTreeShape(format!("Closed an empty chunk at level {level}"))
        })?;

        let sequence = Arc::new(Sequence::meta(level, references, children));
        let reference = self.finalize(&sequence).await?;
        Ok((reference, sequence))
    }

    async fn finalize(
        &mut self,
        sequence: &Sequence<Value>,
    ) -> Result<Reference<Value>, TrellisSetError> {
        let (hash, bytes) = sequence.seal()?;
        let hash = hash.clone();

        if self.policy == WritePolicy::WriteThrough {
            write_chunk(&mut self.store, hash.clone(), bytes).await?;
        }
        self.chunks += 1;

        trace!(
            level = sequence.level(),
            items = sequence.len(),
            %hash,
            "closed chunk"
        );

        let key = sequence.key().ok_or_else(|| {
            TrellisSetError::UnexpectedTreeShape("Closed a chunk with no values".into())
        })?;
        Ok(Reference::new(key, hash, sequence.count()))
    }

    async fn finalize_root(&mut self, root: &Sequence<Value>) -> Result<(), TrellisSetError> {
        match self.policy {
            WritePolicy::WriteThrough => {
                root.write(&mut self.store).await?;
            }
            WritePolicy::Deferred => {
                root.hash()?;
            }
        }
        self.chunks += 1;
        Ok(())
    }
}
