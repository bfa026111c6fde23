use std::{fmt::Debug, marker::PhantomData, sync::Arc};

use async_stream::try_stream;
use futures_core::Stream;
use tracing::debug;
use trellis_common::Blake3Hash;

use crate::{
    ChunkStore, Cursor, SequenceChunker, Sequence, SetEditor, TrellisSetError, ValueType,
    WritePolicy,
};

/// An immutable ordered set of values, stored as a tree of content-defined
/// chunks.
///
/// Every [`Set`] is identified by the hash of its root chunk. Two sets hold
/// the same values exactly when their hashes match, and sets derived from
/// one another share every chunk that did not change.
///
/// `Distribution` decides where chunks end, `Value` is the element type and
/// `Store` is the [`ChunkStore`] that chunks are read from and written to.
#[derive(Clone)]
pub struct Set<Distribution, Value, Store>
where
    Distribution: crate::Distribution,
    Value: ValueType,
    Store: ChunkStore,
{
    root: Arc<Sequence<Value>>,
    hash: Blake3Hash,
    store: Store,
    policy: WritePolicy,

    distribution_type: PhantomData<Distribution>,
}

impl<Distribution, Value, Store> Set<Distribution, Value, Store>
where
    Distribution: crate::Distribution,
    Value: ValueType,
    Store: ChunkStore,
{
    /// Create an empty [`Set`]. Its root is an empty leaf, which is written
    /// to the store like any other chunk.
    pub async fn empty(store: Store) -> Result<Self, TrellisSetError> {
        Self::build(std::iter::empty(), store, WritePolicy::default()).await
    }

    /// Create a [`Set`] from values in any order. Values are sorted and
    /// duplicates are dropped before a single chunking pass.
    pub async fn from_values<I>(values: I, store: Store) -> Result<Self, TrellisSetError>
    where
        I: IntoIterator<Item = Value>,
    {
        Self::build(values, store, WritePolicy::default()).await
    }

    /// Create a [`Set`] from values in any order, finalizing chunks according
    /// to `policy`
    pub async fn build<I>(
        values: I,
        store: Store,
        policy: WritePolicy,
    ) -> Result<Self, TrellisSetError>
    where
        I: IntoIterator<Item = Value>,
    {
        let mut values: Vec<Value> = values.into_iter().collect();
        values.sort();
        values.dedup();

        debug!(values = values.len(), ?policy, "building set");

        let mut chunker = SequenceChunker::<Distribution, Value, Store>::new(store.clone(), policy);
        for value in values {
            chunker.append(value).await?;
        }
        let root = chunker.done().await?;

        Self::from_root(root, store, policy)
    }

    /// Re-open a [`Set`] that was previously written to `store`. Only the
    /// root chunk is read up front; everything else is read on demand.
    pub async fn from_hash(hash: &Blake3Hash, store: Store) -> Result<Self, TrellisSetError> {
        let root = Sequence::load(hash, &store).await?;
        Ok(Self {
            root: Arc::new(root),
            hash: hash.clone(),
            store,
            policy: WritePolicy::default(),

            distribution_type: PhantomData,
        })
    }

    pub(crate) fn from_root(
        root: Arc<Sequence<Value>>,
        store: Store,
        policy: WritePolicy,
    ) -> Result<Self, TrellisSetError> {
        let hash = root.hash()?.clone();
        Ok(Self {
            root,
            hash,
            store,
            policy,

            distribution_type: PhantomData,
        })
    }

    /// The root [`Sequence`] of this set
    pub fn root(&self) -> &Arc<Sequence<Value>> {
        &self.root
    }

    /// The [`ChunkStore`] used by this set
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The [`WritePolicy`] this set was built with, which its editors
    /// inherit
    pub fn policy(&self) -> WritePolicy {
        self.policy
    }

    /// The hash of the root chunk, which identifies this set's contents
    pub fn hash(&self) -> &Blake3Hash {
        &self.hash
    }

    /// The number of values in this set
    pub fn len(&self) -> usize {
        self.root.count() as usize
    }

    /// Whether this set holds no values
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The height of the tree; zero when the root is a leaf
    pub fn height(&self) -> u32 {
        self.root.level()
    }

    /// Whether both sets hold the same values. Only the root hashes are
    /// compared.
    pub fn equals<OtherStore>(&self, other: &Set<Distribution, Value, OtherStore>) -> bool
    where
        OtherStore: ChunkStore,
    {
        self.hash == other.hash
    }

    /// Whether `value` is a member of this set
    pub async fn has(&self, value: &Value) -> Result<bool, TrellisSetError> {
        let cursor = self.iterator_from(value).await?;
        Ok(cursor.current() == Some(value))
    }

    /// The least value in this set
    pub async fn first(&self) -> Result<Option<Value>, TrellisSetError> {
        let cursor = Cursor::at_start(self.root.clone(), self.store.clone()).await?;
        Ok(cursor.current().cloned())
    }

    /// The value at position `index` in ascending order
    pub async fn at(&self, index: usize) -> Result<Value, TrellisSetError> {
        let length = self.len();
        if index >= length {
            return Err(TrellisSetError::OutOfRange { index, length });
        }

        let cursor = self.iterator_at(index).await?;
        cursor.current().cloned().ok_or_else(|| {
            TrellisSetError::UnexpectedTreeShape(format!(
                "No value at {index} below a root that counts {length}"
            ))
        })
    }

    /// Visit every value in ascending order until `callback` returns `true`
    pub async fn iterate<F>(&self, mut callback: F) -> Result<(), TrellisSetError>
    where
        F: FnMut(&Value) -> bool,
    {
        let mut cursor = Cursor::at_start(self.root.clone(), self.store.clone()).await?;
        while let Some(value) = cursor.current() {
            if callback(value) {
                break;
            }
            cursor.advance().await?;
        }
        Ok(())
    }

    /// Stream every value in ascending order
    pub fn stream(&self) -> impl Stream<Item = Result<Value, TrellisSetError>> + 'static {
        let root = self.root.clone();
        let store = self.store.clone();

        try_stream! {
            let cursor = Cursor::at_start(root, store).await?;
            for await value in cursor.into_stream() {
                yield value?;
            }
        }
    }

    /// A [`Cursor`] positioned on the value at `index`, or past the end when
    /// `index` is out of range
    pub async fn iterator_at(&self, index: usize) -> Result<Cursor<Value, Store>, TrellisSetError> {
        Cursor::at_index(self.root.clone(), index as u64, self.store.clone()).await
    }

    /// A [`Cursor`] positioned on the first value not less than `value`
    pub async fn iterator_from(&self, value: &Value) -> Result<Cursor<Value, Store>, TrellisSetError> {
        Cursor::at_key(self.root.clone(), value, self.store.clone()).await
    }

    /// Collect every value in ascending order
    pub async fn to_vec(&self) -> Result<Vec<Value>, TrellisSetError> {
        let mut values = Vec::with_capacity(self.len());
        self.iterate(|value| {
            values.push(value.clone());
            false
        })
        .await?;
        Ok(values)
    }

    /// Start a batch of edits against this set
    pub fn edit(&self) -> SetEditor<Distribution, Value, Store> {
        SetEditor::new(self.clone())
    }

    /// Write every chunk this set holds in memory to its store, returning
    /// how many were written. Sets built with [`WritePolicy::Deferred`] must
    /// be flushed before they can be re-opened with [`Set::from_hash`].
    ///
    /// Chunks that are only referenced, not held, are assumed to be in the
    /// store already.
    pub async fn flush(&self) -> Result<usize, TrellisSetError> {
        let mut store = self.store.clone();
        let mut pending = vec![self.root.clone()];
        let mut written = 0;

        while let Some(node) = pending.pop() {
            node.write(&mut store).await?;
            written += 1;

            if !node.has_materialized_children() {
                continue;
            }
            for index in 0..node.len() {
                if let Some(child) = node.materialized_child(index) {
                    pending.push(child.clone());
                }
            }
        }

        debug!(written, hash = %self.hash, "flushed set");
        Ok(written)
    }
}

impl<Distribution, Value, Store, OtherStore> PartialEq<Set<Distribution, Value, OtherStore>>
    for Set<Distribution, Value, Store>
where
    Distribution: crate::Distribution,
    Value: ValueType,
    Store: ChunkStore,
    OtherStore: ChunkStore,
{
    fn eq(&self, other: &Set<Distribution, Value, OtherStore>) -> bool {
        self.equals(other)
    }
}

impl<Distribution, Value, Store> Eq for Set<Distribution, Value, Store>
where
    Distribution: crate::Distribution,
    Value: ValueType,
    Store: ChunkStore,
{
}

impl<Distribution, Value, Store> Debug for Set<Distribution, Value, Store>
where
    Distribution: crate::Distribution,
    Value: ValueType,
    Store: ChunkStore,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Set")
            .field("hash", &self.hash)
            .field("len", &self.len())
            .field("height", &self.height())
            .finish()
    }
}
