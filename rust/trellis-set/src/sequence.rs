use std::sync::{Arc, OnceLock};

use nonempty::NonEmpty;
use trellis_common::Blake3Hash;

use crate::{
    Block, ChunkStore, OrderedKey, Reference, TrellisSetError, ValueType, codec,
    store::{read_chunk, write_chunk},
};

/// Primary representation of tree nodes.
///
/// A [`Sequence`] wraps an immutable [`Block`]. Nodes built in this process
/// also hold their children in memory; nodes read from a [`ChunkStore`] hold
/// none, and their children are read through the store on descent.
///
/// The content hash is memoized in a write-once cell. It is filled on first
/// request (or up front, for nodes read by hash), and since the block never
/// changes, racing initializers always agree on its value.
#[derive(Debug)]
pub struct Sequence<Value>
where
    Value: ValueType,
{
    block: Block<Value>,
    children: Vec<Option<Arc<Sequence<Value>>>>,
    hash: OnceLock<Blake3Hash>,
}

impl<Value> Sequence<Value>
where
    Value: ValueType,
{
    /// Create a leaf [`Sequence`] from a strictly increasing run of values
    pub fn leaf(values: Vec<Value>) -> Self {
        Sequence {
            block: Block::Leaf(values),
            children: Vec::new(),
            hash: OnceLock::new(),
        }
    }

    /// Create a meta [`Sequence`] at `level` from child references. Each slot
    /// in `children` holds the in-memory child for the reference at the same
    /// position, when one is available.
    pub fn meta(
        level: u32,
        references: NonEmpty<Reference<Value>>,
        children: Vec<Option<Arc<Sequence<Value>>>>,
    ) -> Self {
        Sequence {
            block: Block::Meta { level, references },
            children,
            hash: OnceLock::new(),
        }
    }

    /// Read a [`Sequence`] from a [`ChunkStore`] given its hash
    pub async fn load<S>(hash: &Blake3Hash, store: &S) -> Result<Self, TrellisSetError>
    where
        S: ChunkStore,
    {
        let bytes = read_chunk(store, hash).await?;
        let block: Block<Value> = codec::decode(&bytes)?;
        block.verify()?;

        let sequence = Sequence {
            block,
            children: Vec::new(),
            hash: OnceLock::from(hash.clone()),
        };

        Ok(sequence)
    }

    /// The [`Block`] this node wraps
    pub fn block(&self) -> &Block<Value> {
        &self.block
    }

    /// Whether this node is a leaf
    pub fn is_leaf(&self) -> bool {
        self.block.is_leaf()
    }

    /// Height of this node above the leaves
    pub fn level(&self) -> u32 {
        self.block.level()
    }

    /// The number of items held directly by this node
    pub fn len(&self) -> usize {
        self.block.len()
    }

    /// Whether this node holds no items (only true of an empty set's root)
    pub fn is_empty(&self) -> bool {
        self.block.is_empty()
    }

    /// The number of values under this node
    pub fn count(&self) -> u64 {
        self.block.count()
    }

    /// The content hash of this node, computed on first request
    pub fn hash(&self) -> Result<&Blake3Hash, TrellisSetError> {
        if let Some(hash) = self.hash.get() {
            return Ok(hash);
        }
        let (hash, _) = self.seal()?;
        Ok(hash)
    }

    /// Encode this node, memoizing its hash, and return both
    pub(crate) fn seal(&self) -> Result<(&Blake3Hash, Vec<u8>), TrellisSetError> {
        let bytes = codec::encode(&self.block)?;
        let hash = self.hash.get_or_init(|| Blake3Hash::hash(&bytes));
        Ok((hash, bytes))
    }

    /// A [`Reference`] to this node, as held by its parent. The result is
    /// `None` for the root of an empty set, which nothing may reference.
    pub fn reference(&self) -> Result<Option<Reference<Value>>, TrellisSetError> {
        let Some(last) = self.block.last_value() else {
            return Ok(None);
        };
        Ok(Some(Reference::new(
            last.ordered_key(),
            self.hash()?.clone(),
            self.count(),
        )))
    }

    /// Write this node to a [`ChunkStore`]
    pub async fn write<S>(&self, store: &mut S) -> Result<Blake3Hash, TrellisSetError>
    where
        S: ChunkStore,
    {
        let (hash, bytes) = self.seal()?;
        let hash = hash.clone();
        write_chunk(store, hash.clone(), bytes).await?;
        Ok(hash)
    }

    /// The values of a leaf
    pub fn values(&self) -> Result<&[Value], TrellisSetError> {
        self.block.values()
    }

    /// The child references of a meta node
    pub fn references(&self) -> Result<&NonEmpty<Reference<Value>>, TrellisSetError> {
        self.block.references()
    }

    /// The in-memory child at `index`, if this node holds one
    pub fn materialized_child(&self, index: usize) -> Option<&Arc<Sequence<Value>>> {
        self.children.get(index).and_then(Option::as_ref)
    }

    /// Whether any child of this node is held in memory
    pub(crate) fn has_materialized_children(&self) -> bool {
        self.children.iter().any(Option::is_some)
    }

    /// The child at `index`, reading it through the store when it is not
    /// held in memory
    pub async fn child<S>(
        &self,
        index: usize,
        store: &S,
    ) -> Result<Arc<Sequence<Value>>, TrellisSetError>
    where
        S: ChunkStore,
    {
        if let Some(child) = self.materialized_child(index) {
            return Ok(child.clone());
        }

        let reference = self.references()?.get(index).ok_or_else(|| {
            TrellisSetError::UnexpectedTreeShape(format!(
                "Child {index} requested from a node with {} children",
                self.len()
            ))
        })?;
        let child = Sequence::load(reference.hash(), store).await?;

        if child.level() + 1 != self.level() {
            return Err(TrellisSetError::UnexpectedTreeShape(format!(
                "Child {reference} is at level {} below a node at level {}",
                child.level(),
                self.level()
            )));
        }

        Ok(Arc::new(child))
    }

    /// The position of the first item whose key is at least `value`. For a
    /// leaf this may equal [`Sequence::len`] (past the end); for a meta node
    /// it is clamped to the last child.
    pub fn search(&self, value: &Value) -> usize {
        match &self.block {
            Block::Leaf(values) => values.partition_point(|probe| probe < value),
            Block::Meta { references, .. } => {
                let index = partition_references(references, |reference| {
                    reference.key().value() < value
                });
                index.min(references.len() - 1)
            }
        }
    }

    /// Find the child that holds the value at flattened position `index`
    /// under this meta node, returning the child position and the position
    /// within that child. Positions past the end clamp to the last child.
    pub fn locate(&self, mut index: u64) -> Result<(usize, u64), TrellisSetError> {
        let references = self.references()?;
        for (position, reference) in references.iter().enumerate() {
            if index < reference.count() {
                return Ok((position, index));
            }
            index -= reference.count();
        }
        let last = references.len() - 1;
        Ok((last, index + references.last().count()))
    }

    /// The number of values under the children before `index`
    pub(crate) fn count_before(&self, index: usize) -> u64 {
        match &self.block {
            Block::Leaf(_) => index as u64,
            Block::Meta { references, .. } => references
                .iter()
                .take(index)
                .map(|reference| reference.count())
                .sum(),
        }
    }

    /// The greatest key under this node, if any
    pub fn key(&self) -> Option<OrderedKey<Value>> {
        self.block.last_value().map(|value| value.ordered_key())
    }
}

fn partition_references<Value, F>(references: &NonEmpty<Reference<Value>>, predicate: F) -> usize
where
    Value: ValueType,
    F: Fn(&Reference<Value>) -> bool,
{
    let (mut low, mut high) = (0, references.len());
    while low < high {
        let middle = low + (high - low) / 2;
        match references.get(middle) {
            Some(reference) if predicate(reference) => low = middle + 1,
            _ => high = middle,
        }
    }
    low
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use nonempty::NonEmpty;
    use trellis_common::Blake3Hash;
    use trellis_storage::{MemoryStorageBackend, StorageBackend};

    use super::Sequence;
    use crate::{TrellisSetError, codec};

    #[cfg(target_arch = "wasm32")]
    use wasm_bindgen_test::wasm_bindgen_test;

    fn two_leaf_tree() -> Result<Sequence<u64>> {
        let left = Arc::new(Sequence::leaf(vec![1u64, 2, 3]));
        let right = Arc::new(Sequence::leaf(vec![5u64, 8]));
        let references = NonEmpty::from_vec(vec![
            left.reference()?.unwrap(),
            right.reference()?.unwrap(),
        ])
        .unwrap();
        Ok(Sequence::meta(1, references, vec![Some(left), Some(right)]))
    }

    #[test]
    fn it_memoizes_the_hash_of_its_encoding() -> Result<()> {
        let leaf = Sequence::leaf(vec![1u64, 2, 3]);
        let expected = Blake3Hash::hash(&codec::encode(leaf.block())?);

        assert_eq!(leaf.hash()?, &expected);
        assert_eq!(leaf.hash()?, &expected);
        Ok(())
    }

    #[test]
    fn it_searches_by_key_and_by_position() -> Result<()> {
        let tree = two_leaf_tree()?;

        assert_eq!(tree.count(), 5);
        assert_eq!(tree.search(&0), 0);
        assert_eq!(tree.search(&3), 0);
        assert_eq!(tree.search(&4), 1);
        assert_eq!(tree.search(&100), 1);
        assert_eq!(tree.locate(0)?, (0, 0));
        assert_eq!(tree.locate(3)?, (1, 0));
        assert_eq!(tree.locate(4)?, (1, 1));
        assert_eq!(tree.locate(5)?, (1, 2));
        assert_eq!(tree.count_before(1), 3);

        let leaf = tree.materialized_child(1).unwrap();
        assert_eq!(leaf.search(&6), 1);
        assert_eq!(leaf.search(&9), 2);
        Ok(())
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn it_reads_children_through_the_store() -> Result<()> {
        let mut store = MemoryStorageBackend::<Blake3Hash, Vec<u8>>::default();
        let tree = two_leaf_tree()?;
        for index in 0..2 {
            tree.materialized_child(index).unwrap().write(&mut store).await?;
        }
        let hash = tree.write(&mut store).await?;

        let loaded = Sequence::<u64>::load(&hash, &store).await?;
        assert!(loaded.materialized_child(0).is_none());
        assert_eq!(loaded.hash()?, &hash);

        let child = loaded.child(1, &store).await?;
        assert_eq!(child.values()?, &[5, 8]);
        Ok(())
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn it_refuses_bytes_that_do_not_match_their_address() -> Result<()> {
        let mut store = MemoryStorageBackend::<Blake3Hash, Vec<u8>>::default();
        let hash = Blake3Hash::hash(b"something else");
        store
            .set(hash.clone(), codec::encode(Sequence::leaf(vec![1u64]).block())?)
            .await?;

        let result = Sequence::<u64>::load(&hash, &store).await;
        assert!(matches!(result, Err(TrellisSetError::Storage(_))));

        let missing = Sequence::<u64>::load(&Blake3Hash::hash(b"missing"), &store).await;
        assert!(matches!(missing, Err(TrellisSetError::MissingChunk(_))));
        Ok(())
    }
}
