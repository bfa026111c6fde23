use std::{
    collections::{BTreeSet, VecDeque},
    sync::Arc,
};

use async_stream::try_stream;
use futures_core::Stream;
use futures_util::TryStreamExt;
use trellis_common::Blake3Hash;

use crate::{ChunkStore, Sequence, Set, TrellisSetError, ValueType};

/// Order in which [`Set::traverse`] visits chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraversalOrder {
    /// Visit children before siblings (uses a stack internally).
    #[default]
    DepthFirst,
    /// Visit every chunk at one level before the level below it (uses a
    /// queue internally).
    BreadthFirst,
}

impl TraversalOrder {
    /// Create a new traversal queue for this order.
    pub fn queue<T>(self) -> TraversalQueue<T> {
        TraversalQueue {
            order: self,
            items: VecDeque::new(),
        }
    }
}

/// A work list whose discipline follows a [`TraversalOrder`].
#[derive(Debug, Clone)]
pub struct TraversalQueue<T> {
    order: TraversalOrder,
    items: VecDeque<T>,
}

impl<T> TraversalQueue<T> {
    /// Remove the next item: from the back when depth-first, from the front
    /// when breadth-first
    pub fn dequeue(&mut self) -> Option<T> {
        match self.order {
            TraversalOrder::DepthFirst => self.items.pop_back(),
            TraversalOrder::BreadthFirst => self.items.pop_front(),
        }
    }

    /// Add sibling items so that the first of them is dequeued first
    pub fn enqueue<I>(&mut self, items: I)
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: DoubleEndedIterator,
    {
        match self.order {
            TraversalOrder::DepthFirst => self.items.extend(items.into_iter().rev()),
            TraversalOrder::BreadthFirst => self.items.extend(items),
        }
    }
}

impl<Distribution, Value, Store> Set<Distribution, Value, Store>
where
    Distribution: crate::Distribution,
    Value: ValueType,
    Store: ChunkStore,
{
    /// Stream every chunk of this set, starting with the root. Chunks that
    /// are not held in memory are read through the store as they are
    /// reached.
    pub fn traverse(
        &self,
        order: TraversalOrder,
    ) -> impl Stream<Item = Result<Arc<Sequence<Value>>, TrellisSetError>> + 'static {
        let root = self.root().clone();
        let store = self.store().clone();

        try_stream! {
            let mut queue = order.queue();
            queue.enqueue(children(&root));
            yield root;

            while let Some((parent, index)) = queue.dequeue() {
                let node = parent.child(index, &store).await?;
                queue.enqueue(children(&node));
                yield node;
            }
        }
    }

    /// The hashes of every chunk reachable from this set's root
    pub async fn chunk_hashes(&self) -> Result<BTreeSet<Blake3Hash>, TrellisSetError> {
        self.traverse(TraversalOrder::BreadthFirst)
            .and_then(|node| async move { node.hash().cloned() })
            .try_collect()
            .await
    }
}

fn children<Value>(
    node: &Arc<Sequence<Value>>,
) -> impl DoubleEndedIterator<Item = (Arc<Sequence<Value>>, usize)> + '_
where
    Value: ValueType,
{
    let len = if node.is_leaf() { 0 } else { node.len() };
    (0..len).map(move |index| (node.clone(), index))
}
