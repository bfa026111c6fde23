//! Structural differences between two sets.
//!
//! Every strategy here rests on one fact: two subtrees with the same hash
//! hold the same values, so neither needs to be read. The strategies differ
//! only in the order they find differences in:
//!
//! - [`DiffStrategy::TopDown`] compares both trees level by level, expanding
//!   every subtree at the greatest remaining height and dropping matched
//!   pairs, until only leaves remain. Few nodes are read when changes are
//!   clustered, but nothing is emitted until the leaves are reached.
//! - [`DiffStrategy::LeftToRight`] walks the values of both trees in order
//!   like a sorted merge, skipping matching subtrees whenever both sides sit
//!   at the start of one. Changes are emitted in ascending order as soon as
//!   they are found.
//! - [`DiffStrategy::Hybrid`] expands top-down while that quickly rules out
//!   large shared regions, then merges what is left from left to right.
//!
//! All three report the same changes. Changes are delivered to a bounded
//! channel, whose capacity applies backpressure to the diff. A
//! [`CancellationToken`] is checked before every comparison and every
//! delivery; once it fires (or the receiving half is dropped) nothing more is
//! sent and the diff returns `Ok(())`.

use std::{cmp::Ordering, collections::VecDeque, sync::Arc};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use trellis_common::Blake3Hash;

use crate::{ChunkStore, Cursor, OrderedKey, Sequence, Set, TrellisSetError, ValueType};

/// The largest combined frontier a hybrid diff expands before switching to a
/// left-to-right merge
pub const HYBRID_FRONTIER_LIMIT: usize = 64;

/// A single difference between two sets
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Change<Value> {
    /// The value is in the current set but not in the last one
    Added(Value),
    /// The value is in the last set but not in the current one
    Removed(Value),
}

impl<Value> Change<Value> {
    /// The value that was added or removed
    pub fn value(&self) -> &Value {
        match self {
            Change::Added(value) | Change::Removed(value) => value,
        }
    }
}

/// How a diff walks the two trees
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DiffStrategy {
    /// Level-synchronous expansion from the roots down to the leaves
    #[default]
    TopDown,
    /// Top-down expansion near the roots, then a left-to-right merge
    Hybrid,
    /// An ordered merge of values that skips shared subtrees
    LeftToRight,
}

impl<Distribution, Value, Store> Set<Distribution, Value, Store>
where
    Distribution: crate::Distribution,
    Value: ValueType,
    Store: ChunkStore,
{
    /// Send to `sink` every change that turns `last` into this set, using
    /// [`DiffStrategy::TopDown`]
    pub async fn diff(
        &self,
        last: &Self,
        sink: &mpsc::Sender<Change<Value>>,
        cancel: &CancellationToken,
    ) -> Result<(), TrellisSetError> {
        self.diff_using(DiffStrategy::TopDown, last, sink, cancel)
            .await
    }

    /// Like [`Set::diff`], using [`DiffStrategy::Hybrid`]
    pub async fn diff_hybrid(
        &self,
        last: &Self,
        sink: &mpsc::Sender<Change<Value>>,
        cancel: &CancellationToken,
    ) -> Result<(), TrellisSetError> {
        self.diff_using(DiffStrategy::Hybrid, last, sink, cancel)
            .await
    }

    /// Like [`Set::diff`], using [`DiffStrategy::LeftToRight`]. Changes are
    /// sent in ascending order of their values.
    pub async fn diff_left_right(
        &self,
        last: &Self,
        sink: &mpsc::Sender<Change<Value>>,
        cancel: &CancellationToken,
    ) -> Result<(), TrellisSetError> {
        self.diff_using(DiffStrategy::LeftToRight, last, sink, cancel)
            .await
    }

    /// Send to `sink` every change that turns `last` into this set
    pub async fn diff_using(
        &self,
        strategy: DiffStrategy,
        last: &Self,
        sink: &mpsc::Sender<Change<Value>>,
        cancel: &CancellationToken,
    ) -> Result<(), TrellisSetError> {
        if self.hash() == last.hash() {
            return Ok(());
        }

        debug!(?strategy, last = %last.hash(), current = %self.hash(), "diff started");

        let mut emitter = Emitter::new(sink, cancel);
        match strategy {
            DiffStrategy::LeftToRight => left_to_right(last, self, &mut emitter).await?,
            DiffStrategy::TopDown | DiffStrategy::Hybrid => {
                top_down(strategy, last, self, &mut emitter).await?
            }
        }

        if emitter.stopped {
            debug!(emitted = emitter.emitted, "diff cancelled");
        } else {
            debug!(emitted = emitter.emitted, "diff finished");
        }
        Ok(())
    }
}

/// Delivers changes until the diff is cancelled or nobody is listening
struct Emitter<'a, Value> {
    sink: &'a mpsc::Sender<Change<Value>>,
    cancel: &'a CancellationToken,
    stopped: bool,
    emitted: usize,
}

impl<'a, Value> Emitter<'a, Value> {
    fn new(sink: &'a mpsc::Sender<Change<Value>>, cancel: &'a CancellationToken) -> Self {
        Self {
            sink,
            cancel,
            stopped: false,
            emitted: 0,
        }
    }

    fn cancelled(&mut self) -> bool {
        if !self.stopped && (self.cancel.is_cancelled() || self.sink.is_closed()) {
            self.stopped = true;
        }
        self.stopped
    }

    /// Deliver a change, waiting for room in the channel. Returns whether the
    /// diff should go on.
    async fn emit(&mut self, change: Change<Value>) -> bool {
        if self.cancelled() {
            return false;
        }

        let (sink, cancel) = (self.sink, self.cancel);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.stopped = true;
            }
            sent = sink.send(change) => match sent {
                Ok(()) => self.emitted += 1,
                Err(_) => self.stopped = true,
            }
        }

        !self.stopped
    }
}

/// A subtree still under comparison
struct Subtree<Value>
where
    Value: ValueType,
{
    level: u32,
    key: OrderedKey<Value>,
    hash: Blake3Hash,
    node: Option<Arc<Sequence<Value>>>,
}

impl<Value> Subtree<Value>
where
    Value: ValueType,
{
    fn root(root: &Arc<Sequence<Value>>) -> Result<Option<Self>, TrellisSetError> {
        Ok(root.reference()?.map(|reference| Subtree {
            level: root.level(),
            key: reference.key().clone(),
            hash: reference.hash().clone(),
            node: Some(root.clone()),
        }))
    }

    async fn open<Store>(self, store: &Store) -> Result<Arc<Sequence<Value>>, TrellisSetError>
    where
        Store: ChunkStore,
    {
        match self.node {
            Some(node) => Ok(node),
            None => Ok(Arc::new(Sequence::load(&self.hash, store).await?)),
        }
    }
}

/// The ordered, non-overlapping subtrees of one side of a diff
struct Frontier<'a, Value, Store>
where
    Value: ValueType,
    Store: ChunkStore,
{
    subtrees: Vec<Subtree<Value>>,
    store: &'a Store,
}

impl<'a, Value, Store> Frontier<'a, Value, Store>
where
    Value: ValueType,
    Store: ChunkStore,
{
    fn new(root: &Arc<Sequence<Value>>, store: &'a Store) -> Result<Self, TrellisSetError> {
        Ok(Self {
            subtrees: Subtree::root(root)?.into_iter().collect(),
            store,
        })
    }

    fn height(&self) -> Option<u32> {
        self.subtrees.iter().map(|subtree| subtree.level).max()
    }

    /// Replace every subtree at `height` with its children. Returns `false`
    /// if the diff was cancelled part way.
    async fn expand(
        &mut self,
        height: u32,
        emitter: &mut Emitter<'_, Value>,
    ) -> Result<bool, TrellisSetError> {
        let subtrees = std::mem::take(&mut self.subtrees);
        let mut expanded = Vec::with_capacity(subtrees.len());

        for subtree in subtrees {
            if subtree.level != height {
                expanded.push(subtree);
                continue;
            }
            if emitter.cancelled() {
                return Ok(false);
            }

            let node = subtree.open(self.store).await?;
            for (index, reference) in node.references()?.iter().enumerate() {
                expanded.push(Subtree {
                    level: height - 1,
                    key: reference.key().clone(),
                    hash: reference.hash().clone(),
                    node: node.materialized_child(index).cloned(),
                });
            }
        }

        self.subtrees = expanded;
        Ok(true)
    }

    /// Stream the values under the remaining subtrees in order
    fn into_values(self) -> FrontierValues<'a, Value, Store> {
        FrontierValues {
            pending: self.subtrees.into(),
            cursor: None,
            store: self.store,
        }
    }
}

/// Drop every pair of subtrees that the two frontiers share. Returns `false`
/// if the diff was cancelled part way.
fn prune<Value, Store>(
    last: &mut Frontier<'_, Value, Store>,
    current: &mut Frontier<'_, Value, Store>,
    emitter: &mut Emitter<'_, Value>,
) -> bool
where
    Value: ValueType,
    Store: ChunkStore,
{
    let mut last_kept = Vec::with_capacity(last.subtrees.len());
    let mut current_kept = Vec::with_capacity(current.subtrees.len());
    let mut last_subtrees = std::mem::take(&mut last.subtrees).into_iter().peekable();
    let mut current_subtrees = std::mem::take(&mut current.subtrees).into_iter().peekable();

    loop {
        if emitter.cancelled() {
            return false;
        }

        let order = match (last_subtrees.peek(), current_subtrees.peek()) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(left), Some(right)) => left.key.cmp(&right.key),
        };

        match order {
            Ordering::Less => last_kept.extend(last_subtrees.next()),
            Ordering::Greater => current_kept.extend(current_subtrees.next()),
            Ordering::Equal => {
                if let (Some(left), Some(right)) = (last_subtrees.next(), current_subtrees.next()) {
                    if left.hash != right.hash {
                        last_kept.push(left);
                        current_kept.push(right);
                    }
                }
            }
        }
    }

    last.subtrees = last_kept;
    current.subtrees = current_kept;
    true
}

async fn top_down<Distribution, Value, Store>(
    strategy: DiffStrategy,
    last: &Set<Distribution, Value, Store>,
    current: &Set<Distribution, Value, Store>,
    emitter: &mut Emitter<'_, Value>,
) -> Result<(), TrellisSetError>
where
    Distribution: crate::Distribution,
    Value: ValueType,
    Store: ChunkStore,
{
    let mut last_frontier = Frontier::new(last.root(), last.store())?;
    let mut current_frontier = Frontier::new(current.root(), current.store())?;

    loop {
        if !prune(&mut last_frontier, &mut current_frontier, emitter) {
            return Ok(());
        }

        let height = last_frontier
            .height()
            .max(current_frontier.height())
            .unwrap_or(0);
        if height == 0 {
            break;
        }
        if strategy == DiffStrategy::Hybrid
            && (height <= 1
                || last_frontier.subtrees.len() + current_frontier.subtrees.len()
                    > HYBRID_FRONTIER_LIMIT)
        {
            break;
        }

        if !last_frontier.expand(height, emitter).await?
            || !current_frontier.expand(height, emitter).await?
        {
            return Ok(());
        }
    }

    merge(
        last_frontier.into_values(),
        current_frontier.into_values(),
        emitter,
    )
    .await
}

/// The values under a list of ordered subtrees, read one subtree at a time
struct FrontierValues<'a, Value, Store>
where
    Value: ValueType,
    Store: ChunkStore,
{
    pending: VecDeque<Subtree<Value>>,
    cursor: Option<Cursor<Value, Store>>,
    store: &'a Store,
}

impl<Value, Store> FrontierValues<'_, Value, Store>
where
    Value: ValueType,
    Store: ChunkStore,
{
    fn current(&self) -> Option<&Value> {
        self.cursor.as_ref().and_then(Cursor::current)
    }

    /// Make sure the cursor rests on a value if any remain
    async fn settle(&mut self) -> Result<(), TrellisSetError> {
        while self.current().is_none() {
            let Some(subtree) = self.pending.pop_front() else {
                self.cursor = None;
                break;
            };
            let node = subtree.open(self.store).await?;
            self.cursor = Some(Cursor::at_start(node, self.store.clone()).await?);
        }
        Ok(())
    }

    async fn advance(&mut self) -> Result<(), TrellisSetError> {
        if let Some(cursor) = self.cursor.as_mut() {
            cursor.advance().await?;
        }
        self.settle().await
    }
}

async fn merge<Value, Store>(
    mut last: FrontierValues<'_, Value, Store>,
    mut current: FrontierValues<'_, Value, Store>,
    emitter: &mut Emitter<'_, Value>,
) -> Result<(), TrellisSetError>
where
    Value: ValueType,
    Store: ChunkStore,
{
    last.settle().await?;
    current.settle().await?;

    loop {
        if emitter.cancelled() {
            return Ok(());
        }

        let change = match (last.current(), current.current()) {
            (None, None) => return Ok(()),
            (Some(removed), None) => Change::Removed(removed.clone()),
            (None, Some(added)) => Change::Added(added.clone()),
            (Some(removed), Some(added)) => match removed.cmp(added) {
                Ordering::Less => Change::Removed(removed.clone()),
                Ordering::Greater => Change::Added(added.clone()),
                Ordering::Equal => {
                    last.advance().await?;
                    current.advance().await?;
                    continue;
                }
            },
        };

        match &change {
            Change::Removed(_) => last.advance().await?,
            Change::Added(_) => current.advance().await?,
        }
        if !emitter.emit(change).await {
            return Ok(());
        }
    }
}

async fn left_to_right<Distribution, Value, Store>(
    last: &Set<Distribution, Value, Store>,
    current: &Set<Distribution, Value, Store>,
    emitter: &mut Emitter<'_, Value>,
) -> Result<(), TrellisSetError>
where
    Distribution: crate::Distribution,
    Value: ValueType,
    Store: ChunkStore,
{
    let mut last_cursor = Cursor::at_start(last.root().clone(), last.store().clone()).await?;
    let mut current_cursor =
        Cursor::at_start(current.root().clone(), current.store().clone()).await?;

    loop {
        if emitter.cancelled() {
            return Ok(());
        }

        let change = match (last_cursor.current(), current_cursor.current()) {
            (None, None) => return Ok(()),
            (Some(removed), None) => Change::Removed(removed.clone()),
            (None, Some(added)) => Change::Added(added.clone()),
            (Some(removed), Some(added)) => match removed.cmp(added) {
                Ordering::Less => Change::Removed(removed.clone()),
                Ordering::Greater => Change::Added(added.clone()),
                Ordering::Equal => {
                    match shared_subtree(&last_cursor, &current_cursor)? {
                        Some(level) => {
                            last_cursor.skip_subtree(level).await?;
                            current_cursor.skip_subtree(level).await?;
                        }
                        None => {
                            last_cursor.advance().await?;
                            current_cursor.advance().await?;
                        }
                    }
                    continue;
                }
            },
        };

        match &change {
            Change::Removed(_) => last_cursor.advance().await?,
            Change::Added(_) => current_cursor.advance().await?,
        };
        if !emitter.emit(change).await {
            return Ok(());
        }
    }
}

/// The highest level at which both cursors sit at the start of subtrees
/// with the same hash
fn shared_subtree<Value, Store>(
    last: &Cursor<Value, Store>,
    current: &Cursor<Value, Store>,
) -> Result<Option<u32>, TrellisSetError>
where
    Value: ValueType,
    Store: ChunkStore,
{
    let highest = last.depth().min(current.depth()).saturating_sub(1) as u32;
    for level in (1..=highest).rev() {
        if let (Some(left), Some(right)) = (last.subtree_start(level), current.subtree_start(level))
        {
            if left.hash()? == right.hash()? {
                return Ok(Some(level));
            }
        }
    }
    Ok(None)
}
