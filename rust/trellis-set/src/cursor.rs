use std::sync::Arc;

use async_stream::try_stream;
use futures_core::Stream;

use crate::{Block, ChunkStore, OrderedKey, Sequence, TrellisSetError, ValueType};

#[derive(Debug, Clone)]
struct Frame<Value>
where
    Value: ValueType,
{
    sequence: Arc<Sequence<Value>>,
    index: usize,
}

/// A read-only position within a tree, held as a stack of frames from the
/// root down to a leaf. Frame `i + 1` always holds the child selected by the
/// index of frame `i`.
///
/// Besides positions on values, a cursor may sit before the first value
/// (after retreating from it) or after the last one (after advancing past
/// it, or when a seek finds nothing). Neither is [`valid`](Cursor::valid).
///
/// Children that are not held in memory are read through the store as the
/// cursor descends into them.
#[derive(Clone)]
pub struct Cursor<Value, Store>
where
    Value: ValueType,
    Store: ChunkStore,
{
    frames: Vec<Frame<Value>>,
    store: Store,
    before_start: bool,
    after_end: bool,
}

impl<Value, Store> Cursor<Value, Store>
where
    Value: ValueType,
    Store: ChunkStore,
{
    fn new(store: Store) -> Self {
        Self {
            frames: Vec::new(),
            store,
            before_start: false,
            after_end: false,
        }
    }

    /// Position a cursor on the first value of the tree under `root`
    pub async fn at_start(root: Arc<Sequence<Value>>, store: Store) -> Result<Self, TrellisSetError> {
        let mut cursor = Self::new(store);
        cursor.descend_first(root).await?;
        cursor.settle();
        Ok(cursor)
    }

    /// Position a cursor on the first value that is not less than `value`,
    /// or after the last value if there is none
    pub async fn at_key(
        root: Arc<Sequence<Value>>,
        value: &Value,
        store: Store,
    ) -> Result<Self, TrellisSetError> {
        let mut cursor = Self::new(store);
        let mut node = root;
        loop {
            let index = node.search(value);
            if node.is_leaf() {
                cursor.frames.push(Frame {
                    sequence: node,
                    index,
                });
                break;
            }
            let child = node.child(index, &cursor.store).await?;
            cursor.frames.push(Frame {
                sequence: node,
                index,
            });
            node = child;
        }
        cursor.settle();
        Ok(cursor)
    }

    /// Position a cursor on the value at flattened position `index`, or
    /// after the last value if `index` is out of range
    pub async fn at_index(
        root: Arc<Sequence<Value>>,
        index: u64,
        store: Store,
    ) -> Result<Self, TrellisSetError> {
        let mut cursor = Self::new(store);
        let mut node = root;
        let mut index = index;
        loop {
            if node.is_leaf() {
                let index = usize::try_from(index).unwrap_or(usize::MAX).min(node.len());
                cursor.frames.push(Frame {
                    sequence: node,
                    index,
                });
                break;
            }
            let (position, rest) = node.locate(index)?;
            let child = node.child(position, &cursor.store).await?;
            cursor.frames.push(Frame {
                sequence: node,
                index: position,
            });
            node = child;
            index = rest;
        }
        cursor.settle();
        Ok(cursor)
    }

    /// Whether the cursor is positioned on a value
    pub fn valid(&self) -> bool {
        !self.before_start && !self.after_end && self.current().is_some()
    }

    /// The value under the cursor, if it is positioned on one
    pub fn current(&self) -> Option<&Value> {
        if self.before_start || self.after_end {
            return None;
        }
        let frame = self.frames.last()?;
        match frame.sequence.block() {
            Block::Leaf(values) => values.get(frame.index),
            Block::Meta { .. } => None,
        }
    }

    /// The [`OrderedKey`] of the value under the cursor
    pub fn current_key(&self) -> Option<OrderedKey<Value>> {
        self.current().map(ValueType::ordered_key)
    }

    /// The number of frames between the root and the leaf, inclusive
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// The flattened position of the cursor: the number of values before it.
    /// After the last value this is the length of the tree; before the first
    /// value there is no position.
    pub fn index(&self) -> Option<u64> {
        if self.before_start {
            return None;
        }
        if self.after_end {
            return Some(self.frames.first().map(|frame| frame.sequence.count()).unwrap_or(0));
        }
        Some(
            self.frames
                .iter()
                .map(|frame| frame.sequence.count_before(frame.index))
                .sum(),
        )
    }

    /// Move to the next value. Returns whether the cursor is positioned on a
    /// value afterwards.
    pub async fn advance(&mut self) -> Result<bool, TrellisSetError> {
        if self.before_start {
            self.before_start = false;
            self.settle();
            return Ok(self.valid());
        }
        if self.after_end {
            return Ok(false);
        }
        let Some(leaf) = self.frames.last_mut() else {
            return Ok(false);
        };

        leaf.index += 1;
        if leaf.index < leaf.sequence.len() {
            return Ok(true);
        }

        let leaf_frame = self.frames.len() - 1;
        self.skip_frame(leaf_frame).await
    }

    /// Move to the previous value. Returns whether the cursor is positioned
    /// on a value afterwards; retreating from the first value leaves the
    /// cursor before the start.
    pub async fn retreat(&mut self) -> Result<bool, TrellisSetError> {
        if self.before_start {
            return Ok(false);
        }
        if self.after_end {
            let Some(root) = self.frames.first().map(|frame| frame.sequence.clone()) else {
                return Ok(false);
            };
            self.frames.clear();
            self.after_end = false;
            self.descend_last(root).await?;
            if self.current().is_none() {
                self.before_start = true;
            }
            return Ok(self.valid());
        }

        let Some(leaf) = self.frames.last_mut() else {
            return Ok(false);
        };
        if leaf.index > 0 {
            leaf.index -= 1;
            return Ok(true);
        }

        let mut pivot = self.frames.len() - 1;
        while pivot > 0 {
            pivot -= 1;
            if self.frames[pivot].index > 0 {
                self.frames[pivot].index -= 1;
                let Frame { sequence, index } = self.frames[pivot].clone();
                let child = sequence.child(index, &self.store).await?;
                self.frames.truncate(pivot + 1);
                self.descend_last(child).await?;
                return Ok(true);
            }
        }

        self.before_start = true;
        Ok(false)
    }

    /// The node at `level` above the leaves on the cursor's path, provided
    /// the cursor sits on the first value of that node's subtree
    pub fn subtree_start(&self, level: u32) -> Option<&Arc<Sequence<Value>>> {
        if !self.valid() {
            return None;
        }
        let leaf_frame = self.frames.len() - 1;
        let frame = leaf_frame.checked_sub(level as usize)?;
        if self.frames[frame..].iter().all(|frame| frame.index == 0) {
            Some(&self.frames[frame].sequence)
        } else {
            None
        }
    }

    /// Move to the first value after the whole subtree at `level` that holds
    /// the current value. Returns whether the cursor is positioned on a value
    /// afterwards.
    pub async fn skip_subtree(&mut self, level: u32) -> Result<bool, TrellisSetError> {
        if !self.valid() {
            return Ok(false);
        }
        let leaf_frame = self.frames.len() - 1;
        let frame = leaf_frame.saturating_sub(level as usize);
        self.skip_frame(frame).await
    }

    /// Stream the values from the current position onward
    pub fn into_stream(mut self) -> impl Stream<Item = Result<Value, TrellisSetError>> {
        try_stream! {
            while let Some(value) = self.current().cloned() {
                yield value;
                self.advance().await?;
            }
        }
    }

    async fn skip_frame(&mut self, frame: usize) -> Result<bool, TrellisSetError> {
        let mut pivot = frame;
        while pivot > 0 {
            pivot -= 1;
            let Frame { sequence, index } = self.frames[pivot].clone();
            if index + 1 < sequence.len() {
                self.frames[pivot].index = index + 1;
                let child = sequence.child(index + 1, &self.store).await?;
                self.frames.truncate(pivot + 1);
                self.descend_first(child).await?;
                return Ok(true);
            }
        }

        self.after_end = true;
        Ok(false)
    }

    async fn descend_first(&mut self, mut node: Arc<Sequence<Value>>) -> Result<(), TrellisSetError> {
        while !node.is_leaf() {
            let child = node.child(0, &self.store).await?;
            self.frames.push(Frame {
                sequence: node,
                index: 0,
            });
            node = child;
        }
        self.frames.push(Frame {
            sequence: node,
            index: 0,
        });
        Ok(())
    }

    async fn descend_last(&mut self, mut node: Arc<Sequence<Value>>) -> Result<(), TrellisSetError> {
        while !node.is_leaf() {
            let index = node.len() - 1;
            let child = node.child(index, &self.store).await?;
            self.frames.push(Frame {
                sequence: node,
                index,
            });
            node = child;
        }
        let index = node.len().saturating_sub(1);
        self.frames.push(Frame {
            sequence: node,
            index,
        });
        Ok(())
    }

    fn settle(&mut self) {
        self.after_end = self
            .frames
            .last()
            .is_none_or(|frame| frame.index >= frame.sequence.len());
    }
}
