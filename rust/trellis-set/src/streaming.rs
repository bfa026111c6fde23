use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use trellis_common::spawn_detached;

use crate::{ChunkStore, SequenceChunker, Set, TrellisSetError, ValueType, WritePolicy};

/// A [`Set`] under construction by a background task.
///
/// Values arrive over a channel and go straight into a chunker as they are
/// received, so building overlaps with whatever produces them. Values must
/// arrive in strictly ascending order; the first one that does not stops the
/// build with [`TrellisSetError::ContractViolation`]. Closing the sending half
/// finishes the build. There is no way to cancel a build other than closing
/// the channel early, which finishes the set with the values received so far.
pub struct StreamingSet<Distribution, Value, Store>
where
    Distribution: crate::Distribution,
    Value: ValueType,
    Store: ChunkStore,
{
    result: oneshot::Receiver<Result<Set<Distribution, Value, Store>, TrellisSetError>>,
}

impl<Distribution, Value, Store> StreamingSet<Distribution, Value, Store>
where
    Distribution: crate::Distribution,
    Value: ValueType,
    Store: ChunkStore,
{
    /// Create a bounded channel along with the [`StreamingSet`] that consumes
    /// it
    pub fn channel(store: Store, capacity: usize) -> (mpsc::Sender<Value>, Self) {
        let (sender, receiver) = mpsc::channel(capacity);
        (sender, Self::spawn(store, receiver))
    }

    /// Start building a [`Set`] from the values delivered to `receiver`
    pub fn spawn(store: Store, receiver: mpsc::Receiver<Value>) -> Self {
        let (tx, rx) = oneshot::channel();

        spawn_detached(async move {
            let result = consume::<Distribution, Value, Store>(store, receiver).await;
            if tx.send(result).is_err() {
                warn!("streaming build finished with nobody waiting for it");
            }
        });

        Self { result: rx }
    }

    /// Wait for the background build to finish
    pub async fn finish(self) -> Result<Set<Distribution, Value, Store>, TrellisSetError> {
        self.result
            .await
            .map_err(|_| TrellisSetError::BuildInterrupted)?
    }
}

async fn consume<Distribution, Value, Store>(
    store: Store,
    mut receiver: mpsc::Receiver<Value>,
) -> Result<Set<Distribution, Value, Store>, TrellisSetError>
where
    Distribution: crate::Distribution,
    Value: ValueType,
    Store: ChunkStore,
{
    let policy = WritePolicy::default();
    let mut chunker = SequenceChunker::<Distribution, Value, Store>::new(store.clone(), policy);
    let mut received = 0usize;

    while let Some(value) = receiver.recv().await {
        // Dropping the receiver on failure makes further sends fail
        chunker.append(value).await?;
        received += 1;
    }

    let root = chunker.done().await?;
    debug!(received, "streaming build finished");

    Set::from_root(root, store, policy)
}
