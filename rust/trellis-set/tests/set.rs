use std::collections::BTreeSet;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use trellis_common::Blake3Hash;
use trellis_set::{Change, DiffStrategy, Geometric, Set, StreamingSet, TrellisSetError};
use trellis_storage::{
    MeasuredStorageBackend, MemoryStorageBackend, StorageCache, make_target_storage,
};

#[cfg(target_arch = "wasm32")]
use wasm_bindgen_test::wasm_bindgen_test;
#[cfg(target_arch = "wasm32")]
wasm_bindgen_test::wasm_bindgen_test_configure!(run_in_dedicated_worker);

type MemoryStore = MemoryStorageBackend<Blake3Hash, Vec<u8>>;
type SmallChunks = Geometric<4>;

async fn drain<Value>(mut changes: mpsc::Receiver<Change<Value>>) -> Vec<Change<Value>> {
    let mut collected = Vec::new();
    while let Some(change) = changes.recv().await {
        collected.push(change);
    }
    collected
}

#[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
#[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
async fn it_reports_a_removal_and_an_insertion_in_order() -> Result<()> {
    let store = MemoryStore::default();
    let last = Set::<SmallChunks, u32, _>::from_values([1, 2, 3, 5, 8], store.clone()).await?;
    let current = Set::<SmallChunks, u32, _>::from_values([1, 2, 4, 5, 8], store).await?;

    let (sink, changes) = mpsc::channel(8);
    current
        .diff_left_right(&last, &sink, &CancellationToken::new())
        .await?;
    drop(sink);

    assert_eq!(
        drain(changes).await,
        vec![Change::Removed(3), Change::Added(4)]
    );
    Ok(())
}

#[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
#[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
async fn it_streams_ascending_values_into_a_set() -> Result<()> {
    let store = MemoryStore::default();
    let (sender, streaming) = StreamingSet::<SmallChunks, u32, _>::channel(store.clone(), 4);

    for value in [1, 2, 3] {
        sender.send(value).await?;
    }
    drop(sender);

    let streamed = streaming.finish().await?;
    let built = Set::<SmallChunks, u32, _>::from_values([3, 1, 2], store).await?;

    assert_eq!(streamed, built);
    assert_eq!(streamed.to_vec().await?, vec![1, 2, 3]);
    Ok(())
}

#[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
#[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
async fn it_rejects_a_stream_that_goes_backwards() -> Result<()> {
    let (sender, streaming) = StreamingSet::<SmallChunks, u32, _>::channel(MemoryStore::default(), 4);

    for value in [2, 1, 3] {
        // Sends after the failure may find the task gone
        let _ = sender.send(value).await;
    }
    drop(sender);

    let result = streaming.finish().await;
    assert!(matches!(result, Err(TrellisSetError::ContractViolation(_))));
    assert!(result.err().is_some_and(|error| error.is_contract_violation()));
    Ok(())
}

#[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
#[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
async fn it_handles_the_empty_set() -> Result<()> {
    let store = MemoryStore::default();
    let empty = Set::<SmallChunks, u32, _>::empty(store.clone()).await?;

    assert_eq!(empty.len(), 0);
    assert!(empty.is_empty());
    assert!(matches!(
        empty.at(0).await,
        Err(TrellisSetError::OutOfRange {
            index: 0,
            length: 0
        })
    ));

    let reopened = Set::<SmallChunks, u32, _>::from_hash(empty.hash(), store).await?;
    assert!(reopened.is_empty());
    assert_eq!(reopened, empty);
    Ok(())
}

#[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
#[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
async fn it_is_idempotent_and_deterministic() -> Result<()> {
    let values: Vec<u32> = (0..5000).map(|value: u32| value.wrapping_mul(2_654_435_761) % 100_000).collect();

    let once = Set::<SmallChunks, u32, _>::from_values(values.clone(), MemoryStore::default()).await?;
    let twice = Set::<SmallChunks, u32, _>::from_values(
        values.iter().chain(values.iter()).copied(),
        MemoryStore::default(),
    )
    .await?;
    let reversed =
        Set::<SmallChunks, u32, _>::from_values(values.iter().rev().copied(), MemoryStore::default())
            .await?;

    assert_eq!(once.hash(), twice.hash());
    assert_eq!(once.hash(), reversed.hash());
    assert_eq!(
        once.len(),
        values.iter().collect::<BTreeSet<_>>().len()
    );

    let mut editor = once.edit();
    for value in &values {
        editor.insert(*value);
    }
    assert_eq!(editor.finish().await?, once);
    Ok(())
}

#[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
#[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
async fn it_shares_all_but_a_few_chunks_after_one_insertion() -> Result<()> {
    let store = MemoryStore::default();
    let base = Set::<SmallChunks, u32, _>::from_values((0..20_000).map(|value| value * 2), store).await?;

    let mut editor = base.edit();
    editor.insert(20_001);
    let edited = editor.finish().await?;

    let before = base.chunk_hashes().await?;
    let after = edited.chunk_hashes().await?;
    let novel = after.difference(&before).count();
    let height = edited.height().max(base.height()) as usize;

    assert!(before.len() > 1000);
    assert!(novel >= 1);
    assert!(
        novel <= 2 * (height + 2),
        "{novel} new chunks for a tree of height {height}"
    );
    Ok(())
}

#[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
#[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
async fn it_reads_nothing_when_diffing_a_set_with_itself() -> Result<()> {
    let store = MeasuredStorageBackend::new(MemoryStore::default());
    let built = Set::<SmallChunks, u32, _>::from_values(0..2000, store.clone()).await?;

    let last = Set::<SmallChunks, u32, _>::from_hash(built.hash(), store.clone()).await?;
    let current = Set::<SmallChunks, u32, _>::from_hash(built.hash(), store.clone()).await?;
    store.reset();

    let (sink, changes) = mpsc::channel(8);
    for strategy in [
        DiffStrategy::TopDown,
        DiffStrategy::Hybrid,
        DiffStrategy::LeftToRight,
    ] {
        current
            .diff_using(strategy, &last, &sink, &CancellationToken::new())
            .await?;
    }
    drop(sink);

    assert!(drain(changes).await.is_empty());
    assert_eq!(store.reads(), 0);
    Ok(())
}

#[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
#[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
async fn it_reads_only_what_differs_between_reopened_sets() -> Result<()> {
    let store = MeasuredStorageBackend::new(MemoryStore::default());
    let base = Set::<SmallChunks, u32, _>::from_values(0..10_000, store.clone()).await?;
    let mut editor = base.edit();
    editor.remove(5_000);
    let edited = editor.finish().await?;
    let total = base.chunk_hashes().await?.len();

    let last = Set::<SmallChunks, u32, _>::from_hash(base.hash(), store.clone()).await?;
    let current = Set::<SmallChunks, u32, _>::from_hash(edited.hash(), store.clone()).await?;

    for strategy in [
        DiffStrategy::TopDown,
        DiffStrategy::Hybrid,
        DiffStrategy::LeftToRight,
    ] {
        store.reset();
        let (sink, changes) = mpsc::channel(8);
        current
            .diff_using(strategy, &last, &sink, &CancellationToken::new())
            .await?;
        drop(sink);

        assert_eq!(drain(changes).await, vec![Change::Removed(5_000)]);
        assert!(
            store.reads() < total / 5,
            "{strategy:?} read {} of {total} chunks",
            store.reads()
        );
    }
    Ok(())
}

#[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
#[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
async fn it_stops_promptly_when_cancelled_mid_diff() -> Result<()> {
    let store = MemoryStore::default();
    let last = Set::<SmallChunks, u32, _>::from_values((0..5000).map(|value| value * 2), store.clone()).await?;
    let current =
        Set::<SmallChunks, u32, _>::from_values((0..5000).map(|value| value * 2 + 1), store).await?;

    for strategy in [
        DiffStrategy::TopDown,
        DiffStrategy::Hybrid,
        DiffStrategy::LeftToRight,
    ] {
        let (sink, mut changes) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        let diff = {
            let cancel = cancel.clone();
            let (current, last) = (&current, &last);
            async move {
                let result = current.diff_using(strategy, last, &sink, &cancel).await;
                drop(sink);
                result
            }
        };
        let consume = async {
            let mut received = 0usize;
            while changes.recv().await.is_some() {
                received += 1;
                if received == 3 {
                    cancel.cancel();
                }
            }
            received
        };

        let (result, received) = tokio::join!(diff, consume);
        result?;
        assert!(
            (3..=5).contains(&received),
            "{strategy:?} delivered {received} changes"
        );
    }
    Ok(())
}

#[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
#[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
async fn it_persists_through_the_target_backend() -> Result<()> {
    let (backend, _tempdir) = make_target_storage().await?;
    let store = StorageCache::new(backend.clone(), 64)?;

    let built = Set::<SmallChunks, String, _>::from_values(
        ["pear", "apple", "fig", "quince", "banana"].map(String::from),
        store.clone(),
    )
    .await?;

    let reopened = Set::<SmallChunks, String, _>::from_hash(built.hash(), backend).await?;
    assert_eq!(
        reopened.to_vec().await?,
        ["apple", "banana", "fig", "pear", "quince"].map(String::from)
    );
    assert!(reopened.has(&"fig".to_string()).await?);
    assert!(!reopened.has(&"grape".to_string()).await?);
    Ok(())
}
