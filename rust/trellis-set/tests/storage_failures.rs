use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use trellis_common::Blake3Hash;
use trellis_set::{DiffStrategy, Geometric, Set, TrellisSetError};
use trellis_storage::{MemoryStorageBackend, StorageBackend, TrellisStorageError};

#[cfg(target_arch = "wasm32")]
use wasm_bindgen_test::wasm_bindgen_test;
#[cfg(target_arch = "wasm32")]
wasm_bindgen_test::wasm_bindgen_test_configure!(run_in_dedicated_worker);

/// A memory store that starts refusing reads or writes once an allowance runs
/// out. Clones share their allowances.
#[derive(Clone, Default)]
struct FlakyStore {
    inner: MemoryStorageBackend<Blake3Hash, Vec<u8>>,
    reads_left: Arc<AtomicUsize>,
    writes_left: Arc<AtomicUsize>,
}

impl FlakyStore {
    fn healthy() -> Self {
        let store = Self::default();
        store.allow_reads(usize::MAX);
        store.allow_writes(usize::MAX);
        store
    }

    fn allow_reads(&self, count: usize) {
        self.reads_left.store(count, Ordering::SeqCst);
    }

    fn allow_writes(&self, count: usize) {
        self.writes_left.store(count, Ordering::SeqCst);
    }

    fn take(allowance: &AtomicUsize) -> bool {
        allowance
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl StorageBackend for FlakyStore {
    type Key = Blake3Hash;
    type Value = Vec<u8>;
    type Error = TrellisStorageError;

    async fn set(&mut self, key: Self::Key, value: Self::Value) -> Result<(), Self::Error> {
        if !Self::take(&self.writes_left) {
            return Err(TrellisStorageError::StorageBackend("disk full".into()));
        }
        self.inner.set(key, value).await
    }

    async fn get(&self, key: &Self::Key) -> Result<Option<Self::Value>, Self::Error> {
        if !Self::take(&self.reads_left) {
            return Err(TrellisStorageError::StorageBackend("connection reset".into()));
        }
        self.inner.get(key).await
    }
}

type FlakySet = Set<Geometric<4>, u32, FlakyStore>;

fn is_backend_failure<T>(result: &Result<T, TrellisSetError>) -> bool {
    matches!(
        result,
        Err(TrellisSetError::Storage(TrellisStorageError::StorageBackend(_)))
    )
}

#[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
#[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
async fn it_fails_a_build_when_a_chunk_write_fails() -> Result<()> {
    let store = FlakyStore::healthy();
    store.allow_writes(5);

    let result = FlakySet::from_values(0..2_000, store).await;

    assert!(is_backend_failure(&result));
    assert!(!result.err().is_some_and(|error| error.is_contract_violation()));
    Ok(())
}

#[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
#[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
async fn it_fails_an_edit_when_a_chunk_write_fails() -> Result<()> {
    let store = FlakyStore::healthy();
    let base = FlakySet::from_values((0..4_000).map(|value| value * 2), store.clone()).await?;

    store.allow_writes(0);
    let mut editor = base.edit();
    for value in (1..4_000).step_by(97) {
        editor.insert(value);
    }

    assert!(is_backend_failure(&editor.finish().await));
    Ok(())
}

#[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
#[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
async fn it_surfaces_read_failures_from_a_reopened_set() -> Result<()> {
    let store = FlakyStore::healthy();
    let built = FlakySet::from_values(0..2_000, store.clone()).await?;
    let changed = FlakySet::from_values((0..2_000).filter(|value| *value != 1_000), store.clone()).await?;
    let reopened = FlakySet::from_hash(built.hash(), store.clone()).await?;
    assert!(reopened.height() > 0);

    store.allow_reads(0);

    assert!(is_backend_failure(&reopened.at(1_000).await));
    assert!(is_backend_failure(&reopened.has(&1_000).await));

    for strategy in [DiffStrategy::TopDown, DiffStrategy::Hybrid, DiffStrategy::LeftToRight] {
        let (sink, _changes) = mpsc::channel(4_096);
        let result = changed
            .diff_using(strategy, &reopened, &sink, &CancellationToken::new())
            .await;
        assert!(is_backend_failure(&result), "{strategy:?}");
    }

    store.allow_reads(usize::MAX);
    assert_eq!(reopened.at(1_000).await?, 1_000);
    Ok(())
}
