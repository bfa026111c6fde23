use async_trait::async_trait;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use trellis_common::ConditionalSync;

use super::StorageBackend;

/// A [MeasuredStorageBackend] acts as a proxy over a [StorageBackend]
/// implementation that counts reads and writes. Clones share their counters,
/// so a clone kept aside observes every access made through the others.
#[derive(Clone)]
pub struct MeasuredStorageBackend<Backend>
where
    Backend: StorageBackend,
{
    reads: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
    backend: Backend,
}

impl<Backend> MeasuredStorageBackend<Backend>
where
    Backend: StorageBackend,
{
    /// Wrap the provided [StorageBackend] so that reads and writes to it may be
    /// measured.
    pub fn new(backend: Backend) -> Self {
        Self {
            reads: Arc::new(AtomicUsize::default()),
            writes: Arc::new(AtomicUsize::default()),
            backend,
        }
    }

    /// The aggregate number of reads from the wrapped [StorageBackend]
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// The aggregate number of writes to the wrapped [StorageBackend]
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    /// Zero both counters
    pub fn reset(&self) {
        self.reads.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
    }

    /// The wrapped [StorageBackend]
    pub fn inner(&self) -> &Backend {
        &self.backend
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl<Backend> StorageBackend for MeasuredStorageBackend<Backend>
where
    Backend: StorageBackend + ConditionalSync,
{
    type Key = Backend::Key;
    type Value = Backend::Value;
    type Error = Backend::Error;

    async fn set(&mut self, key: Self::Key, value: Self::Value) -> Result<(), Self::Error> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.backend.set(key, value).await
    }

    async fn get(&self, key: &Self::Key) -> Result<Option<Self::Value>, Self::Error> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.backend.get(key).await
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use trellis_common::Blake3Hash;

    use crate::{MeasuredStorageBackend, MemoryStorageBackend, StorageBackend};

    #[cfg(target_arch = "wasm32")]
    use wasm_bindgen_test::wasm_bindgen_test;

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn it_counts_through_every_clone() -> Result<()> {
        let measured =
            MeasuredStorageBackend::new(MemoryStorageBackend::<Blake3Hash, Vec<u8>>::default());
        let mut writer = measured.clone();

        let key = Blake3Hash::hash(b"chunk");
        writer.set(key.clone(), b"chunk".to_vec()).await?;
        writer.get(&key).await?;
        writer.get(&Blake3Hash::hash(b"missing")).await?;

        assert_eq!(measured.writes(), 1);
        assert_eq!(measured.reads(), 2);
        assert_eq!(measured.inner().len().await, 1);

        measured.reset();
        assert_eq!(measured.reads(), 0);
        assert_eq!(writer.writes(), 0);

        Ok(())
    }
}
