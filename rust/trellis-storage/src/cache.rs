use crate::TrellisStorageError;

use super::StorageBackend;
use async_trait::async_trait;
use tokio::sync::Mutex;
use trellis_common::ConditionalSync;

use sieve_cache::SieveCache;
use std::{hash::Hash, sync::Arc};

/// A [StorageCache] acts as a transparent proxy to an inner
/// [StorageBackend] implementation. Writes pass through to the inner storage
/// and are remembered; reads are served from a [SieveCache] when possible.
///
/// Chunks are immutable once written under their hash, so a cached entry
/// never goes stale.
#[derive(Clone)]
pub struct StorageCache<Backend>
where
    Backend: StorageBackend,
    Backend::Key: Eq + Clone + Hash,
    Backend::Value: Clone,
{
    backend: Backend,
    cache: Arc<Mutex<SieveCache<Backend::Key, Backend::Value>>>,
}

impl<Backend> StorageCache<Backend>
where
    Backend: StorageBackend,
    Backend::Key: Eq + Clone + Hash,
    Backend::Value: Clone,
{
    /// Wrap the provided [StorageBackend] so that it is fronted by a cache
    /// holding up to `cache_size` entries
    pub fn new(backend: Backend, cache_size: usize) -> Result<Self, TrellisStorageError> {
        let cache = SieveCache::new(cache_size).map_err(|error| {
            TrellisStorageError::StorageBackend(format!("Could not initialize cache: {error}"))
        })?;

        Ok(Self {
            backend,
            cache: Arc::new(Mutex::new(cache)),
        })
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl<Backend> StorageBackend for StorageCache<Backend>
where
    Backend: StorageBackend + ConditionalSync,
    Backend::Key: Eq + Clone + Hash + ConditionalSync,
    Backend::Value: Clone + ConditionalSync,
{
    type Key = Backend::Key;
    type Value = Backend::Value;
    type Error = Backend::Error;

    async fn set(&mut self, key: Self::Key, value: Self::Value) -> Result<(), Self::Error> {
        self.cache.lock().await.insert(key.clone(), value.clone());
        self.backend.set(key, value).await
    }

    async fn get(&self, key: &Self::Key) -> Result<Option<Self::Value>, Self::Error> {
        let mut cache = self.cache.lock().await;
        if let Some(value) = cache.get(key) {
            return Ok(Some(value.clone()));
        }

        tracing::trace!("cache miss");
        if let Some(value) = self.backend.get(key).await? {
            cache.insert(key.clone(), value.clone());
            return Ok(Some(value));
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use trellis_common::Blake3Hash;

    use crate::{MeasuredStorageBackend, MemoryStorageBackend, StorageBackend, StorageCache};

    #[cfg(target_arch = "wasm32")]
    use wasm_bindgen_test::wasm_bindgen_test;

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn it_reads_through_once_per_missing_entry() -> Result<()> {
        let memory = MemoryStorageBackend::<Blake3Hash, Vec<u8>>::default();
        let key = Blake3Hash::hash(b"chunk");
        memory.clone().set(key.clone(), b"chunk".to_vec()).await?;

        let measured = MeasuredStorageBackend::new(memory);
        let cache = StorageCache::new(measured.clone(), 8)?;

        for _ in 0..10 {
            assert_eq!(cache.get(&key).await?, Some(b"chunk".to_vec()));
        }

        assert_eq!(measured.reads(), 1);

        Ok(())
    }

    #[test]
    fn it_rejects_a_zero_capacity() {
        let memory = MemoryStorageBackend::<Blake3Hash, Vec<u8>>::default();
        assert!(StorageCache::new(memory, 0).is_err());
    }
}
