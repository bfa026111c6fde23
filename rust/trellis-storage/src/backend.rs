use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use trellis_common::{ConditionalSend, ConditionalSync};

use crate::TrellisStorageError;

mod memory;
pub use memory::*;

#[cfg(not(target_arch = "wasm32"))]
mod fs;
#[cfg(not(target_arch = "wasm32"))]
pub use fs::*;

/// A [StorageBackend] is a facade over some generalized storage substrate that
/// is capable of storing and/or retrieving values by some key. Sets use one
/// keyed by chunk hash to persist their encoded chunks.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait StorageBackend: Clone {
    /// The key type used by this [StorageBackend]
    type Key: ConditionalSync;
    /// The value type able to be stored by this [StorageBackend]
    type Value: ConditionalSend;
    /// The error type produced by this [StorageBackend]
    type Error: Into<TrellisStorageError>;

    /// Store the given value against the given key
    async fn set(&mut self, key: Self::Key, value: Self::Value) -> Result<(), Self::Error>;
    /// Retrieve a value (if any) stored against the given key
    async fn get(&self, key: &Self::Key) -> Result<Option<Self::Value>, Self::Error>;
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl<T> StorageBackend for Arc<Mutex<T>>
where
    T: StorageBackend + ConditionalSend,
{
    type Key = T::Key;
    type Value = T::Value;
    type Error = T::Error;

    async fn set(&mut self, key: Self::Key, value: Self::Value) -> Result<(), Self::Error> {
        let mut inner = self.lock().await;
        inner.set(key, value).await
    }

    async fn get(&self, key: &Self::Key) -> Result<Option<Self::Value>, Self::Error> {
        let inner = self.lock().await;
        inner.get(key).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use tokio::sync::Mutex;
    use trellis_common::Blake3Hash;

    use crate::{
        MeasuredStorageBackend, MemoryStorageBackend, StorageBackend, StorageCache,
        make_target_storage,
    };

    #[cfg(target_arch = "wasm32")]
    use wasm_bindgen_test::wasm_bindgen_test;

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn it_writes_and_reads_a_chunk() -> Result<()> {
        let (mut storage_backend, _tempdir) = make_target_storage().await?;

        let key = Blake3Hash::hash(&[4, 5, 6]);
        storage_backend.set(key.clone(), vec![4, 5, 6]).await?;

        assert_eq!(storage_backend.get(&key).await?, Some(vec![4, 5, 6]));
        assert_eq!(
            storage_backend.get(&Blake3Hash::hash(&[1, 2, 3])).await?,
            None
        );

        Ok(())
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn it_shares_a_backend_behind_a_mutex() -> Result<()> {
        let backend = Arc::new(Mutex::new(MemoryStorageBackend::<Blake3Hash, Vec<u8>>::default()));
        let mut writer = backend.clone();

        let key = Blake3Hash::hash(&[1]);
        writer.set(key.clone(), vec![1]).await?;

        assert_eq!(backend.get(&key).await?, Some(vec![1]));

        Ok(())
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn it_can_wrap_backends_in_a_transparent_cache() -> Result<()> {
        let (storage_backend, _tempdir) = make_target_storage().await?;
        let measured_storage_backend = MeasuredStorageBackend::new(storage_backend);
        let mut storage_backend = StorageCache::new(measured_storage_backend.clone(), 100)?;

        let first = Blake3Hash::hash(&[4, 5, 6]);
        let second = Blake3Hash::hash(&[5, 6, 7]);

        storage_backend.set(first.clone(), vec![4, 5, 6]).await?;
        storage_backend.set(second.clone(), vec![5, 6, 7]).await?;

        for _ in 0..100 {
            assert_eq!(storage_backend.get(&first).await?, Some(vec![4, 5, 6]));
            assert_eq!(storage_backend.get(&second).await?, Some(vec![5, 6, 7]));
        }

        assert_eq!(measured_storage_backend.writes(), 2);
        assert!(measured_storage_backend.reads() <= 2);

        Ok(())
    }
}
