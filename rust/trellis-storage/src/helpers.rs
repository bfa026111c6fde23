use anyhow::Result;
use trellis_common::Blake3Hash;

#[cfg(not(target_arch = "wasm32"))]
use crate::FileSystemStorageBackend;

#[cfg(target_arch = "wasm32")]
use crate::MemoryStorageBackend;

#[cfg(not(target_arch = "wasm32"))]
type MakeTargetStorageOutput = (
    FileSystemStorageBackend<Blake3Hash, Vec<u8>>,
    tempfile::TempDir,
);
#[cfg(target_arch = "wasm32")]
type MakeTargetStorageOutput = (MemoryStorageBackend<Blake3Hash, Vec<u8>>, ());

/// Creates a platform-specific chunk store, for use in tests. On native
/// targets it is persisted in a temporary directory that lives as long as the
/// returned guard.
pub async fn make_target_storage() -> Result<MakeTargetStorageOutput> {
    #[cfg(target_arch = "wasm32")]
    return Ok((MemoryStorageBackend::default(), ()));

    #[cfg(not(target_arch = "wasm32"))]
    {
        let root = tempfile::tempdir()?;
        let storage = FileSystemStorageBackend::new(root.path()).await?;
        Ok((storage, root))
    }
}
