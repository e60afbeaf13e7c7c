use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use dashmap::DashMap;

use roomlink_core::error::{Result, RoomLinkError};

use super::BlobStore;

fn check_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if !ok {
        return Err(RoomLinkError::BadRequest(format!("invalid blob name: {name:?}")));
    }
    Ok(())
}

/// One file per blob under `dir`; writes go through a temp file and rename
/// so a crash never leaves a half-written blob.
pub struct FileBlobStore {
    dir: PathBuf,
}

impl FileBlobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn get(&self, name: &str) -> Result<Option<String>> {
        check_name(name)?;
        match tokio::fs::read_to_string(self.path(name)).await {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RoomLinkError::Internal(format!("blob read failed ({name}): {e}"))),
        }
    }

    async fn set(&self, name: &str, blob: &str) -> Result<()> {
        check_name(name)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| RoomLinkError::Internal(format!("store dir create failed: {e}")))?;

        let tmp = self.dir.join(format!(".{name}.json.tmp"));
        tokio::fs::write(&tmp, blob)
            .await
            .map_err(|e| RoomLinkError::Internal(format!("blob write failed ({name}): {e}")))?;
        tokio::fs::rename(&tmp, self.path(name))
            .await
            .map_err(|e| RoomLinkError::Internal(format!("blob rename failed ({name}): {e}")))
    }
}

/// In-memory blobs, for tests and dry runs.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<String, String>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, name: &str) -> Result<Option<String>> {
        check_name(name)?;
        Ok(self.blobs.get(name).map(|b| b.value().clone()))
    }

    async fn set(&self, name: &str, blob: &str) -> Result<()> {
        check_name(name)?;
        self.blobs.insert(name.to_string(), blob.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path());
        assert_eq!(store.get("Memory_Storage").await.unwrap(), None);

        store.set("Memory_Storage", "{\"a\":1}").await.unwrap();
        drop(store);

        let reopened = FileBlobStore::new(dir.path());
        assert_eq!(
            reopened.get("Memory_Storage").await.unwrap().as_deref(),
            Some("{\"a\":1}")
        );
    }

    #[tokio::test]
    async fn names_are_restricted() {
        let store = MemoryBlobStore::new();
        assert!(store.set("../escape", "x").await.is_err());
        assert!(store.get("").await.is_err());
    }
}
