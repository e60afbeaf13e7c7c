//! Persistent key-value store client.
//!
//! All values live in one named blob holding a JSON object of namespaces:
//!
//! ```json
//! { "JoinSplit": { "...": "..." }, "global": { "JoinSplit_combinedState": true } }
//! ```
//!
//! Writes are read-modify-write of the whole blob. Other applications on the
//! device own other keys in the same blob; the client only ever touches the
//! one key it was asked to write, and refuses to write over a blob it cannot
//! parse.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use roomlink_core::error::{Result, RoomLinkError};

use crate::device::BlobStore;

/// Name of the shared blob on the device.
pub const STORE_BLOB: &str = "Memory_Storage";
/// Namespace shared by every application on the device.
pub const GLOBAL_NAMESPACE: &str = "global";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    /// Keys private to this application.
    App,
    Global,
}

#[derive(Clone)]
pub struct KvStore {
    blobs: Arc<dyn BlobStore>,
    app: Arc<str>,
    write_lock: Arc<Mutex<()>>,
}

impl KvStore {
    pub fn new(blobs: Arc<dyn BlobStore>, app: impl Into<Arc<str>>) -> Self {
        Self {
            blobs,
            app: app.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    fn ns_name(&self, ns: Namespace) -> &str {
        match ns {
            Namespace::App => &self.app,
            Namespace::Global => GLOBAL_NAMESPACE,
        }
    }

    async fn load(&self) -> Result<Map<String, Value>> {
        let Some(raw) = self.blobs.get(STORE_BLOB).await? else {
            tracing::info!(blob = STORE_BLOB, "store blob absent, bootstrapping");
            self.blobs.set(STORE_BLOB, "{}").await?;
            return Ok(Map::new());
        };
        if raw.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(RoomLinkError::Internal(format!("{STORE_BLOB} is not a JSON object"))),
            Err(e) => Err(RoomLinkError::Internal(format!("{STORE_BLOB} is corrupt: {e}"))),
        }
    }

    /// Fails with `NotFound` when the key is absent.
    pub async fn read(&self, ns: Namespace, key: &str) -> Result<Value> {
        let root = self.load().await?;
        root.get(self.ns_name(ns))
            .and_then(|n| n.get(key))
            .cloned()
            .ok_or_else(|| RoomLinkError::NotFound(format!("{}.{key}", self.ns_name(ns))))
    }

    /// Overwrites `key` and returns the written value.
    pub async fn write(&self, ns: Namespace, key: &str, value: Value) -> Result<Value> {
        let _guard = self.write_lock.lock().await;
        let mut root = self.load().await?;
        let slot = root
            .entry(self.ns_name(ns).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            tracing::warn!(ns = self.ns_name(ns), "namespace was not an object, replacing");
            *slot = Value::Object(Map::new());
        }
        if let Value::Object(entries) = slot {
            entries.insert(key.to_string(), value.clone());
        }
        self.save(&root).await?;
        Ok(value)
    }

    /// Removes `key`; absent keys are not an error.
    pub async fn remove(&self, ns: Namespace, key: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut root = self.load().await?;
        let removed = root
            .get_mut(self.ns_name(ns))
            .and_then(Value::as_object_mut)
            .and_then(|entries| entries.remove(key))
            .is_some();
        if removed {
            self.save(&root).await?;
        }
        Ok(())
    }

    async fn save(&self, root: &Map<String, Value>) -> Result<()> {
        let blob = serde_json::to_string(root)
            .map_err(|e| RoomLinkError::Internal(format!("store encode failed: {e}")))?;
        self.blobs.set(STORE_BLOB, &blob).await
    }

    pub async fn read_as<T: DeserializeOwned>(&self, ns: Namespace, key: &str) -> Result<T> {
        let v = self.read(ns, key).await?;
        serde_json::from_value(v).map_err(|e| {
            RoomLinkError::Internal(format!("{}.{key} has unexpected shape: {e}", self.ns_name(ns)))
        })
    }

    /// `read_as`, with `default` on `NotFound`.
    pub async fn read_or<T: DeserializeOwned>(&self, ns: Namespace, key: &str, default: T) -> Result<T> {
        match self.read_as(ns, key).await {
            Ok(v) => Ok(v),
            Err(e) if e.is_not_found() => Ok(default),
            Err(e) => Err(e),
        }
    }

    pub async fn write_as<T: Serialize>(&self, ns: Namespace, key: &str, value: &T) -> Result<()> {
        let v = serde_json::to_value(value)
            .map_err(|e| RoomLinkError::Internal(format!("store encode failed: {e}")))?;
        self.write(ns, key, v).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::device::{FileBlobStore, MemoryBlobStore};
    use serde_json::json;

    fn mem_store(app: &str) -> (Arc<MemoryBlobStore>, KvStore) {
        let blobs = Arc::new(MemoryBlobStore::new());
        let kv = KvStore::new(blobs.clone(), app);
        (blobs, kv)
    }

    #[tokio::test]
    async fn missing_key_is_not_found_and_blob_bootstraps() {
        let (blobs, kv) = mem_store("JoinSplit");
        let err = kv.read(Namespace::Global, "JoinSplit_combinedState").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(blobs.get(STORE_BLOB).await.unwrap().as_deref(), Some("{}"));
    }

    #[tokio::test]
    async fn write_then_read_round_trips_and_reads_are_stable() {
        let (_, kv) = mem_store("JoinSplit");
        let v = json!({"10.0.0.110": {"online": true}});
        assert_eq!(kv.write(Namespace::Global, "JoinSplit_secondariesStatus", v.clone()).await.unwrap(), v);
        assert_eq!(kv.read(Namespace::Global, "JoinSplit_secondariesStatus").await.unwrap(), v);
        assert_eq!(kv.read(Namespace::Global, "JoinSplit_secondariesStatus").await.unwrap(), v);
    }

    #[tokio::test]
    async fn namespaces_are_disjoint() {
        let (blobs, kv) = mem_store("JoinSplit");
        kv.write(Namespace::App, "k", json!(1)).await.unwrap();
        kv.write(Namespace::Global, "k", json!(2)).await.unwrap();
        assert_eq!(kv.read(Namespace::App, "k").await.unwrap(), json!(1));
        assert_eq!(kv.read(Namespace::Global, "k").await.unwrap(), json!(2));

        let other = KvStore::new(blobs, "CameraMacro");
        assert!(other.read(Namespace::App, "k").await.unwrap_err().is_not_found());
        assert_eq!(other.read(Namespace::Global, "k").await.unwrap(), json!(2));
    }

    #[tokio::test]
    async fn foreign_keys_survive_writes() {
        let (blobs, kv) = mem_store("JoinSplit");
        blobs
            .set(STORE_BLOB, r#"{"CameraMacro":{"preset":3},"global":{"Other_key":"x"}}"#)
            .await
            .unwrap();

        kv.write(Namespace::Global, "JoinSplit_alt_config", json!("LAY2")).await.unwrap();
        kv.remove(Namespace::Global, "missing").await.unwrap();

        let root: Value = serde_json::from_str(&blobs.get(STORE_BLOB).await.unwrap().unwrap()).unwrap();
        assert_eq!(root["CameraMacro"]["preset"], 3);
        assert_eq!(root["global"]["Other_key"], "x");
        assert_eq!(root["global"]["JoinSplit_alt_config"], "LAY2");
    }

    #[tokio::test]
    async fn corrupt_blob_is_never_overwritten() {
        let (blobs, kv) = mem_store("JoinSplit");
        blobs.set(STORE_BLOB, "{not json").await.unwrap();
        assert!(kv.write(Namespace::Global, "k", json!(1)).await.is_err());
        assert_eq!(blobs.get(STORE_BLOB).await.unwrap().as_deref(), Some("{not json"));
    }

    #[tokio::test]
    async fn values_survive_process_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let kv = KvStore::new(Arc::new(FileBlobStore::new(dir.path())), "JoinSplit");
            kv.write(Namespace::Global, "JoinSplit_combinedState", json!(true)).await.unwrap();
        }
        let kv = KvStore::new(Arc::new(FileBlobStore::new(dir.path())), "JoinSplit");
        let combined: bool = kv.read_as(Namespace::Global, "JoinSplit_combinedState").await.unwrap();
        assert!(combined);
        let missing: bool = kv.read_or(Namespace::Global, "absent", false).await.unwrap();
        assert!(!missing);
    }
}
