use async_trait::async_trait;
use chrono::Utc;
use pkg_constants::state::EVENT_LOG_CAPACITY;
use pkg_types::meta::{DynamicObject, Kind, ObjectKey};
use pkg_types::selector::LabelSelector;
use slatedb::Db;
use slatedb::object_store::local::LocalFileSystem;
use slatedb::object_store::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::store::{ObjectStore, StoreError, StoreResult, check_version};
use crate::watch::{EventLog, EventType};

/// Persistent object store backed by SlateDB on a local filesystem.
/// In production this would use S3/R2/MinIO via the `object_store` crate.
///
/// Objects are stored as JSON under their `ObjectKey::store_key()`. Writes are
/// serialized through `write_lock` so the version check and the put happen as one step.
#[derive(Clone)]
pub struct SlateObjectStore {
    db: Db,
    write_lock: Arc<Mutex<()>>,
    event_log: EventLog,
}

impl SlateObjectStore {
    /// Open (or create) a store rooted at `path` on the local filesystem.
    pub async fn open(path: &str) -> anyhow::Result<Self> {
        info!("Opening SlateDB object store at {}", path);

        // Ensure the data directory exists before opening the object store
        std::fs::create_dir_all(path)
            .map_err(|e| anyhow::anyhow!("Failed to create data directory {}: {}", path, e))?;

        let object_store = Arc::new(
            LocalFileSystem::new_with_prefix(path)
                .map_err(|e| anyhow::anyhow!("Failed to create local object store: {}", e))?,
        );
        let db = Db::open(Path::from("/"), object_store)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open SlateDB: {}", e))?;
        Ok(Self {
            db,
            write_lock: Arc::new(Mutex::new(())),
            event_log: EventLog::new(EVENT_LOG_CAPACITY),
        })
    }

    /// Gracefully close the store.
    pub async fn close(self) -> anyhow::Result<()> {
        info!("Closing SlateDB object store");
        self.db
            .close()
            .await
            .map_err(|e| anyhow::anyhow!("SlateDB close failed: {}", e))
    }

    async fn read_raw(&self, store_key: &str) -> StoreResult<Option<DynamicObject>> {
        match self.db.get(store_key.as_bytes()).await {
            Ok(Some(bytes)) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(anyhow::anyhow!("SlateDB get failed: {}", e).into()),
        }
    }

    async fn write_raw(&self, store_key: &str, obj: &DynamicObject) -> StoreResult<Vec<u8>> {
        let value = serde_json::to_vec(obj)?;
        self.db
            .put(store_key.as_bytes(), &value)
            .await
            .map_err(|e| anyhow::anyhow!("SlateDB put failed: {}", e))?;
        Ok(value)
    }
}

#[async_trait]
impl ObjectStore for SlateObjectStore {
    async fn get(&self, key: &ObjectKey) -> StoreResult<Option<DynamicObject>> {
        self.read_raw(&key.store_key()).await
    }

    async fn list(
        &self,
        kind: Kind,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> StoreResult<Vec<DynamicObject>> {
        let prefix = kind.key_prefix(namespace);
        let mut iter = self
            .db
            .scan_prefix(prefix.as_bytes())
            .await
            .map_err(|e| anyhow::anyhow!("SlateDB scan_prefix failed: {}", e))?;

        let mut results = Vec::new();
        while let Ok(Some(kv)) = iter.next().await {
            match serde_json::from_slice::<DynamicObject>(&kv.value) {
                Ok(obj) if selector.matches(&obj.metadata.labels) => results.push(obj),
                Ok(_) => {}
                Err(e) => debug!(
                    "Skipping undecodable entry {}: {}",
                    String::from_utf8_lossy(&kv.key),
                    e
                ),
            }
        }
        Ok(results)
    }

    async fn create(&self, mut obj: DynamicObject) -> StoreResult<DynamicObject> {
        let key = obj.key();
        let store_key = key.store_key();
        let _guard = self.write_lock.lock().await;
        if self.read_raw(&store_key).await?.is_some() {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }
        obj.metadata.resource_version = 1;
        obj.metadata.created_at = Some(Utc::now());
        let value = self.write_raw(&store_key, &obj).await?;
        self.event_log
            .emit(EventType::Put, store_key, Some(value))
            .await;
        Ok(obj)
    }

    async fn update(&self, mut obj: DynamicObject) -> StoreResult<DynamicObject> {
        let key = obj.key();
        let store_key = key.store_key();
        let _guard = self.write_lock.lock().await;
        let current = self
            .read_raw(&store_key)
            .await?
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        if current.metadata.resource_version != obj.metadata.resource_version {
            return Err(StoreError::Conflict(format!(
                "{}: have version {}, got {}",
                key, current.metadata.resource_version, obj.metadata.resource_version
            )));
        }
        obj.metadata.resource_version = current.metadata.resource_version + 1;
        obj.metadata.created_at = current.metadata.created_at;
        let value = self.write_raw(&store_key, &obj).await?;
        self.event_log
            .emit(EventType::Put, store_key, Some(value))
            .await;
        Ok(obj)
    }

    async fn delete(&self, key: &ObjectKey, expected_version: Option<u64>) -> StoreResult<()> {
        let store_key = key.store_key();
        let _guard = self.write_lock.lock().await;
        let current = self
            .read_raw(&store_key)
            .await?
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        check_version(key, current.metadata.resource_version, expected_version)?;
        self.db
            .delete(store_key.as_bytes())
            .await
            .map_err(|e| anyhow::anyhow!("SlateDB delete failed: {}", e))?;
        self.event_log.emit(EventType::Delete, store_key, None).await;
        Ok(())
    }

    fn events(&self) -> &EventLog {
        &self.event_log
    }
}
