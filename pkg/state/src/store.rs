use async_trait::async_trait;
use pkg_types::meta::{DynamicObject, Kind, ObjectKey, Resource};
use pkg_types::selector::LabelSelector;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::watch::EventLog;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    /// The write carried a stale `resource_version`.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("serialization: {0}")]
    Serialization(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    /// Transient errors are resolved by recomputing on the next trigger.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Conflict(_) | StoreError::Timeout(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// The object store consumed by the applier and the controllers.
///
/// Writes follow optimistic concurrency: `update` succeeds only when the
/// submitted `resource_version` equals the stored one, and every successful
/// write bumps it. `create` and `update` return the object as stored.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> StoreResult<Option<DynamicObject>>;

    async fn list(
        &self,
        kind: Kind,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> StoreResult<Vec<DynamicObject>>;

    async fn create(&self, obj: DynamicObject) -> StoreResult<DynamicObject>;

    async fn update(&self, obj: DynamicObject) -> StoreResult<DynamicObject>;

    /// Remove `key`. With `expected_version` set, the delete only happens while
    /// the stored `resource_version` still equals it; otherwise it is a conflict.
    async fn delete(&self, key: &ObjectKey, expected_version: Option<u64>) -> StoreResult<()>;

    /// Change notifications for every successful write.
    fn events(&self) -> &EventLog;
}

pub(crate) fn check_version(
    key: &ObjectKey,
    stored: u64,
    expected: Option<u64>,
) -> StoreResult<()> {
    match expected {
        Some(v) if v != stored => Err(StoreError::Conflict(format!(
            "{}: have version {}, got {}",
            key, stored, v
        ))),
        _ => Ok(()),
    }
}

/// Run a store call under a deadline.
pub async fn bounded<T, F>(timeout: Duration, op: &str, fut: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(format!(
            "{} exceeded {}ms",
            op,
            timeout.as_millis()
        ))),
    }
}

/// Typed `get`.
pub async fn get_as<R: Resource>(
    store: &dyn ObjectStore,
    key: &ObjectKey,
) -> StoreResult<Option<R>> {
    match store.get(key).await? {
        Some(obj) => Ok(Some(decode(obj)?)),
        None => Ok(None),
    }
}

/// Typed `list`. Objects that fail to decode are skipped.
pub async fn list_as<R: Resource>(
    store: &dyn ObjectStore,
    namespace: Option<&str>,
    selector: &LabelSelector,
) -> StoreResult<Vec<R>> {
    let objects = store.list(R::KIND, namespace, selector).await?;
    Ok(objects
        .into_iter()
        .filter_map(|obj| {
            let key = obj.key();
            match R::from_dynamic(obj) {
                Ok(r) => Some(r),
                Err(e) => {
                    tracing::warn!("Skipping undecodable {}: {}", key, e);
                    None
                }
            }
        })
        .collect())
}

/// Typed `update`.
pub async fn update_as<R: Resource>(store: &dyn ObjectStore, obj: &R) -> StoreResult<R> {
    let dynamic = obj
        .to_dynamic()
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    decode(store.update(dynamic).await?)
}

fn decode<R: Resource>(obj: DynamicObject) -> StoreResult<R> {
    R::from_dynamic(obj).map_err(|e| StoreError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounded_times_out() {
        let result: StoreResult<()> = bounded(Duration::from_millis(10), "get", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        let err = result.unwrap_err();
        assert!(matches!(err, StoreError::Timeout(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn bounded_passes_through() {
        let result = bounded(Duration::from_secs(1), "get", async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[test]
    fn permanent_errors_are_not_transient() {
        assert!(!StoreError::NotFound("x".into()).is_transient());
        assert!(StoreError::NotFound("x".into()).is_not_found());
        assert!(StoreError::Conflict("x".into()).is_transient());
    }
}
