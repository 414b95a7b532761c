//! In-memory object store.
//!
//! Holds every object in a `BTreeMap` keyed by store key under a `tokio::sync::RwLock`.
//! Used by tests and by `store: memory` deployments where durability is not required.
//! It also fakes the store-side aggregation mechanism (see [`MemoryObjectStore::aggregated_rules`])
//! and can inject write conflicts to exercise retry paths.

use async_trait::async_trait;
use chrono::Utc;
use pkg_constants::state::EVENT_LOG_CAPACITY;
use pkg_types::meta::{DynamicObject, Kind, ObjectKey, Resource};
use pkg_types::rbac::{ClusterRole, PolicyRule};
use pkg_types::selector::LabelSelector;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::RwLock;

use crate::store::{ObjectStore, StoreError, StoreResult, check_version};
use crate::watch::{EventLog, EventType};

#[derive(Clone)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<BTreeMap<String, DynamicObject>>>,
    event_log: EventLog,
    writes: Arc<AtomicU64>,
    injected_conflicts: Arc<AtomicUsize>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: Arc::new(RwLock::new(BTreeMap::new())),
            event_log: EventLog::new(EVENT_LOG_CAPACITY),
            writes: Arc::new(AtomicU64::new(0)),
            injected_conflicts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of successful create/update/delete calls so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make the next `n` updates fail with a conflict, as if another writer won the race.
    pub fn inject_conflicts(&self, n: usize) {
        self.injected_conflicts.store(n, Ordering::SeqCst);
    }

    /// Seed an object without counting it as a write or emitting an event.
    pub async fn seed<R: Resource>(&self, obj: &R) -> anyhow::Result<()> {
        let mut dynamic = obj.to_dynamic()?;
        if dynamic.metadata.resource_version == 0 {
            dynamic.metadata.resource_version = 1;
        }
        if dynamic.metadata.created_at.is_none() {
            dynamic.metadata.created_at = Some(Utc::now());
        }
        let key = dynamic.key().store_key();
        self.objects.write().await.insert(key, dynamic);
        Ok(())
    }

    /// Store-side aggregation: the union of the rules of every cluster role matched by
    /// one of `role`'s aggregation selectors, in key order. Roles without an
    /// aggregation rule resolve to their own rules.
    pub async fn aggregated_rules(&self, role: &ClusterRole) -> Vec<PolicyRule> {
        let Some(aggregation) = &role.aggregation_rule else {
            return role.rules.clone();
        };
        let objects = self.objects.read().await;
        let mut rules = Vec::new();
        for obj in objects.values() {
            if obj.kind != Kind::ClusterRole || obj.metadata.name == role.metadata.name {
                continue;
            }
            let matched = aggregation
                .cluster_role_selectors
                .iter()
                .any(|sel| sel.matches(&obj.metadata.labels));
            if !matched {
                continue;
            }
            if let Ok(source) = ClusterRole::from_dynamic(obj.clone()) {
                rules.extend(source.rules);
            }
        }
        rules
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, key: &ObjectKey) -> StoreResult<Option<DynamicObject>> {
        Ok(self.objects.read().await.get(&key.store_key()).cloned())
    }

    async fn list(
        &self,
        kind: Kind,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> StoreResult<Vec<DynamicObject>> {
        let prefix = kind.key_prefix(namespace);
        let objects = self.objects.read().await;
        Ok(objects
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(_, obj)| selector.matches(&obj.metadata.labels))
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(&self, mut obj: DynamicObject) -> StoreResult<DynamicObject> {
        let key = obj.key();
        let store_key = key.store_key();
        let stored = {
            let mut objects = self.objects.write().await;
            if objects.contains_key(&store_key) {
                return Err(StoreError::AlreadyExists(key.to_string()));
            }
            obj.metadata.resource_version = 1;
            obj.metadata.created_at = Some(Utc::now());
            objects.insert(store_key.clone(), obj.clone());
            obj
        };
        self.writes.fetch_add(1, Ordering::SeqCst);
        let value = serde_json::to_vec(&stored)?;
        self.event_log
            .emit(EventType::Put, store_key, Some(value))
            .await;
        Ok(stored)
    }

    async fn update(&self, mut obj: DynamicObject) -> StoreResult<DynamicObject> {
        let key = obj.key();
        let store_key = key.store_key();
        if self.take_injected_conflict() {
            return Err(StoreError::Conflict(format!("{} (injected)", key)));
        }
        let stored = {
            let mut objects = self.objects.write().await;
            let current = objects
                .get(&store_key)
                .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
            if current.metadata.resource_version != obj.metadata.resource_version {
                return Err(StoreError::Conflict(format!(
                    "{}: have version {}, got {}",
                    key, current.metadata.resource_version, obj.metadata.resource_version
                )));
            }
            obj.metadata.resource_version = current.metadata.resource_version + 1;
            obj.metadata.created_at = current.metadata.created_at;
            objects.insert(store_key.clone(), obj.clone());
            obj
        };
        self.writes.fetch_add(1, Ordering::SeqCst);
        let value = serde_json::to_vec(&stored)?;
        self.event_log
            .emit(EventType::Put, store_key, Some(value))
            .await;
        Ok(stored)
    }

    async fn delete(&self, key: &ObjectKey, expected_version: Option<u64>) -> StoreResult<()> {
        let store_key = key.store_key();
        {
            let mut objects = self.objects.write().await;
            let current = objects
                .get(&store_key)
                .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
            check_version(key, current.metadata.resource_version, expected_version)?;
            objects.remove(&store_key);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.event_log.emit(EventType::Delete, store_key, None).await;
        Ok(())
    }

    fn events(&self) -> &EventLog {
        &self.event_log
    }
}
