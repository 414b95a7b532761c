use pkg_constants::labels::OWNER_SET_LABEL_KEY;
use pkg_state::store::{bounded, get_as};
use pkg_state::{ObjectStore, StoreError};
use pkg_types::meta::{DynamicObject, ObjectKey, Resource};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::ApplyError;
use crate::record::OwnershipRecord;
use crate::set::DesiredObjectSet;

/// What one apply did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    pub created: Vec<ObjectKey>,
    pub updated: Vec<ObjectKey>,
    pub deleted: Vec<ObjectKey>,
    pub unchanged: Vec<ObjectKey>,
    /// Prune candidates left alone because they no longer carry this set's marker.
    pub skipped: Vec<ObjectKey>,
    /// Prune candidates that were already gone.
    pub missing: Vec<ObjectKey>,
    /// Whether the ownership record was rewritten.
    pub record_written: bool,
}

impl ApplyReport {
    /// Object writes, excluding the ownership record.
    pub fn writes(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }

    pub fn is_noop(&self) -> bool {
        self.writes() == 0 && !self.record_written
    }
}

impl std::fmt::Display for ApplyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} deleted, {} unchanged, {} skipped, {} missing",
            self.created.len(),
            self.updated.len(),
            self.deleted.len(),
            self.unchanged.len(),
            self.skipped.len(),
            self.missing.len()
        )
    }
}

#[derive(Debug, Default)]
struct Plan {
    creates: Vec<DynamicObject>,
    updates: Vec<DynamicObject>,
    /// Prune targets with the version the ownership check saw.
    deletes: Vec<(ObjectKey, u64)>,
}

impl Plan {
    fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

/// Converges owner sets into the store.
///
/// An apply reads everything first and writes nothing when the store already
/// matches. Otherwise the ownership record is marked pending with the new key set,
/// objects are created, updated and pruned, and the record is committed. An apply
/// interrupted between those steps leaves the pending keys behind so the next
/// apply still prunes them.
#[derive(Clone)]
pub struct Applier {
    store: Arc<dyn ObjectStore>,
    timeout: Duration,
}

impl Applier {
    pub fn new(store: Arc<dyn ObjectStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn apply(&self, set: DesiredObjectSet) -> Result<ApplyReport, ApplyError> {
        let owner = set.owner_set_id().to_string();
        let record_key = OwnershipRecord::key_for(&owner);
        let record: Option<OwnershipRecord> = bounded(
            self.timeout,
            "get ownership record",
            get_as(self.store.as_ref(), &record_key),
        )
        .await?;

        let desired_keys = set.keys();
        let mut report = ApplyReport::default();
        let plan = self.plan(&set, record.as_ref(), &mut report).await?;

        let record_matches = match &record {
            Some(r) => r.is_committed(&desired_keys),
            None => desired_keys.is_empty(),
        };
        if plan.is_empty() && record_matches {
            debug!("Owner set {}: up to date ({})", owner, report);
            return Ok(report);
        }

        let mut record = record.unwrap_or_else(|| OwnershipRecord::new(&owner));
        record.pending = Some(desired_keys.clone());
        let mut record = self.write_record(record).await?;

        for obj in plan.creates {
            let key = obj.key();
            bounded(self.timeout, "create", self.store.create(obj)).await?;
            debug!("Owner set {}: created {}", owner, key);
            report.created.push(key);
        }
        for obj in plan.updates {
            let key = obj.key();
            bounded(self.timeout, "update", self.store.update(obj)).await?;
            debug!("Owner set {}: updated {}", owner, key);
            report.updated.push(key);
        }
        for (key, version) in plan.deletes {
            let deleted = bounded(
                self.timeout,
                "delete",
                self.store.delete(&key, Some(version)),
            )
            .await;
            match deleted {
                Ok(()) => {
                    debug!("Owner set {}: deleted {}", owner, key);
                    report.deleted.push(key);
                }
                Err(StoreError::NotFound(_)) => {
                    warn!("Owner set {}: {} vanished before prune", owner, key);
                    report.missing.push(key);
                }
                Err(StoreError::Conflict(reason)) => {
                    // Changed since the plan read it: prune only if still ours.
                    let current = bounded(self.timeout, "get", self.store.get(&key)).await?;
                    match current {
                        Some(obj) if carries_marker(&obj, &owner) => {
                            return Err(StoreError::Conflict(reason).into());
                        }
                        Some(_) => {
                            warn!(
                                "Owner set {}: not pruning {}, it changed hands during apply",
                                owner, key
                            );
                            report.skipped.push(key);
                        }
                        None => report.missing.push(key),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        record.keys = desired_keys;
        record.pending = None;
        record.generation += 1;
        let generation = record.generation;
        self.write_record(record).await?;
        report.record_written = true;

        info!(
            "Owner set {}: applied generation {} ({})",
            owner, generation, report
        );
        Ok(report)
    }

    /// Read-only pass deciding every write.
    async fn plan(
        &self,
        set: &DesiredObjectSet,
        record: Option<&OwnershipRecord>,
        report: &mut ApplyReport,
    ) -> Result<Plan, ApplyError> {
        let mut plan = Plan::default();

        for desired in set.objects() {
            let key = desired.key();
            match bounded(self.timeout, "get", self.store.get(&key)).await? {
                None => plan.creates.push(desired.clone()),
                Some(current) => match merge(&current, desired) {
                    Some(updated) => {
                        if current.metadata.label(OWNER_SET_LABEL_KEY) != Some(set.owner_set_id()) {
                            info!("Owner set {}: adopting {}", set.owner_set_id(), key);
                        }
                        plan.updates.push(updated);
                    }
                    None => report.unchanged.push(key),
                },
            }
        }

        let candidates: BTreeSet<ObjectKey> = record
            .map(OwnershipRecord::owned_keys)
            .unwrap_or_default()
            .into_iter()
            .filter(|k| !set.contains(k))
            .collect();
        for key in candidates {
            match bounded(self.timeout, "get", self.store.get(&key)).await? {
                None => {
                    debug!("Owner set {}: prune target {} already gone", set.owner_set_id(), key);
                    report.missing.push(key);
                }
                Some(current) if carries_marker(&current, set.owner_set_id()) => {
                    plan.deletes.push((key, current.metadata.resource_version));
                }
                Some(_) => {
                    warn!(
                        "Owner set {}: not pruning {}, it no longer carries the owner marker",
                        set.owner_set_id(),
                        key
                    );
                    report.skipped.push(key);
                }
            }
        }

        Ok(plan)
    }

    async fn write_record(&self, record: OwnershipRecord) -> Result<OwnershipRecord, ApplyError> {
        let obj = record.to_dynamic().map_err(|e| ApplyError::Encode {
            key: record.key().to_string(),
            reason: e.to_string(),
        })?;
        let stored = if record.metadata.resource_version == 0 {
            bounded(self.timeout, "create ownership record", self.store.create(obj)).await?
        } else {
            bounded(self.timeout, "update ownership record", self.store.update(obj)).await?
        };
        OwnershipRecord::from_dynamic(stored).map_err(|e| ApplyError::Encode {
            key: record.key().to_string(),
            reason: e.to_string(),
        })
    }
}

fn carries_marker(obj: &DynamicObject, owner: &str) -> bool {
    obj.metadata.label(OWNER_SET_LABEL_KEY) == Some(owner)
}

/// The object to write when `current` has drifted from `desired`, or `None`.
///
/// Only labels and annotations the desired object sets are compared; everything
/// else on `current` (including store-managed metadata) is kept.
fn merge(current: &DynamicObject, desired: &DynamicObject) -> Option<DynamicObject> {
    let labels_match = desired
        .metadata
        .labels
        .iter()
        .all(|(k, v)| current.metadata.labels.get(k) == Some(v));
    let annotations_match = desired
        .metadata
        .annotations
        .iter()
        .all(|(k, v)| current.metadata.annotations.get(k) == Some(v));
    if labels_match && annotations_match && current.data == desired.data {
        return None;
    }

    let mut merged = current.clone();
    merged.metadata.labels.extend(
        desired
            .metadata
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    merged.metadata.annotations.extend(
        desired
            .metadata
            .annotations
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    merged.data = desired.data.clone();
    Some(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pkg_state::StoreResult;
    use pkg_state::memory::MemoryObjectStore;
    use pkg_state::watch::EventLog;
    use pkg_types::meta::{Kind, ObjectMeta};
    use pkg_types::selector::LabelSelector;
    use pkg_types::rbac::{ClusterRole, PolicyRule};

    const OWNER: &str = "test-owner";

    fn role(name: &str, verb: &str) -> ClusterRole {
        ClusterRole {
            metadata: ObjectMeta::cluster(name),
            rules: vec![PolicyRule {
                api_groups: vec!["".into()],
                resources: vec!["persistentvolumeclaims".into()],
                verbs: vec![verb.into()],
                ..Default::default()
            }],
            aggregation_rule: None,
        }
    }

    fn key(name: &str) -> ObjectKey {
        ObjectKey::cluster(Kind::ClusterRole, name)
    }

    fn set(roles: &[ClusterRole]) -> DesiredObjectSet {
        DesiredObjectSet::from_resources(OWNER, roles.iter()).unwrap()
    }

    fn applier(store: &MemoryObjectStore) -> Applier {
        Applier::new(Arc::new(store.clone()), Duration::from_secs(1))
    }

    async fn record(store: &MemoryObjectStore) -> OwnershipRecord {
        get_as(store, &OwnershipRecord::key_for(OWNER))
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn second_apply_writes_nothing() {
        let store = MemoryObjectStore::new();
        let applier = applier(&store);
        let desired = [role("a", "get"), role("b", "list")];

        let first = applier.apply(set(&desired)).await.unwrap();
        assert_eq!(first.created, vec![key("a"), key("b")]);
        assert!(first.record_written);
        // two objects plus pending and committed record writes
        assert_eq!(store.write_count(), 4);

        let second = applier.apply(set(&desired)).await.unwrap();
        assert!(second.is_noop());
        assert_eq!(second.unchanged.len(), 2);
        assert_eq!(store.write_count(), 4);

        let record = record(&store).await;
        assert_eq!(record.generation, 1);
        assert!(record.pending.is_none());
    }

    #[tokio::test]
    async fn dropped_object_is_pruned() {
        let store = MemoryObjectStore::new();
        let applier = applier(&store);
        applier
            .apply(set(&[role("a", "get"), role("b", "get")]))
            .await
            .unwrap();

        let report = applier.apply(set(&[role("a", "get")])).await.unwrap();
        assert_eq!(report.deleted, vec![key("b")]);
        assert_eq!(report.unchanged, vec![key("a")]);
        assert!(store.get(&key("b")).await.unwrap().is_none());
        assert!(store.get(&key("a")).await.unwrap().is_some());

        let record = record(&store).await;
        assert_eq!(record.keys, [key("a")].into_iter().collect());
        assert_eq!(record.generation, 2);
    }

    #[tokio::test]
    async fn unmarked_object_is_not_pruned() {
        let store = MemoryObjectStore::new();
        let applier = applier(&store);
        applier
            .apply(set(&[role("a", "get"), role("b", "get")]))
            .await
            .unwrap();

        // someone else takes b over
        let mut b = store.get(&key("b")).await.unwrap().unwrap();
        b.metadata.labels.remove(OWNER_SET_LABEL_KEY);
        store.update(b).await.unwrap();

        let report = applier.apply(set(&[role("a", "get")])).await.unwrap();
        assert!(report.deleted.is_empty());
        assert_eq!(report.skipped, vec![key("b")]);
        assert!(store.get(&key("b")).await.unwrap().is_some());
    }

    /// Hands `target` to another owner right before the delete reaches the store.
    struct HandoverStore {
        inner: MemoryObjectStore,
        target: ObjectKey,
    }

    #[async_trait]
    impl ObjectStore for HandoverStore {
        async fn get(&self, key: &ObjectKey) -> StoreResult<Option<DynamicObject>> {
            self.inner.get(key).await
        }

        async fn list(
            &self,
            kind: Kind,
            namespace: Option<&str>,
            selector: &LabelSelector,
        ) -> StoreResult<Vec<DynamicObject>> {
            self.inner.list(kind, namespace, selector).await
        }

        async fn create(&self, obj: DynamicObject) -> StoreResult<DynamicObject> {
            self.inner.create(obj).await
        }

        async fn update(&self, obj: DynamicObject) -> StoreResult<DynamicObject> {
            self.inner.update(obj).await
        }

        async fn delete(&self, key: &ObjectKey, expected_version: Option<u64>) -> StoreResult<()> {
            if *key == self.target {
                if let Some(mut obj) = self.inner.get(key).await? {
                    obj.metadata
                        .labels
                        .insert(OWNER_SET_LABEL_KEY.into(), "someone-else".into());
                    self.inner.update(obj).await?;
                }
            }
            self.inner.delete(key, expected_version).await
        }

        fn events(&self) -> &EventLog {
            self.inner.events()
        }
    }

    #[tokio::test]
    async fn object_taken_over_during_apply_is_not_pruned() {
        let store = MemoryObjectStore::new();
        applier(&store)
            .apply(set(&[role("a", "get"), role("b", "get")]))
            .await
            .unwrap();

        let handover = Applier::new(
            Arc::new(HandoverStore {
                inner: store.clone(),
                target: key("b"),
            }),
            Duration::from_secs(1),
        );
        let report = handover.apply(set(&[role("a", "get")])).await.unwrap();
        assert!(report.deleted.is_empty());
        assert_eq!(report.skipped, vec![key("b")]);

        let b = store.get(&key("b")).await.unwrap().unwrap();
        assert_eq!(b.metadata.label(OWNER_SET_LABEL_KEY), Some("someone-else"));
        assert_eq!(record(&store).await.keys, [key("a")].into_iter().collect());
    }

    #[tokio::test]
    async fn objects_outside_the_set_are_untouched() {
        let store = MemoryObjectStore::new();
        store.seed(&role("foreign", "*")).await.unwrap();
        let applier = applier(&store);
        applier.apply(set(&[role("a", "get")])).await.unwrap();
        applier.apply(set(&[])).await.unwrap();

        assert!(store.get(&key("foreign")).await.unwrap().is_some());
        assert!(store.get(&key("a")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pending_keys_from_interrupted_apply_are_pruned() {
        let store = MemoryObjectStore::new();
        let mut orphan = role("orphan", "get");
        orphan
            .metadata
            .labels
            .insert(OWNER_SET_LABEL_KEY.into(), OWNER.into());
        store.seed(&orphan).await.unwrap();

        let mut interrupted = OwnershipRecord::new(OWNER);
        interrupted.pending = Some([key("orphan")].into_iter().collect());
        store.seed(&interrupted).await.unwrap();

        let report = applier(&store)
            .apply(set(&[role("a", "get")]))
            .await
            .unwrap();
        assert_eq!(report.deleted, vec![key("orphan")]);
        assert_eq!(report.created, vec![key("a")]);
        assert!(record(&store).await.pending.is_none());
    }

    #[tokio::test]
    async fn drift_update_keeps_unrelated_labels() {
        let store = MemoryObjectStore::new();
        let applier = applier(&store);
        applier.apply(set(&[role("a", "get")])).await.unwrap();

        let mut current = store.get(&key("a")).await.unwrap().unwrap();
        current.metadata.labels.insert("team".into(), "storage".into());
        let current = store.update(current).await.unwrap();

        let report = applier.apply(set(&[role("a", "list")])).await.unwrap();
        assert_eq!(report.updated, vec![key("a")]);

        let stored = store.get(&key("a")).await.unwrap().unwrap();
        assert_eq!(stored.metadata.label("team"), Some("storage"));
        assert_eq!(stored.metadata.label(OWNER_SET_LABEL_KEY), Some(OWNER));
        assert_eq!(stored.metadata.created_at, current.metadata.created_at);
        assert!(stored.metadata.resource_version > current.metadata.resource_version);
        let decoded: ClusterRole = stored.decode().unwrap();
        assert_eq!(decoded.rules[0].verbs, vec!["list"]);
    }

    #[tokio::test]
    async fn vanished_prune_target_is_reported_missing() {
        let store = MemoryObjectStore::new();
        let applier = applier(&store);
        applier
            .apply(set(&[role("a", "get"), role("b", "get")]))
            .await
            .unwrap();
        store.delete(&key("b"), None).await.unwrap();

        let report = applier.apply(set(&[role("a", "get")])).await.unwrap();
        assert_eq!(report.missing, vec![key("b")]);
        assert!(report.deleted.is_empty());
        assert!(report.record_written);
    }

    #[tokio::test]
    async fn conflict_aborts_apply() {
        let store = MemoryObjectStore::new();
        let applier = applier(&store);
        applier.apply(set(&[role("a", "get")])).await.unwrap();

        store.inject_conflicts(1);
        let err = applier.apply(set(&[role("a", "list")])).await.unwrap_err();
        assert!(matches!(err, ApplyError::Store(StoreError::Conflict(_))));
        assert!(err.is_transient());

        // the next trigger converges
        let report = applier.apply(set(&[role("a", "list")])).await.unwrap();
        assert_eq!(report.updated, vec![key("a")]);
    }
}
