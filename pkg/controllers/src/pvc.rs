use futures_util::future::join_all;
use pkg_constants::labels::MOUNTED_BY_VMI_LABEL_KEY;
use pkg_constants::state::MAX_CONFLICT_RETRIES;
use pkg_metrics::{MetricsRegistry, PVC_LABEL_WRITES_TOTAL};
use pkg_state::store::{bounded, list_as, update_as};
use pkg_state::{ObjectStore, StoreError, StoreResult};
use pkg_types::instance::VirtualMachineInstance;
use pkg_types::meta::{Kind, Resource};
use pkg_types::selector::LabelSelector;
use pkg_types::volume::PersistentVolumeClaim;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Canonical label value for `claim`: the sorted, deduplicated names of live
/// instances referencing it, comma-joined. Empty when nothing references it.
pub fn mounted_by(claim: &str, instances: &[VirtualMachineInstance]) -> String {
    let names: BTreeSet<&str> = instances
        .iter()
        .filter(|vmi| !vmi.metadata.is_terminating())
        .filter(|vmi| vmi.claim_names().any(|c| c == claim))
        .map(|vmi| vmi.metadata.name.as_str())
        .collect();
    names.into_iter().collect::<Vec<_>>().join(",")
}

/// Keeps `vm.virtrs.io/mounted-by-vmi` on every claim equal to the set of
/// instances that mount it.
///
/// Triggered by claim and instance changes from the store's event log,
/// coalesced per namespace, plus a periodic resync of every namespace with claims.
pub struct PvcMountedByController {
    store: Arc<dyn ObjectStore>,
    metrics: Arc<MetricsRegistry>,
    timeout: Duration,
    resync_interval: Duration,
}

impl PvcMountedByController {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        metrics: Arc<MetricsRegistry>,
        timeout: Duration,
        resync_interval: Duration,
    ) -> Self {
        Self {
            store,
            metrics,
            timeout,
            resync_interval,
        }
    }

    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "PvcMountedByController started (resync={}s)",
                self.resync_interval.as_secs()
            );
            let mut event_rx = self.store.events().subscribe();
            let mut interval = tokio::time::interval(self.resync_interval);
            let claims_prefix = Kind::PersistentVolumeClaim.key_prefix(None);
            let instances_prefix = Kind::VirtualMachineInstance.key_prefix(None);
            let relevant =
                |key: &str| key.starts_with(&claims_prefix) || key.starts_with(&instances_prefix);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.resync().await {
                            warn!("PvcMountedByController resync error: {}", e);
                        }
                    }
                    result = event_rx.recv() => {
                        match result {
                            Ok(event) => {
                                let mut dirty = BTreeSet::new();
                                if relevant(&event.key) {
                                    dirty.extend(event.namespace().map(str::to_string));
                                }
                                // Coalesce whatever else is already queued.
                                while let Ok(event) = event_rx.try_recv() {
                                    if relevant(&event.key) {
                                        dirty.extend(event.namespace().map(str::to_string));
                                    }
                                }
                                if !dirty.is_empty() {
                                    self.reconcile_namespaces(dirty).await;
                                }
                            }
                            Err(RecvError::Lagged(skipped)) => {
                                warn!(
                                    "PvcMountedByController lagged {} events, resyncing",
                                    skipped
                                );
                                if let Err(e) = self.resync().await {
                                    warn!("PvcMountedByController resync error: {}", e);
                                }
                                interval.reset();
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }
                }
            }
        })
    }

    /// Reconcile every namespace that has claims.
    pub async fn resync(&self) -> anyhow::Result<()> {
        let claims: Vec<PersistentVolumeClaim> = bounded(
            self.timeout,
            "list claims",
            list_as(self.store.as_ref(), None, &LabelSelector::everything()),
        )
        .await?;
        let namespaces: BTreeSet<String> = claims
            .into_iter()
            .filter_map(|c| c.metadata.namespace)
            .collect();
        self.reconcile_namespaces(namespaces).await;
        Ok(())
    }

    async fn reconcile_namespaces(&self, namespaces: BTreeSet<String>) {
        let results = join_all(namespaces.iter().map(|ns| self.reconcile_namespace(ns))).await;
        for (ns, result) in namespaces.iter().zip(results) {
            if let Err(e) = result {
                warn!("PvcMountedByController namespace {}: {}", ns, e);
            }
        }
    }

    /// Bring every claim label in `namespace` up to date. Returns the number of
    /// labels written. A conflicting write restarts the pass from fresh reads.
    pub async fn reconcile_namespace(&self, namespace: &str) -> anyhow::Result<usize> {
        let mut written = 0;
        for attempt in 1..=MAX_CONFLICT_RETRIES {
            match self.reconcile_pass(namespace, &mut written).await {
                Ok(()) => return Ok(written),
                Err(StoreError::Conflict(reason)) if attempt < MAX_CONFLICT_RETRIES => {
                    debug!(
                        "Namespace {}: conflict on attempt {} ({}), retrying",
                        namespace, attempt, reason
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(written)
    }

    async fn reconcile_pass(&self, namespace: &str, written: &mut usize) -> StoreResult<()> {
        let store = self.store.as_ref();
        let everything = LabelSelector::everything();
        let claims: Vec<PersistentVolumeClaim> = bounded(
            self.timeout,
            "list claims",
            list_as(store, Some(namespace), &everything),
        )
        .await?;
        if claims.is_empty() {
            return Ok(());
        }
        let instances: Vec<VirtualMachineInstance> = bounded(
            self.timeout,
            "list instances",
            list_as(store, Some(namespace), &everything),
        )
        .await?;

        for mut claim in claims {
            let value = mounted_by(&claim.metadata.name, &instances);
            // An absent label is written too, even when the value is empty.
            let current = claim.metadata.label(MOUNTED_BY_VMI_LABEL_KEY);
            if current == Some(value.as_str()) {
                debug!("Claim {}: mounted-by unchanged", claim.key());
                continue;
            }
            info!(
                "Claim {}: mounted-by {:?} -> {:?}",
                claim.key(),
                current,
                value
            );
            claim
                .metadata
                .labels
                .insert(MOUNTED_BY_VMI_LABEL_KEY.to_string(), value);
            bounded(self.timeout, "update claim", update_as(store, &claim)).await?;
            self.metrics.counter_inc(PVC_LABEL_WRITES_TOTAL);
            *written += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pkg_state::memory::MemoryObjectStore;
    use pkg_state::store::get_as;
    use pkg_types::volume::Volume;

    fn vmi(ns: &str, name: &str, claims: &[&str]) -> VirtualMachineInstance {
        claims.iter().enumerate().fold(
            VirtualMachineInstance::new(ns, name),
            |acc, (i, claim)| acc.with_volume(Volume::claim(format!("disk{}", i), *claim)),
        )
    }

    fn controller(store: &MemoryObjectStore) -> (PvcMountedByController, Arc<MetricsRegistry>) {
        let metrics = Arc::new(MetricsRegistry::with_defaults());
        let controller = PvcMountedByController::new(
            Arc::new(store.clone()),
            metrics.clone(),
            Duration::from_secs(1),
            Duration::from_secs(60),
        );
        (controller, metrics)
    }

    async fn label(store: &MemoryObjectStore, ns: &str, name: &str) -> Option<String> {
        let key = PersistentVolumeClaim::new(ns, name).key();
        let claim: PersistentVolumeClaim = get_as(store, &key).await.unwrap().unwrap();
        claim.metadata.label(MOUNTED_BY_VMI_LABEL_KEY).map(str::to_string)
    }

    #[test]
    fn encoding_is_sorted_and_deduplicated() {
        let instances = vec![
            vmi("ns", "b", &["pvc"]),
            vmi("ns", "a", &["pvc", "pvc"]),
            vmi("ns", "c", &["other"]),
        ];
        assert_eq!(mounted_by("pvc", &instances), "a,b");
        assert_eq!(mounted_by("unused", &instances), "");
    }

    #[test]
    fn terminating_instances_count_as_absent() {
        let mut leaving = vmi("ns", "a", &["pvc"]);
        leaving.metadata.deletion_timestamp = Some(Utc::now());
        let instances = vec![leaving, vmi("ns", "b", &["pvc"])];
        assert_eq!(mounted_by("pvc", &instances), "b");
    }

    #[tokio::test]
    async fn labels_every_claim_including_unreferenced() {
        let store = MemoryObjectStore::new();
        store.seed(&PersistentVolumeClaim::new("ns", "disk")).await.unwrap();
        store.seed(&PersistentVolumeClaim::new("ns", "spare")).await.unwrap();
        store.seed(&vmi("ns", "vm-b", &["disk"])).await.unwrap();
        store.seed(&vmi("ns", "vm-a", &["disk"])).await.unwrap();

        let (controller, metrics) = controller(&store);
        assert_eq!(controller.reconcile_namespace("ns").await.unwrap(), 2);
        assert_eq!(label(&store, "ns", "disk").await.as_deref(), Some("vm-a,vm-b"));
        assert_eq!(label(&store, "ns", "spare").await.as_deref(), Some(""));
        assert_eq!(metrics.counter_get(PVC_LABEL_WRITES_TOTAL), Some(2));
    }

    #[tokio::test]
    async fn second_pass_writes_nothing() {
        let store = MemoryObjectStore::new();
        store.seed(&PersistentVolumeClaim::new("ns", "disk")).await.unwrap();
        store.seed(&PersistentVolumeClaim::new("ns", "spare")).await.unwrap();
        store.seed(&vmi("ns", "vm-a", &["disk"])).await.unwrap();

        let (controller, _) = controller(&store);
        controller.reconcile_namespace("ns").await.unwrap();
        let writes = store.write_count();
        assert_eq!(controller.reconcile_namespace("ns").await.unwrap(), 0);
        assert_eq!(store.write_count(), writes);
    }

    #[tokio::test]
    async fn stale_value_is_overwritten_and_namespaces_are_isolated() {
        let store = MemoryObjectStore::new();
        let mut claim = PersistentVolumeClaim::new("ns-a", "disk");
        claim
            .metadata
            .labels
            .insert(MOUNTED_BY_VMI_LABEL_KEY.into(), "gone,vm-x".into());
        store.seed(&claim).await.unwrap();
        store.seed(&PersistentVolumeClaim::new("ns-b", "disk")).await.unwrap();
        store.seed(&vmi("ns-b", "vm-b", &["disk"])).await.unwrap();

        let (controller, _) = controller(&store);
        controller.reconcile_namespace("ns-a").await.unwrap();
        assert_eq!(label(&store, "ns-a", "disk").await.as_deref(), Some(""));
        assert_eq!(label(&store, "ns-b", "disk").await, None);

        controller.resync().await.unwrap();
        assert_eq!(label(&store, "ns-b", "disk").await.as_deref(), Some("vm-b"));
    }

    #[tokio::test]
    async fn conflict_retries_from_fresh_reads() {
        let store = MemoryObjectStore::new();
        store.seed(&PersistentVolumeClaim::new("ns", "disk")).await.unwrap();
        store.seed(&vmi("ns", "vm-a", &["disk"])).await.unwrap();

        let (controller, _) = controller(&store);
        store.inject_conflicts(1);
        assert_eq!(controller.reconcile_namespace("ns").await.unwrap(), 1);
        assert_eq!(label(&store, "ns", "disk").await.as_deref(), Some("vm-a"));
    }

    #[tokio::test]
    async fn persistent_conflicts_surface_as_error() {
        let store = MemoryObjectStore::new();
        store.seed(&PersistentVolumeClaim::new("ns", "disk")).await.unwrap();
        store.seed(&vmi("ns", "vm-a", &["disk"])).await.unwrap();

        let (controller, _) = controller(&store);
        store.inject_conflicts(MAX_CONFLICT_RETRIES);
        assert!(controller.reconcile_namespace("ns").await.is_err());
    }

    #[tokio::test]
    async fn started_controller_reacts_to_instance_changes() {
        let store = MemoryObjectStore::new();
        store.seed(&PersistentVolumeClaim::new("ns", "disk")).await.unwrap();
        let (controller, _) = controller(&store);
        let handle = controller.start();

        store
            .create(vmi("ns", "vm-a", &["disk"]).to_dynamic().unwrap())
            .await
            .unwrap();

        let mut value = None;
        for _ in 0..50 {
            value = label(&store, "ns", "disk").await;
            if value.as_deref() == Some("vm-a") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        handle.abort();
        assert_eq!(value.as_deref(), Some("vm-a"));
    }
}
