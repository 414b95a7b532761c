use futures_util::future::join_all;
use pkg_apply::{Applier, ApplyReport, DesiredObjectSet};
use pkg_constants::labels::AGGREGATION_NAME_LABEL_KEY;
use pkg_constants::rbac::{
    AGGREGATION_CLUSTER_ROLES, CLUSTER_ROLES_OWNER_SET, GLOBAL_ROLES_OWNER_SET,
    ROLE_TEMPLATES_OWNER_SET,
};
use pkg_metrics::{APPLY_ERRORS_TOTAL, APPLY_WRITES_TOTAL, MetricsRegistry};
use pkg_rbac::defaults::{self, Catalogs};
use pkg_rbac::{Resolver, emit};
use pkg_state::ObjectStore;
use pkg_state::store::{bounded, get_as, update_as};
use pkg_types::meta::{Kind, ObjectKey};
use pkg_types::rbac::ClusterRole;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Applies the role catalogs as three owner sets.
pub struct PolicySyncController {
    store: Arc<dyn ObjectStore>,
    catalogs: fn() -> Catalogs,
    applier: Applier,
    metrics: Arc<MetricsRegistry>,
    timeout: Duration,
    resync_interval: Duration,
}

impl PolicySyncController {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        metrics: Arc<MetricsRegistry>,
        timeout: Duration,
        resync_interval: Duration,
    ) -> Self {
        Self {
            applier: Applier::new(store.clone(), timeout),
            store,
            catalogs: defaults::builtin,
            metrics,
            timeout,
            resync_interval,
        }
    }

    /// Replace the built-in catalogs.
    pub fn with_catalogs(mut self, catalogs: fn() -> Catalogs) -> Self {
        self.catalogs = catalogs;
        self
    }

    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "PolicySyncController started (interval={}s)",
                self.resync_interval.as_secs()
            );
            // First tick fires immediately, so startup gets a sync too.
            let mut interval = tokio::time::interval(self.resync_interval);
            loop {
                interval.tick().await;
                if let Err(e) = self.sync().await {
                    warn!("PolicySyncController sync error: {}", e);
                }
            }
        })
    }

    /// Compose every catalog, then apply. Any build error aborts before the first write.
    pub async fn sync(&self) -> anyhow::Result<()> {
        let sets = desired_sets((self.catalogs)())?;

        self.tag_aggregation_roles().await?;

        let results = join_all(sets.into_iter().map(|set| {
            let owner = set.owner_set_id().to_string();
            async move { (owner, self.applier.apply(set).await) }
        }))
        .await;

        let mut failed = Vec::new();
        for (owner, result) in results {
            match result {
                Ok(report) => self.record(&report),
                Err(e) => {
                    self.metrics.counter_inc(APPLY_ERRORS_TOTAL);
                    warn!("Owner set {}: apply failed: {}", owner, e);
                    failed.push(owner);
                }
            }
        }
        if !failed.is_empty() {
            anyhow::bail!("apply failed for owner sets: {}", failed.join(", "));
        }
        Ok(())
    }

    fn record(&self, report: &ApplyReport) {
        self.metrics
            .counter_add(APPLY_WRITES_TOTAL, report.writes() as u64);
    }

    /// Label the upstream aggregated roles with their own name so our namespace
    /// roles can select them.
    async fn tag_aggregation_roles(&self) -> anyhow::Result<()> {
        let store = self.store.as_ref();
        for name in AGGREGATION_CLUSTER_ROLES {
            let key = ObjectKey::cluster(Kind::ClusterRole, name);
            let role: Option<ClusterRole> =
                bounded(self.timeout, "get cluster role", get_as(store, &key)).await?;
            let Some(mut role) = role else {
                debug!("Cluster role {} not present, not tagging", name);
                continue;
            };
            if role.metadata.label(AGGREGATION_NAME_LABEL_KEY) == Some(name) {
                continue;
            }
            role.metadata
                .labels
                .insert(AGGREGATION_NAME_LABEL_KEY.to_string(), name.to_string());
            bounded(self.timeout, "update cluster role", update_as(store, &role)).await?;
            info!("Tagged cluster role {} with {}={}", name, AGGREGATION_NAME_LABEL_KEY, name);
        }
        Ok(())
    }
}

/// Desired state for the cluster role, role template and global role owner sets.
pub fn desired_sets(catalogs: Catalogs) -> anyhow::Result<Vec<DesiredObjectSet>> {
    let cluster = catalogs.cluster_roles.finish()?;
    let templates = catalogs.role_templates.finish()?;
    let globals = catalogs.global_roles.finish()?;

    // Each catalog resolves within itself; names repeat across kinds.
    let cluster_roles = emit::cluster_roles(&cluster, &Resolver::new().with_chain(&cluster))?;
    let role_templates =
        emit::role_templates(&templates, &Resolver::new().with_chain(&templates))?;
    let global_roles = emit::global_roles(&globals, &Resolver::new().with_chain(&globals))?;

    Ok(vec![
        DesiredObjectSet::from_resources(CLUSTER_ROLES_OWNER_SET, cluster_roles.iter())?,
        DesiredObjectSet::from_resources(ROLE_TEMPLATES_OWNER_SET, role_templates.iter())?,
        DesiredObjectSet::from_resources(GLOBAL_ROLES_OWNER_SET, global_roles.iter())?,
    ])
}
