use pkg_constants::labels::{MANAGED_LABEL_KEY, MANAGED_LABEL_VALUE};
use pkg_state::ObjectStore;
use pkg_state::store::{bounded, get_as, update_as};
use pkg_types::meta::{Kind, ObjectKey, Resource};
use pkg_types::rbac::{GlobalRole, RoleTemplate};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Marks a configured list of upstream global roles and role templates as managed.
pub struct ManagedLabelController {
    store: Arc<dyn ObjectStore>,
    global_roles: Vec<String>,
    role_templates: Vec<String>,
    timeout: Duration,
    check_interval: Duration,
}

impl ManagedLabelController {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        global_roles: Vec<String>,
        role_templates: Vec<String>,
        timeout: Duration,
        check_interval: Duration,
    ) -> Self {
        Self {
            store,
            global_roles,
            role_templates,
            timeout,
            check_interval,
        }
    }

    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "ManagedLabelController started ({} global roles, {} role templates)",
                self.global_roles.len(),
                self.role_templates.len()
            );
            let mut event_rx = self.store.events().subscribe();
            let mut interval = tokio::time::interval(self.check_interval);
            let globals_prefix = Kind::GlobalRole.key_prefix(None);
            let templates_prefix = Kind::RoleTemplate.key_prefix(None);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.sync().await {
                            warn!("ManagedLabelController sync error: {}", e);
                        }
                    }
                    result = event_rx.recv() => {
                        match result {
                            Ok(ref event)
                                if event.key.starts_with(&globals_prefix)
                                    || event.key.starts_with(&templates_prefix) =>
                            {
                                while event_rx.try_recv().is_ok() {}
                                if let Err(e) = self.sync().await {
                                    warn!("ManagedLabelController sync error: {}", e);
                                }
                            }
                            Ok(_) => {}
                            Err(RecvError::Lagged(_)) => {
                                if let Err(e) = self.sync().await {
                                    warn!("ManagedLabelController sync error: {}", e);
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

    /// One pass over every configured name. Returns how many objects were labeled.
    pub async fn sync(&self) -> anyhow::Result<usize> {
        let mut labeled = 0;
        for name in &self.global_roles {
            labeled += self.ensure_managed::<GlobalRole>(name).await? as usize;
        }
        for name in &self.role_templates {
            labeled += self.ensure_managed::<RoleTemplate>(name).await? as usize;
        }
        Ok(labeled)
    }

    async fn ensure_managed<R: Resource>(&self, name: &str) -> anyhow::Result<bool> {
        let store = self.store.as_ref();
        let key = ObjectKey::cluster(R::KIND, name);
        let obj: Option<R> = bounded(self.timeout, "get", get_as(store, &key)).await?;
        let Some(mut obj) = obj else {
            debug!("{} not present, skipping", key);
            return Ok(false);
        };
        let meta = obj.metadata();
        if meta.is_terminating() || meta.label(MANAGED_LABEL_KEY) == Some(MANAGED_LABEL_VALUE) {
            return Ok(false);
        }
        obj.metadata_mut()
            .labels
            .insert(MANAGED_LABEL_KEY.to_string(), MANAGED_LABEL_VALUE.to_string());
        bounded(self.timeout, "update", update_as(store, &obj)).await?;
        info!("Marked {} as managed", key);
        Ok(true)
    }
}
