use chrono::{DateTime, Utc};
use pkg_constants::state::{CLUSTER_SCOPE_SEGMENT, REGISTRY_PREFIX};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// --- Kinds ---

/// Every object kind the store holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Kind {
    ClusterRole,
    RoleTemplate,
    GlobalRole,
    PersistentVolumeClaim,
    VirtualMachineInstance,
    OwnershipRecord,
}

impl Kind {
    /// Plural path segment used in store keys.
    pub fn plural(&self) -> &'static str {
        match self {
            Kind::ClusterRole => "clusterroles",
            Kind::RoleTemplate => "roletemplates",
            Kind::GlobalRole => "globalroles",
            Kind::PersistentVolumeClaim => "persistentvolumeclaims",
            Kind::VirtualMachineInstance => "virtualmachineinstances",
            Kind::OwnershipRecord => "ownershiprecords",
        }
    }

    pub fn is_namespaced(&self) -> bool {
        matches!(
            self,
            Kind::PersistentVolumeClaim | Kind::VirtualMachineInstance
        )
    }

    /// Key prefix covering every object of this kind, optionally narrowed to one namespace.
    pub fn key_prefix(&self, namespace: Option<&str>) -> String {
        match namespace {
            Some(ns) => format!("{}{}/{}/", REGISTRY_PREFIX, self.plural(), ns),
            None => format!("{}{}/", REGISTRY_PREFIX, self.plural()),
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Kind::ClusterRole => "ClusterRole",
            Kind::RoleTemplate => "RoleTemplate",
            Kind::GlobalRole => "GlobalRole",
            Kind::PersistentVolumeClaim => "PersistentVolumeClaim",
            Kind::VirtualMachineInstance => "VirtualMachineInstance",
            Kind::OwnershipRecord => "OwnershipRecord",
        };
        write!(f, "{}", name)
    }
}

// --- Object identity ---

/// `(kind, namespace, name)`: the identity of an object in the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub kind: Kind,
    #[serde(default)]
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn cluster(kind: Kind, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: None,
            name: name.into(),
        }
    }

    pub fn namespaced(kind: Kind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Store key: `/registry/<plural>/<namespace or _>/<name>`.
    pub fn store_key(&self) -> String {
        format!(
            "{}{}/{}/{}",
            REGISTRY_PREFIX,
            self.kind.plural(),
            self.namespace.as_deref().unwrap_or(CLUSTER_SCOPE_SEGMENT),
            self.name
        )
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

// --- Metadata ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Set by the store on every write; used for optimistic concurrency.
    #[serde(default)]
    pub resource_version: u64,
    /// Set by the store on create.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Set when the object is being removed but is still visible.
    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn is_terminating(&self) -> bool {
        self.deletion_timestamp.is_some()
    }
}

// --- Untyped objects ---

/// Kind-erased object as held by the store.
/// `data` is everything except `metadata`; it is what the applier compares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicObject {
    pub kind: Kind,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl DynamicObject {
    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            kind: self.kind,
            namespace: self.metadata.namespace.clone(),
            name: self.metadata.name.clone(),
        }
    }

    /// Decode into a typed resource. Fails if the kinds disagree.
    pub fn decode<R: Resource>(self) -> anyhow::Result<R> {
        R::from_dynamic(self)
    }
}

/// A typed object that round-trips through [`DynamicObject`].
///
/// Implementors are plain serde structs with a `metadata` field;
/// every other field lands in `DynamicObject::data`.
pub trait Resource: Serialize + DeserializeOwned {
    const KIND: Kind;

    fn metadata(&self) -> &ObjectMeta;

    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    fn key(&self) -> ObjectKey {
        let meta = self.metadata();
        ObjectKey {
            kind: Self::KIND,
            namespace: meta.namespace.clone(),
            name: meta.name.clone(),
        }
    }

    fn to_dynamic(&self) -> anyhow::Result<DynamicObject> {
        let mut data = serde_json::to_value(self)?;
        match data.as_object_mut() {
            Some(map) => {
                map.remove("metadata");
            }
            None => anyhow::bail!("{} did not serialize to an object", Self::KIND),
        }
        Ok(DynamicObject {
            kind: Self::KIND,
            metadata: self.metadata().clone(),
            data,
        })
    }

    fn from_dynamic(obj: DynamicObject) -> anyhow::Result<Self> {
        if obj.kind != Self::KIND {
            anyhow::bail!("expected {}, got {}", Self::KIND, obj.kind);
        }
        let mut data = match obj.data {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => serde_json::Map::new(),
            other => anyhow::bail!("{} data is not an object: {}", Self::KIND, other),
        };
        data.insert("metadata".to_string(), serde_json::to_value(&obj.metadata)?);
        Ok(serde_json::from_value(serde_json::Value::Object(data))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_keys_use_scope_segment() {
        let cluster = ObjectKey::cluster(Kind::ClusterRole, "virtrs-admin");
        assert_eq!(cluster.store_key(), "/registry/clusterroles/_/virtrs-admin");

        let ns = ObjectKey::namespaced(Kind::PersistentVolumeClaim, "default", "disk-0");
        assert_eq!(
            ns.store_key(),
            "/registry/persistentvolumeclaims/default/disk-0"
        );
        assert!(
            ns.store_key()
                .starts_with(&Kind::PersistentVolumeClaim.key_prefix(Some("default")))
        );
    }

    #[test]
    fn keys_order_by_kind_then_scope_then_name() {
        let mut keys = vec![
            ObjectKey::cluster(Kind::GlobalRole, "b"),
            ObjectKey::cluster(Kind::ClusterRole, "z"),
            ObjectKey::cluster(Kind::ClusterRole, "a"),
        ];
        keys.sort();
        assert_eq!(keys[0].name, "a");
        assert_eq!(keys[1].name, "z");
        assert_eq!(keys[2].kind, Kind::GlobalRole);
    }

    #[test]
    fn terminating_follows_deletion_timestamp() {
        let mut meta = ObjectMeta::namespaced("default", "vm-1");
        assert!(!meta.is_terminating());
        meta.deletion_timestamp = Some(Utc::now());
        assert!(meta.is_terminating());
    }
}
