use serde::{Deserialize, Serialize};

use crate::meta::{Kind, ObjectMeta, Resource};

/// Volume source: where the storage comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum VolumeSource {
    /// A persistent volume claim reference
    PersistentVolumeClaim { claim_name: String },
    /// A container disk image baked into the VM
    ContainerDisk { image: String },
    /// Cloud-init user data
    CloudInitNoCloud {
        #[serde(default)]
        user_data: String,
    },
    /// An empty disk created when the instance starts, deleted when it stops
    EmptyDisk { capacity_bytes: u64 },
}

/// Named volume in an instance spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    pub source: VolumeSource,
}

impl Volume {
    pub fn claim(name: impl Into<String>, claim_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: VolumeSource::PersistentVolumeClaim {
                claim_name: claim_name.into(),
            },
        }
    }

    /// Name of the referenced claim, if this volume is claim-backed.
    pub fn claim_name(&self) -> Option<&str> {
        match &self.source {
            VolumeSource::PersistentVolumeClaim { claim_name } => Some(claim_name),
            _ => None,
        }
    }
}

// --- Persistent Volume Claims ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessMode {
    ReadWriteOnce,
    ReadOnlyMany,
    ReadWriteMany,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PVCPhase {
    #[default]
    Pending,
    Bound,
    Lost,
}

impl std::fmt::Display for PVCPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PVCPhase::Pending => write!(f, "Pending"),
            PVCPhase::Bound => write!(f, "Bound"),
            PVCPhase::Lost => write!(f, "Lost"),
        }
    }
}

/// Persistent Volume Claim: a request for storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentVolumeClaim {
    pub metadata: ObjectMeta,
    /// Storage class name (e.g. "longhorn", "fast-ssd")
    #[serde(default)]
    pub storage_class: Option<String>,
    #[serde(default)]
    pub access_modes: Vec<AccessMode>,
    /// Requested storage in bytes
    #[serde(default)]
    pub requested_bytes: u64,
    #[serde(default)]
    pub phase: PVCPhase,
}

impl PersistentVolumeClaim {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::namespaced(namespace, name),
            storage_class: None,
            access_modes: vec![AccessMode::ReadWriteOnce],
            requested_bytes: 0,
            phase: PVCPhase::Pending,
        }
    }
}

impl Resource for PersistentVolumeClaim {
    const KIND: Kind = Kind::PersistentVolumeClaim;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
