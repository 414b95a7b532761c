use serde::{Deserialize, Serialize};

use crate::meta::{Kind, ObjectMeta, Resource};
use crate::volume::Volume;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VmiSpec {
    #[serde(default)]
    pub volumes: Vec<Volume>,
    #[serde(default)]
    pub cpu_cores: u32,
    #[serde(default)]
    pub memory_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum VmiPhase {
    #[default]
    Pending,
    Scheduling,
    Running,
    Succeeded,
    Failed,
}

/// A running (or starting) virtual machine instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualMachineInstance {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: VmiSpec,
    #[serde(default)]
    pub phase: VmiPhase,
    #[serde(default)]
    pub node_name: Option<String>,
}

impl VirtualMachineInstance {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::namespaced(namespace, name),
            spec: VmiSpec::default(),
            phase: VmiPhase::Pending,
            node_name: None,
        }
    }

    pub fn with_volume(mut self, volume: Volume) -> Self {
        self.spec.volumes.push(volume);
        self
    }

    /// Claim names referenced by this instance's volumes, in spec order.
    pub fn claim_names(&self) -> impl Iterator<Item = &str> {
        self.spec.volumes.iter().filter_map(Volume::claim_name)
    }
}

impl Resource for VirtualMachineInstance {
    const KIND: Kind = Kind::VirtualMachineInstance;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
