use pkg_types::meta::{Kind, ObjectKey, ObjectMeta, Resource};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Which objects an owner set wrote, stored as a cluster-scoped object named after the set.
///
/// `pending` is only present while an apply is in flight; readers should trust `keys`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OwnershipRecord {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub keys: BTreeSet<ObjectKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<BTreeSet<ObjectKey>>,
    #[serde(default)]
    pub generation: u64,
}

impl OwnershipRecord {
    pub fn new(owner_set_id: &str) -> Self {
        Self {
            metadata: ObjectMeta::cluster(owner_set_id),
            ..Default::default()
        }
    }

    pub fn key_for(owner_set_id: &str) -> ObjectKey {
        ObjectKey::cluster(Kind::OwnershipRecord, owner_set_id)
    }

    /// Every key this set may still own: the committed generation plus any
    /// generation that was started but never committed.
    pub fn owned_keys(&self) -> BTreeSet<ObjectKey> {
        let mut keys = self.keys.clone();
        if let Some(pending) = &self.pending {
            keys.extend(pending.iter().cloned());
        }
        keys
    }

    /// True when the record has a committed generation equal to `desired`.
    pub fn is_committed(&self, desired: &BTreeSet<ObjectKey>) -> bool {
        self.pending.is_none() && &self.keys == desired
    }
}

impl Resource for OwnershipRecord {
    const KIND: Kind = Kind::OwnershipRecord;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_keys_include_pending() {
        let a = ObjectKey::cluster(Kind::ClusterRole, "a");
        let b = ObjectKey::cluster(Kind::ClusterRole, "b");
        let mut record = OwnershipRecord::new("set");
        record.keys.insert(a.clone());
        record.pending = Some([b.clone()].into_iter().collect());

        let owned = record.owned_keys();
        assert!(owned.contains(&a) && owned.contains(&b));
        assert!(!record.is_committed(&[a.clone()].into_iter().collect()));

        record.pending = None;
        assert!(record.is_committed(&[a].into_iter().collect()));
    }

    #[test]
    fn round_trips_through_dynamic() {
        let mut record = OwnershipRecord::new("virtrs-cluster-roles");
        record.keys.insert(ObjectKey::cluster(Kind::ClusterRole, "virtrs-admin"));
        record.generation = 3;
        let dynamic = record.to_dynamic().unwrap();
        assert_eq!(dynamic.kind, Kind::OwnershipRecord);
        assert_eq!(OwnershipRecord::from_dynamic(dynamic).unwrap(), record);
    }
}
