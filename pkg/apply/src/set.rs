use pkg_constants::labels::OWNER_SET_LABEL_KEY;
use pkg_types::meta::{DynamicObject, ObjectKey, Resource};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::ApplyError;

/// One generation of desired state for an owner set.
///
/// Every object added is stamped with the owner-set label so later applies
/// can tell which objects the set may prune.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredObjectSet {
    owner_set_id: String,
    objects: BTreeMap<ObjectKey, DynamicObject>,
}

impl DesiredObjectSet {
    pub fn new(owner_set_id: impl Into<String>) -> Self {
        Self {
            owner_set_id: owner_set_id.into(),
            objects: BTreeMap::new(),
        }
    }

    pub fn from_resources<'a, R, I>(
        owner_set_id: impl Into<String>,
        items: I,
    ) -> Result<Self, ApplyError>
    where
        R: Resource + 'a,
        I: IntoIterator<Item = &'a R>,
    {
        let mut set = Self::new(owner_set_id);
        for item in items {
            set.push(item)?;
        }
        Ok(set)
    }

    pub fn push<R: Resource>(&mut self, resource: &R) -> Result<(), ApplyError> {
        let obj = resource.to_dynamic().map_err(|e| ApplyError::Encode {
            key: resource.key().to_string(),
            reason: e.to_string(),
        })?;
        self.insert(obj);
        Ok(())
    }

    /// Add an object, replacing any earlier object with the same key.
    pub fn insert(&mut self, mut obj: DynamicObject) {
        obj.metadata
            .labels
            .insert(OWNER_SET_LABEL_KEY.to_string(), self.owner_set_id.clone());
        self.objects.insert(obj.key(), obj);
    }

    pub fn owner_set_id(&self) -> &str {
        &self.owner_set_id
    }

    pub fn keys(&self) -> BTreeSet<ObjectKey> {
        self.objects.keys().cloned().collect()
    }

    pub fn objects(&self) -> impl Iterator<Item = &DynamicObject> {
        self.objects.values()
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.objects.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
