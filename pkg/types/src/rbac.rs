use serde::{Deserialize, Serialize};

use crate::meta::{Kind, ObjectMeta, Resource};
use crate::selector::LabelSelector;

// --- Policy rules ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// API groups this rule applies to (e.g., "" for core, "*" for all)
    #[serde(default)]
    pub api_groups: Vec<String>,
    /// Resource types (e.g., "persistentvolumeclaims", "*" for all)
    #[serde(default)]
    pub resources: Vec<String>,
    /// Restricts the rule to named objects
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_names: Vec<String>,
    /// Non-resource paths such as "/healthz" or "*"
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub non_resource_urls: Vec<String>,
    /// Allowed verbs (e.g., "get", "list", "watch", "*" for all)
    #[serde(default)]
    pub verbs: Vec<String>,
}

impl std::fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "apiGroups: {:?}, resources: {:?}, resourceNames: {:?}, nonResourceURLs: {:?}, verbs: {:?}",
            self.api_groups, self.resources, self.resource_names, self.non_resource_urls, self.verbs
        )
    }
}

// --- Role context ---

/// Where a role is meant to be bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleContext {
    /// Bound cluster-wide.
    Cluster,
    /// Bound per namespace.
    Namespace,
    #[default]
    None,
}

impl RoleContext {
    pub fn as_str(&self) -> Option<&'static str> {
        match self {
            RoleContext::Cluster => Some("cluster"),
            RoleContext::Namespace => Some("namespace"),
            RoleContext::None => None,
        }
    }
}

// --- ClusterRole ---

/// Selectors whose matching roles the store folds into an aggregated cluster role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationRule {
    pub cluster_role_selectors: Vec<LabelSelector>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterRole {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation_rule: Option<AggregationRule>,
}

impl Resource for ClusterRole {
    const KIND: Kind = Kind::ClusterRole;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

// --- RoleTemplate ---

/// Bindable template; may inherit other templates by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleTemplate {
    pub metadata: ObjectMeta,
    pub display_name: String,
    #[serde(default)]
    pub builtin: bool,
    #[serde(default)]
    pub external: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub administrative: bool,
    #[serde(default)]
    pub context: RoleContext,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
    #[serde(default)]
    pub role_template_names: Vec<String>,
}

impl Resource for RoleTemplate {
    const KIND: Kind = Kind::RoleTemplate;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

// --- GlobalRole ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalRole {
    pub metadata: ObjectMeta,
    pub display_name: String,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
    #[serde(default)]
    pub builtin: bool,
}

impl Resource for GlobalRole {
    const KIND: Kind = Kind::GlobalRole;

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
    fn cluster_role_data_excludes_metadata() {
        let role = ClusterRole {
            metadata: ObjectMeta::cluster("virtrs-admin").with_label("virtrs.io/managed", "true"),
            rules: vec![PolicyRule {
                api_groups: vec!["*".into()],
                resources: vec!["*".into()],
                verbs: vec!["*".into()],
                ..Default::default()
            }],
            aggregation_rule: None,
        };
        let obj = role.to_dynamic().unwrap();
        assert_eq!(obj.kind, Kind::ClusterRole);
        assert!(obj.data.get("metadata").is_none());
        assert!(obj.data.get("aggregation_rule").is_none());
        assert_eq!(obj.metadata.label("virtrs.io/managed"), Some("true"));

        let back: ClusterRole = obj.decode().unwrap();
        assert_eq!(back, role);
    }

    #[test]
    fn decode_rejects_other_kind() {
        let role = GlobalRole {
            metadata: ObjectMeta::cluster("virtrs-user"),
            display_name: "Standard User".into(),
            rules: vec![],
            builtin: true,
        };
        let obj = role.to_dynamic().unwrap();
        assert!(obj.decode::<ClusterRole>().is_err());
    }

    #[test]
    fn role_context_serializes_lowercase() {
        let json = serde_json::to_string(&RoleContext::Namespace).unwrap();
        assert_eq!(json, "\"namespace\"");
        assert_eq!(RoleContext::None.as_str(), None);
    }
}
