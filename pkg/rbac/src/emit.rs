//! Turns a composed chain into store objects.
//!
//! Every object is named `virtrs-<role>`, carries the managed label and the
//! display-name annotation, and holds the role's effective rules. Build errors
//! surface before the first object is returned.

use pkg_constants::labels::{
    AGGREGATE_TO_LABEL_PREFIX, AGGREGATION_NAME_LABEL_KEY, DISPLAY_NAME_ANNOTATION_KEY,
    MANAGED_LABEL_KEY, MANAGED_LABEL_VALUE, ROLE_CONTEXT_LABEL_KEY,
};
use pkg_constants::rbac::ROLE_NAME_PREFIX;
use pkg_types::meta::ObjectMeta;
use pkg_types::rbac::{AggregationRule, ClusterRole, GlobalRole, RoleTemplate};
use pkg_types::selector::LabelSelector;
use tracing::debug;

use crate::chain::{ComposedChain, RoleSpec};
use crate::error::BuildError;
use crate::resolve::Resolver;

/// Store name of a role: `virtrs-<name>`.
pub fn object_name(role_name: &str) -> String {
    format!("{}{}", ROLE_NAME_PREFIX, role_name)
}

fn object_meta(role: &RoleSpec) -> ObjectMeta {
    let mut meta = ObjectMeta::cluster(object_name(&role.name))
        .with_label(MANAGED_LABEL_KEY, MANAGED_LABEL_VALUE);
    if let Some(context) = role.context.as_str() {
        meta.labels
            .insert(ROLE_CONTEXT_LABEL_KEY.to_string(), context.to_string());
    }
    for upstream in &role.aggregate_to {
        meta.labels.insert(
            format!("{}{}", AGGREGATE_TO_LABEL_PREFIX, upstream),
            "true".to_string(),
        );
    }
    meta.annotations.insert(
        DISPLAY_NAME_ANNOTATION_KEY.to_string(),
        role.display_name.clone(),
    );
    meta
}

fn aggregation_rule(role: &RoleSpec) -> Option<AggregationRule> {
    if role.aggregation_sources.is_empty() {
        return None;
    }
    Some(AggregationRule {
        cluster_role_selectors: role
            .aggregation_sources
            .iter()
            .map(|source| LabelSelector::single(AGGREGATION_NAME_LABEL_KEY, source.clone()))
            .collect(),
    })
}

/// Cluster roles, one per chain entry, in chain order.
pub fn cluster_roles(
    chain: &ComposedChain,
    resolver: &Resolver<'_>,
) -> Result<Vec<ClusterRole>, BuildError> {
    chain
        .roles()
        .map(|role| {
            Ok(ClusterRole {
                metadata: object_meta(role),
                rules: resolver.effective_rules(&role.name)?,
                aggregation_rule: aggregation_rule(role),
            })
        })
        .collect()
}

/// Role templates, one per chain entry, in chain order.
/// Template references are kept, rewritten to the emitted object names.
pub fn role_templates(
    chain: &ComposedChain,
    resolver: &Resolver<'_>,
) -> Result<Vec<RoleTemplate>, BuildError> {
    chain
        .roles()
        .map(|role| {
            if !role.aggregation_sources.is_empty() {
                debug!(
                    "Role template {} ignores aggregation sources; only cluster roles aggregate",
                    role.name
                );
            }
            Ok(RoleTemplate {
                metadata: object_meta(role),
                display_name: role.display_name.clone(),
                builtin: role.builtin,
                external: role.external,
                hidden: role.hidden,
                administrative: role.administrative,
                context: role.context,
                rules: resolver.effective_rules(&role.name)?,
                role_template_names: role.template_refs.iter().map(|r| object_name(r)).collect(),
            })
        })
        .collect()
}

/// Global roles, one per chain entry, in chain order.
pub fn global_roles(
    chain: &ComposedChain,
    resolver: &Resolver<'_>,
) -> Result<Vec<GlobalRole>, BuildError> {
    chain
        .roles()
        .map(|role| {
            Ok(GlobalRole {
                metadata: object_meta(role),
                display_name: role.display_name.clone(),
                rules: resolver.effective_rules(&role.name)?,
                builtin: role.builtin,
            })
        })
        .collect()
}
