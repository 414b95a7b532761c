use pkg_types::rbac::{PolicyRule, RoleContext};
use pkg_types::validate::validate_name;
use std::collections::{BTreeSet, HashMap};

use crate::error::BuildError;

/// One role definition accumulated by a [`RoleChain`].
#[derive(Debug, Clone, PartialEq)]
pub struct RoleSpec {
    pub name: String,
    pub display_name: String,
    pub context: RoleContext,
    pub builtin: bool,
    pub external: bool,
    pub hidden: bool,
    pub administrative: bool,
    pub rules: Vec<PolicyRule>,
    /// Dynamic aggregation: fold in every role tagged with one of these names.
    pub aggregation_sources: BTreeSet<String>,
    /// Explicit composition: flatten these templates' rules, in order.
    pub template_refs: Vec<String>,
    /// Upstream aggregated roles this role should be folded into.
    pub aggregate_to: BTreeSet<String>,
}

impl RoleSpec {
    fn new(display_name: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            context: RoleContext::None,
            builtin: true,
            external: false,
            hidden: false,
            administrative: false,
            rules: Vec::new(),
            aggregation_sources: BTreeSet::new(),
            template_refs: Vec::new(),
            aggregate_to: BTreeSet::new(),
        }
    }
}

impl std::fmt::Display for RoleSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {} rules", self.display_name, self.name, self.rules.len())
    }
}

/// Fluent builder over an ordered list of roles.
///
/// `add_role*` appends a role and moves the cursor onto it; rule and metadata calls
/// apply to the cursor's role until the next `add_role*`. Misuse (duplicate names,
/// rule calls without a role or rule) is recorded and returned by [`RoleChain::finish`].
///
/// ```
/// use pkg_rbac::RoleChain;
/// use pkg_types::rbac::RoleContext;
///
/// let mut chain = RoleChain::new();
/// chain
///     .add_cluster_role("View Volumes", "volume-view", RoleContext::Namespace)
///     .add_rule().api_groups([""]).resources(["persistentvolumeclaims"]).verbs(["get", "list"]);
/// let composed = chain.finish().unwrap();
/// assert_eq!(composed.roles().count(), 1);
/// ```
#[derive(Debug, Default)]
pub struct RoleChain {
    roles: Vec<RoleSpec>,
    index: HashMap<String, usize>,
    current: Option<usize>,
    errors: Vec<BuildError>,
}

impl RoleChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_role(&mut self, display_name: &str, name: &str) -> &mut Self {
        if let Err(e) = validate_name(name) {
            self.errors.push(BuildError::InvalidName {
                name: name.to_string(),
                reason: e.to_string(),
            });
        }
        if self.index.contains_key(name) {
            self.errors.push(BuildError::DuplicateRole(name.to_string()));
        } else {
            self.index.insert(name.to_string(), self.roles.len());
        }
        self.roles.push(RoleSpec::new(display_name, name));
        self.current = Some(self.roles.len() - 1);
        self
    }

    pub fn add_cluster_role(
        &mut self,
        display_name: &str,
        name: &str,
        context: RoleContext,
    ) -> &mut Self {
        self.add_role(display_name, name);
        if let Some(role) = self.current_role_mut() {
            role.context = context;
        }
        self
    }

    pub fn add_role_template(
        &mut self,
        display_name: &str,
        name: &str,
        context: RoleContext,
        external: bool,
        hidden: bool,
        administrative: bool,
    ) -> &mut Self {
        self.add_role(display_name, name);
        if let Some(role) = self.current_role_mut() {
            role.context = context;
            role.external = external;
            role.hidden = hidden;
            role.administrative = administrative;
        }
        self
    }

    /// Start a new rule on the current role.
    pub fn add_rule(&mut self) -> &mut Self {
        match self.current_role_mut() {
            Some(role) => role.rules.push(PolicyRule::default()),
            None => self.errors.push(BuildError::NoCurrentRole("add_rule")),
        }
        self
    }

    pub fn api_groups<I, S>(&mut self, groups: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extend_rule("api_groups", groups, |r| &mut r.api_groups)
    }

    pub fn resources<I, S>(&mut self, resources: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extend_rule("resources", resources, |r| &mut r.resources)
    }

    pub fn resource_names<I, S>(&mut self, names: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extend_rule("resource_names", names, |r| &mut r.resource_names)
    }

    pub fn non_resource_urls<I, S>(&mut self, urls: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extend_rule("non_resource_urls", urls, |r| &mut r.non_resource_urls)
    }

    pub fn verbs<I, S>(&mut self, verbs: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extend_rule("verbs", verbs, |r| &mut r.verbs)
    }

    pub fn set_aggregation_sources<I, S>(&mut self, names: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match self.current_role_mut() {
            Some(role) => role.aggregation_sources = names.into_iter().map(Into::into).collect(),
            None => self
                .errors
                .push(BuildError::NoCurrentRole("set_aggregation_sources")),
        }
        self
    }

    pub fn set_template_refs<I, S>(&mut self, names: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match self.current_role_mut() {
            Some(role) => role.template_refs = names.into_iter().map(Into::into).collect(),
            None => self.errors.push(BuildError::NoCurrentRole("set_template_refs")),
        }
        self
    }

    pub fn set_aggregate_to<I, S>(&mut self, names: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match self.current_role_mut() {
            Some(role) => role.aggregate_to = names.into_iter().map(Into::into).collect(),
            None => self.errors.push(BuildError::NoCurrentRole("set_aggregate_to")),
        }
        self
    }

    /// Roles in insertion order.
    pub fn roles(&self) -> impl Iterator<Item = &RoleSpec> {
        self.roles.iter()
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// Validate the chain. Returns the first recorded error, if any.
    pub fn finish(self) -> Result<ComposedChain, BuildError> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }
        Ok(ComposedChain { roles: self.roles })
    }

    fn current_role_mut(&mut self) -> Option<&mut RoleSpec> {
        let idx = self.current?;
        self.roles.get_mut(idx)
    }

    fn extend_rule<I, S>(
        &mut self,
        op: &'static str,
        values: I,
        field: impl FnOnce(&mut PolicyRule) -> &mut Vec<String>,
    ) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let Some(idx) = self.current else {
            self.errors.push(BuildError::NoCurrentRole(op));
            return self;
        };
        let role = &mut self.roles[idx];
        match role.rules.last_mut() {
            Some(rule) => field(rule).extend(values.into_iter().map(Into::into)),
            None => {
                let err = BuildError::NoCurrentRule {
                    role: role.name.clone(),
                    op,
                };
                self.errors.push(err);
            }
        }
        self
    }
}

/// A validated, immutable chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComposedChain {
    roles: Vec<RoleSpec>,
}

impl ComposedChain {
    /// Roles in insertion order; this is apply order.
    pub fn roles(&self) -> impl Iterator<Item = &RoleSpec> {
        self.roles.iter()
    }

    pub fn get(&self, name: &str) -> Option<&RoleSpec> {
        self.roles.iter().find(|r| r.name == name)
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rules_attach_to_cursor_role() {
        let mut chain = RoleChain::new();
        chain
            .add_cluster_role("Administrator", "admin", RoleContext::Cluster)
            .add_rule()
            .api_groups(["*"])
            .resources(["*"])
            .verbs(["*"])
            .add_rule()
            .non_resource_urls(["*"])
            .verbs(["*"]);
        chain
            .add_cluster_role("Manage Namespaces", "namespace-manage", RoleContext::Cluster)
            .add_rule()
            .api_groups([""])
            .resources(["namespaces"])
            .verbs(["*"]);

        let composed = chain.finish().unwrap();
        let names: Vec<&str> = composed.roles().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["admin", "namespace-manage"]);

        let admin = composed.get("admin").unwrap();
        assert_eq!(admin.rules.len(), 2);
        assert_eq!(admin.rules[1].non_resource_urls, vec!["*"]);
        assert!(admin.rules[1].api_groups.is_empty());
        assert!(admin.builtin);
        assert_eq!(admin.context, RoleContext::Cluster);
    }

    #[test]
    fn repeated_calls_append() {
        let mut chain = RoleChain::new();
        chain
            .add_role("View", "view-things")
            .add_rule()
            .verbs(["get"])
            .verbs(["list", "watch"])
            .resources(["a"])
            .resource_names(["x", "y"]);
        let composed = chain.finish().unwrap();
        let rule = &composed.get("view-things").unwrap().rules[0];
        assert_eq!(rule.verbs, vec!["get", "list", "watch"]);
        assert_eq!(rule.resource_names, vec!["x", "y"]);
    }

    #[test]
    fn duplicate_name_fails_build() {
        let mut chain = RoleChain::new();
        chain.add_role("First", "read-only").add_rule().verbs(["get"]);
        chain.add_role("Second", "read-only").add_rule().verbs(["*"]);
        assert_eq!(
            chain.finish().unwrap_err(),
            BuildError::DuplicateRole("read-only".into())
        );
    }

    #[test]
    fn rule_before_role_fails_build() {
        let mut chain = RoleChain::new();
        chain.add_rule();
        assert_eq!(
            chain.finish().unwrap_err(),
            BuildError::NoCurrentRole("add_rule")
        );
    }

    #[test]
    fn verbs_before_add_rule_fails_build() {
        let mut chain = RoleChain::new();
        chain.add_role("Broken", "broken").verbs(["get"]);
        assert!(matches!(
            chain.finish().unwrap_err(),
            BuildError::NoCurrentRule { op: "verbs", .. }
        ));
    }

    #[test]
    fn invalid_name_fails_build() {
        let mut chain = RoleChain::new();
        chain.add_role("Bad", "Bad_Name");
        assert!(matches!(
            chain.finish().unwrap_err(),
            BuildError::InvalidName { .. }
        ));
    }

    #[test]
    fn template_metadata_is_kept() {
        let mut chain = RoleChain::new();
        chain
            .add_role_template("Owner", "owner", RoleContext::Namespace, false, true, true)
            .set_template_refs(["member", "viewer"])
            .set_aggregation_sources(["admin"]);
        let composed = chain.finish().unwrap();
        let owner = composed.get("owner").unwrap();
        assert!(owner.hidden);
        assert!(owner.administrative);
        assert!(!owner.external);
        assert_eq!(owner.template_refs, vec!["member", "viewer"]);
        assert!(owner.aggregation_sources.contains("admin"));
    }
}
