//! Built-in policy constants.

/// Every synthesized role object is named `ROLE_NAME_PREFIX + <role name>`.
pub const ROLE_NAME_PREFIX: &str = "virtrs-";

/// Owner set ids used by the policy sync controller.
pub const CLUSTER_ROLES_OWNER_SET: &str = "virtrs-cluster-roles";
pub const ROLE_TEMPLATES_OWNER_SET: &str = "virtrs-role-templates";
pub const GLOBAL_ROLES_OWNER_SET: &str = "virtrs-global-roles";

/// Upstream cluster roles tagged with [`crate::labels::AGGREGATION_NAME_LABEL_KEY`]
/// so namespace roles can aggregate them.
pub const AGGREGATION_CLUSTER_ROLES: [&str; 3] = ["admin", "edit", "view"];

/// Upstream global roles that receive the managed label.
pub const DEFAULT_MANAGED_GLOBAL_ROLES: [&str; 5] =
    ["admin", "user", "roles-manage", "authn-manage", "users-manage"];

/// Upstream role templates that receive the managed label.
pub const DEFAULT_MANAGED_ROLE_TEMPLATES: [&str; 6] = [
    "project-member",
    "project-owner",
    "read-only",
    "projectroletemplatebindings-view",
    "projectroletemplatebindings-manage",
    "create-ns",
];

/// API group of the platform's own resources.
pub const VIRTRS_API_GROUP: &str = "virtrs.io";

/// API group of the upstream management plane (users, auth configs).
pub const MANAGEMENT_API_GROUP: &str = "management.cattle.io";

/// API group of RBAC objects.
pub const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// API group of VM objects.
pub const KUBEVIRT_API_GROUP: &str = "kubevirt.io";

/// API group of data volumes.
pub const CDI_API_GROUP: &str = "cdi.kubevirt.io";

/// API group of network attachment definitions.
pub const CNI_API_GROUP: &str = "k8s.cni.cncf.io";
