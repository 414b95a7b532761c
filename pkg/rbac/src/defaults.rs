//! Built-in role catalogs applied by the policy sync controller.

use pkg_constants::rbac::{
    CDI_API_GROUP, CNI_API_GROUP, KUBEVIRT_API_GROUP, MANAGEMENT_API_GROUP, RBAC_API_GROUP,
    VIRTRS_API_GROUP,
};
use pkg_types::rbac::RoleContext;

use crate::chain::RoleChain;

const READ: [&str; 3] = ["get", "list", "watch"];

const VM_RESOURCES: [&str; 3] = [
    "virtualmachines",
    "virtualmachineinstances",
    "virtualmachineinstancemigrations",
];

const VIRTRS_VM_RESOURCES: [&str; 7] = [
    "keypairs",
    "virtualmachineimages",
    "virtualmachinetemplates",
    "virtualmachinetemplateversions",
    "virtualmachinebackups",
    "virtualmachinebackupcontents",
    "virtualmachinerestores",
];

/// The three role chains one policy sync applies.
#[derive(Debug, Default)]
pub struct Catalogs {
    pub cluster_roles: RoleChain,
    pub role_templates: RoleChain,
    pub global_roles: RoleChain,
}

/// The built-in catalogs.
pub fn builtin() -> Catalogs {
    Catalogs {
        cluster_roles: cluster_roles(),
        role_templates: role_templates(),
        global_roles: global_roles(),
    }
}

/// Cluster roles. Cluster-context roles work with cluster role bindings,
/// namespace-context roles with role bindings.
pub fn cluster_roles() -> RoleChain {
    let mut b = RoleChain::new();

    b.add_cluster_role("Administrator", "admin", RoleContext::Cluster)
        .add_rule()
        .api_groups(["*"])
        .resources(["*"])
        .verbs(["*"])
        .add_rule()
        .non_resource_urls(["*"])
        .verbs(["*"]);
    b.add_cluster_role("Standard User", "user", RoleContext::Cluster)
        .add_rule()
        .api_groups([VIRTRS_API_GROUP])
        .resources(["preferences"])
        .verbs(["*"])
        .add_rule()
        .api_groups([VIRTRS_API_GROUP])
        .resources(["settings"])
        .verbs(READ);
    b.add_cluster_role("Configure Authentication", "authn-manage", RoleContext::Cluster)
        .add_rule()
        .api_groups([MANAGEMENT_API_GROUP])
        .resources(["authconfigs"])
        .verbs(["get", "list", "watch", "update"]);
    b.add_cluster_role("Manage Namespaces", "namespace-manage", RoleContext::Cluster)
        .add_rule()
        .api_groups([""])
        .resources(["namespaces"])
        .verbs(["*"]);
    b.add_cluster_role("Manage Roles", "role-manage", RoleContext::Cluster)
        .add_rule()
        .api_groups([RBAC_API_GROUP])
        .resources(["clusterroles"])
        .verbs(["*"]);
    b.add_cluster_role("Manage Users", "user-manage", RoleContext::Cluster)
        .add_rule()
        .api_groups([MANAGEMENT_API_GROUP])
        .resources(["users"])
        .verbs(["*"])
        .add_rule()
        .api_groups([RBAC_API_GROUP])
        .resources(["clusterroles"])
        .verbs(READ)
        .add_rule()
        .api_groups([RBAC_API_GROUP])
        .resources(["clusterrolebindings"])
        .verbs(["*"]);
    b.add_cluster_role("Manage Settings", "setting-manage", RoleContext::Cluster)
        .add_rule()
        .api_groups([VIRTRS_API_GROUP])
        .resources(["settings"])
        .verbs(["get", "list", "watch", "update"]);

    b.add_cluster_role("Namespace Owner", "namespace-owner", RoleContext::Namespace)
        .set_aggregation_sources(["admin"]);
    b.add_cluster_role("Namespace Member", "namespace-member", RoleContext::Namespace)
        .set_aggregation_sources(["edit"]);
    b.add_cluster_role("Read-only", "read-only", RoleContext::Namespace)
        .set_aggregation_sources(["view"]);
    b.add_cluster_role("Manage Volumes", "volume-manage", RoleContext::Namespace)
        .add_rule()
        .api_groups([""])
        .resources(["persistentvolumes"])
        .verbs(READ)
        .add_rule()
        .api_groups(["storage.k8s.io"])
        .resources(["storageclasses"])
        .verbs(READ)
        .add_rule()
        .api_groups([""])
        .resources(["persistentvolumeclaims"])
        .verbs(["*"])
        .add_rule()
        .api_groups([CDI_API_GROUP])
        .resources(["datavolumes"])
        .verbs(["*"]);
    b.add_cluster_role("View Volumes", "volume-view", RoleContext::Namespace)
        .add_rule()
        .api_groups([""])
        .resources(["persistentvolumes"])
        .verbs(READ)
        .add_rule()
        .api_groups(["storage.k8s.io"])
        .resources(["storageclasses"])
        .verbs(READ)
        .add_rule()
        .api_groups([""])
        .resources(["persistentvolumeclaims"])
        .verbs(READ)
        .add_rule()
        .api_groups([CDI_API_GROUP])
        .resources(["datavolumes"])
        .verbs(READ);

    b.add_cluster_role("Manage Virtual Machines", "virtual-machine-manage", RoleContext::Namespace);
    for resource in VM_RESOURCES {
        b.add_rule()
            .api_groups([KUBEVIRT_API_GROUP])
            .resources([resource])
            .verbs(["*"]);
    }
    for resource in VIRTRS_VM_RESOURCES {
        b.add_rule()
            .api_groups([VIRTRS_API_GROUP])
            .resources([resource])
            .verbs(["*"]);
    }
    b.add_rule()
        .api_groups([CNI_API_GROUP])
        .resources(["network-attachment-definitions"])
        .verbs(READ)
        .set_aggregate_to(["admin", "edit"]);

    b.add_cluster_role("View Virtual Machines", "virtual-machine-view", RoleContext::Namespace);
    for resource in VM_RESOURCES {
        b.add_rule()
            .api_groups([KUBEVIRT_API_GROUP])
            .resources([resource])
            .verbs(READ);
    }
    for resource in VIRTRS_VM_RESOURCES {
        b.add_rule()
            .api_groups([VIRTRS_API_GROUP])
            .resources([resource])
            .verbs(READ);
    }
    b.add_rule()
        .api_groups([CNI_API_GROUP])
        .resources(["network-attachment-definitions"])
        .verbs(READ)
        .set_aggregate_to(["view"]);

    b.add_cluster_role(
        "Manage Namespace Members",
        "namespace-member-manage",
        RoleContext::Namespace,
    )
    .add_rule()
    .api_groups([RBAC_API_GROUP])
    .resources(["rolebindings"])
    .verbs(["*"]);
    b.add_cluster_role("View Namespace Members", "namespace-member-view", RoleContext::Namespace)
        .add_rule()
        .api_groups([RBAC_API_GROUP])
        .resources(["rolebindings"])
        .verbs(READ);

    b
}

/// Project-level role templates. Composite templates inherit by reference.
pub fn role_templates() -> RoleChain {
    let mut b = RoleChain::new();

    b.add_role_template(
        "View Virtual Machines",
        "vm-view",
        RoleContext::Namespace,
        false,
        false,
        false,
    )
    .add_rule()
    .api_groups([KUBEVIRT_API_GROUP])
    .resources(VM_RESOURCES)
    .verbs(READ)
    .add_rule()
    .api_groups([VIRTRS_API_GROUP])
    .resources(VIRTRS_VM_RESOURCES)
    .verbs(READ);
    b.add_role_template("View Volumes", "volume-view", RoleContext::Namespace, false, false, false)
        .add_rule()
        .api_groups([""])
        .resources(["persistentvolumeclaims"])
        .verbs(READ)
        .add_rule()
        .api_groups([CDI_API_GROUP])
        .resources(["datavolumes"])
        .verbs(READ);
    b.add_role_template(
        "Manage Virtual Machines",
        "vm-manage",
        RoleContext::Namespace,
        false,
        false,
        false,
    )
    .add_rule()
    .api_groups([KUBEVIRT_API_GROUP])
    .resources(VM_RESOURCES)
    .verbs(["*"])
    .add_rule()
    .api_groups([VIRTRS_API_GROUP])
    .resources(VIRTRS_VM_RESOURCES)
    .verbs(["*"]);
    b.add_role_template(
        "Manage Volumes",
        "volume-manage",
        RoleContext::Namespace,
        false,
        false,
        false,
    )
    .add_rule()
    .api_groups([""])
    .resources(["persistentvolumeclaims"])
    .verbs(["*"])
    .add_rule()
    .api_groups([CDI_API_GROUP])
    .resources(["datavolumes"])
    .verbs(["*"]);
    b.add_role_template("Read-only", "read-only", RoleContext::Namespace, false, false, false)
        .set_template_refs(["vm-view", "volume-view"]);
    b.add_role_template("Member", "member", RoleContext::Namespace, false, false, false)
        .set_template_refs(["vm-manage", "volume-manage", "read-only"]);
    b.add_role_template("Owner", "owner", RoleContext::Namespace, false, false, true)
        .add_rule()
        .api_groups([RBAC_API_GROUP])
        .resources(["rolebindings"])
        .verbs(["*"])
        .set_template_refs(["member"]);

    b
}

/// Global roles for the management plane.
pub fn global_roles() -> RoleChain {
    let mut b = RoleChain::new();

    b.add_role("Administrator", "admin")
        .add_rule()
        .api_groups(["*"])
        .resources(["*"])
        .verbs(["*"])
        .add_rule()
        .non_resource_urls(["*"])
        .verbs(["*"]);
    b.add_role("Standard User", "user")
        .add_rule()
        .api_groups([VIRTRS_API_GROUP])
        .resources(["preferences"])
        .verbs(["*"])
        .add_rule()
        .api_groups([VIRTRS_API_GROUP])
        .resources(["settings"])
        .verbs(READ)
        .add_rule()
        .api_groups([MANAGEMENT_API_GROUP])
        .resources(["principals", "roletemplates"])
        .verbs(READ);
    b.add_role("Manage Users", "users-manage")
        .add_rule()
        .api_groups([MANAGEMENT_API_GROUP])
        .resources(["users", "globalrolebindings"])
        .verbs(["*"])
        .add_rule()
        .api_groups([MANAGEMENT_API_GROUP])
        .resources(["globalroles"])
        .verbs(READ);

    b
}
