//! Label and annotation keys written on managed objects.

/// Marks an object as part of the virtrs policy set.
pub const MANAGED_LABEL_KEY: &str = "virtrs.io/managed";

/// Value paired with [`MANAGED_LABEL_KEY`].
pub const MANAGED_LABEL_VALUE: &str = "true";

/// Discoverable tag used by aggregation selectors.
/// A cluster role aggregating `admin` selects every role labeled `virtrs.io/name=admin`.
pub const AGGREGATION_NAME_LABEL_KEY: &str = "virtrs.io/name";

/// Ownership marker written by the applier. Value is the owner set id.
pub const OWNER_SET_LABEL_KEY: &str = "virtrs.io/owner-set";

/// Human-readable role name.
pub const DISPLAY_NAME_ANNOTATION_KEY: &str = "virtrs.io/display-name";

/// Role context (`cluster` / `namespace`), omitted when the role has none.
pub const ROLE_CONTEXT_LABEL_KEY: &str = "virtrs.io/context";

/// Prefix for labels that fold a cluster role into an upstream aggregated role.
/// Full key = `AGGREGATE_TO_LABEL_PREFIX + <upstream>`.
pub const AGGREGATE_TO_LABEL_PREFIX: &str = "rbac.authorization.k8s.io/aggregate-to-";

/// Claim label holding the sorted, comma-joined names of the VM instances mounting it.
pub const MOUNTED_BY_VMI_LABEL_KEY: &str = "vm.virtrs.io/mounted-by-vmi";
