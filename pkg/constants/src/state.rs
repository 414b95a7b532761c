//! State store constants.

/// Root of every object key: `/registry/<kind-plural>/<namespace or _>/<name>`.
pub const REGISTRY_PREFIX: &str = "/registry/";

/// Path segment used for cluster-scoped objects.
pub const CLUSTER_SCOPE_SEGMENT: &str = "_";

/// Number of recent watch events kept for late subscribers.
pub const EVENT_LOG_CAPACITY: usize = 1024;

/// Default timeout for a single store call, in milliseconds.
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 10_000;

/// Default interval between full controller resyncs, in seconds.
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 60;

/// How many times a controller recomputes after losing an optimistic write race.
pub const MAX_CONFLICT_RETRIES: usize = 3;
