//! Filesystem path and listener defaults.

// ─── Server ────────────────────────────────────────────────────────────────

/// Default config file path for the server.
pub const DEFAULT_SERVER_CONFIG: &str = "/etc/virtrs/config.yaml";

/// Default data directory for the SlateDB state store.
pub const DEFAULT_SERVER_DATA_DIR: &str = "/tmp/virtrs-data";

/// Default API listen port.
pub const DEFAULT_SERVER_PORT: u16 = 8443;
