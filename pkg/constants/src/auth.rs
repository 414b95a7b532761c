//! Authentication constants.

/// Name, uid and single group of the identity substituted when delegated
/// authentication answers negatively.
pub const UNAUTHENTICATED_USER: &str = "system:unauthenticated";

/// Header carrying the encrypted session token in token mode.
pub const JWE_TOKEN_HEADER: &str = "jweToken";

/// Cookie carrying the encrypted session token in token mode.
pub const JWE_TOKEN_COOKIE: &str = "jweToken";

/// Default timeout for outbound authenticator calls, in milliseconds.
pub const DEFAULT_AUTH_TIMEOUT_MS: u64 = 5_000;

/// Default path prefix guarded by delegated authentication.
pub const DEFAULT_AUTH_PATH_PREFIX: &str = "/api/";
