pub mod auth;
pub mod handlers;
pub mod request_id;
pub mod server;

use std::sync::Arc;
use std::time::Duration;

use pkg_metrics::MetricsRegistry;
use pkg_state::ObjectStore;

use crate::auth::AuthGate;

/// Shared application state injected into all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ObjectStore>,
    pub auth: Arc<AuthGate>,
    pub metrics: Arc<MetricsRegistry>,
    pub store_timeout: Duration,
}
