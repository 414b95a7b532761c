use axum::{Router, middleware, routing::get};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

use crate::AppState;
use crate::auth::{auth_middleware, require_authenticated};
use crate::handlers::{health, identity, volumes, watch};
use crate::request_id::request_id_middleware;

/// Server configuration passed from the binary.
pub struct ServerConfig {
    pub addr: SocketAddr,
}

/// All routes. `/healthz` and `/metrics` are public; everything under `/api` passes
/// the auth gate first, and data routes also refuse the unauthenticated identity.
pub fn router(state: AppState) -> Router {
    let data_routes = Router::new()
        .route("/api/v1/watch", get(watch::watch_events))
        .route(
            "/api/v1/namespaces/{ns}/persistentvolumeclaims",
            get(volumes::list_claims),
        )
        .route_layer(middleware::from_fn(require_authenticated));

    let api_routes = Router::new()
        .route("/api/v1/whoami", get(identity::whoami))
        .merge(data_routes)
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/metrics", get(health::metrics))
        .merge(api_routes)
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

pub async fn start_server(
    config: ServerConfig,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = router(state);
    info!("Starting API server on {}", config.addr);
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("API server stopped");
    Ok(())
}
