//! Request authentication.
//!
//! One of two strategies is picked at startup from [`AuthConfig::mode`]:
//!
//! * **delegated**: an external authenticator decides. A negative answer lets the
//!   request through as `system:unauthenticated`; an error or timeout rejects it.
//! * **token**: the request carries an encrypted session token that a
//!   [`TokenDecryptor`] turns into claims. Anything short of valid claims is a 401.
//!
//! Both produce the same [`Identity`], inserted into the request extensions.

use async_trait::async_trait;
use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use pkg_constants::auth::{JWE_TOKEN_COOKIE, JWE_TOKEN_HEADER, UNAUTHENTICATED_USER};
use pkg_metrics::{AUTH_REJECTIONS_TOTAL, AUTH_UNAUTHENTICATED_TOTAL};
use pkg_types::config::{AuthMode, StaticTokenEntry};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::AppState;

/// Who is making the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub uid: String,
    pub groups: Vec<String>,
}

impl Identity {
    pub fn unauthenticated() -> Self {
        Self {
            name: UNAUTHENTICATED_USER.to_string(),
            uid: UNAUTHENTICATED_USER.to_string(),
            groups: vec![UNAUTHENTICATED_USER.to_string()],
        }
    }

    pub fn is_unauthenticated(&self) -> bool {
        self.name == UNAUTHENTICATED_USER
    }
}

/// Answer from a delegated authenticator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authentication {
    pub authenticated: bool,
    pub user: String,
    pub groups: Vec<String>,
}

#[async_trait]
pub trait DelegatedAuthenticator: Send + Sync {
    async fn authenticate(&self, req: &Parts) -> anyhow::Result<Authentication>;
}

/// Claims carried by a decrypted session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub user: String,
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecryptError {
    /// The token is malformed, expired or unknown.
    #[error("invalid token: {0}")]
    Invalid(String),
    /// The decryptor itself failed.
    #[error("decryption fault: {0}")]
    Fault(String),
}

pub trait TokenDecryptor: Send + Sync {
    fn decrypt(&self, token: &str) -> Result<TokenClaims, DecryptError>;
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Unauthorized(String),
}

#[derive(Serialize)]
struct ErrorBody {
    code: u16,
    message: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = StatusCode::UNAUTHORIZED;
        let body = ErrorBody {
            code: status.as_u16(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub mode: AuthMode,
    /// Delegated mode only authenticates paths under this prefix.
    pub path_prefix: String,
    /// Paths under any of these prefixes skip delegated authentication.
    pub ignore_prefixes: Vec<String>,
    /// Upper bound on one delegated authenticator call.
    pub timeout: Duration,
}

enum Strategy {
    Delegated(Arc<dyn DelegatedAuthenticator>),
    Token(Arc<dyn TokenDecryptor>),
}

pub struct AuthGate {
    strategy: Strategy,
    path_prefix: String,
    ignore_prefixes: Vec<String>,
    timeout: Duration,
}

impl AuthGate {
    /// Build the gate for `config.mode`. The implementation for that mode must be supplied.
    pub fn from_config(
        config: AuthConfig,
        authenticator: Option<Arc<dyn DelegatedAuthenticator>>,
        decryptor: Option<Arc<dyn TokenDecryptor>>,
    ) -> anyhow::Result<Self> {
        let strategy = match config.mode {
            AuthMode::Delegated => Strategy::Delegated(authenticator.ok_or_else(|| {
                anyhow::anyhow!("auth mode 'delegated' needs an authenticator")
            })?),
            AuthMode::Token => Strategy::Token(
                decryptor
                    .ok_or_else(|| anyhow::anyhow!("auth mode 'token' needs a token decryptor"))?,
            ),
        };
        Ok(Self {
            strategy,
            path_prefix: config.path_prefix,
            ignore_prefixes: config.ignore_prefixes,
            timeout: config.timeout,
        })
    }

    pub fn mode(&self) -> AuthMode {
        match self.strategy {
            Strategy::Delegated(_) => AuthMode::Delegated,
            Strategy::Token(_) => AuthMode::Token,
        }
    }

    /// `Ok(None)` means the request is exempt from authentication.
    pub async fn authenticate(&self, req: &Parts) -> Result<Option<Identity>, AuthError> {
        match &self.strategy {
            Strategy::Delegated(authenticator) => {
                let path = req.uri.path();
                if !path.starts_with(&self.path_prefix)
                    || self.ignore_prefixes.iter().any(|p| path.starts_with(p))
                {
                    debug!("Skipping authentication for {}", path);
                    return Ok(None);
                }
                match tokio::time::timeout(self.timeout, authenticator.authenticate(req)).await {
                    Ok(Ok(auth)) if auth.authenticated => Ok(Some(Identity {
                        name: auth.user.clone(),
                        uid: auth.user,
                        groups: auth.groups,
                    })),
                    Ok(Ok(_)) => Ok(Some(Identity::unauthenticated())),
                    Ok(Err(e)) => {
                        warn!("Delegated authentication failed: {}", e);
                        Err(AuthError::Unauthorized(format!("authentication failed: {}", e)))
                    }
                    Err(_) => {
                        warn!(
                            "Delegated authentication timed out after {}ms",
                            self.timeout.as_millis()
                        );
                        Err(AuthError::Unauthorized(
                            "authentication timed out".to_string(),
                        ))
                    }
                }
            }
            Strategy::Token(decryptor) => {
                let token = credential(&req.headers)
                    .ok_or_else(|| AuthError::Unauthorized("missing credential".to_string()))?;
                match decryptor.decrypt(&token) {
                    Ok(claims) => Ok(Some(Identity {
                        uid: claims.uid.unwrap_or_else(|| claims.user.clone()),
                        name: claims.user,
                        groups: claims.groups,
                    })),
                    Err(e @ DecryptError::Invalid(_)) => {
                        debug!("Rejecting token: {}", e);
                        Err(AuthError::Unauthorized(e.to_string()))
                    }
                    Err(e @ DecryptError::Fault(_)) => {
                        warn!("Token decryption fault: {}", e);
                        Err(AuthError::Unauthorized("invalid token".to_string()))
                    }
                }
            }
        }
    }
}

/// The request's credential: a bearer token, else the `jweToken` header, else the
/// `jweToken` cookie.
pub fn credential(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    let from_header = headers
        .get(JWE_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|t| !t.is_empty());
    if let Some(token) = from_header {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == JWE_TOKEN_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// Middleware: resolve the caller's identity and insert it into the request extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let (mut parts, body) = req.into_parts();
    match state.auth.authenticate(&parts).await {
        Ok(Some(identity)) => {
            if identity.is_unauthenticated() {
                state.metrics.counter_inc(AUTH_UNAUTHENTICATED_TOTAL);
            }
            debug!("Request {} as {}", parts.uri.path(), identity.name);
            parts.extensions.insert(identity);
        }
        Ok(None) => {}
        Err(e) => {
            state.metrics.counter_inc(AUTH_REJECTIONS_TOTAL);
            return Err(e);
        }
    }
    Ok(next.run(Request::from_parts(parts, body)).await)
}

/// Middleware for data routes: only a resolved, authenticated identity may pass.
/// The delegated sentinel and requests that skipped authentication are rejected.
pub async fn require_authenticated(req: Request, next: Next) -> Result<Response, AuthError> {
    let authenticated = req
        .extensions()
        .get::<Identity>()
        .is_some_and(|identity| !identity.is_unauthenticated());
    if !authenticated {
        debug!("Rejecting unauthenticated caller on {}", req.uri().path());
        return Err(AuthError::Unauthorized("authentication required".to_string()));
    }
    Ok(next.run(req).await)
}

// --- Shipped implementations ---

#[derive(Serialize)]
struct TokenReview<'a> {
    kind: &'static str,
    spec: TokenReviewSpec<'a>,
}

#[derive(Serialize)]
struct TokenReviewSpec<'a> {
    token: &'a str,
}

#[derive(Deserialize)]
struct TokenReviewResponse {
    #[serde(default)]
    status: TokenReviewStatus,
}

#[derive(Default, Deserialize)]
struct TokenReviewStatus {
    #[serde(default)]
    authenticated: bool,
    #[serde(default)]
    user: Option<TokenReviewUser>,
}

#[derive(Deserialize)]
struct TokenReviewUser {
    username: String,
    #[serde(default)]
    groups: Vec<String>,
}

/// Delegated authenticator that posts a token review to an HTTP endpoint.
pub struct WebhookAuthenticator {
    client: reqwest::Client,
    url: String,
}

impl WebhookAuthenticator {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl DelegatedAuthenticator for WebhookAuthenticator {
    async fn authenticate(&self, req: &Parts) -> anyhow::Result<Authentication> {
        let Some(token) = credential(&req.headers) else {
            return Ok(Authentication::default());
        };
        let review = TokenReview {
            kind: "TokenReview",
            spec: TokenReviewSpec { token: &token },
        };
        let response: TokenReviewResponse = self
            .client
            .post(&self.url)
            .json(&review)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(match response.status.user {
            Some(user) if response.status.authenticated => Authentication {
                authenticated: true,
                user: user.username,
                groups: user.groups,
            },
            _ => Authentication::default(),
        })
    }
}

/// Token decryptor backed by a fixed table from the config file.
pub struct StaticTokenDecryptor {
    tokens: HashMap<String, TokenClaims>,
}

impl StaticTokenDecryptor {
    pub fn new(entries: &[StaticTokenEntry]) -> Self {
        let tokens = entries
            .iter()
            .map(|e| {
                let claims = TokenClaims {
                    user: e.user.clone(),
                    uid: e.uid.clone(),
                    groups: e.groups.clone(),
                };
                (e.token.clone(), claims)
            })
            .collect();
        Self { tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl TokenDecryptor for StaticTokenDecryptor {
    fn decrypt(&self, token: &str) -> Result<TokenClaims, DecryptError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| DecryptError::Invalid("unknown token".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;
    use axum::{Router, routing::post};

    struct FixedAuthenticator(anyhow::Result<Authentication>);

    #[async_trait]
    impl DelegatedAuthenticator for FixedAuthenticator {
        async fn authenticate(&self, _req: &Parts) -> anyhow::Result<Authentication> {
            match &self.0 {
                Ok(a) => Ok(a.clone()),
                Err(e) => Err(anyhow::anyhow!("{}", e)),
            }
        }
    }

    struct SlowAuthenticator;

    #[async_trait]
    impl DelegatedAuthenticator for SlowAuthenticator {
        async fn authenticate(&self, _req: &Parts) -> anyhow::Result<Authentication> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Authentication::default())
        }
    }

    struct FaultyDecryptor;

    impl TokenDecryptor for FaultyDecryptor {
        fn decrypt(&self, _token: &str) -> Result<TokenClaims, DecryptError> {
            Err(DecryptError::Fault("key store unavailable".to_string()))
        }
    }

    fn config(mode: AuthMode) -> AuthConfig {
        AuthConfig {
            mode,
            path_prefix: "/api/".to_string(),
            ignore_prefixes: vec!["/api/v1/public".to_string()],
            timeout: Duration::from_millis(50),
        }
    }

    fn delegated(authenticator: impl DelegatedAuthenticator + 'static) -> AuthGate {
        AuthGate::from_config(config(AuthMode::Delegated), Some(Arc::new(authenticator)), None)
            .unwrap()
    }

    fn token(decryptor: impl TokenDecryptor + 'static) -> AuthGate {
        AuthGate::from_config(config(AuthMode::Token), None, Some(Arc::new(decryptor))).unwrap()
    }

    fn parts(path: &str, headers: &[(&str, &str)]) -> Parts {
        let mut builder = HttpRequest::builder().uri(path);
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        builder.body(()).unwrap().into_parts().0
    }

    fn alice() -> StaticTokenDecryptor {
        StaticTokenDecryptor::new(&[StaticTokenEntry {
            token: "t-alice".into(),
            user: "alice".into(),
            uid: Some("u-1".into()),
            groups: vec!["devs".into()],
        }])
    }

    #[tokio::test]
    async fn delegated_positive_maps_user() {
        let gate = delegated(FixedAuthenticator(Ok(Authentication {
            authenticated: true,
            user: "bob".into(),
            groups: vec!["ops".into()],
        })));
        let identity = gate
            .authenticate(&parts("/api/v1/whoami", &[]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(identity.name, "bob");
        assert_eq!(identity.uid, "bob");
        assert_eq!(identity.groups, vec!["ops"]);
    }

    #[tokio::test]
    async fn delegated_negative_is_sentinel() {
        let gate = delegated(FixedAuthenticator(Ok(Authentication::default())));
        let identity = gate
            .authenticate(&parts("/api/v1/whoami", &[]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(identity, Identity::unauthenticated());
        assert_eq!(identity.groups, vec![UNAUTHENTICATED_USER]);
    }

    #[tokio::test]
    async fn delegated_error_or_timeout_rejects() {
        let gate = delegated(FixedAuthenticator(Err(anyhow::anyhow!("backend down"))));
        assert!(gate.authenticate(&parts("/api/v1/whoami", &[])).await.is_err());

        let gate = delegated(SlowAuthenticator);
        let err = gate
            .authenticate(&parts("/api/v1/whoami", &[]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn delegated_bypasses_unmatched_and_ignored_paths() {
        let gate = delegated(FixedAuthenticator(Err(anyhow::anyhow!("must not be called"))));
        assert_eq!(gate.authenticate(&parts("/healthz", &[])).await.unwrap(), None);
        assert_eq!(
            gate.authenticate(&parts("/api/v1/public/info", &[]))
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn token_sources_in_priority_order() {
        let gate = token(alice());
        for headers in [
            vec![("authorization", "Bearer t-alice")],
            vec![("jweToken", "t-alice")],
            vec![("cookie", "theme=dark; jweToken=t-alice")],
            vec![("authorization", "Bearer t-alice"), ("jweToken", "bogus")],
        ] {
            let identity = gate
                .authenticate(&parts("/api/v1/whoami", &headers))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(identity.name, "alice");
            assert_eq!(identity.uid, "u-1");
        }
    }

    #[tokio::test]
    async fn token_failures_never_produce_sentinel() {
        let gate = token(alice());
        assert!(gate.authenticate(&parts("/api/v1/whoami", &[])).await.is_err());
        assert!(
            gate.authenticate(&parts("/api/v1/whoami", &[("authorization", "Bearer nope")]))
                .await
                .is_err()
        );

        let gate = token(FaultyDecryptor);
        let err = gate
            .authenticate(&parts("/api/v1/whoami", &[("jweToken", "anything")]))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid token");
    }

    #[test]
    fn missing_strategy_is_a_config_error() {
        assert!(AuthGate::from_config(config(AuthMode::Delegated), None, None).is_err());
        let gate =
            AuthGate::from_config(config(AuthMode::Token), None, Some(Arc::new(alice()))).unwrap();
        assert_eq!(gate.mode(), AuthMode::Token);
    }

    #[tokio::test]
    async fn webhook_posts_token_review() {
        let app = Router::new().route(
            "/review",
            post(|Json(body): Json<serde_json::Value>| async move {
                let token = body["spec"]["token"].as_str().unwrap_or_default().to_string();
                if token == "good" {
                    Json(serde_json::json!({
                        "status": {"authenticated": true, "user": {"username": "carol", "groups": ["admins"]}}
                    }))
                } else {
                    Json(serde_json::json!({"status": {"authenticated": false}}))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move { axum::serve(listener, app).await });

        let webhook =
            WebhookAuthenticator::new(format!("http://{}/review", addr), Duration::from_secs(5))
                .unwrap();
        let good = webhook
            .authenticate(&parts("/api/v1/whoami", &[("authorization", "Bearer good")]))
            .await
            .unwrap();
        assert!(good.authenticated);
        assert_eq!(good.user, "carol");

        let bad = webhook
            .authenticate(&parts("/api/v1/whoami", &[("authorization", "Bearer bad")]))
            .await
            .unwrap();
        assert!(!bad.authenticated);

        let none = webhook
            .authenticate(&parts("/api/v1/whoami", &[]))
            .await
            .unwrap();
        assert!(!none.authenticated);
        server.abort();
    }
}
