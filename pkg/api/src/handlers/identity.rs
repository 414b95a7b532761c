use axum::{Extension, Json};

use crate::auth::Identity;

/// GET /api/v1/whoami: the identity the auth gate resolved for this request.
/// Requests exempt from authentication report the unauthenticated identity.
pub async fn whoami(identity: Option<Extension<Identity>>) -> Json<Identity> {
    Json(
        identity
            .map(|Extension(id)| id)
            .unwrap_or_else(Identity::unauthenticated),
    )
}
