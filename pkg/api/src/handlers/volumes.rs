use axum::{
    Json,
    extract::{Path, State},
};
use pkg_state::store::{bounded, list_as};
use pkg_types::selector::LabelSelector;
use pkg_types::volume::PersistentVolumeClaim;

use super::ApiError;
use crate::AppState;

/// GET /api/v1/namespaces/{ns}/persistentvolumeclaims
pub async fn list_claims(
    State(state): State<AppState>,
    Path(ns): Path<String>,
) -> Result<Json<Vec<PersistentVolumeClaim>>, ApiError> {
    let claims = bounded(
        state.store_timeout,
        "list claims",
        list_as(state.store.as_ref(), Some(&ns), &LabelSelector::everything()),
    )
    .await?;
    Ok(Json(claims))
}
