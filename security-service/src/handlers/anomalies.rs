use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::{AnomalyListQuery, AnomalyListResponse, MessageResponse};
use crate::services::session::SessionClaims;
use crate::AppState;

const DEFAULT_PER_PAGE: i64 = 20;
const MAX_PER_PAGE: i64 = 100;

/// Unresolved anomaly findings, newest first. Administrators only.
#[utoipa::path(
    get,
    path = "/security/anomalies",
    tag = "security",
    security(("bearer" = [])),
    params(AnomalyListQuery),
    responses(
        (status = 200, description = "Unresolved anomalies", body = AnomalyListResponse),
        (status = 403, description = "Administrator role required"),
    )
)]
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<AnomalyListQuery>,
) -> Result<Json<AnomalyListResponse>, AppError> {
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query
        .per_page
        .unwrap_or(DEFAULT_PER_PAGE)
        .clamp(1, MAX_PER_PAGE);
    let skip = (page - 1) * per_page as u64;

    let anomalies = state.store.list_unresolved_anomalies(skip, per_page).await?;
    Ok(Json(AnomalyListResponse {
        success: true,
        anomalies: anomalies.into_iter().map(Into::into).collect(),
        page,
        per_page,
    }))
}

/// Mark an anomaly finding as handled. Administrators only.
#[utoipa::path(
    post,
    path = "/security/anomalies/{anomaly_id}/resolve",
    tag = "security",
    security(("bearer" = [])),
    params(("anomaly_id" = Uuid, Path, description = "Anomaly identifier")),
    responses(
        (status = 200, description = "Anomaly resolved", body = MessageResponse),
        (status = 404, description = "Unknown or already resolved anomaly"),
    )
)]
pub async fn resolve(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    Path(anomaly_id): Path<Uuid>,
) -> Result<Json<MessageResponse>, AppError> {
    state.detector.resolve(anomaly_id, claims.sub).await?;
    Ok(Json(MessageResponse {
        success: true,
        message: format!("anomaly {anomaly_id} resolved"),
    }))
}
