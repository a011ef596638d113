use axum::extract::{ConnectInfo, Path, State};
use axum::http::HeaderMap;
use axum::{Extension, Json};
use service_core::error::AppError;
use std::net::SocketAddr;
use uuid::Uuid;
use validator::Validate;

use crate::dtos::{
    IntegrityRequest, IntegrityResponse, SignatureHistoryResponse, SignatureIssueRequest,
    SignatureIssueResponse, SignatureValidateRequest, SignatureValidateResponse,
};
use crate::models::{Principal, Role};
use crate::services::metrics;
use crate::services::session::SessionClaims;
use crate::AppState;

const HISTORY_LIMIT: i64 = 50;

async fn load_session_principal(
    state: &AppState,
    claims: &SessionClaims,
) -> Result<Principal, AppError> {
    state
        .store
        .find_principal(claims.sub)
        .await?
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("session principal no longer exists")))
}

/// Issue a signing envelope bound to the current document content.
#[utoipa::path(
    post,
    path = "/signature/issue",
    tag = "signature",
    security(("bearer" = [])),
    request_body = SignatureIssueRequest,
    responses(
        (status = 200, description = "Envelope issued", body = SignatureIssueResponse),
        (status = 403, description = "Not a party to the document"),
        (status = 404, description = "Unknown document"),
    )
)]
pub async fn issue(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    headers: HeaderMap,
    connect: Option<ConnectInfo<SocketAddr>>,
    Json(body): Json<SignatureIssueRequest>,
) -> Result<Json<SignatureIssueResponse>, AppError> {
    body.validate()?;
    let principal = load_session_principal(&state, &claims).await?;
    let client = super::client_info(&headers, connect.as_ref());

    let issued = state
        .signatures
        .issue(body.document_id, &principal, &body.content, &client)
        .await?;
    Ok(Json(SignatureIssueResponse {
        success: true,
        token: issued.token,
        nonce: issued.nonce,
        document_hash: issued.document_hash,
        expires_at: issued.expires_at,
    }))
}

/// Validate a presented envelope and commit the signature.
#[utoipa::path(
    post,
    path = "/signature/validate",
    tag = "signature",
    security(("bearer" = [])),
    request_body = SignatureValidateRequest,
    responses(
        (status = 200, description = "Signature committed", body = SignatureValidateResponse),
        (status = 401, description = "Envelope invalid or expired"),
        (status = 409, description = "Replay detected"),
    )
)]
pub async fn validate(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    headers: HeaderMap,
    connect: Option<ConnectInfo<SocketAddr>>,
    Json(body): Json<SignatureValidateRequest>,
) -> Result<Json<SignatureValidateResponse>, AppError> {
    body.validate()?;
    let principal = load_session_principal(&state, &claims).await?;
    let client = super::client_info(&headers, connect.as_ref());

    let result = state
        .signatures
        .validate(&body.token, body.document_id, &principal, &client)
        .await;
    let label = match &result {
        Ok(_) => "SIGNED",
        Err(err) => err.code(),
    };
    metrics::signature_validations_total()
        .with_label_values(&[label])
        .inc();

    let validated = result?;
    Ok(Json(SignatureValidateResponse {
        success: true,
        attempt_id: validated.attempt_id,
        document_id: validated.document_id,
        nonce: validated.nonce,
        signed_at: validated.signed_at,
    }))
}

/// Compare current document content against the last committed signature.
#[utoipa::path(
    post,
    path = "/signature/integrity",
    tag = "signature",
    security(("bearer" = [])),
    request_body = IntegrityRequest,
    responses(
        (status = 200, description = "Integrity report", body = IntegrityResponse),
        (status = 404, description = "No committed signature"),
    )
)]
pub async fn integrity(
    State(state): State<AppState>,
    Extension(_claims): Extension<SessionClaims>,
    Json(body): Json<IntegrityRequest>,
) -> Result<Json<IntegrityResponse>, AppError> {
    body.validate()?;
    let report = state
        .signatures
        .verify_integrity(body.document_id, &body.content)
        .await?;
    Ok(Json(IntegrityResponse {
        success: true,
        document_id: report.document_id,
        intact: report.intact,
        signed_at: report.signed_at,
        checked_at: report.checked_at,
    }))
}

/// Signature attempt history for a document, for its parties and admins.
#[utoipa::path(
    get,
    path = "/signature/documents/{document_id}/attempts",
    tag = "signature",
    security(("bearer" = [])),
    params(("document_id" = Uuid, Path, description = "Document identifier")),
    responses(
        (status = 200, description = "Attempt history", body = SignatureHistoryResponse),
        (status = 403, description = "Not a party to the document"),
    )
)]
pub async fn history(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    Path(document_id): Path<Uuid>,
) -> Result<Json<SignatureHistoryResponse>, AppError> {
    if claims.role != Role::Admin {
        let document = state
            .store
            .find_document(document_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("document {document_id}")))?;
        if !document.is_party(claims.sub) {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "principal is not a party to document {document_id}"
            )));
        }
    }

    let attempts = state.signatures.history(document_id, HISTORY_LIMIT).await?;
    Ok(Json(SignatureHistoryResponse {
        success: true,
        document_id,
        attempts: attempts.into_iter().map(Into::into).collect(),
    }))
}
