use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::Json;
use service_core::error::AppError;
use std::net::SocketAddr;
use validator::Validate;

use crate::dtos::{
    ChallengeRequest, ChallengeResponse, ChallengeView, SessionView, VerifyRequest, VerifyResponse,
};
use crate::models::{LoginContext, RiskDecision};
use crate::services::metrics;
use crate::services::mfa_policy::{ChallengeOutcome, VerificationOutcome};
use crate::AppState;

/// Evaluate a login attempt: allow it, challenge it with a one-time code,
/// or block it.
#[utoipa::path(
    post,
    path = "/auth/challenge",
    tag = "auth",
    request_body = ChallengeRequest,
    responses(
        (status = 200, description = "Policy decision", body = ChallengeResponse),
        (status = 404, description = "Unknown principal"),
        (status = 423, description = "Account locked"),
        (status = 429, description = "Rate limited"),
    )
)]
pub async fn challenge(
    State(state): State<AppState>,
    headers: HeaderMap,
    connect: Option<ConnectInfo<SocketAddr>>,
    Json(body): Json<ChallengeRequest>,
) -> Result<Json<ChallengeResponse>, AppError> {
    body.validate()?;
    let client = super::client_info(&headers, connect.as_ref());
    let context = LoginContext::now(client.source_address, client.user_agent);

    let result = state
        .engine
        .handle_challenge(body.principal_id, body.channel, &context)
        .await;
    let label = match &result {
        Ok(ChallengeOutcome::Allowed { .. }) => RiskDecision::Allow.as_str(),
        Ok(ChallengeOutcome::ChallengeIssued { .. }) => RiskDecision::Challenge.as_str(),
        Ok(ChallengeOutcome::Blocked { .. }) => RiskDecision::Block.as_str(),
        Err(err) => err.code(),
    };
    metrics::challenges_total().with_label_values(&[label]).inc();

    let response = match result? {
        ChallengeOutcome::Allowed { session } => ChallengeResponse {
            success: true,
            decision: RiskDecision::Allow,
            session: Some(SessionView {
                token: session.token,
                expires_at: session.expires_at,
            }),
            challenge: None,
        },
        ChallengeOutcome::ChallengeIssued {
            channel, receipt, ..
        } => ChallengeResponse {
            success: true,
            decision: RiskDecision::Challenge,
            session: None,
            challenge: Some(ChallengeView {
                channel,
                expires_at: receipt.expires_at,
                deliveries: receipt.channels,
            }),
        },
        ChallengeOutcome::Blocked { .. } => ChallengeResponse {
            success: true,
            decision: RiskDecision::Block,
            session: None,
            challenge: None,
        },
    };
    Ok(Json(response))
}

/// Verify a submitted one-time code and issue the session credential.
#[utoipa::path(
    post,
    path = "/auth/verify",
    tag = "auth",
    request_body = VerifyRequest,
    responses(
        (status = 200, description = "Code accepted", body = VerifyResponse),
        (status = 401, description = "Invalid or exhausted code"),
        (status = 404, description = "No active code"),
        (status = 423, description = "Account locked"),
    )
)]
pub async fn verify(
    State(state): State<AppState>,
    headers: HeaderMap,
    connect: Option<ConnectInfo<SocketAddr>>,
    Json(body): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, AppError> {
    body.validate()?;
    let client = super::client_info(&headers, connect.as_ref());
    let context = LoginContext::now(client.source_address, client.user_agent);

    let result = state
        .engine
        .verify(body.principal_id, &body.code, &context)
        .await;
    let label = match &result {
        Ok(VerificationOutcome::SessionGranted { .. }) => "GRANTED",
        Ok(VerificationOutcome::DeviceConfirmationRequired) => "DEVICE_CONFIRMATION",
        Err(err) => err.code(),
    };
    metrics::verifications_total()
        .with_label_values(&[label])
        .inc();

    let response = match result? {
        VerificationOutcome::SessionGranted { session } => VerifyResponse {
            success: true,
            device_confirmation_required: false,
            session: Some(SessionView {
                token: session.token,
                expires_at: session.expires_at,
            }),
        },
        VerificationOutcome::DeviceConfirmationRequired => VerifyResponse {
            success: true,
            device_confirmation_required: true,
            session: None,
        },
    };
    Ok(Json(response))
}
