use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;

use crate::models::Role;
use crate::services::session::SessionClaims;
use crate::AppState;

/// Require a valid bearer session credential and expose its claims to the
/// handler via request extensions.
pub async fn session_auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("missing bearer credential")))?;

    let claims = state.sessions.verify(token)?;
    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

/// Gate a route on an administrator session. Must run after
/// [`session_auth_middleware`].
pub async fn require_admin(request: Request, next: Next) -> Result<Response, AppError> {
    match request.extensions().get::<SessionClaims>() {
        Some(claims) if claims.role == Role::Admin => Ok(next.run(request).await),
        Some(_) => Err(AppError::Forbidden(anyhow::anyhow!(
            "administrator role required"
        ))),
        None => Err(AppError::Unauthorized(anyhow::anyhow!(
            "missing session claims"
        ))),
    }
}
