use axum::extract::ConnectInfo;
use axum::http::{header, HeaderMap};
use std::net::SocketAddr;

use crate::services::signature::ClientInfo;

pub mod anomalies;
pub mod auth;
pub mod health;
pub mod signature;

/// Client facts for audit records: first hop of `x-forwarded-for` when
/// present, otherwise the socket peer.
pub(crate) fn client_info(
    headers: &HeaderMap,
    connect: Option<&ConnectInfo<SocketAddr>>,
) -> ClientInfo {
    let source_address = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| connect.map(|ConnectInfo(addr)| addr.ip().to_string()));
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    ClientInfo {
        source_address,
        user_agent,
    }
}
