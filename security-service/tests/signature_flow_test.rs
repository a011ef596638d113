mod common;

use axum::http::StatusCode;
use common::*;
use security_service::models::Role;
use serde_json::json;

const CONTENT: &str = "lease agreement: unit 4B, 12 months";

#[tokio::test]
async fn issue_validate_and_audit_history() {
    let app = spawn_app();
    let landlord = seed_principal(&app.store, Role::Landlord).await;
    let tenant = seed_principal(&app.store, Role::User).await;
    let document_id = seed_document(&app.store, &landlord, Some(&tenant)).await;
    let tenant_token = session_token(&app, &tenant);

    let (status, body) = request(
        &app.router,
        "POST",
        "/signature/issue",
        Some(&tenant_token),
        Some(json!({ "document_id": document_id, "content": CONTENT })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let envelope = body["token"].as_str().unwrap().to_string();
    assert_eq!(body["nonce"].as_str().unwrap().len(), 32);

    let (status, body) = request(
        &app.router,
        "POST",
        "/signature/validate",
        Some(&tenant_token),
        Some(json!({ "document_id": document_id, "token": envelope })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["document_id"], document_id.to_string());

    // Presenting the same envelope again inside the window is a replay.
    let (status, body) = request(
        &app.router,
        "POST",
        "/signature/validate",
        Some(&tenant_token),
        Some(json!({ "document_id": document_id, "token": envelope })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "REPLAY_DETECTED");

    let (status, body) = request(
        &app.router,
        "GET",
        &format!("/signature/documents/{document_id}/attempts"),
        Some(&tenant_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let attempts = body["attempts"].as_array().unwrap();
    assert_eq!(attempts.len(), 2);
}

#[tokio::test]
async fn integrity_check_flags_edited_content() {
    let app = spawn_app();
    let landlord = seed_principal(&app.store, Role::Landlord).await;
    let tenant = seed_principal(&app.store, Role::User).await;
    let document_id = seed_document(&app.store, &landlord, Some(&tenant)).await;
    let token = session_token(&app, &tenant);

    let (_, body) = request(
        &app.router,
        "POST",
        "/signature/issue",
        Some(&token),
        Some(json!({ "document_id": document_id, "content": CONTENT })),
    )
    .await;
    let envelope = body["token"].as_str().unwrap().to_string();
    request(
        &app.router,
        "POST",
        "/signature/validate",
        Some(&token),
        Some(json!({ "document_id": document_id, "token": envelope })),
    )
    .await;

    let (status, body) = request(
        &app.router,
        "POST",
        "/signature/integrity",
        Some(&token),
        Some(json!({ "document_id": document_id, "content": CONTENT })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["intact"], true);

    let (status, body) = request(
        &app.router,
        "POST",
        "/signature/integrity",
        Some(&token),
        Some(json!({ "document_id": document_id, "content": "lease agreement: unit 4B, 120 months" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["intact"], false);
}

#[tokio::test]
async fn signature_routes_require_a_session() {
    let app = spawn_app();
    let (status, body) = request(
        &app.router,
        "POST",
        "/signature/issue",
        None,
        Some(json!({ "document_id": uuid::Uuid::new_v4(), "content": CONTENT })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn outsiders_are_refused_and_admins_allowed() {
    let app = spawn_app();
    let landlord = seed_principal(&app.store, Role::Landlord).await;
    let tenant = seed_principal(&app.store, Role::User).await;
    let outsider = seed_principal(&app.store, Role::User).await;
    let admin = seed_principal(&app.store, Role::Admin).await;
    let document_id = seed_document(&app.store, &landlord, Some(&tenant)).await;

    let (status, body) = request(
        &app.router,
        "POST",
        "/signature/issue",
        Some(&session_token(&app, &outsider)),
        Some(json!({ "document_id": document_id, "content": CONTENT })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");

    let (status, _) = request(
        &app.router,
        "POST",
        "/signature/issue",
        Some(&session_token(&app, &admin)),
        Some(json!({ "document_id": document_id, "content": CONTENT })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // History follows the same party rule.
    let (status, _) = request(
        &app.router,
        "GET",
        &format!("/signature/documents/{document_id}/attempts"),
        Some(&session_token(&app, &outsider)),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
