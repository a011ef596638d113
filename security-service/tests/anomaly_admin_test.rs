mod common;

use axum::http::StatusCode;
use common::*;
use security_service::models::{AnomalyType, Role, SecurityAnomaly, Severity};
use security_service::services::persistence::PersistenceStore;
use serde_json::json;

#[tokio::test]
async fn anomaly_review_is_admin_only() {
    let app = spawn_app();
    let user = seed_principal(&app.store, Role::User).await;

    let (status, body) = request(
        &app.router,
        "GET",
        "/security/anomalies",
        Some(&session_token(&app, &user)),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");

    let (status, _) = request(&app.router, "GET", "/security/anomalies", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_lists_and_resolves_findings() {
    let app = spawn_app();
    let admin = seed_principal(&app.store, Role::Admin).await;
    let user = seed_principal(&app.store, Role::User).await;
    let anomaly = SecurityAnomaly::new(
        user.id,
        AnomalyType::MultipleFailedLogins,
        Severity::High,
        "4 failed login attempts in the last 15 minutes",
        serde_json::Value::Null,
    );
    app.store.insert_anomaly(&anomaly).await.unwrap();
    let token = session_token(&app, &admin);

    let (status, body) = request(
        &app.router,
        "GET",
        "/security/anomalies?page=1&per_page=10",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["anomalies"].as_array().unwrap().len(), 1);
    assert_eq!(body["anomalies"][0]["anomaly_type"], "MULTIPLE_FAILED_LOGINS");

    let (status, _) = request(
        &app.router,
        "POST",
        &format!("/security/anomalies/{}/resolve", anomaly.id),
        Some(&token),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = request(
        &app.router,
        "GET",
        "/security/anomalies",
        Some(&token),
        None,
    )
    .await;
    assert!(body["anomalies"].as_array().unwrap().is_empty());

    // Resolving twice is a 404, not a silent success.
    let (status, body) = request(
        &app.router,
        "POST",
        &format!("/security/anomalies/{}/resolve", anomaly.id),
        Some(&token),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn health_reports_dependency_state() {
    let app = spawn_app();
    let (status, body) = request(&app.router, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "up");
    assert_eq!(body["cache"]["redis_configured"], false);
    assert_eq!(body["cache"]["fallback_entries"], 0);
}

#[tokio::test]
async fn metrics_are_exposed_in_text_format() {
    let app = spawn_app();
    // Generate at least one counter sample first.
    let user = seed_principal(&app.store, Role::User).await;
    post_json(
        &app.router,
        "/auth/challenge",
        json!({ "principal_id": user.id }),
    )
    .await;

    let request = axum::http::Request::builder()
        .method("GET")
        .uri("/metrics")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = tower::ServiceExt::oneshot(app.router.clone(), request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/plain"));
    let bytes = http_body_util::BodyExt::collect(response.into_body())
        .await
        .unwrap()
        .to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("auth_challenges_total"));
}
