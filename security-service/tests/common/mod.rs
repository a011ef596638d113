#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use security_service::config::{
    Environment, JwtConfig, MongoConfig, NotifierConfig, OtpConfig, RateLimitConfig, RedisConfig,
    ScoringConfig, SecurityConfig, SignatureConfig, SwaggerMode,
};
use security_service::models::{DocumentRecord, MfaPolicy, Principal, Role};
use security_service::services::notification::{MockNotifier, Notifier};
use security_service::services::otp_cache::OtpCacheStore;
use security_service::services::persistence::{MemoryStore, PersistenceStore};
use security_service::services::scoring::{AnomalyScorer, NoopScorer};
use security_service::{build_router, AppState};

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub cache: Arc<OtpCacheStore>,
    pub notifier: Arc<MockNotifier>,
}

pub fn test_config() -> SecurityConfig {
    SecurityConfig {
        environment: Environment::Development,
        port: 0,
        log_level: "warn".into(),
        otlp_endpoint: String::new(),
        swagger: SwaggerMode::Disabled,
        allowed_origins: vec!["http://localhost:3000".into()],
        mongo: MongoConfig {
            uri: "mongodb://unused".into(),
            database: "unused".into(),
        },
        redis: RedisConfig {
            url: "redis://unused".into(),
        },
        jwt: JwtConfig {
            secret: "integration-test-secret".into(),
            session_issuer: "rentledge-auth".into(),
            signature_issuer: "rentledge-dsa".into(),
        },
        otp: OtpConfig {
            ttl_seconds: 300,
            attempts_allowed: 3,
            channel_timeout_ms: 1_000,
        },
        scoring: ScoringConfig {
            endpoint: String::new(),
            timeout_ms: 500,
        },
        notifier: NotifierConfig {
            endpoint: "http://unused".into(),
            timeout_ms: 1_000,
        },
        signature: SignatureConfig {
            document_salt: "integration-test-salt".into(),
            token_ttl_hours: 24,
            replay_window_seconds: 600,
        },
        rate_limit: RateLimitConfig {
            challenge_attempts: 3,
            challenge_window_seconds: 60,
            global_attempts: 1_000,
            global_window_seconds: 60,
        },
    }
}

pub fn spawn_app() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(OtpCacheStore::in_memory());
    let notifier = Arc::new(MockNotifier::new());
    let state = AppState::build(
        test_config(),
        Arc::clone(&store) as Arc<dyn PersistenceStore>,
        Arc::clone(&cache),
        Arc::clone(&notifier) as Arc<dyn Notifier>,
        Arc::new(NoopScorer) as Arc<dyn AnomalyScorer>,
    );
    TestApp {
        router: build_router(state.clone()),
        state,
        store,
        cache,
        notifier,
    }
}

pub async fn seed_principal(store: &MemoryStore, role: Role) -> Principal {
    let principal = Principal {
        id: Uuid::new_v4(),
        email: format!("{}-{}@example.com", role.to_string().to_lowercase(), Uuid::new_v4()),
        role,
        mfa_enabled: true,
        mfa_secret_ref: None,
        failed_attempt_count: 0,
        locked_until: None,
        last_auth_at: None,
        last_auth_source: None,
    };
    store.insert_principal(&principal).await.unwrap();
    principal
}

pub async fn seed_document(
    store: &MemoryStore,
    owner: &Principal,
    counterparty: Option<&Principal>,
) -> Uuid {
    let document = DocumentRecord {
        id: Uuid::new_v4(),
        owner_id: owner.id,
        counterparty_id: counterparty.map(|p| p.id),
        created_at: bson::DateTime::now(),
    };
    store.insert_document(&document).await.unwrap();
    document.id
}

/// Mint a session credential directly, bypassing the challenge flow, so
/// tests of authenticated routes stay independent of the policy clock.
pub fn session_token(app: &TestApp, principal: &Principal) -> String {
    app.state
        .sessions
        .issue(principal, MfaPolicy::for_role(principal.role), true)
        .unwrap()
        .token
}

pub async fn live_code(app: &TestApp, principal: &Principal) -> String {
    let key = OtpCacheStore::owner_key(&principal.email);
    app.cache.get(&key).await.unwrap().unwrap().code
}

pub async fn request(
    router: &Router,
    method: &str,
    uri: &str,
    bearer: Option<&str>,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

pub async fn post_json(
    router: &Router,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    request(router, "POST", uri, None, Some(body)).await
}
