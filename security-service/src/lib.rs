//! Adaptive authentication and security monitoring service.
//!
//! One-time code issuance and verification, role-based MFA policy with risk
//! scoring, post-login anomaly detection, and a digital-signature workflow
//! with replay protection.

use axum::routing::{get, post};
use axum::Router;
use service_core::middleware::rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware};
use service_core::middleware::security_headers::security_headers_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use config::{SecurityConfig, SwaggerMode};
use services::anomaly::AnomalyDetector;
use services::mfa_policy::PolicyEngine;
use services::notification::Notifier;
use services::otp_cache::OtpCacheStore;
use services::otp_delivery::IssuanceCoordinator;
use services::persistence::PersistenceStore;
use services::scoring::AnomalyScorer;
use services::session::SessionService;
use services::signature::SignatureService;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<SecurityConfig>,
    pub store: Arc<dyn PersistenceStore>,
    pub cache: Arc<OtpCacheStore>,
    pub engine: Arc<PolicyEngine>,
    pub detector: Arc<AnomalyDetector>,
    pub signatures: Arc<SignatureService>,
    pub sessions: Arc<SessionService>,
}

impl AppState {
    /// Wire the service graph from its edge collaborators. Tests hand in
    /// in-memory stores and mocks; `main` hands in the real ones.
    pub fn build(
        config: SecurityConfig,
        store: Arc<dyn PersistenceStore>,
        cache: Arc<OtpCacheStore>,
        notifier: Arc<dyn Notifier>,
        scorer: Arc<dyn AnomalyScorer>,
    ) -> Self {
        let sessions = Arc::new(SessionService::new(&config.jwt));
        let detector = Arc::new(AnomalyDetector::new(
            Arc::clone(&store),
            scorer,
            Arc::clone(&notifier),
            std::time::Duration::from_millis(config.scoring.timeout_ms),
        ));
        let coordinator = Arc::new(IssuanceCoordinator::new(
            Arc::clone(&cache),
            Arc::clone(&notifier),
            &config.otp,
        ));
        let engine = Arc::new(PolicyEngine::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            coordinator,
            Arc::clone(&sessions),
            Arc::clone(&detector),
            notifier,
        ));
        let signatures = Arc::new(SignatureService::new(
            &config.jwt,
            &config.signature,
            Arc::clone(&store),
        ));
        Self {
            config: Arc::new(config),
            store,
            cache,
            engine,
            detector,
            signatures,
            sessions,
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::auth::challenge,
        handlers::auth::verify,
        handlers::signature::issue,
        handlers::signature::validate,
        handlers::signature::integrity,
        handlers::signature::history,
        handlers::anomalies::list,
        handlers::anomalies::resolve,
        handlers::health::health,
    ),
    components(schemas(
        dtos::ChallengeRequest,
        dtos::VerifyRequest,
        dtos::SignatureIssueRequest,
        dtos::SignatureValidateRequest,
        dtos::IntegrityRequest,
        dtos::ChallengeResponse,
        dtos::ChallengeView,
        dtos::SessionView,
        dtos::VerifyResponse,
        dtos::SignatureIssueResponse,
        dtos::SignatureValidateResponse,
        dtos::IntegrityResponse,
        dtos::SignatureHistoryResponse,
        dtos::SignatureAttemptView,
        dtos::AnomalyListResponse,
        dtos::AnomalyView,
        dtos::MessageResponse,
        dtos::HealthResponse,
        models::Role,
        models::MfaChannel,
        models::RiskDecision,
        models::AnomalyType,
        models::Severity,
        models::SignatureStatus,
        services::otp_cache::CacheStats,
        services::otp_delivery::ChannelDelivery,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "Login challenges and code verification"),
        (name = "signature", description = "Document signing workflow"),
        (name = "security", description = "Anomaly review"),
        (name = "ops", description = "Health and metrics"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let challenge_limiter = create_ip_rate_limiter(
        state.config.rate_limit.challenge_attempts,
        state.config.rate_limit.challenge_window_seconds,
    );
    let global_limiter = create_ip_rate_limiter(
        state.config.rate_limit.global_attempts,
        state.config.rate_limit.global_window_seconds,
    );

    // Credential endpoints carry their own, tighter limiter.
    let auth_routes = Router::new()
        .route("/auth/challenge", post(handlers::auth::challenge))
        .route("/auth/verify", post(handlers::auth::verify))
        .layer(axum::middleware::from_fn_with_state(
            challenge_limiter,
            ip_rate_limit_middleware,
        ));

    let session_routes = Router::new()
        .route("/signature/issue", post(handlers::signature::issue))
        .route("/signature/validate", post(handlers::signature::validate))
        .route("/signature/integrity", post(handlers::signature::integrity))
        .route(
            "/signature/documents/:document_id/attempts",
            get(handlers::signature::history),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::session_auth_middleware,
        ));

    let admin_routes = Router::new()
        .route("/security/anomalies", get(handlers::anomalies::list))
        .route(
            "/security/anomalies/:anomaly_id/resolve",
            post(handlers::anomalies::resolve),
        )
        .layer(axum::middleware::from_fn(middleware::auth::require_admin))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::session_auth_middleware,
        ));

    let mut router = Router::new()
        .merge(auth_routes)
        .merge(session_routes)
        .merge(admin_routes)
        .route("/health", get(handlers::health::health))
        .route("/metrics", get(handlers::health::metrics_endpoint));

    if state.config.swagger == SwaggerMode::Enabled {
        router = router.merge(
            SwaggerUi::new("/docs").url("/.well-known/openapi.json", ApiDoc::openapi()),
        );
    }

    let origins: Vec<axum::http::HeaderValue> = state
        .config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::error!(origin = %origin, error = %err, "invalid CORS origin, skipping");
                None
            }
        })
        .collect();

    router
        .layer(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers([
                    axum::http::header::AUTHORIZATION,
                    axum::http::header::CONTENT_TYPE,
                ]),
        )
        .layer(axum::middleware::from_fn(security_headers_middleware))
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(axum::middleware::from_fn_with_state(
            global_limiter,
            ip_rate_limit_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
