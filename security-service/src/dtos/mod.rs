use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::models::{
    AnomalyType, MfaChannel, RiskDecision, Role, SecurityAnomaly, Severity, SignatureAttempt,
    SignatureStatus,
};
use crate::services::otp_cache::CacheStats;
use crate::services::otp_delivery::ChannelDelivery;

// ---- requests ----

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ChallengeRequest {
    pub principal_id: Uuid,
    /// Preferred delivery channel; defaults by role policy when omitted.
    pub channel: Option<MfaChannel>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct VerifyRequest {
    pub principal_id: Uuid,
    #[validate(length(min = 6, max = 6, message = "code must be 6 digits"))]
    pub code: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SignatureIssueRequest {
    pub document_id: Uuid,
    #[validate(length(min = 1, message = "content must not be empty"))]
    pub content: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SignatureValidateRequest {
    pub document_id: Uuid,
    #[validate(length(min = 1, message = "token must not be empty"))]
    pub token: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct IntegrityRequest {
    pub document_id: Uuid,
    #[validate(length(min = 1, message = "content must not be empty"))]
    pub content: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct AnomalyListQuery {
    pub page: Option<u64>,
    pub per_page: Option<i64>,
}

// ---- responses ----

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionView {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ChallengeView {
    pub channel: MfaChannel,
    pub expires_at: DateTime<Utc>,
    pub deliveries: Vec<ChannelDelivery>,
}

/// Heuristic reasons stay internal to the audit trail; callers only learn
/// the decision.
#[derive(Debug, Serialize, ToSchema)]
pub struct ChallengeResponse {
    pub success: bool,
    pub decision: RiskDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge: Option<ChallengeView>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VerifyResponse {
    pub success: bool,
    pub device_confirmation_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionView>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SignatureIssueResponse {
    pub success: bool,
    pub token: String,
    pub nonce: String,
    pub document_hash: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SignatureValidateResponse {
    pub success: bool,
    pub attempt_id: Uuid,
    pub document_id: Uuid,
    pub nonce: String,
    pub signed_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct IntegrityResponse {
    pub success: bool,
    pub document_id: Uuid,
    pub intact: bool,
    pub signed_at: DateTime<Utc>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SignatureAttemptView {
    pub id: Uuid,
    pub principal_id: Uuid,
    pub role: Role,
    pub status: SignatureStatus,
    pub nonce: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<SignatureAttempt> for SignatureAttemptView {
    fn from(attempt: SignatureAttempt) -> Self {
        Self {
            id: attempt.id,
            principal_id: attempt.principal_id,
            role: attempt.role,
            status: attempt.status,
            nonce: attempt.nonce,
            rejection_reason: attempt.rejection_reason,
            source_address: attempt.source_address,
            created_at: attempt.created_at.to_chrono(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SignatureHistoryResponse {
    pub success: bool,
    pub document_id: Uuid,
    pub attempts: Vec<SignatureAttemptView>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AnomalyView {
    pub id: Uuid,
    pub principal_id: Uuid,
    pub anomaly_type: AnomalyType,
    pub severity: Severity,
    pub description: String,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
}

impl From<SecurityAnomaly> for AnomalyView {
    fn from(anomaly: SecurityAnomaly) -> Self {
        Self {
            id: anomaly.id,
            principal_id: anomaly.principal_id,
            anomaly_type: anomaly.anomaly_type,
            severity: anomaly.severity,
            description: anomaly.description,
            resolved: anomaly.resolved,
            created_at: anomaly.created_at.to_chrono(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AnomalyListResponse {
    pub success: bool,
    pub anomalies: Vec<AnomalyView>,
    pub page: u64,
    pub per_page: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    pub cache: CacheStats,
}
