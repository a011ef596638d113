use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::principal::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignatureStatus {
    Pending,
    Signed,
    Rejected,
}

/// Durable record of a signature validation attempt.
///
/// Every validation, successful or not, produces one of these. The nonce is
/// the replay-protection key: a `SIGNED` attempt with the same
/// `(document_id, nonce)` inside the replay window rejects the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureAttempt {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub document_id: Uuid,
    pub principal_id: Uuid,
    pub role: Role,
    /// Digest of the presented envelope, not of the document.
    pub signature_hash: String,
    /// Salted digest of the document content at signing time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_hash: Option<String>,
    pub nonce: String,
    pub status: SignatureStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub created_at: bson::DateTime,
}
