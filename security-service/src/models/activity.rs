use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Audit-trail actions recorded against a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityAction {
    LoginSuccess,
    LoginFailed,
    LoginBlocked,
    OtpIssued,
    OtpVerified,
    OtpRejected,
    SuspiciousLogin,
    AnomalyResolved,
    SignatureIssued,
    SignatureValidated,
    SignatureRejected,
}

/// One entry in the security activity log.
///
/// Entries are append-only; nothing in the service mutates them after
/// insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub principal_id: Uuid,
    pub action: ActivityAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: bson::DateTime,
}

impl ActivityEvent {
    pub fn new(principal_id: Uuid, action: ActivityAction) -> Self {
        Self {
            id: Uuid::new_v4(),
            principal_id,
            action,
            source_address: None,
            user_agent: None,
            metadata: serde_json::Value::Null,
            created_at: bson::DateTime::now(),
        }
    }

    pub fn with_client(mut self, source_address: Option<String>, user_agent: Option<String>) -> Self {
        self.source_address = source_address;
        self.user_agent = user_agent;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
