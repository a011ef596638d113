use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Recognized anomaly classes. Scorer results outside this set are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyType {
    MultipleFailedLogins,
    UnusualAccessTime,
    RapidRepeatLogin,
    ApiAbuse,
    BruteForce,
}

impl AnomalyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::MultipleFailedLogins => "MULTIPLE_FAILED_LOGINS",
            AnomalyType::UnusualAccessTime => "UNUSUAL_ACCESS_TIME",
            AnomalyType::RapidRepeatLogin => "RAPID_REPEAT_LOGIN",
            AnomalyType::ApiAbuse => "API_ABUSE",
            AnomalyType::BruteForce => "BRUTE_FORCE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A persisted anomaly finding against a principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityAnomaly {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub principal_id: Uuid,
    pub anomaly_type: AnomalyType,
    pub severity: Severity,
    pub description: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<bson::DateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<Uuid>,
    pub created_at: bson::DateTime,
}

impl SecurityAnomaly {
    pub fn new(
        principal_id: Uuid,
        anomaly_type: AnomalyType,
        severity: Severity,
        description: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            principal_id,
            anomaly_type,
            severity,
            description: description.into(),
            metadata,
            resolved: false,
            resolved_at: None,
            resolved_by: None,
            created_at: bson::DateTime::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_orders_low_to_critical() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn unknown_anomaly_types_fail_to_parse() {
        let parsed: Result<AnomalyType, _> = serde_json::from_str("\"GEO_VELOCITY\"");
        assert!(parsed.is_err());
    }
}
