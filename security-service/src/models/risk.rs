use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

/// Request-scoped facts about a login attempt.
#[derive(Debug, Clone)]
pub struct LoginContext {
    pub source_address: Option<String>,
    pub user_agent: Option<String>,
    pub at: DateTime<Utc>,
}

impl LoginContext {
    pub fn now(source_address: Option<String>, user_agent: Option<String>) -> Self {
        Self {
            source_address,
            user_agent,
            at: Utc::now(),
        }
    }
}

/// Individual signals that contributed to a risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskReason {
    PriorFailedAttempts,
    RapidRepeatLogin,
    OutsideAllowedHours,
}

/// Outcome of policy evaluation for a login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskDecision {
    Allow,
    Challenge,
    Block,
}

impl RiskDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskDecision::Allow => "ALLOW",
            RiskDecision::Challenge => "CHALLENGE",
            RiskDecision::Block => "BLOCK",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskAssessment {
    pub score: f64,
    pub reasons: Vec<RiskReason>,
    pub decision: RiskDecision,
}

impl RiskAssessment {
    pub fn reason_applied(&self, reason: RiskReason) -> bool {
        self.reasons.contains(&reason)
    }
}
