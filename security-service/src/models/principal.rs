use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Platform roles, ordered from most to least privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Landlord,
    User,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Admin => write!(f, "ADMIN"),
            Role::Landlord => write!(f, "LANDLORD"),
            Role::User => write!(f, "USER"),
        }
    }
}

/// Authentication-relevant state of an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub mfa_enabled: bool,
    /// Opaque handle to the enrolled authenticator secret. Never logged and
    /// never returned to clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mfa_secret_ref: Option<String>,
    pub failed_attempt_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<bson::DateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_auth_at: Option<bson::DateTime>,
    /// Source address of the most recent successful authentication.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_auth_source: Option<String>,
}

impl Principal {
    /// Whether a lockout is currently in force.
    pub fn locked(&self, now: chrono::DateTime<chrono::Utc>) -> Option<chrono::DateTime<chrono::Utc>> {
        self.locked_until
            .map(|until| until.to_chrono())
            .filter(|until| *until > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn principal(locked_until: Option<chrono::DateTime<Utc>>) -> Principal {
        Principal {
            id: Uuid::new_v4(),
            email: "tenant@example.com".into(),
            role: Role::User,
            mfa_enabled: false,
            mfa_secret_ref: None,
            failed_attempt_count: 0,
            locked_until: locked_until.map(bson::DateTime::from_chrono),
            last_auth_at: None,
            last_auth_source: None,
        }
    }

    #[test]
    fn future_lock_is_in_force() {
        let until = Utc::now() + Duration::minutes(10);
        let p = principal(Some(until));
        assert!(p.locked(Utc::now()).is_some());
    }

    #[test]
    fn elapsed_lock_is_ignored() {
        let until = Utc::now() - Duration::minutes(1);
        let p = principal(Some(until));
        assert!(p.locked(Utc::now()).is_none());
    }

    #[test]
    fn roles_serialize_screaming() {
        assert_eq!(serde_json::to_string(&Role::Landlord).unwrap(), "\"LANDLORD\"");
    }
}
