use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::models::{MfaPolicy, Principal, Role};

/// Claims carried by a session credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: Uuid,
    pub email: String,
    pub role: Role,
    /// Whether this session was established through a verified challenge.
    pub mfa_verified: bool,
    pub iss: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and verifies HS256 session credentials whose lifetime follows the
/// role policy.
pub struct SessionService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
}

pub struct IssuedSession {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl SessionService {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            issuer: config.session_issuer.clone(),
        }
    }

    pub fn issue(
        &self,
        principal: &Principal,
        policy: &MfaPolicy,
        mfa_verified: bool,
    ) -> Result<IssuedSession, AppError> {
        let now = Utc::now();
        let expires_at = now + Duration::minutes(policy.session_timeout_minutes as i64);
        let claims = SessionClaims {
            sub: principal.id,
            email: principal.email.clone(),
            role: principal.role,
            mfa_verified,
            iss: self.issuer.clone(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;
        Ok(IssuedSession { token, expires_at })
    }

    pub fn verify(&self, token: &str) -> Result<SessionClaims, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        let data = decode::<SessionClaims>(token, &self.decoding_key, &validation)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> SessionService {
        SessionService::new(&JwtConfig {
            secret: "test-secret".into(),
            session_issuer: "rentledge-auth".into(),
            signature_issuer: "rentledge-dsa".into(),
        })
    }

    fn principal(role: Role) -> Principal {
        Principal {
            id: Uuid::new_v4(),
            email: "admin@example.com".into(),
            role,
            mfa_enabled: true,
            mfa_secret_ref: None,
            failed_attempt_count: 0,
            locked_until: None,
            last_auth_at: None,
            last_auth_source: None,
        }
    }

    #[test]
    fn issued_session_verifies_and_carries_role() {
        let service = service();
        let p = principal(Role::Admin);
        let session = service
            .issue(&p, MfaPolicy::for_role(p.role), true)
            .unwrap();
        let claims = service.verify(&session.token).unwrap();
        assert_eq!(claims.sub, p.id);
        assert_eq!(claims.role, Role::Admin);
        assert!(claims.mfa_verified);
    }

    #[test]
    fn session_lifetime_follows_role_policy() {
        let service = service();
        let p = principal(Role::Admin);
        let session = service
            .issue(&p, MfaPolicy::for_role(p.role), true)
            .unwrap();
        let lifetime = session.expires_at - Utc::now();
        assert!(lifetime <= Duration::minutes(15));
        assert!(lifetime > Duration::minutes(14));
    }

    #[test]
    fn foreign_issuer_is_rejected() {
        let service = service();
        let other = SessionService::new(&JwtConfig {
            secret: "test-secret".into(),
            session_issuer: "someone-else".into(),
            signature_issuer: "rentledge-dsa".into(),
        });
        let p = principal(Role::User);
        let session = other.issue(&p, MfaPolicy::for_role(p.role), false).unwrap();
        assert!(service.verify(&session.token).is_err());
    }

    #[test]
    fn tampered_token_is_rejected() {
        let service = service();
        let p = principal(Role::User);
        let session = service
            .issue(&p, MfaPolicy::for_role(p.role), false)
            .unwrap();
        let mut tampered = session.token.clone();
        tampered.push('x');
        assert!(service.verify(&tampered).is_err());
    }
}
