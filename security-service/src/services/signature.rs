use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use service_core::utils::hashing::{constant_time_eq, sha256_hex, sha256_hex_salted};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{JwtConfig, SignatureConfig};
use crate::models::{
    ActivityAction, ActivityEvent, Principal, Role, SignatureAttempt, SignatureStatus,
};
use crate::services::persistence::PersistenceStore;

pub const ENVELOPE_VERSION: &str = "1.0";

/// Request-scoped client facts attached to audit records.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub source_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Claims inside a signature envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureClaims {
    pub document_id: Uuid,
    pub sub: Uuid,
    pub role: Role,
    pub document_hash: String,
    pub nonce: String,
    pub version: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuedSignatureToken {
    pub token: String,
    pub nonce: String,
    pub document_hash: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignatureValidation {
    pub attempt_id: Uuid,
    pub document_id: Uuid,
    pub principal_id: Uuid,
    pub nonce: String,
    pub signed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub document_id: Uuid,
    pub intact: bool,
    pub signed_at: DateTime<Utc>,
    pub checked_at: DateTime<Utc>,
}

/// Digital signature workflow: tamper-evident envelopes over document
/// hashes, nonce-based replay protection, and a durable audit trail.
///
/// Every validation attempt is recorded. A rejected attempt that cannot be
/// written is logged and the rejection still stands; a successful signature
/// that cannot be written fails the validation, because the recorded nonce
/// is what makes the replay window enforceable.
pub struct SignatureService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    document_salt: String,
    token_ttl: Duration,
    replay_window: Duration,
    store: Arc<dyn PersistenceStore>,
}

impl SignatureService {
    pub fn new(
        jwt: &JwtConfig,
        config: &SignatureConfig,
        store: Arc<dyn PersistenceStore>,
    ) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(jwt.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(jwt.secret.as_bytes()),
            issuer: jwt.signature_issuer.clone(),
            document_salt: config.document_salt.clone(),
            token_ttl: Duration::hours(config.token_ttl_hours),
            replay_window: Duration::seconds(config.replay_window_seconds),
            store,
        }
    }

    /// Salted digest of document content, as bound into envelopes.
    pub fn hash_document(&self, content: &str) -> String {
        sha256_hex_salted(content, &self.document_salt)
    }

    /// Issue a signing envelope for a permitted principal.
    #[tracing::instrument(skip(self, principal, content), fields(document_id = %document_id, principal_id = %principal.id))]
    pub async fn issue(
        &self,
        document_id: Uuid,
        principal: &Principal,
        content: &str,
        client: &ClientInfo,
    ) -> Result<IssuedSignatureToken, AppError> {
        self.check_permission(document_id, principal).await?;

        let issued_at = Utc::now();
        let expires_at = issued_at + self.token_ttl;
        let nonce = generate_nonce();
        let document_hash = self.hash_document(content);
        let claims = SignatureClaims {
            document_id,
            sub: principal.id,
            role: principal.role,
            document_hash: document_hash.clone(),
            nonce: nonce.clone(),
            version: ENVELOPE_VERSION.to_string(),
            iss: self.issuer.clone(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;

        let event = ActivityEvent::new(principal.id, ActivityAction::SignatureIssued)
            .with_client(client.source_address.clone(), client.user_agent.clone())
            .with_metadata(serde_json::json!({ "document_id": document_id }));
        if let Err(err) = self.store.append_activity(event).await {
            tracing::warn!(error = %err, "activity log write failed");
        }

        Ok(IssuedSignatureToken {
            token,
            nonce,
            document_hash,
            issued_at,
            expires_at,
        })
    }

    /// Validate a presented envelope and commit the signature.
    #[tracing::instrument(skip(self, token, principal, client), fields(document_id = %document_id, principal_id = %principal.id))]
    pub async fn validate(
        &self,
        token: &str,
        document_id: Uuid,
        principal: &Principal,
        client: &ClientInfo,
    ) -> Result<SignatureValidation, AppError> {
        let signature_hash = sha256_hex(token);

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        let claims = match decode::<SignatureClaims>(token, &self.decoding_key, &validation) {
            Ok(data) => data.claims,
            Err(err) => {
                let (reason, app_err) = match err.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                        ("envelope expired", AppError::Expired)
                    }
                    _ => ("envelope verification failed", AppError::InvalidSignature),
                };
                // The nonce is unrecoverable from a bad envelope; the audit
                // record gets a fresh one.
                self.record_rejection(
                    document_id,
                    principal,
                    &signature_hash,
                    None,
                    &generate_nonce(),
                    reason,
                    client,
                )
                .await;
                return Err(app_err);
            }
        };

        if claims.document_id != document_id || claims.version != ENVELOPE_VERSION {
            self.record_rejection(
                document_id,
                principal,
                &signature_hash,
                Some(&claims.document_hash),
                &claims.nonce,
                "envelope bound to a different document",
                client,
            )
            .await;
            return Err(AppError::InvalidSignature);
        }

        if claims.sub != principal.id {
            self.record_rejection(
                document_id,
                principal,
                &signature_hash,
                Some(&claims.document_hash),
                &claims.nonce,
                "envelope issued to another principal",
                client,
            )
            .await;
            return Err(AppError::InvalidSignature);
        }

        if let Err(err) = self.check_permission(document_id, principal).await {
            self.record_rejection(
                document_id,
                principal,
                &signature_hash,
                Some(&claims.document_hash),
                &claims.nonce,
                "principal is not a party to the document",
                client,
            )
            .await;
            return Err(err);
        }

        let window_start = Utc::now() - self.replay_window;
        if self
            .store
            .find_signed_nonce(document_id, &claims.nonce, window_start)
            .await?
            .is_some()
        {
            self.record_rejection(
                document_id,
                principal,
                &signature_hash,
                Some(&claims.document_hash),
                &claims.nonce,
                "nonce replayed inside the replay window",
                client,
            )
            .await;
            return Err(AppError::ReplayDetected);
        }

        let signed_at = Utc::now();
        let attempt = SignatureAttempt {
            id: Uuid::new_v4(),
            document_id,
            principal_id: principal.id,
            role: principal.role,
            signature_hash,
            document_hash: Some(claims.document_hash.clone()),
            nonce: claims.nonce.clone(),
            status: SignatureStatus::Signed,
            rejection_reason: None,
            source_address: client.source_address.clone(),
            user_agent: client.user_agent.clone(),
            created_at: bson::DateTime::from_chrono(signed_at),
        };
        // Replay protection hangs off this record; it must land.
        self.store.insert_signature_attempt(&attempt).await?;

        let event = ActivityEvent::new(principal.id, ActivityAction::SignatureValidated)
            .with_client(client.source_address.clone(), client.user_agent.clone())
            .with_metadata(serde_json::json!({ "document_id": document_id }));
        if let Err(err) = self.store.append_activity(event).await {
            tracing::warn!(error = %err, "activity log write failed");
        }

        Ok(SignatureValidation {
            attempt_id: attempt.id,
            document_id,
            principal_id: principal.id,
            nonce: attempt.nonce,
            signed_at,
        })
    }

    /// Compare current document content against the hash committed by the
    /// most recent successful signature.
    pub async fn verify_integrity(
        &self,
        document_id: Uuid,
        current_content: &str,
    ) -> Result<IntegrityReport, AppError> {
        let attempt = self
            .store
            .latest_signed_attempt(document_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("no recorded signature for {document_id}"))
            })?;
        let baseline = attempt.document_hash.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("signature carries no document hash"))
        })?;

        let current = self.hash_document(current_content);
        Ok(IntegrityReport {
            document_id,
            intact: constant_time_eq(&baseline, &current),
            signed_at: attempt.created_at.to_chrono(),
            checked_at: Utc::now(),
        })
    }

    pub async fn history(
        &self,
        document_id: Uuid,
        limit: i64,
    ) -> Result<Vec<SignatureAttempt>, AppError> {
        self.store.list_signature_attempts(document_id, limit).await
    }

    /// Only a party to the document or an administrator may sign it.
    async fn check_permission(
        &self,
        document_id: Uuid,
        principal: &Principal,
    ) -> Result<(), AppError> {
        let document = self
            .store
            .find_document(document_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("document {document_id}")))?;
        if principal.role == Role::Admin || document.is_party(principal.id) {
            Ok(())
        } else {
            Err(AppError::Forbidden(anyhow::anyhow!(
                "principal is not a party to document {document_id}"
            )))
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_rejection(
        &self,
        document_id: Uuid,
        principal: &Principal,
        signature_hash: &str,
        document_hash: Option<&str>,
        nonce: &str,
        reason: &str,
        client: &ClientInfo,
    ) {
        let attempt = SignatureAttempt {
            id: Uuid::new_v4(),
            document_id,
            principal_id: principal.id,
            role: principal.role,
            signature_hash: signature_hash.to_string(),
            document_hash: document_hash.map(str::to_string),
            nonce: nonce.to_string(),
            status: SignatureStatus::Rejected,
            rejection_reason: Some(reason.to_string()),
            source_address: client.source_address.clone(),
            user_agent: client.user_agent.clone(),
            created_at: bson::DateTime::now(),
        };
        if let Err(err) = self.store.insert_signature_attempt(&attempt).await {
            tracing::warn!(error = %err, reason, "failed to record rejected signature attempt");
        }
    }
}

fn generate_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentRecord;
    use crate::services::persistence::MemoryStore;

    struct Fixture {
        service: SignatureService,
        store: Arc<MemoryStore>,
        owner: Principal,
        counterparty: Principal,
        outsider: Principal,
        document_id: Uuid,
    }

    fn principal(role: Role, email: &str) -> Principal {
        Principal {
            id: Uuid::new_v4(),
            email: email.into(),
            role,
            mfa_enabled: true,
            mfa_secret_ref: None,
            failed_attempt_count: 0,
            locked_until: None,
            last_auth_at: None,
            last_auth_source: None,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with_ttl(24).await
    }

    async fn fixture_with_ttl(ttl_hours: i64) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let service = SignatureService::new(
            &JwtConfig {
                secret: "test-secret".into(),
                session_issuer: "rentledge-auth".into(),
                signature_issuer: "rentledge-dsa".into(),
            },
            &SignatureConfig {
                document_salt: "pepper".into(),
                token_ttl_hours: ttl_hours,
                replay_window_seconds: 600,
            },
            Arc::clone(&store) as Arc<dyn PersistenceStore>,
        );

        let owner = principal(Role::Landlord, "landlord@example.com");
        let counterparty = principal(Role::User, "tenant@example.com");
        let outsider = principal(Role::User, "stranger@example.com");
        let document_id = Uuid::new_v4();
        store
            .insert_document(&DocumentRecord {
                id: document_id,
                owner_id: owner.id,
                counterparty_id: Some(counterparty.id),
                created_at: bson::DateTime::now(),
            })
            .await
            .unwrap();

        Fixture {
            service,
            store,
            owner,
            counterparty,
            outsider,
            document_id,
        }
    }

    const CONTENT: &str = "lease agreement v3: 12 months, 1500/month";

    #[tokio::test]
    async fn issue_then_validate_commits_a_signature() {
        let f = fixture().await;
        let client = ClientInfo::default();
        let issued = f
            .service
            .issue(f.document_id, &f.counterparty, CONTENT, &client)
            .await
            .unwrap();

        let validated = f
            .service
            .validate(&issued.token, f.document_id, &f.counterparty, &client)
            .await
            .unwrap();
        assert_eq!(validated.nonce, issued.nonce);

        let attempts = f.service.history(f.document_id, 10).await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].status, SignatureStatus::Signed);
        assert_eq!(attempts[0].document_hash.as_deref(), Some(issued.document_hash.as_str()));
    }

    #[tokio::test]
    async fn replaying_a_token_is_rejected_and_recorded() {
        let f = fixture().await;
        let client = ClientInfo::default();
        let issued = f
            .service
            .issue(f.document_id, &f.counterparty, CONTENT, &client)
            .await
            .unwrap();

        f.service
            .validate(&issued.token, f.document_id, &f.counterparty, &client)
            .await
            .unwrap();
        let replay = f
            .service
            .validate(&issued.token, f.document_id, &f.counterparty, &client)
            .await;
        assert!(matches!(replay, Err(AppError::ReplayDetected)));

        let attempts = f.service.history(f.document_id, 10).await.unwrap();
        assert_eq!(attempts.len(), 2);
        assert!(attempts
            .iter()
            .any(|a| a.status == SignatureStatus::Rejected));
    }

    #[tokio::test]
    async fn tampered_token_is_rejected_with_audit_trail() {
        let f = fixture().await;
        let client = ClientInfo::default();
        let issued = f
            .service
            .issue(f.document_id, &f.counterparty, CONTENT, &client)
            .await
            .unwrap();

        let mut tampered = issued.token.clone();
        tampered.push('x');
        let result = f
            .service
            .validate(&tampered, f.document_id, &f.counterparty, &client)
            .await;
        assert!(matches!(result, Err(AppError::InvalidSignature)));

        let attempts = f.service.history(f.document_id, 10).await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].status, SignatureStatus::Rejected);
    }

    #[tokio::test]
    async fn expired_envelope_is_rejected_as_expired() {
        let f = fixture_with_ttl(-1).await;
        let client = ClientInfo::default();
        let issued = f
            .service
            .issue(f.document_id, &f.counterparty, CONTENT, &client)
            .await
            .unwrap();
        let result = f
            .service
            .validate(&issued.token, f.document_id, &f.counterparty, &client)
            .await;
        assert!(matches!(result, Err(AppError::Expired)));
    }

    #[tokio::test]
    async fn envelope_is_bound_to_its_document() {
        let f = fixture().await;
        let client = ClientInfo::default();
        let other_document = Uuid::new_v4();
        f.store
            .insert_document(&DocumentRecord {
                id: other_document,
                owner_id: f.owner.id,
                counterparty_id: Some(f.counterparty.id),
                created_at: bson::DateTime::now(),
            })
            .await
            .unwrap();
        let issued = f
            .service
            .issue(f.document_id, &f.counterparty, CONTENT, &client)
            .await
            .unwrap();

        let result = f
            .service
            .validate(&issued.token, other_document, &f.counterparty, &client)
            .await;
        assert!(matches!(result, Err(AppError::InvalidSignature)));
    }

    #[tokio::test]
    async fn outsiders_cannot_issue_or_validate() {
        let f = fixture().await;
        let client = ClientInfo::default();
        let result = f
            .service
            .issue(f.document_id, &f.outsider, CONTENT, &client)
            .await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn admins_may_sign_any_document() {
        let f = fixture().await;
        let client = ClientInfo::default();
        let admin = principal(Role::Admin, "admin@example.com");
        let issued = f
            .service
            .issue(f.document_id, &admin, CONTENT, &client)
            .await
            .unwrap();
        let validated = f
            .service
            .validate(&issued.token, f.document_id, &admin, &client)
            .await;
        assert!(validated.is_ok());
    }

    #[tokio::test]
    async fn envelope_issued_to_another_principal_is_rejected() {
        let f = fixture().await;
        let client = ClientInfo::default();
        let issued = f
            .service
            .issue(f.document_id, &f.counterparty, CONTENT, &client)
            .await
            .unwrap();
        let result = f
            .service
            .validate(&issued.token, f.document_id, &f.owner, &client)
            .await;
        assert!(matches!(result, Err(AppError::InvalidSignature)));
    }

    #[tokio::test]
    async fn integrity_check_detects_modified_content() {
        let f = fixture().await;
        let client = ClientInfo::default();
        let issued = f
            .service
            .issue(f.document_id, &f.counterparty, CONTENT, &client)
            .await
            .unwrap();
        f.service
            .validate(&issued.token, f.document_id, &f.counterparty, &client)
            .await
            .unwrap();

        let intact = f
            .service
            .verify_integrity(f.document_id, CONTENT)
            .await
            .unwrap();
        assert!(intact.intact);

        let modified = f
            .service
            .verify_integrity(f.document_id, "lease agreement v3: 12 months, 1/month")
            .await
            .unwrap();
        assert!(!modified.intact);
    }

    #[tokio::test]
    async fn integrity_without_signature_is_not_found() {
        let f = fixture().await;
        let result = f.service.verify_integrity(f.document_id, CONTENT).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
