use chrono::{Duration, Timelike};
use service_core::error::AppError;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{
    ActivityAction, ActivityEvent, LoginContext, MfaChannel, MfaPolicy, Principal, Role,
    RiskAssessment, RiskDecision, RiskReason,
};
use crate::services::anomaly::AnomalyDetector;
use crate::services::notification::{NotificationPayload, Notifier};
use crate::services::otp_cache::{CodeValidation, OtpCacheStore};
use crate::services::otp_delivery::{IssuanceCoordinator, IssuanceReceipt};
use crate::services::persistence::PersistenceStore;
use crate::services::session::{IssuedSession, SessionService};

const RISK_PRIOR_FAILURES: f64 = 0.3;
const RISK_RAPID_REPEAT: f64 = 0.2;
const RISK_OUTSIDE_HOURS: f64 = 0.4;
const BLOCK_THRESHOLD: f64 = 0.8;
const CHALLENGE_THRESHOLD: f64 = 0.4;
const FAILURE_LOOKBACK_MINUTES: i64 = 15;
const RAPID_REPEAT_WINDOW_MINUTES: i64 = 60;
const LOCKOUT_MINUTES: i64 = 15;

/// Outcome of a login challenge request.
pub enum ChallengeOutcome {
    /// Policy let the login through without a second factor.
    Allowed { session: IssuedSession },
    /// A code was issued; the caller must come back through verification.
    ChallengeIssued {
        channel: MfaChannel,
        receipt: IssuanceReceipt,
        assessment: RiskAssessment,
    },
    /// The attempt was refused outright.
    Blocked { assessment: RiskAssessment },
}

/// Outcome of successful code verification.
pub enum VerificationOutcome {
    SessionGranted { session: IssuedSession },
    /// The code was right but the source address changed; the role policy
    /// demands an explicit device confirmation before a session is issued.
    DeviceConfirmationRequired,
}

/// Role-based MFA policy engine.
///
/// Scores each login attempt from recent account history and the role's
/// allowed-hours window, then decides between allowing, challenging with a
/// one-time code, and blocking. Administrator logins outside the allowed
/// window are refused outright rather than scored.
pub struct PolicyEngine {
    store: Arc<dyn PersistenceStore>,
    cache: Arc<OtpCacheStore>,
    coordinator: Arc<IssuanceCoordinator>,
    sessions: Arc<SessionService>,
    detector: Arc<AnomalyDetector>,
    notifier: Arc<dyn Notifier>,
}

impl PolicyEngine {
    pub fn new(
        store: Arc<dyn PersistenceStore>,
        cache: Arc<OtpCacheStore>,
        coordinator: Arc<IssuanceCoordinator>,
        sessions: Arc<SessionService>,
        detector: Arc<AnomalyDetector>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            cache,
            coordinator,
            sessions,
            detector,
            notifier,
        }
    }

    async fn load_principal(&self, id: Uuid) -> Result<Principal, AppError> {
        self.store
            .find_principal(id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("principal {id}")))
    }

    /// Score a login attempt against the principal's role policy.
    ///
    /// An active lockout short-circuits before any scoring.
    pub async fn evaluate(
        &self,
        principal: &Principal,
        context: &LoginContext,
    ) -> Result<RiskAssessment, AppError> {
        if let Some(until) = principal.locked(context.at) {
            return Err(AppError::AccountLocked { until });
        }

        let policy = MfaPolicy::for_role(principal.role);
        let mut score = 0.0;
        let mut reasons = Vec::new();

        let recent_failures = self
            .store
            .count_activity(
                principal.id,
                &[ActivityAction::LoginFailed, ActivityAction::OtpRejected],
                context.at - Duration::minutes(FAILURE_LOOKBACK_MINUTES),
            )
            .await?;
        if recent_failures > 0 {
            score += RISK_PRIOR_FAILURES;
            reasons.push(RiskReason::PriorFailedAttempts);
        }

        if let Some(last_auth) = principal.last_auth_at.map(|at| at.to_chrono()) {
            if context.at - last_auth < Duration::minutes(RAPID_REPEAT_WINDOW_MINUTES) {
                score += RISK_RAPID_REPEAT;
                reasons.push(RiskReason::RapidRepeatLogin);
            }
        }

        let outside_hours = !policy.hour_allowed(context.at.hour());
        if outside_hours {
            score += RISK_OUTSIDE_HOURS;
            reasons.push(RiskReason::OutsideAllowedHours);
        }

        let score = score.min(1.0);
        let decision = if principal.role == Role::Admin && outside_hours {
            // Off-hours administrator access is refused on its own, not via
            // the score.
            RiskDecision::Block
        } else if score > BLOCK_THRESHOLD {
            RiskDecision::Block
        } else if policy.require_mfa || score > CHALLENGE_THRESHOLD {
            RiskDecision::Challenge
        } else {
            RiskDecision::Allow
        };

        Ok(RiskAssessment {
            score,
            reasons,
            decision,
        })
    }

    /// Handle a login challenge request end to end: evaluate, then either
    /// issue a session, issue a code, or refuse.
    #[tracing::instrument(skip(self, context), fields(principal_id = %principal_id))]
    pub async fn handle_challenge(
        &self,
        principal_id: Uuid,
        requested_channel: Option<MfaChannel>,
        context: &LoginContext,
    ) -> Result<ChallengeOutcome, AppError> {
        let principal = self.load_principal(principal_id).await?;
        let policy = MfaPolicy::for_role(principal.role);
        let assessment = self.evaluate(&principal, context).await?;
        self.maybe_alert(&principal, &assessment);

        match assessment.decision {
            RiskDecision::Block => {
                tracing::warn!(score = assessment.score, "login attempt blocked");
                self.log_activity(
                    ActivityEvent::new(principal.id, ActivityAction::LoginBlocked)
                        .with_client(context.source_address.clone(), context.user_agent.clone())
                        .with_metadata(serde_json::json!({ "score": assessment.score })),
                );
                Ok(ChallengeOutcome::Blocked { assessment })
            }
            RiskDecision::Challenge => {
                let channel = match requested_channel {
                    Some(channel) if policy.channel_allowed(channel) => channel,
                    Some(channel) => {
                        return Err(AppError::Forbidden(anyhow::anyhow!(
                            "channel {channel} is not allowed for role {}",
                            principal.role
                        )));
                    }
                    None => default_channel(policy),
                };
                let receipt = self.coordinator.issue(&principal.email, &[channel]).await?;
                self.log_activity(
                    ActivityEvent::new(principal.id, ActivityAction::OtpIssued)
                        .with_client(context.source_address.clone(), context.user_agent.clone())
                        .with_metadata(serde_json::json!({ "channel": channel.to_string() })),
                );
                Ok(ChallengeOutcome::ChallengeIssued {
                    channel,
                    receipt,
                    assessment,
                })
            }
            RiskDecision::Allow => {
                self.store
                    .record_successful_auth(principal.id, context.source_address.as_deref())
                    .await?;
                self.log_activity(
                    ActivityEvent::new(principal.id, ActivityAction::LoginSuccess)
                        .with_client(context.source_address.clone(), context.user_agent.clone()),
                );
                self.spawn_analysis(principal.clone(), true, context.clone());
                let session = self.sessions.issue(&principal, policy, false)?;
                Ok(ChallengeOutcome::Allowed { session })
            }
        }
    }

    /// Verify a submitted code and, on success, issue the session credential.
    #[tracing::instrument(skip(self, supplied_code, context), fields(principal_id = %principal_id))]
    pub async fn verify(
        &self,
        principal_id: Uuid,
        supplied_code: &str,
        context: &LoginContext,
    ) -> Result<VerificationOutcome, AppError> {
        let principal = self.load_principal(principal_id).await?;
        if let Some(until) = principal.locked(context.at) {
            return Err(AppError::AccountLocked { until });
        }
        let policy = MfaPolicy::for_role(principal.role);
        let owner_key = OtpCacheStore::owner_key(&principal.email);

        match self.cache.validate_code(&owner_key, supplied_code).await? {
            CodeValidation::NotFound => Err(AppError::NotFound(anyhow::anyhow!(
                "no active verification code"
            ))),
            CodeValidation::Expired => Err(AppError::Expired),
            CodeValidation::Exceeded => {
                self.register_failure(&principal, policy, context).await?;
                Err(AppError::AttemptsExceeded)
            }
            CodeValidation::Invalid { remaining_attempts } => {
                let locked_until = self.register_failure(&principal, policy, context).await?;
                match locked_until {
                    Some(until) => Err(AppError::AccountLocked { until }),
                    None => Err(AppError::InvalidCode { remaining_attempts }),
                }
            }
            CodeValidation::Valid => {
                if self.device_changed(&principal, policy, context) {
                    self.log_activity(
                        ActivityEvent::new(principal.id, ActivityAction::OtpVerified)
                            .with_client(context.source_address.clone(), context.user_agent.clone())
                            .with_metadata(serde_json::json!({ "device_confirmation": true })),
                    );
                    return Ok(VerificationOutcome::DeviceConfirmationRequired);
                }

                self.store
                    .record_successful_auth(principal.id, context.source_address.as_deref())
                    .await?;
                self.log_activity(
                    ActivityEvent::new(principal.id, ActivityAction::LoginSuccess)
                        .with_client(context.source_address.clone(), context.user_agent.clone()),
                );
                self.spawn_analysis(principal.clone(), true, context.clone());
                let session = self.sessions.issue(&principal, policy, true)?;
                Ok(VerificationOutcome::SessionGranted { session })
            }
        }
    }

    /// Count a failed verification against the durable per-account limit.
    /// Returns the lockout deadline when this failure tripped it.
    async fn register_failure(
        &self,
        principal: &Principal,
        policy: &MfaPolicy,
        context: &LoginContext,
    ) -> Result<Option<chrono::DateTime<chrono::Utc>>, AppError> {
        let state = self
            .store
            .record_failed_attempt(
                principal.id,
                policy.max_failed_attempts,
                Duration::minutes(LOCKOUT_MINUTES),
            )
            .await?;
        self.log_activity(
            ActivityEvent::new(principal.id, ActivityAction::OtpRejected)
                .with_client(context.source_address.clone(), context.user_agent.clone())
                .with_metadata(serde_json::json!({ "failed_attempts": state.attempts })),
        );
        self.spawn_analysis(principal.clone(), false, context.clone());
        Ok(state.locked_until)
    }

    fn device_changed(
        &self,
        principal: &Principal,
        policy: &MfaPolicy,
        context: &LoginContext,
    ) -> bool {
        if !policy.require_device_check {
            return false;
        }
        match (&principal.last_auth_source, &context.source_address) {
            (Some(known), Some(current)) => known != current,
            _ => false,
        }
    }

    /// Post-login analysis must never delay the response.
    fn spawn_analysis(&self, principal: Principal, success: bool, context: LoginContext) {
        let detector = Arc::clone(&self.detector);
        tokio::spawn(async move {
            detector.analyze(&principal, success, &context).await;
        });
    }

    /// Alert the account holder about an elevated-risk attempt without
    /// blocking the login path.
    fn maybe_alert(&self, principal: &Principal, assessment: &RiskAssessment) {
        if assessment.score <= CHALLENGE_THRESHOLD {
            return;
        }
        let notifier = Arc::clone(&self.notifier);
        let email = principal.email.clone();
        let score = assessment.score;
        tokio::spawn(async move {
            let payload = NotificationPayload::security_alert(
                "Unusual sign-in attempt",
                "A sign-in attempt on your account looked unusual. If this was not you, reset your credentials.",
            );
            if let Err(err) = notifier.send(MfaChannel::Email, &email, &payload).await {
                tracing::warn!(error = %err, score, "risk alert delivery failed");
            }
        });
    }

    /// Audit writes are fire-and-forget; losing one must not fail a login.
    fn log_activity(&self, event: ActivityEvent) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(err) = store.append_activity(event).await {
                tracing::warn!(error = %err, "activity log write failed");
            }
        });
    }
}

fn default_channel(policy: &MfaPolicy) -> MfaChannel {
    if policy.channel_allowed(MfaChannel::Email) {
        MfaChannel::Email
    } else {
        policy.allowed_channels[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{JwtConfig, OtpConfig};
    use crate::services::notification::MockNotifier;
    use crate::services::persistence::MemoryStore;
    use crate::services::scoring::{AnomalyScorer, NoopScorer};
    use chrono::{TimeZone, Utc};

    struct Fixture {
        engine: PolicyEngine,
        store: Arc<MemoryStore>,
        cache: Arc<OtpCacheStore>,
        notifier: Arc<MockNotifier>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(OtpCacheStore::in_memory());
        let notifier = Arc::new(MockNotifier::new());
        let coordinator = Arc::new(IssuanceCoordinator::new(
            Arc::clone(&cache),
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            &OtpConfig {
                ttl_seconds: 300,
                attempts_allowed: 3,
                channel_timeout_ms: 1_000,
            },
        ));
        let sessions = Arc::new(SessionService::new(&JwtConfig {
            secret: "test-secret".into(),
            session_issuer: "rentledge-auth".into(),
            signature_issuer: "rentledge-dsa".into(),
        }));
        let detector = Arc::new(AnomalyDetector::new(
            Arc::clone(&store) as Arc<dyn PersistenceStore>,
            Arc::new(NoopScorer) as Arc<dyn AnomalyScorer>,
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            std::time::Duration::from_millis(500),
        ));
        let engine = PolicyEngine::new(
            Arc::clone(&store) as Arc<dyn PersistenceStore>,
            Arc::clone(&cache),
            coordinator,
            sessions,
            detector,
            Arc::clone(&notifier) as Arc<dyn Notifier>,
        );
        Fixture {
            engine,
            store,
            cache,
            notifier,
        }
    }

    async fn seed_principal(store: &MemoryStore, role: Role) -> Principal {
        let principal = Principal {
            id: Uuid::new_v4(),
            email: format!("{}@example.com", role.to_string().to_lowercase()),
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

    fn daytime() -> LoginContext {
        LoginContext {
            source_address: Some("10.0.0.1".into()),
            user_agent: Some("test-agent".into()),
            at: Utc.with_ymd_and_hms(2026, 8, 28, 14, 0, 0).unwrap(),
        }
    }

    fn at_hour(hour: u32) -> LoginContext {
        LoginContext {
            at: Utc.with_ymd_and_hms(2026, 8, 28, hour, 0, 0).unwrap(),
            ..daytime()
        }
    }

    async fn live_code(fixture: &Fixture, principal: &Principal) -> String {
        let key = OtpCacheStore::owner_key(&principal.email);
        fixture.cache.get(&key).await.unwrap().unwrap().code
    }

    fn failed_login_at(principal_id: Uuid, at: chrono::DateTime<Utc>) -> ActivityEvent {
        let mut event = ActivityEvent::new(principal_id, ActivityAction::LoginFailed);
        event.created_at = bson::DateTime::from_chrono(at);
        event
    }

    #[tokio::test]
    async fn clean_user_login_is_allowed_without_mfa() {
        let f = fixture();
        let p = seed_principal(&f.store, Role::User).await;
        let outcome = f
            .engine
            .handle_challenge(p.id, None, &daytime())
            .await
            .unwrap();
        match outcome {
            ChallengeOutcome::Allowed { session } => {
                assert!(!session.token.is_empty());
            }
            _ => panic!("expected an allowed login"),
        }
    }

    #[tokio::test]
    async fn landlord_is_always_challenged() {
        let f = fixture();
        let p = seed_principal(&f.store, Role::Landlord).await;
        let outcome = f
            .engine
            .handle_challenge(p.id, None, &daytime())
            .await
            .unwrap();
        match outcome {
            ChallengeOutcome::ChallengeIssued { channel, .. } => {
                assert_eq!(channel, MfaChannel::Email);
                assert_eq!(f.notifier.sent().len(), 1);
            }
            _ => panic!("expected a challenge"),
        }
    }

    #[tokio::test]
    async fn recent_failures_raise_the_score() {
        let f = fixture();
        let p = seed_principal(&f.store, Role::Landlord).await;
        let context = daytime();
        for minutes_ago in 1..=3 {
            f.store
                .append_activity(failed_login_at(
                    p.id,
                    context.at - Duration::minutes(minutes_ago),
                ))
                .await
                .unwrap();
        }
        let assessment = f.engine.evaluate(&p, &context).await.unwrap();
        assert!(assessment.score >= RISK_PRIOR_FAILURES);
        assert!(assessment.reason_applied(RiskReason::PriorFailedAttempts));
        assert_eq!(assessment.decision, RiskDecision::Challenge);
    }

    #[tokio::test]
    async fn admin_out_of_hours_is_blocked_outright() {
        let f = fixture();
        let p = seed_principal(&f.store, Role::Admin).await;
        let outcome = f
            .engine
            .handle_challenge(p.id, None, &at_hour(2))
            .await
            .unwrap();
        match outcome {
            ChallengeOutcome::Blocked { assessment } => {
                assert!(assessment.reason_applied(RiskReason::OutsideAllowedHours));
            }
            _ => panic!("expected a block"),
        }
    }

    #[tokio::test]
    async fn compounded_signals_block_any_role() {
        let f = fixture();
        let mut p = seed_principal(&f.store, Role::Landlord).await;

        // Failures (+0.3), a successful login moments ago (+0.2), and an
        // off-hours attempt (+0.4) push past the block threshold.
        let context = at_hour(3);
        f.store
            .append_activity(failed_login_at(p.id, context.at - Duration::minutes(2)))
            .await
            .unwrap();
        p.last_auth_at = Some(bson::DateTime::from_chrono(
            context.at - Duration::minutes(10),
        ));
        f.store.insert_principal(&p).await.unwrap();

        let assessment = f.engine.evaluate(&p, &context).await.unwrap();
        assert!(assessment.score > BLOCK_THRESHOLD);
        assert_eq!(assessment.decision, RiskDecision::Block);
    }

    #[tokio::test]
    async fn locked_principal_short_circuits_evaluation() {
        let f = fixture();
        let mut p = seed_principal(&f.store, Role::User).await;
        let until = Utc::now() + Duration::minutes(10);
        p.locked_until = Some(bson::DateTime::from_chrono(until));
        f.store.insert_principal(&p).await.unwrap();

        let result = f.engine.handle_challenge(p.id, None, &daytime()).await;
        match result {
            Err(AppError::AccountLocked { until: reported }) => {
                assert_eq!(reported.timestamp(), until.timestamp());
            }
            _ => panic!("expected the lockout to surface"),
        }
    }

    #[tokio::test]
    async fn disallowed_channel_is_refused() {
        let f = fixture();
        let p = seed_principal(&f.store, Role::Landlord).await;
        let result = f
            .engine
            .handle_challenge(p.id, Some(MfaChannel::Sms), &daytime())
            .await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn wrong_code_sequence_exhausts_then_vanishes() {
        let f = fixture();
        let p = seed_principal(&f.store, Role::Landlord).await;
        f.engine
            .handle_challenge(p.id, None, &daytime())
            .await
            .unwrap();

        let context = daytime();
        match f.engine.verify(p.id, "000000", &context).await {
            Err(AppError::InvalidCode { remaining_attempts }) => {
                assert_eq!(remaining_attempts, 2)
            }
            _ => panic!("expected an invalid code"),
        }
        match f.engine.verify(p.id, "000000", &context).await {
            Err(AppError::InvalidCode { remaining_attempts }) => {
                assert_eq!(remaining_attempts, 1)
            }
            _ => panic!("expected an invalid code"),
        }
        assert!(matches!(
            f.engine.verify(p.id, "000000", &context).await,
            Err(AppError::AttemptsExceeded)
        ));
        // The code is gone; even the correct digits no longer help.
        assert!(matches!(
            f.engine.verify(p.id, "000000", &context).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn correct_code_grants_a_session_and_resets_failures() {
        let f = fixture();
        let p = seed_principal(&f.store, Role::Landlord).await;
        f.engine
            .handle_challenge(p.id, None, &daytime())
            .await
            .unwrap();
        let code = live_code(&f, &p).await;

        let _ = f.engine.verify(p.id, "999999", &daytime()).await;
        let outcome = f.engine.verify(p.id, &code, &daytime()).await.unwrap();
        match outcome {
            VerificationOutcome::SessionGranted { session } => {
                assert!(!session.token.is_empty());
            }
            _ => panic!("expected a session"),
        }

        let refreshed = f.store.find_principal(p.id).await.unwrap().unwrap();
        assert_eq!(refreshed.failed_attempt_count, 0);
        assert_eq!(refreshed.last_auth_source.as_deref(), Some("10.0.0.1"));
    }

    #[tokio::test]
    async fn changed_device_defers_the_session() {
        let f = fixture();
        let mut p = seed_principal(&f.store, Role::Admin).await;
        p.last_auth_source = Some("203.0.113.9".into());
        f.store.insert_principal(&p).await.unwrap();
        f.engine
            .handle_challenge(p.id, None, &daytime())
            .await
            .unwrap();
        let code = live_code(&f, &p).await;

        let outcome = f.engine.verify(p.id, &code, &daytime()).await.unwrap();
        assert!(matches!(
            outcome,
            VerificationOutcome::DeviceConfirmationRequired
        ));
    }

    #[tokio::test]
    async fn repeated_failures_lock_the_account() {
        let f = fixture();
        let p = seed_principal(&f.store, Role::Admin).await;
        let context = daytime();

        // Admins lock after three durable failures across challenges.
        f.engine.handle_challenge(p.id, None, &context).await.unwrap();
        let _ = f.engine.verify(p.id, "000000", &context).await;
        let _ = f.engine.verify(p.id, "000001", &context).await;
        let result = f.engine.verify(p.id, "000002", &context).await;
        assert!(matches!(result, Err(AppError::AttemptsExceeded)));

        let refreshed = f.store.find_principal(p.id).await.unwrap().unwrap();
        assert!(refreshed.locked_until.is_some());
        assert!(matches!(
            f.engine.handle_challenge(p.id, None, &context).await,
            Err(AppError::AccountLocked { .. })
        ));
    }
}
