use chrono::{Duration, Timelike};
use service_core::error::AppError;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{
    ActivityAction, ActivityEvent, AnomalyType, LoginContext, Principal, SecurityAnomaly, Severity,
};
use crate::services::notification::{NotificationPayload, Notifier};
use crate::services::persistence::PersistenceStore;
use crate::services::scoring::{AnomalyScorer, ScoringRequest};

const FAILED_LOGIN_THRESHOLD: u64 = 3;
const FAILED_LOGIN_WINDOW_MINUTES: i64 = 15;
const RAPID_SUCCESS_THRESHOLD: u64 = 2;
const RAPID_SUCCESS_WINDOW_MINUTES: i64 = 5;
/// Logins between 23:00 and 06:00 UTC are flagged as off-hours.
const NIGHT_START_HOUR: u32 = 23;
const NIGHT_END_HOUR: u32 = 6;

/// Post-login analysis: local heuristics plus an advisory external scorer.
///
/// Findings are persisted and, for high severities, alerted on. The engine is
/// fail-open end to end: a down scorer or store never turns a legitimate
/// login into an error, callers only lose the findings.
pub struct AnomalyDetector {
    store: Arc<dyn PersistenceStore>,
    scorer: Arc<dyn AnomalyScorer>,
    notifier: Arc<dyn Notifier>,
    scoring_timeout: std::time::Duration,
}

impl AnomalyDetector {
    pub fn new(
        store: Arc<dyn PersistenceStore>,
        scorer: Arc<dyn AnomalyScorer>,
        notifier: Arc<dyn Notifier>,
        scoring_timeout: std::time::Duration,
    ) -> Self {
        Self {
            store,
            scorer,
            notifier,
            scoring_timeout,
        }
    }

    /// Analyze a completed login attempt. The attempt's own activity entry
    /// must already be in the log; windowed counts include it.
    #[tracing::instrument(skip(self, principal, context), fields(principal_id = %principal.id, success))]
    pub async fn analyze(
        &self,
        principal: &Principal,
        success: bool,
        context: &LoginContext,
    ) -> Vec<SecurityAnomaly> {
        let mut findings = Vec::new();

        if !success {
            match self
                .store
                .count_activity(
                    principal.id,
                    &[ActivityAction::LoginFailed, ActivityAction::OtpRejected],
                    context.at - Duration::minutes(FAILED_LOGIN_WINDOW_MINUTES),
                )
                .await
            {
                Ok(failed) if failed >= FAILED_LOGIN_THRESHOLD => {
                    findings.push(SecurityAnomaly::new(
                        principal.id,
                        AnomalyType::MultipleFailedLogins,
                        Severity::High,
                        format!("{failed} failed login attempts in the last {FAILED_LOGIN_WINDOW_MINUTES} minutes"),
                        serde_json::json!({ "failed_attempts": failed }),
                    ));
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(error = %err, "failed-login count unavailable"),
            }
        }

        let hour = context.at.hour();
        if hour >= NIGHT_START_HOUR || hour < NIGHT_END_HOUR {
            findings.push(SecurityAnomaly::new(
                principal.id,
                AnomalyType::UnusualAccessTime,
                Severity::Medium,
                format!("login activity at {hour:02}:00 UTC"),
                serde_json::json!({ "hour": hour }),
            ));
        }

        if success {
            match self
                .store
                .count_activity(
                    principal.id,
                    &[ActivityAction::LoginSuccess],
                    context.at - Duration::minutes(RAPID_SUCCESS_WINDOW_MINUTES),
                )
                .await
            {
                Ok(successes) if successes >= RAPID_SUCCESS_THRESHOLD => {
                    findings.push(SecurityAnomaly::new(
                        principal.id,
                        AnomalyType::RapidRepeatLogin,
                        Severity::Medium,
                        format!("{successes} successful logins within {RAPID_SUCCESS_WINDOW_MINUTES} minutes"),
                        serde_json::json!({ "successful_logins": successes }),
                    ));
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(error = %err, "rapid-login count unavailable"),
            }
        }

        findings.extend(self.remote_findings(principal, success, context).await);

        for finding in &findings {
            crate::services::metrics::anomalies_total()
                .with_label_values(&[finding.anomaly_type.as_str()])
                .inc();
            if let Err(err) = self.store.insert_anomaly(finding).await {
                tracing::warn!(error = %err, "failed to persist anomaly finding");
            }
        }

        self.dispatch_alerts(principal, &findings);
        findings
    }

    /// Consult the external scorer, absorbing failures and timeouts.
    async fn remote_findings(
        &self,
        principal: &Principal,
        success: bool,
        context: &LoginContext,
    ) -> Vec<SecurityAnomaly> {
        let request = ScoringRequest {
            principal_id: principal.id,
            role: principal.role,
            success,
            source_address: context.source_address.clone(),
            user_agent: context.user_agent.clone(),
            at: context.at,
        };
        match tokio::time::timeout(self.scoring_timeout, self.scorer.score(&request)).await {
            Ok(Ok(scored)) => scored
                .into_iter()
                .map(|finding| {
                    SecurityAnomaly::new(
                        principal.id,
                        finding.anomaly_type,
                        finding.severity,
                        finding.description,
                        finding.metadata,
                    )
                })
                .collect(),
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "anomaly scorer unavailable, continuing without it");
                Vec::new()
            }
            Err(_) => {
                tracing::warn!("anomaly scorer timed out, continuing without it");
                Vec::new()
            }
        }
    }

    /// Alert on high-severity findings without blocking the caller.
    fn dispatch_alerts(&self, principal: &Principal, findings: &[SecurityAnomaly]) {
        for finding in findings {
            if finding.severity < Severity::High {
                continue;
            }
            let notifier = Arc::clone(&self.notifier);
            let store = Arc::clone(&self.store);
            let email = principal.email.clone();
            let principal_id = principal.id;
            let description = finding.description.clone();
            let anomaly_id = finding.id;
            tokio::spawn(async move {
                let payload = NotificationPayload::security_alert(
                    "Suspicious activity on your account",
                    format!("We detected unusual activity: {description}"),
                );
                if let Err(err) = notifier
                    .send(crate::models::MfaChannel::Email, &email, &payload)
                    .await
                {
                    tracing::warn!(error = %err, "security alert delivery failed");
                }
                let event = ActivityEvent::new(principal_id, ActivityAction::SuspiciousLogin)
                    .with_metadata(serde_json::json!({ "anomaly_id": anomaly_id }));
                if let Err(err) = store.append_activity(event).await {
                    tracing::warn!(error = %err, "failed to log suspicious-login activity");
                }
            });
        }
    }

    pub async fn resolve(&self, anomaly_id: Uuid, resolved_by: Uuid) -> Result<(), AppError> {
        if !self.store.resolve_anomaly(anomaly_id, resolved_by).await? {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "unresolved anomaly {anomaly_id}"
            )));
        }
        self.store
            .append_activity(
                ActivityEvent::new(resolved_by, ActivityAction::AnomalyResolved)
                    .with_metadata(serde_json::json!({ "anomaly_id": anomaly_id })),
            )
            .await?;
        Ok(())
    }
}
