use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::time::Duration;
use uuid::Uuid;

use crate::config::ScoringConfig;
use crate::models::{AnomalyType, Role, Severity};

/// Facts about a login event shipped to the external scorer.
#[derive(Debug, Clone, Serialize)]
pub struct ScoringRequest {
    pub principal_id: Uuid,
    pub role: Role,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub at: DateTime<Utc>,
}

/// A finding returned by the scorer, already narrowed to the recognized
/// anomaly classes.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoredFinding {
    pub anomaly_type: AnomalyType,
    pub severity: Severity,
    pub description: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// External risk scorer. Callers treat it as advisory: failures and
/// timeouts are absorbed upstream, never surfaced to the login path.
#[async_trait]
pub trait AnomalyScorer: Send + Sync {
    async fn score(&self, request: &ScoringRequest) -> Result<Vec<ScoredFinding>, AppError>;
}

/// Scorer that never reports findings. Used when no endpoint is configured.
pub struct NoopScorer;

#[async_trait]
impl AnomalyScorer for NoopScorer {
    async fn score(&self, _request: &ScoringRequest) -> Result<Vec<ScoredFinding>, AppError> {
        Ok(Vec::new())
    }
}

/// HTTP client for the remote scoring endpoint.
pub struct HttpScorer {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Deserialize)]
struct ScoreResponse {
    #[serde(default)]
    anomalies: Vec<serde_json::Value>,
}

impl HttpScorer {
    pub fn new(config: &ScoringConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|err| AppError::InternalError(anyhow::Error::new(err)))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl AnomalyScorer for HttpScorer {
    #[tracing::instrument(skip(self, request), fields(principal_id = %request.principal_id))]
    async fn score(&self, request: &ScoringRequest) -> Result<Vec<ScoredFinding>, AppError> {
        let url = format!("{}/api/v1/anomaly/detect", self.endpoint);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|err| AppError::UpstreamUnavailable(format!("anomaly scorer: {err}")))?;

        if !response.status().is_success() {
            return Err(AppError::UpstreamUnavailable(format!(
                "anomaly scorer returned {}",
                response.status()
            )));
        }

        let body: ScoreResponse = response
            .json()
            .await
            .map_err(|err| AppError::UpstreamUnavailable(format!("anomaly scorer: {err}")))?;

        // Findings outside the recognized anomaly set are dropped, not fatal.
        let mut findings = Vec::with_capacity(body.anomalies.len());
        for raw in body.anomalies {
            match serde_json::from_value::<ScoredFinding>(raw) {
                Ok(finding) => findings.push(finding),
                Err(err) => tracing::warn!(error = %err, "dropping unrecognized scorer finding"),
            }
        }
        Ok(findings)
    }
}

pub use mock::MockScorer;

/// Test double with scriptable findings and failure modes.
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MockScorer {
        findings: Mutex<Vec<ScoredFinding>>,
        fail: Mutex<bool>,
    }

    impl MockScorer {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_finding(&self, finding: ScoredFinding) {
            self.findings.lock().unwrap().push(finding);
        }

        pub fn fail_next(&self) {
            *self.fail.lock().unwrap() = true;
        }
    }

    #[async_trait]
    impl AnomalyScorer for MockScorer {
        async fn score(&self, _request: &ScoringRequest) -> Result<Vec<ScoredFinding>, AppError> {
            if std::mem::take(&mut *self.fail.lock().unwrap()) {
                return Err(AppError::UpstreamUnavailable("anomaly scorer: down".into()));
            }
            Ok(self.findings.lock().unwrap().clone())
        }
    }
}
