use async_trait::async_trait;
use serde::Serialize;
use service_core::error::AppError;
use std::time::Duration;

use crate::config::NotifierConfig;
use crate::models::MfaChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    OneTimeCode,
    SecurityAlert,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationPayload {
    pub kind: NotificationKind,
    pub subject: String,
    pub body: String,
    pub metadata: serde_json::Value,
}

impl NotificationPayload {
    pub fn one_time_code(code: &str, expires_in_minutes: u64) -> Self {
        Self {
            kind: NotificationKind::OneTimeCode,
            subject: "Your verification code".to_string(),
            body: format!(
                "Your verification code is {code}. It expires in {expires_in_minutes} minutes."
            ),
            metadata: serde_json::json!({ "expires_in_minutes": expires_in_minutes }),
        }
    }

    pub fn security_alert(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::SecurityAlert,
            subject: subject.into(),
            body: body.into(),
            metadata: serde_json::Value::Null,
        }
    }
}

/// Outbound delivery collaborator. The transport details (SMTP, SMS gateway,
/// authenticator app pairing) live in the notification service; this side
/// only hands over channel, address, and payload.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(
        &self,
        channel: MfaChannel,
        address: &str,
        payload: &NotificationPayload,
    ) -> Result<(), AppError>;
}

/// HTTP client for the notification service.
pub struct HttpNotifier {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    channel: MfaChannel,
    address: &'a str,
    #[serde(flatten)]
    payload: &'a NotificationPayload,
}

impl HttpNotifier {
    pub fn new(config: &NotifierConfig) -> Result<Self, AppError> {
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
impl Notifier for HttpNotifier {
    #[tracing::instrument(skip(self, payload), fields(channel = %channel))]
    async fn send(
        &self,
        channel: MfaChannel,
        address: &str,
        payload: &NotificationPayload,
    ) -> Result<(), AppError> {
        let url = format!("{}/api/notifications/send", self.endpoint);
        let response = self
            .client
            .post(&url)
            .json(&SendRequest {
                channel,
                address,
                payload,
            })
            .send()
            .await
            .map_err(|err| {
                AppError::UpstreamUnavailable(format!("notification service: {err}"))
            })?;

        if !response.status().is_success() {
            return Err(AppError::UpstreamUnavailable(format!(
                "notification service returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

pub use mock::MockNotifier;

/// Test double, kept out of `#[cfg(test)]` so integration tests can build an
/// application against it.
pub mod mock {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    pub struct SentNotification {
        pub channel: MfaChannel,
        pub address: String,
        pub kind: NotificationKind,
        pub body: String,
    }

    /// In-memory double that records every send and can be told to fail
    /// specific channels.
    #[derive(Default)]
    pub struct MockNotifier {
        sent: Mutex<Vec<SentNotification>>,
        failing: Mutex<HashSet<MfaChannel>>,
    }

    impl MockNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn fail_channel(&self, channel: MfaChannel) {
            self.failing.lock().unwrap().insert(channel);
        }

        pub fn sent(&self) -> Vec<SentNotification> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for MockNotifier {
        async fn send(
            &self,
            channel: MfaChannel,
            address: &str,
            payload: &NotificationPayload,
        ) -> Result<(), AppError> {
            if self.failing.lock().unwrap().contains(&channel) {
                return Err(AppError::UpstreamUnavailable(format!(
                    "{channel} delivery failed"
                )));
            }
            self.sent.lock().unwrap().push(SentNotification {
                channel,
                address: address.to_string(),
                kind: payload.kind,
                body: payload.body.clone(),
            });
            Ok(())
        }
    }
}
