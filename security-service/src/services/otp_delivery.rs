use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Instant;
use utoipa::ToSchema;

use crate::config::OtpConfig;
use crate::models::{MfaChannel, OneTimeCode};
use crate::services::notification::{NotificationPayload, Notifier};
use crate::services::otp_cache::OtpCacheStore;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ChannelDelivery {
    pub channel: MfaChannel,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IssuanceReceipt {
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub channels: Vec<ChannelDelivery>,
}

/// Issues one-time codes and fans delivery out over every requested channel
/// in parallel.
///
/// Issuance succeeds as long as at least one channel delivers; when every
/// channel fails the stored code is withdrawn and the caller gets an error.
pub struct IssuanceCoordinator {
    cache: Arc<OtpCacheStore>,
    notifier: Arc<dyn Notifier>,
    ttl_seconds: u64,
    attempts_allowed: u32,
    channel_timeout: std::time::Duration,
}

impl IssuanceCoordinator {
    pub fn new(cache: Arc<OtpCacheStore>, notifier: Arc<dyn Notifier>, config: &OtpConfig) -> Self {
        Self {
            cache,
            notifier,
            ttl_seconds: config.ttl_seconds,
            attempts_allowed: config.attempts_allowed,
            channel_timeout: std::time::Duration::from_millis(config.channel_timeout_ms),
        }
    }

    /// Generate a fresh code for `identifier`, replacing any live one, and
    /// deliver it over `channels`.
    #[tracing::instrument(skip(self, identifier, channels))]
    pub async fn issue(
        &self,
        identifier: &str,
        channels: &[MfaChannel],
    ) -> Result<IssuanceReceipt, AppError> {
        if channels.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "at least one delivery channel is required"
            )));
        }

        let issued_at = Utc::now();
        let entry = OneTimeCode {
            code: generate_code(),
            secret_seed: generate_seed(),
            issued_at: issued_at.timestamp(),
            ttl_seconds: self.ttl_seconds,
            attempts_used: 0,
            attempts_allowed: self.attempts_allowed,
        };
        let expires_at = issued_at + Duration::seconds(self.ttl_seconds as i64);
        let owner_key = OtpCacheStore::owner_key(identifier);
        let code = entry.code.clone();
        self.cache.put(&owner_key, entry).await?;

        let expires_in_minutes = (self.ttl_seconds / 60).max(1);
        let payload = NotificationPayload::one_time_code(&code, expires_in_minutes);

        let deliveries = channels.iter().map(|&channel| {
            let payload = &payload;
            let notifier = &self.notifier;
            async move {
                let started = Instant::now();
                let outcome =
                    tokio::time::timeout(self.channel_timeout, notifier.send(channel, identifier, payload))
                        .await;
                let elapsed_ms = started.elapsed().as_millis() as u64;
                match outcome {
                    Ok(Ok(())) => ChannelDelivery {
                        channel,
                        success: true,
                        error: None,
                        elapsed_ms,
                    },
                    Ok(Err(err)) => ChannelDelivery {
                        channel,
                        success: false,
                        error: Some(err.to_string()),
                        elapsed_ms,
                    },
                    Err(_) => ChannelDelivery {
                        channel,
                        success: false,
                        error: Some("delivery timed out".to_string()),
                        elapsed_ms,
                    },
                }
            }
        });
        let channels = futures::future::join_all(deliveries).await;

        let delivered = channels.iter().any(|delivery| delivery.success);
        for delivery in channels.iter().filter(|d| !d.success) {
            tracing::warn!(
                channel = %delivery.channel,
                error = delivery.error.as_deref().unwrap_or("unknown"),
                "code delivery failed"
            );
        }
        if !delivered {
            // No channel got through; a code nobody received must not stay live.
            self.cache.invalidate(&owner_key).await?;
            return Err(AppError::UpstreamUnavailable(
                "no delivery channel succeeded".to_string(),
            ));
        }

        Ok(IssuanceReceipt {
            issued_at,
            expires_at,
            channels,
        })
    }
}

fn generate_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

fn generate_seed() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::notification::MockNotifier;

    fn coordinator(notifier: Arc<MockNotifier>) -> (IssuanceCoordinator, Arc<OtpCacheStore>) {
        let cache = Arc::new(OtpCacheStore::in_memory());
        let config = OtpConfig {
            ttl_seconds: 300,
            attempts_allowed: 3,
            channel_timeout_ms: 1_000,
        };
        (
            IssuanceCoordinator::new(Arc::clone(&cache), notifier, &config),
            cache,
        )
    }

    #[tokio::test]
    async fn issues_and_delivers_over_all_channels() {
        let notifier = Arc::new(MockNotifier::new());
        let (coordinator, cache) = coordinator(Arc::clone(&notifier));

        let receipt = coordinator
            .issue("tenant@example.com", &[MfaChannel::Email, MfaChannel::Totp])
            .await
            .unwrap();
        assert_eq!(receipt.channels.len(), 2);
        assert!(receipt.channels.iter().all(|d| d.success));
        assert_eq!(notifier.sent().len(), 2);

        let key = OtpCacheStore::owner_key("tenant@example.com");
        let live = cache.get(&key).await.unwrap().unwrap();
        assert_eq!(live.code.len(), 6);
        assert!(live.code.chars().all(|c| c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn partial_delivery_failure_still_succeeds() {
        let notifier = Arc::new(MockNotifier::new());
        notifier.fail_channel(MfaChannel::Sms);
        let (coordinator, cache) = coordinator(Arc::clone(&notifier));

        let receipt = coordinator
            .issue("admin@example.com", &[MfaChannel::Email, MfaChannel::Sms])
            .await
            .unwrap();
        let by_success: Vec<bool> = receipt.channels.iter().map(|d| d.success).collect();
        assert!(by_success.contains(&true));
        assert!(by_success.contains(&false));

        let key = OtpCacheStore::owner_key("admin@example.com");
        assert!(cache.get(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn total_delivery_failure_withdraws_the_code() {
        let notifier = Arc::new(MockNotifier::new());
        notifier.fail_channel(MfaChannel::Email);
        let (coordinator, cache) = coordinator(Arc::clone(&notifier));

        let result = coordinator.issue("tenant@example.com", &[MfaChannel::Email]).await;
        assert!(matches!(result, Err(AppError::UpstreamUnavailable(_))));

        let key = OtpCacheStore::owner_key("tenant@example.com");
        assert!(cache.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_channel_list_is_rejected() {
        let notifier = Arc::new(MockNotifier::new());
        let (coordinator, _) = coordinator(notifier);
        let result = coordinator.issue("tenant@example.com", &[]).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn reissue_invalidates_the_previous_code() {
        let notifier = Arc::new(MockNotifier::new());
        let (coordinator, cache) = coordinator(Arc::clone(&notifier));
        let key = OtpCacheStore::owner_key("tenant@example.com");

        coordinator
            .issue("tenant@example.com", &[MfaChannel::Email])
            .await
            .unwrap();
        coordinator
            .issue("tenant@example.com", &[MfaChannel::Email])
            .await
            .unwrap();
        let live = cache.get(&key).await.unwrap().unwrap().code;

        // The live entry is always the most recent issuance, and only one
        // code exists per owner.
        assert_eq!(cache.stats().fallback_entries, 1);
        assert_eq!(
            cache.validate_code(&key, &live).await.unwrap(),
            crate::services::otp_cache::CodeValidation::Valid
        );
    }
}
