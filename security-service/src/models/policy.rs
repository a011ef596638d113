use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::principal::Role;

/// Delivery channels a one-time code may be sent over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MfaChannel {
    Totp,
    Email,
    Sms,
}

impl std::fmt::Display for MfaChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MfaChannel::Totp => write!(f, "TOTP"),
            MfaChannel::Email => write!(f, "EMAIL"),
            MfaChannel::Sms => write!(f, "SMS"),
        }
    }
}

/// Per-role authentication policy.
///
/// The table is closed over [`Role`]: every role resolves to exactly one
/// policy and there is no partial or missing entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MfaPolicy {
    pub require_mfa: bool,
    pub allowed_channels: &'static [MfaChannel],
    pub session_timeout_minutes: u32,
    pub max_failed_attempts: u32,
    /// Allowed login hours as a half-open range `[start, end)` in UTC.
    pub allowed_hours: (u32, u32),
    pub require_device_check: bool,
}

impl MfaPolicy {
    pub fn for_role(role: Role) -> &'static MfaPolicy {
        match role {
            Role::Admin => &ADMIN_POLICY,
            Role::Landlord => &LANDLORD_POLICY,
            Role::User => &USER_POLICY,
        }
    }

    pub fn channel_allowed(&self, channel: MfaChannel) -> bool {
        self.allowed_channels.contains(&channel)
    }

    pub fn hour_allowed(&self, hour: u32) -> bool {
        let (start, end) = self.allowed_hours;
        hour >= start && hour < end
    }
}

static ADMIN_POLICY: MfaPolicy = MfaPolicy {
    require_mfa: true,
    allowed_channels: &[MfaChannel::Totp, MfaChannel::Sms, MfaChannel::Email],
    session_timeout_minutes: 15,
    max_failed_attempts: 3,
    allowed_hours: (6, 22),
    require_device_check: true,
};

static LANDLORD_POLICY: MfaPolicy = MfaPolicy {
    require_mfa: true,
    allowed_channels: &[MfaChannel::Totp, MfaChannel::Email],
    session_timeout_minutes: 30,
    max_failed_attempts: 5,
    allowed_hours: (5, 23),
    require_device_check: true,
};

static USER_POLICY: MfaPolicy = MfaPolicy {
    require_mfa: false,
    allowed_channels: &[MfaChannel::Totp, MfaChannel::Email],
    session_timeout_minutes: 60,
    max_failed_attempts: 5,
    allowed_hours: (0, 24),
    require_device_check: false,
};
