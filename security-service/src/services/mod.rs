pub mod anomaly;
pub mod metrics;
pub mod mfa_policy;
pub mod notification;
pub mod otp_cache;
pub mod otp_delivery;
pub mod persistence;
pub mod scoring;
pub mod session;
pub mod signature;
