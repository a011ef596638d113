pub mod activity;
pub mod anomaly;
pub mod document;
pub mod one_time_code;
pub mod policy;
pub mod principal;
pub mod risk;
pub mod signature;

pub use activity::{ActivityAction, ActivityEvent};
pub use anomaly::{AnomalyType, SecurityAnomaly, Severity};
pub use document::DocumentRecord;
pub use one_time_code::OneTimeCode;
pub use policy::{MfaChannel, MfaPolicy};
pub use principal::{Principal, Role};
pub use risk::{LoginContext, RiskAssessment, RiskDecision, RiskReason};
pub use signature::{SignatureAttempt, SignatureStatus};
