use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

static REGISTRY: OnceLock<Registry> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

fn counter_vec(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    let counter = IntCounterVec::new(Opts::new(name, help), labels)
        .expect("static metric definitions are valid");
    registry()
        .register(Box::new(counter.clone()))
        .expect("static metrics register once");
    counter
}

static CHALLENGES: OnceLock<IntCounterVec> = OnceLock::new();
static VERIFICATIONS: OnceLock<IntCounterVec> = OnceLock::new();
static SIGNATURES: OnceLock<IntCounterVec> = OnceLock::new();
static ANOMALIES: OnceLock<IntCounterVec> = OnceLock::new();

pub fn challenges_total() -> &'static IntCounterVec {
    CHALLENGES.get_or_init(|| {
        counter_vec(
            "auth_challenges_total",
            "Login challenge requests by policy decision",
            &["decision"],
        )
    })
}

pub fn verifications_total() -> &'static IntCounterVec {
    VERIFICATIONS.get_or_init(|| {
        counter_vec(
            "code_verifications_total",
            "One-time code verifications by outcome",
            &["outcome"],
        )
    })
}

pub fn signature_validations_total() -> &'static IntCounterVec {
    SIGNATURES.get_or_init(|| {
        counter_vec(
            "signature_validations_total",
            "Signature validations by outcome",
            &["outcome"],
        )
    })
}

pub fn anomalies_total() -> &'static IntCounterVec {
    ANOMALIES.get_or_init(|| {
        counter_vec(
            "anomalies_detected_total",
            "Security anomalies recorded by type",
            &["anomaly_type"],
        )
    })
}

/// Render the registry in the Prometheus text exposition format.
pub fn render() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(err) = encoder.encode(&registry().gather(), &mut buffer) {
        tracing::error!(error = %err, "metrics encoding failed");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
