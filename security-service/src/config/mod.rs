use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwaggerMode {
    Disabled,
    Enabled,
}

/// Full configuration for the security service.
///
/// Every value comes from the environment. In production, secrets and
/// upstream addresses must be set explicitly; defaults only apply in
/// development.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub environment: Environment,
    pub port: u16,
    pub log_level: String,
    pub otlp_endpoint: String,
    pub swagger: SwaggerMode,
    pub allowed_origins: Vec<String>,
    pub mongo: MongoConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub otp: OtpConfig,
    pub scoring: ScoringConfig,
    pub notifier: NotifierConfig,
    pub signature: SignatureConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub session_issuer: String,
    pub signature_issuer: String,
}

#[derive(Debug, Clone)]
pub struct OtpConfig {
    pub ttl_seconds: u64,
    pub attempts_allowed: u32,
    pub channel_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ScoringConfig {
    /// Base URL of the external anomaly scorer. Empty disables remote scoring.
    pub endpoint: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub endpoint: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct SignatureConfig {
    pub document_salt: String,
    pub token_ttl_hours: i64,
    pub replay_window_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub challenge_attempts: u32,
    pub challenge_window_seconds: u64,
    pub global_attempts: u32,
    pub global_window_seconds: u64,
}

/// Read an environment variable with a development fallback.
///
/// In production a missing variable is a startup error rather than a silent
/// default.
fn get_env(key: &str, default: &str, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ if is_prod => Err(AppError::ConfigError(anyhow::anyhow!(
            "{key} must be set in production"
        ))),
        _ => Ok(default.to_string()),
    }
}

fn get_env_parsed<T: std::str::FromStr>(
    key: &str,
    default: &str,
    is_prod: bool,
) -> Result<T, AppError> {
    let raw = get_env(key, default, is_prod)?;
    raw.parse::<T>()
        .map_err(|_| AppError::ConfigError(anyhow::anyhow!("{key} has an invalid value: {raw}")))
}

impl SecurityConfig {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") => Environment::Production,
            _ => Environment::Development,
        };
        let is_prod = environment.is_production();

        let swagger = match get_env("SWAGGER_UI", "enabled", false)?.as_str() {
            "enabled" => SwaggerMode::Enabled,
            _ => SwaggerMode::Disabled,
        };

        Ok(Self {
            environment,
            port: get_env_parsed("PORT", "8083", false)?,
            log_level: get_env("LOG_LEVEL", "info", false)?,
            // Empty endpoint keeps tracing local; no exporter is wired up.
            otlp_endpoint: get_env("OTLP_ENDPOINT", "", false)?,
            swagger,
            allowed_origins: get_env("ALLOWED_ORIGINS", "http://localhost:3000", is_prod)?
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect(),
            mongo: MongoConfig {
                uri: get_env("MONGO_URI", "mongodb://localhost:27017", is_prod)?,
                database: get_env("MONGO_DATABASE", "rentledge_security", false)?,
            },
            redis: RedisConfig {
                url: get_env("REDIS_URL", "redis://localhost:6379", is_prod)?,
            },
            jwt: JwtConfig {
                secret: get_env("JWT_SECRET", "dev-only-insecure-secret", is_prod)?,
                session_issuer: get_env("JWT_SESSION_ISSUER", "rentledge-auth", false)?,
                signature_issuer: get_env("JWT_SIGNATURE_ISSUER", "rentledge-dsa", false)?,
            },
            otp: OtpConfig {
                ttl_seconds: get_env_parsed("OTP_TTL_SECONDS", "300", false)?,
                attempts_allowed: get_env_parsed("OTP_ATTEMPTS_ALLOWED", "3", false)?,
                channel_timeout_ms: get_env_parsed("OTP_CHANNEL_TIMEOUT_MS", "5000", false)?,
            },
            scoring: ScoringConfig {
                endpoint: get_env("ANOMALY_SCORER_URL", "", false)?,
                timeout_ms: get_env_parsed("ANOMALY_SCORER_TIMEOUT_MS", "10000", false)?,
            },
            notifier: NotifierConfig {
                endpoint: get_env("NOTIFICATION_SERVICE_URL", "http://localhost:8082", is_prod)?,
                timeout_ms: get_env_parsed("NOTIFICATION_TIMEOUT_MS", "5000", false)?,
            },
            signature: SignatureConfig {
                document_salt: get_env("DOCUMENT_HASH_SALT", "dev-only-document-salt", is_prod)?,
                token_ttl_hours: get_env_parsed("SIGNATURE_TOKEN_TTL_HOURS", "24", false)?,
                replay_window_seconds: get_env_parsed("SIGNATURE_REPLAY_WINDOW_SECONDS", "600", false)?,
            },
            rate_limit: RateLimitConfig {
                challenge_attempts: get_env_parsed("RATE_LIMIT_CHALLENGE_ATTEMPTS", "5", false)?,
                challenge_window_seconds: get_env_parsed("RATE_LIMIT_CHALLENGE_WINDOW", "60", false)?,
                global_attempts: get_env_parsed("RATE_LIMIT_GLOBAL_ATTEMPTS", "100", false)?,
                global_window_seconds: get_env_parsed("RATE_LIMIT_GLOBAL_WINDOW", "60", false)?,
            },
        })
    }
}
