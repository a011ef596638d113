use chrono::Utc;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::Script;
use serde::Serialize;
use service_core::error::AppError;
use service_core::utils::hashing::{constant_time_eq, sha256_hex};
use std::sync::Arc;
use std::time::Duration;
use utoipa::ToSchema;

use crate::models::OneTimeCode;

/// Outcome of counting a verification attempt against a live code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Counted { attempts_used: u32 },
    /// The limit was reached; the entry has been invalidated.
    Exceeded,
    NotFound,
}

/// Outcome of an atomic compare-and-consume of a supplied code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeValidation {
    /// Matched; the entry has been consumed.
    Valid,
    Invalid { remaining_attempts: u32 },
    Exceeded,
    Expired,
    NotFound,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CacheStats {
    pub redis_configured: bool,
    pub fallback_entries: usize,
}

/// Store for live one-time codes.
///
/// Redis is the primary store; a process-local map absorbs writes while
/// Redis is unreachable so issuance and verification keep working. Entries
/// carry their own expiry and attempt budget, and both mutation paths are
/// atomic: a Lua script on Redis, an entry lock on the fallback map.
pub struct OtpCacheStore {
    redis: Option<ConnectionManager>,
    memory: DashMap<String, OneTimeCode>,
    validate_script: Script,
    attempt_script: Script,
}

/// Compare-and-consume. Deletes on match, on expiry, and on exhausting the
/// attempt budget; otherwise rewrites the entry with the bumped counter.
const VALIDATE_LUA: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then return {'NOT_FOUND', 0} end
local entry = cjson.decode(raw)
local now = tonumber(redis.call('TIME')[1])
if now >= entry.issued_at + entry.ttl_seconds then
  redis.call('DEL', KEYS[1])
  return {'EXPIRED', 0}
end
if entry.code == ARGV[1] then
  redis.call('DEL', KEYS[1])
  return {'VALID', 0}
end
entry.attempts_used = entry.attempts_used + 1
if entry.attempts_used >= entry.attempts_allowed then
  redis.call('DEL', KEYS[1])
  return {'EXCEEDED', 0}
end
local ttl = redis.call('TTL', KEYS[1])
if ttl < 1 then ttl = 1 end
redis.call('SET', KEYS[1], cjson.encode(entry), 'EX', ttl)
return {'INVALID', entry.attempts_allowed - entry.attempts_used}
"#;

/// Increment-and-compare on the attempt counter alone.
const ATTEMPT_LUA: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then return {'NOT_FOUND', 0} end
local entry = cjson.decode(raw)
entry.attempts_used = entry.attempts_used + 1
if entry.attempts_used >= entry.attempts_allowed then
  redis.call('DEL', KEYS[1])
  return {'EXCEEDED', entry.attempts_used}
end
local ttl = redis.call('TTL', KEYS[1])
if ttl < 1 then ttl = 1 end
redis.call('SET', KEYS[1], cjson.encode(entry), 'EX', ttl)
return {'COUNTED', entry.attempts_used}
"#;

impl OtpCacheStore {
    /// Connect to Redis, degrading to the in-process map when unreachable.
    pub async fn connect(redis_url: &str) -> Self {
        let redis = match redis::Client::open(redis_url) {
            Ok(client) => match ConnectionManager::new(client).await {
                Ok(manager) => Some(manager),
                Err(err) => {
                    tracing::warn!(error = %err, "redis unreachable, using in-process code store");
                    None
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "invalid redis url, using in-process code store");
                None
            }
        };
        Self::with_redis(redis)
    }

    /// Purely in-process store, used in tests and when Redis is absent.
    pub fn in_memory() -> Self {
        Self::with_redis(None)
    }

    fn with_redis(redis: Option<ConnectionManager>) -> Self {
        Self {
            redis,
            memory: DashMap::new(),
            validate_script: Script::new(VALIDATE_LUA),
            attempt_script: Script::new(ATTEMPT_LUA),
        }
    }

    /// Derive the cache key for a code owner. The identifier is normalized
    /// and digested so raw addresses never appear in cache keys.
    pub fn owner_key(identifier: &str) -> String {
        format!("otp:{}", sha256_hex(&identifier.trim().to_lowercase()))
    }

    /// Store a code, replacing any live code for the same owner.
    pub async fn put(&self, owner_key: &str, entry: OneTimeCode) -> Result<(), AppError> {
        if let Some(redis) = &self.redis {
            let payload = serde_json::to_string(&entry)
                .map_err(|err| AppError::InternalError(anyhow::Error::new(err)))?;
            let mut conn = redis.clone();
            let result: Result<(), redis::RedisError> = redis::cmd("SET")
                .arg(owner_key)
                .arg(&payload)
                .arg("EX")
                .arg(entry.ttl_seconds)
                .query_async(&mut conn)
                .await;
            match result {
                Ok(()) => {
                    // A stale fallback entry must not shadow the fresh code.
                    self.memory.remove(owner_key);
                    return Ok(());
                }
                Err(err) => {
                    tracing::warn!(error = %err, "redis write failed, storing code in fallback");
                }
            }
        }
        self.memory.insert(owner_key.to_string(), entry);
        Ok(())
    }

    /// Fetch the live code without mutating it.
    pub async fn get(&self, owner_key: &str) -> Result<Option<OneTimeCode>, AppError> {
        if let Some(redis) = &self.redis {
            let mut conn = redis.clone();
            let result: Result<Option<String>, redis::RedisError> = redis::cmd("GET")
                .arg(owner_key)
                .query_async(&mut conn)
                .await;
            match result {
                Ok(Some(raw)) => match serde_json::from_str::<OneTimeCode>(&raw) {
                    Ok(entry) => return Ok(Some(entry)),
                    Err(err) => {
                        tracing::warn!(error = %err, "corrupt cache entry, discarding");
                        self.delete_redis(owner_key).await;
                        return Ok(None);
                    }
                },
                Ok(None) => {
                    // Fall through: the entry may have been written during an
                    // outage.
                }
                Err(err) => {
                    tracing::warn!(error = %err, "redis read failed, consulting fallback");
                }
            }
        }
        let now = Utc::now().timestamp();
        // Clone out of the shard guard before any removal on the same shard.
        let cached = self.memory.get(owner_key).map(|entry| entry.clone());
        match cached {
            Some(entry) if !entry.expired_at(now) => Ok(Some(entry)),
            Some(_) => {
                self.memory.remove(owner_key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Count one failed attempt. Invalidates the entry when the budget is
    /// exhausted. The increment-and-compare is a single atomic step.
    pub async fn record_attempt(&self, owner_key: &str) -> Result<AttemptOutcome, AppError> {
        if let Some(redis) = &self.redis {
            let mut conn = redis.clone();
            let result: Result<(String, u32), redis::RedisError> = self
                .attempt_script
                .key(owner_key)
                .invoke_async(&mut conn)
                .await;
            match result {
                Ok((tag, attempts_used)) => {
                    return Ok(match tag.as_str() {
                        "COUNTED" => AttemptOutcome::Counted { attempts_used },
                        "EXCEEDED" => AttemptOutcome::Exceeded,
                        _ => AttemptOutcome::NotFound,
                    });
                }
                Err(err) => {
                    tracing::warn!(error = %err, "redis attempt count failed, using fallback");
                }
            }
        }

        use dashmap::mapref::entry::Entry;
        match self.memory.entry(owner_key.to_string()) {
            Entry::Vacant(_) => Ok(AttemptOutcome::NotFound),
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.attempts_used += 1;
                let attempts_used = entry.attempts_used;
                if attempts_used >= entry.attempts_allowed {
                    occupied.remove();
                    Ok(AttemptOutcome::Exceeded)
                } else {
                    Ok(AttemptOutcome::Counted { attempts_used })
                }
            }
        }
    }

    /// Atomically compare a supplied code against the live entry and consume
    /// it on match. At most one concurrent caller can observe `Valid`.
    pub async fn validate_code(
        &self,
        owner_key: &str,
        supplied: &str,
    ) -> Result<CodeValidation, AppError> {
        if let Some(redis) = &self.redis {
            let mut conn = redis.clone();
            let result: Result<(String, u32), redis::RedisError> = self
                .validate_script
                .key(owner_key)
                .arg(supplied)
                .invoke_async(&mut conn)
                .await;
            match result {
                Ok((tag, remaining)) => {
                    let validation = match tag.as_str() {
                        "VALID" => CodeValidation::Valid,
                        "INVALID" => CodeValidation::Invalid {
                            remaining_attempts: remaining,
                        },
                        "EXCEEDED" => CodeValidation::Exceeded,
                        "EXPIRED" => CodeValidation::Expired,
                        _ => CodeValidation::NotFound,
                    };
                    if validation != CodeValidation::NotFound {
                        return Ok(validation);
                    }
                    // NOT_FOUND in Redis may still exist in the fallback map.
                }
                Err(err) => {
                    tracing::warn!(error = %err, "redis validation failed, using fallback");
                }
            }
        }
        Ok(self.validate_in_memory(owner_key, supplied))
    }

    fn validate_in_memory(&self, owner_key: &str, supplied: &str) -> CodeValidation {
        use dashmap::mapref::entry::Entry;
        let now = Utc::now().timestamp();
        // The occupied entry holds its shard lock, so the compare-and-consume
        // below is atomic with respect to concurrent verifiers.
        match self.memory.entry(owner_key.to_string()) {
            Entry::Vacant(_) => CodeValidation::NotFound,
            Entry::Occupied(mut occupied) => {
                if occupied.get().expired_at(now) {
                    occupied.remove();
                    return CodeValidation::Expired;
                }
                if constant_time_eq(&occupied.get().code, supplied) {
                    occupied.remove();
                    return CodeValidation::Valid;
                }
                let entry = occupied.get_mut();
                entry.attempts_used += 1;
                let remaining = entry.remaining_attempts();
                if remaining == 0 {
                    occupied.remove();
                    CodeValidation::Exceeded
                } else {
                    CodeValidation::Invalid {
                        remaining_attempts: remaining,
                    }
                }
            }
        }
    }

    /// Remove the live code for an owner, if any.
    pub async fn invalidate(&self, owner_key: &str) -> Result<(), AppError> {
        self.delete_redis(owner_key).await;
        self.memory.remove(owner_key);
        Ok(())
    }

    async fn delete_redis(&self, owner_key: &str) {
        if let Some(redis) = &self.redis {
            let mut conn = redis.clone();
            let result: Result<(), redis::RedisError> = redis::cmd("DEL")
                .arg(owner_key)
                .query_async(&mut conn)
                .await;
            if let Err(err) = result {
                tracing::warn!(error = %err, "redis delete failed");
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            redis_configured: self.redis.is_some(),
            fallback_entries: self.memory.len(),
        }
    }

    /// Periodically evict expired fallback entries. Redis entries expire on
    /// their own via TTL.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let now = Utc::now().timestamp();
                let before = store.memory.len();
                store.memory.retain(|_, entry| !entry.expired_at(now));
                let evicted = before - store.memory.len();
                if evicted > 0 {
                    tracing::debug!(evicted, "swept expired fallback codes");
                }
            }
        })
    }
}
