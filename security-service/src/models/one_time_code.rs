use serde::{Deserialize, Serialize};

/// A live one-time code as held by the cache store.
///
/// The record is self-describing so the fallback store can enforce expiry
/// and attempt limits without any surrounding state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneTimeCode {
    pub code: String,
    /// Random seed bound to the issuance, available for channels that derive
    /// their own material from it.
    pub secret_seed: String,
    /// Unix seconds at issuance.
    pub issued_at: i64,
    pub ttl_seconds: u64,
    pub attempts_used: u32,
    pub attempts_allowed: u32,
}

impl OneTimeCode {
    pub fn expires_at_epoch(&self) -> i64 {
        self.issued_at + self.ttl_seconds as i64
    }

    pub fn expired_at(&self, now_epoch: i64) -> bool {
        now_epoch >= self.expires_at_epoch()
    }

    pub fn remaining_attempts(&self) -> u32 {
        self.attempts_allowed.saturating_sub(self.attempts_used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code() -> OneTimeCode {
        OneTimeCode {
            code: "123456".into(),
            secret_seed: "seed".into(),
            issued_at: 1_000,
            ttl_seconds: 300,
            attempts_used: 0,
            attempts_allowed: 3,
        }
    }

    #[test]
    fn expiry_is_issued_at_plus_ttl() {
        let c = code();
        assert!(!c.expired_at(1_299));
        assert!(c.expired_at(1_300));
    }

    #[test]
    fn remaining_attempts_never_underflow() {
        let mut c = code();
        c.attempts_used = 5;
        assert_eq!(c.remaining_attempts(), 0);
    }
}
