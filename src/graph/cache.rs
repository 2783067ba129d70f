//! Cache policies and per-request cache metadata

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// How long loaded information may be cached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CachePolicy {
    time_to_live_ms: u64,
}

impl CachePolicy {
    pub fn from_millis(time_to_live_ms: u64) -> Self {
        CachePolicy { time_to_live_ms }
    }

    pub fn time_to_live_ms(&self) -> u64 {
        self.time_to_live_ms
    }

    pub fn time_to_live(&self) -> Duration {
        Duration::milliseconds(i64::try_from(self.time_to_live_ms).unwrap_or(i64::MAX))
    }

    /// Instant at which information loaded at `now` expires
    pub fn expiration_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.time_to_live())
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// The shorter-lived of two optional policies
    pub fn shortest(a: Option<CachePolicy>, b: Option<CachePolicy>) -> Option<CachePolicy> {
        match (a, b) {
            (Some(a), Some(b)) => Some(if a.time_to_live_ms <= b.time_to_live_ms {
                a
            } else {
                b
            }),
            (a, None) => a,
            (None, b) => b,
        }
    }
}

/// Cache metadata carried by read requests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheInfo {
    policy: Option<CachePolicy>,
    loaded_at: Option<DateTime<Utc>>,
}

impl CacheInfo {
    pub fn with_policy(policy: CachePolicy) -> Self {
        CacheInfo {
            policy: Some(policy),
            loaded_at: None,
        }
    }

    pub fn policy(&self) -> Option<CachePolicy> {
        self.policy
    }

    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at
    }

    pub fn is_set(&self) -> bool {
        self.loaded_at.is_some()
    }

    /// Record cache metadata once
    ///
    /// The request's own policy wins over `default_policy`. A second call
    /// leaves the first recording untouched.
    pub fn record(&mut self, default_policy: Option<CachePolicy>, loaded_at: DateTime<Utc>) {
        if self.loaded_at.is_some() {
            return;
        }
        if self.policy.is_none() {
            self.policy = default_policy;
        }
        self.loaded_at = Some(loaded_at);
    }

    /// Expiration of the loaded information, if a policy applies
    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        match (self.policy, self.loaded_at) {
            (Some(policy), Some(at)) => Some(policy.expiration_from(at)),
            _ => None,
        }
    }
}
