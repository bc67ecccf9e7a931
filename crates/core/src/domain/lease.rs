use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::approval::ApprovalRequestId;
use crate::domain::quotation::QuotationId;

pub const QUOTATION_SCOPE: &str = "quotation";
pub const APPROVAL_REQUEST_SCOPE: &str = "approval-request";

/// Name of a lockable resource, e.g. `("quotation", "42")`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockKey {
    pub scope: String,
    pub id: String,
}

impl LockKey {
    pub fn new(scope: impl Into<String>, id: impl Into<String>) -> Self {
        Self { scope: scope.into(), id: id.into() }
    }

    pub fn quotation(id: &QuotationId) -> Self {
        Self::new(QUOTATION_SCOPE, id.0.clone())
    }

    pub fn approval_request(id: &ApprovalRequestId) -> Self {
        Self::new(APPROVAL_REQUEST_SCOPE, id.0.clone())
    }
}

impl std::fmt::Display for LockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.scope, self.id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseToken(pub String);

impl LeaseToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Ownership record for a [`LockKey`]. A lease past `expires_at` is dead and
/// may be taken over by the next acquirer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub key: LockKey,
    pub holder_token: LeaseToken,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn grant(key: LockKey, ttl: Duration, now: DateTime<Utc>) -> Self {
        Self { key, holder_token: LeaseToken::generate(), acquired_at: now, expires_at: now + ttl }
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("could not acquire lock {key} within {waited_ms}ms")]
    AcquisitionTimeout { key: LockKey, waited_ms: u64 },
    #[error("lease on {key} expired or was taken over before the guarded work completed")]
    LeaseLost { key: LockKey },
    #[error("held lease is for {held}, but {expected} is required")]
    WrongKey { held: LockKey, expected: LockKey },
    #[error("lease store failure on {key}: {message}")]
    Store { key: LockKey, message: String },
}

impl LockError {
    /// Contention and lost leases are worth retrying; wrong keys and store faults are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AcquisitionTimeout { .. } | Self::LeaseLost { .. })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{Lease, LockError, LockKey};
    use crate::domain::quotation::QuotationId;

    #[test]
    fn lock_key_renders_scope_and_id() {
        let key = LockKey::quotation(&QuotationId("42".to_string()));
        assert_eq!(key.to_string(), "quotation:42");
    }

    #[test]
    fn lease_is_dead_at_expiry() {
        let now = Utc::now();
        let lease = Lease::grant(LockKey::new("quotation", "1"), Duration::milliseconds(500), now);

        assert!(lease.is_live(now));
        assert!(lease.is_live(now + Duration::milliseconds(499)));
        assert!(!lease.is_live(now + Duration::milliseconds(500)));
    }

    #[test]
    fn grants_use_distinct_holder_tokens() {
        let now = Utc::now();
        let first = Lease::grant(LockKey::new("s", "1"), Duration::seconds(1), now);
        let second = Lease::grant(LockKey::new("s", "1"), Duration::seconds(1), now);
        assert_ne!(first.holder_token, second.holder_token);
    }

    #[test]
    fn timeouts_are_retryable() {
        let key = LockKey::new("quotation", "7");
        assert!(LockError::AcquisitionTimeout { key: key.clone(), waited_ms: 10 }.is_retryable());
        assert!(!LockError::Store { key, message: "disk".to_string() }.is_retryable());
    }
}
