//! Named, lease-based mutual exclusion shared by every service instance that
//! points at the same lease store.
//!
//! A lock is a row keyed by `(scope, id)` carrying a random holder token and an
//! expiry. Acquisition is a single compare-and-set in the store; a crashed
//! holder's lease simply expires and the next acquirer takes it over.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use concord_core::config::LockConfig;
use concord_core::domain::lease::{Lease, LeaseToken, LockError, LockKey};

use crate::repositories::{LeaseRepository, RepositoryError};

/// Proof that the caller holds the lease on `key`. Only a [`LockGuard`] can
/// hand one out, so functions taking `&HeldLease` cannot be called unlocked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeldLease {
    key: LockKey,
    token: LeaseToken,
}

impl HeldLease {
    pub fn key(&self) -> &LockKey {
        &self.key
    }

    pub fn token(&self) -> &LeaseToken {
        &self.token
    }

    /// Fails with [`LockError::WrongKey`] unless this lease is for `expected`.
    pub fn ensure_key(&self, expected: &LockKey) -> Result<(), LockError> {
        if &self.key == expected {
            return Ok(());
        }
        Err(LockError::WrongKey { held: self.key.clone(), expected: expected.clone() })
    }
}

pub struct LockManager {
    store: Arc<dyn LeaseRepository>,
    lease_ttl: Duration,
    retry_interval: Duration,
}

impl LockManager {
    pub fn new(store: Arc<dyn LeaseRepository>, config: &LockConfig) -> Self {
        Self {
            store,
            lease_ttl: config.lease_ttl(),
            retry_interval: config.retry_interval(),
        }
    }

    pub fn lease_ttl(&self) -> Duration {
        self.lease_ttl
    }

    /// Acquires `key`, polling until `timeout` elapses. A zero timeout makes a
    /// single attempt.
    pub async fn acquire(&self, key: LockKey, timeout: Duration) -> Result<LockGuard, LockError> {
        let ttl = chrono::Duration::from_std(self.lease_ttl)
            .map_err(|error| LockError::Store { key: key.clone(), message: error.to_string() })?;
        let started = Instant::now();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let now = Utc::now();
            let lease = Lease::grant(key.clone(), ttl, now);

            match self.store.try_acquire(&lease, now).await {
                Ok(true) => {
                    debug!(
                        event_name = "lock.acquired",
                        lock_key = %key,
                        attempts,
                        waited_ms = started.elapsed().as_millis() as u64,
                        "lease acquired"
                    );
                    return Ok(LockGuard::new(lease, Arc::clone(&self.store)));
                }
                Ok(false) => {}
                Err(error) => {
                    return Err(LockError::Store { key, message: error.to_string() });
                }
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                let waited_ms = elapsed.as_millis() as u64;
                warn!(
                    event_name = "lock.timeout",
                    lock_key = %key,
                    attempts,
                    waited_ms,
                    "lease acquisition timed out"
                );
                return Err(LockError::AcquisitionTimeout { key, waited_ms });
            }

            tokio::time::sleep(self.retry_interval.min(timeout - elapsed)).await;
        }
    }

    pub async fn try_acquire(&self, key: LockKey) -> Result<LockGuard, LockError> {
        self.acquire(key, Duration::ZERO).await
    }

    /// Confirms the lease is still held by this holder and has not expired.
    /// Call it right before committing guarded writes.
    pub async fn verify(&self, held: &HeldLease) -> Result<(), LockError> {
        let current = self.store.find(&held.key).await.map_err(|error| LockError::Store {
            key: held.key.clone(),
            message: error.to_string(),
        })?;

        match current {
            Some(lease) if lease.holder_token == held.token && lease.is_live(Utc::now()) => Ok(()),
            _ => {
                warn!(event_name = "lock.lost", lock_key = %held.key, "lease no longer held");
                Err(LockError::LeaseLost { key: held.key.clone() })
            }
        }
    }

    pub async fn inspect(&self, key: &LockKey) -> Result<Option<Lease>, LockError> {
        self.store
            .find(key)
            .await
            .map_err(|error| LockError::Store { key: key.clone(), message: error.to_string() })
    }

    /// Deletes expired leases. Acquisition already ignores them, so this only
    /// keeps the table small.
    pub async fn reap_expired(&self) -> Result<u64, RepositoryError> {
        let reaped = self.store.reap_expired(Utc::now()).await?;
        if reaped > 0 {
            info!(event_name = "lock.reaped", reaped, "expired leases removed");
        }
        Ok(reaped)
    }

    /// Runs `work` while holding `key` and releases the lease on every path.
    pub async fn with_lock<T, E, F, Fut>(
        &self,
        key: LockKey,
        timeout: Duration,
        work: F,
    ) -> Result<T, E>
    where
        F: FnOnce(HeldLease) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        let guard = self.acquire(key, timeout).await?;
        let outcome = work(guard.held()).await;

        if let Err(error) = guard.release().await {
            warn!(
                event_name = "lock.release_failed",
                error = %error,
                "lease release failed after guarded work"
            );
        }

        outcome
    }
}

/// Owns an acquired lease. Call [`LockGuard::release`]; dropping the guard
/// without releasing schedules a best-effort release on the current runtime.
pub struct LockGuard {
    lease: Lease,
    store: Arc<dyn LeaseRepository>,
    released: bool,
}

impl LockGuard {
    fn new(lease: Lease, store: Arc<dyn LeaseRepository>) -> Self {
        Self { lease, store, released: false }
    }

    pub fn key(&self) -> &LockKey {
        &self.lease.key
    }

    pub fn lease(&self) -> &Lease {
        &self.lease
    }

    pub fn held(&self) -> HeldLease {
        HeldLease { key: self.lease.key.clone(), token: self.lease.holder_token.clone() }
    }

    pub async fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        let key = self.lease.key.clone();

        match self.store.release(&key, &self.lease.holder_token).await {
            Ok(true) => {
                debug!(event_name = "lock.released", lock_key = %key, "lease released");
                Ok(())
            }
            Ok(false) => Err(LockError::LeaseLost { key }),
            Err(error) => Err(LockError::Store { key, message: error.to_string() }),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let store = Arc::clone(&self.store);
        let key = self.lease.key.clone();
        let token = self.lease.holder_token.clone();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(error) = store.release(&key, &token).await {
                        warn!(
                            event_name = "lock.release_failed",
                            lock_key = %key,
                            error = %error,
                            "background lease release failed"
                        );
                    }
                });
            }
            Err(_) => {
                warn!(
                    event_name = "lock.release_skipped",
                    lock_key = %key,
                    "guard dropped outside a runtime; lease will expire"
                );
            }
        }
    }
}
