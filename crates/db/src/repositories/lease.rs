use chrono::{DateTime, Utc};
use sqlx::Row;

use concord_core::domain::lease::{Lease, LeaseToken, LockKey};

use super::{decode_error, millis_to_timestamp, LeaseRepository, RepositoryError};
use crate::DbPool;

pub struct SqlLeaseRepository {
    pool: DbPool,
}

impl SqlLeaseRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_lease(row: &sqlx::sqlite::SqliteRow) -> Result<Lease, RepositoryError> {
    let scope: String = row.try_get("scope").map_err(decode_error)?;
    let entity_id: String = row.try_get("entity_id").map_err(decode_error)?;
    let holder_token: String = row.try_get("holder_token").map_err(decode_error)?;
    let acquired_at_ms: i64 = row.try_get("acquired_at_ms").map_err(decode_error)?;
    let expires_at_ms: i64 = row.try_get("expires_at_ms").map_err(decode_error)?;

    Ok(Lease {
        key: LockKey::new(scope, entity_id),
        holder_token: LeaseToken(holder_token),
        acquired_at: millis_to_timestamp("acquired_at_ms", acquired_at_ms)?,
        expires_at: millis_to_timestamp("expires_at_ms", expires_at_ms)?,
    })
}

#[async_trait::async_trait]
impl LeaseRepository for SqlLeaseRepository {
    async fn try_acquire(
        &self,
        lease: &Lease,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        // The conflict branch only fires when the existing row has expired, so the
        // insert-or-takeover is one statement and one write lock.
        let result = sqlx::query(
            "INSERT INTO lock_lease (scope, entity_id, holder_token, acquired_at_ms, expires_at_ms)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(scope, entity_id) DO UPDATE SET
                 holder_token = excluded.holder_token,
                 acquired_at_ms = excluded.acquired_at_ms,
                 expires_at_ms = excluded.expires_at_ms
             WHERE lock_lease.expires_at_ms <= ?",
        )
        .bind(&lease.key.scope)
        .bind(&lease.key.id)
        .bind(&lease.holder_token.0)
        .bind(lease.acquired_at.timestamp_millis())
        .bind(lease.expires_at.timestamp_millis())
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, key: &LockKey, token: &LeaseToken) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "DELETE FROM lock_lease WHERE scope = ? AND entity_id = ? AND holder_token = ?",
        )
        .bind(&key.scope)
        .bind(&key.id)
        .bind(&token.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find(&self, key: &LockKey) -> Result<Option<Lease>, RepositoryError> {
        let row = sqlx::query(
            "SELECT scope, entity_id, holder_token, acquired_at_ms, expires_at_ms
             FROM lock_lease WHERE scope = ? AND entity_id = ?",
        )
        .bind(&key.scope)
        .bind(&key.id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_lease).transpose()
    }

    async fn reap_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM lock_lease WHERE expires_at_ms <= ?")
            .bind(now.timestamp_millis())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
