use chrono::{DateTime, Utc};
use sqlx::Row;

use concord_core::domain::sequence::{PeriodKey, SequenceCounter};

use super::{decode_error, parse_timestamp, RepositoryError, SequenceRepository};
use crate::DbPool;

pub struct SqlSequenceRepository {
    pool: DbPool,
}

impl SqlSequenceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SequenceRepository for SqlSequenceRepository {
    async fn increment(
        &self,
        period_key: &PeriodKey,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let row = sqlx::query(
            "INSERT INTO sequence_counter (period_key, last_value, updated_at)
             VALUES (?, 1, ?)
             ON CONFLICT(period_key) DO UPDATE SET
                 last_value = sequence_counter.last_value + 1,
                 updated_at = excluded.updated_at
             RETURNING last_value",
        )
        .bind(period_key.as_str())
        .bind(now.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;

        let value: i64 = row.try_get("last_value").map_err(decode_error)?;
        u64::try_from(value).map_err(decode_error)
    }

    async fn current(
        &self,
        period_key: &PeriodKey,
    ) -> Result<Option<SequenceCounter>, RepositoryError> {
        let row = sqlx::query(
            "SELECT period_key, last_value, updated_at FROM sequence_counter WHERE period_key = ?",
        )
        .bind(period_key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let last_value: i64 = row.try_get("last_value").map_err(decode_error)?;
        let updated_at: String = row.try_get("updated_at").map_err(decode_error)?;

        Ok(Some(SequenceCounter {
            period_key: period_key.clone(),
            last_value: u64::try_from(last_value).map_err(decode_error)?,
            updated_at: parse_timestamp("updated_at", &updated_at)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use chrono::Utc;

    use concord_core::domain::sequence::PeriodKey;

    use super::SqlSequenceRepository;
    use crate::repositories::SequenceRepository;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn first_value_is_one_and_periods_are_independent() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = SqlSequenceRepository::new(pool);

        let y25 = PeriodKey::new("25").expect("period");
        let y26 = PeriodKey::new("26").expect("period");

        assert!(repo.current(&y25).await.expect("current").is_none());
        assert_eq!(repo.increment(&y25, Utc::now()).await.expect("next"), 1);
        assert_eq!(repo.increment(&y25, Utc::now()).await.expect("next"), 2);
        assert_eq!(repo.increment(&y26, Utc::now()).await.expect("next"), 1);

        let counter = repo.current(&y25).await.expect("current").expect("exists");
        assert_eq!(counter.last_value, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_on_a_shared_file_are_gapless() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("sequence.db").display());
        let pool = connect_with_settings(&url, 5, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = Arc::new(SqlSequenceRepository::new(pool));
        let period = PeriodKey::new("25").expect("period");

        let mut handles = Vec::new();
        for _ in 0..10 {
            let repo = Arc::clone(&repo);
            let period = period.clone();
            handles.push(tokio::spawn(async move {
                repo.increment(&period, Utc::now()).await.expect("increment")
            }));
        }

        let mut values = BTreeSet::new();
        for handle in handles {
            values.insert(handle.await.expect("join"));
        }

        assert_eq!(values, (1..=10).collect::<BTreeSet<u64>>());
    }
}
