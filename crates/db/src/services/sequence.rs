use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use concord_core::domain::sequence::{format_code, PeriodKey};
use concord_core::ApplicationError;

use crate::repositories::SequenceRepository;

/// Hands out gapless, strictly increasing numbers per period key. The store
/// performs the increment atomically, so no external lock is needed.
pub struct SequenceGenerator {
    store: Arc<dyn SequenceRepository>,
    code_width: usize,
}

impl SequenceGenerator {
    pub fn new(store: Arc<dyn SequenceRepository>, code_width: usize) -> Self {
        Self { store, code_width }
    }

    pub async fn next(&self, period_key: &PeriodKey) -> Result<u64, ApplicationError> {
        let value = self.store.increment(period_key, Utc::now()).await?;
        debug!(
            event_name = "sequence.issued",
            period_key = %period_key,
            value,
            "sequence value issued"
        );
        Ok(value)
    }

    /// Issues the next number for the year of `at` and renders it, e.g. `QT-25-0007`.
    pub async fn next_code(
        &self,
        prefix: &str,
        at: DateTime<Utc>,
    ) -> Result<String, ApplicationError> {
        self.next_code_in(prefix, &PeriodKey::for_year(at)).await
    }

    pub async fn next_code_in(
        &self,
        prefix: &str,
        period_key: &PeriodKey,
    ) -> Result<String, ApplicationError> {
        // Validate the prefix before consuming a number.
        format_code(prefix, period_key, 0, self.code_width)?;
        let value = self.next(period_key).await?;
        Ok(format_code(prefix, period_key, value, self.code_width)?)
    }

    /// Last value issued for the period, 0 when none has been.
    pub async fn current(&self, period_key: &PeriodKey) -> Result<u64, ApplicationError> {
        Ok(self.store.current(period_key).await?.map_or(0, |counter| counter.last_value))
    }
}
