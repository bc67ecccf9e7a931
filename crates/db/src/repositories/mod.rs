use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use concord_core::domain::approval::{ApprovalRequest, ApprovalRequestId, ChainTemplate, EntityType};
use concord_core::domain::lease::{Lease, LeaseToken, LockKey};
use concord_core::domain::quotation::{FulfillmentEntry, ProjectId, Quotation, QuotationId};
use concord_core::domain::sequence::{PeriodKey, SequenceCounter};
use concord_core::ApplicationError;

pub mod approval;
pub mod lease;
pub mod memory;
pub mod quotation;
pub mod sequence;

pub use approval::{SqlApprovalRequestRepository, SqlChainTemplateRepository};
pub use lease::SqlLeaseRepository;
pub use memory::{
    InMemoryApprovalRequestRepository, InMemoryChainTemplateRepository,
    InMemoryFulfillmentLedgerRepository, InMemoryLeaseRepository, InMemoryQuotationRepository,
    InMemorySequenceRepository,
};
pub use quotation::{SqlFulfillmentLedgerRepository, SqlQuotationRepository};
pub use sequence::SqlSequenceRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        ApplicationError::Persistence(value.to_string())
    }
}

/// Storage for named leases. `try_acquire` must be a single atomic
/// compare-and-set: it succeeds only when no live lease exists for the key.
#[async_trait]
pub trait LeaseRepository: Send + Sync {
    async fn try_acquire(&self, lease: &Lease, now: DateTime<Utc>)
        -> Result<bool, RepositoryError>;

    /// Deletes the lease only while `token` still holds it.
    async fn release(&self, key: &LockKey, token: &LeaseToken) -> Result<bool, RepositoryError>;

    async fn find(&self, key: &LockKey) -> Result<Option<Lease>, RepositoryError>;

    async fn reap_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait SequenceRepository: Send + Sync {
    /// Atomically creates the counter at 1 or increments it, returning the new value.
    async fn increment(
        &self,
        period_key: &PeriodKey,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;

    async fn current(
        &self,
        period_key: &PeriodKey,
    ) -> Result<Option<SequenceCounter>, RepositoryError>;
}

#[async_trait]
pub trait ChainTemplateRepository: Send + Sync {
    async fn find(&self, entity_type: EntityType)
        -> Result<Option<ChainTemplate>, RepositoryError>;
    async fn save(&self, template: ChainTemplate) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ApprovalRequestRepository: Send + Sync {
    async fn find_by_id(
        &self,
        id: &ApprovalRequestId,
    ) -> Result<Option<ApprovalRequest>, RepositoryError>;

    /// Upserts the request and appends decisions not yet stored. Stored
    /// decisions are never rewritten.
    async fn save(&self, request: ApprovalRequest) -> Result<(), RepositoryError>;

    async fn find_by_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError>;

    async fn list_pending(
        &self,
        entity_type: Option<EntityType>,
        level: Option<u32>,
        limit: u32,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError>;
}

#[async_trait]
pub trait QuotationRepository: Send + Sync {
    async fn find_by_id(&self, id: &QuotationId) -> Result<Option<Quotation>, RepositoryError>;
    async fn save(&self, quotation: Quotation) -> Result<(), RepositoryError>;
}

/// Append-only record of deliveries and payments.
#[async_trait]
pub trait FulfillmentLedgerRepository: Send + Sync {
    async fn list_for_project(
        &self,
        project_id: &ProjectId,
    ) -> Result<Vec<FulfillmentEntry>, RepositoryError>;

    /// Appends all entries or none of them.
    async fn append(&self, entries: &[FulfillmentEntry]) -> Result<(), RepositoryError>;
}

pub(crate) fn decode_error(error: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

pub(crate) fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{column} `{raw}`: {error}")))
}

pub(crate) fn parse_decimal(
    column: &str,
    raw: &str,
) -> Result<rust_decimal::Decimal, RepositoryError> {
    raw.parse::<rust_decimal::Decimal>()
        .map_err(|error| RepositoryError::Decode(format!("{column} `{raw}`: {error}")))
}

pub(crate) fn millis_to_timestamp(column: &str, millis: i64) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| RepositoryError::Decode(format!("{column} `{millis}` is out of range")))
}
