use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use concord_core::domain::lease::LockKey;
use concord_core::domain::quotation::{
    FulfillmentEntry, ProjectId, Quotation, QuotationId, RequestedLine,
};
use concord_core::quota::{validate_request_shape, QuotaLedger, QuotaLine};
use concord_core::{ApplicationError, DomainError};

use super::locks::{HeldLease, LockManager};
use crate::repositories::{FulfillmentLedgerRepository, QuotationRepository};

/// Checks requested quantities against what a quotation still has available.
/// Only callable with the quotation's lease in hand; the lease is confirmed
/// live in the store before anything is read.
#[derive(Clone)]
pub struct QuotaGuard {
    locks: Arc<LockManager>,
    quotations: Arc<dyn QuotationRepository>,
    ledger: Arc<dyn FulfillmentLedgerRepository>,
}

impl QuotaGuard {
    pub fn new(
        locks: Arc<LockManager>,
        quotations: Arc<dyn QuotationRepository>,
        ledger: Arc<dyn FulfillmentLedgerRepository>,
    ) -> Self {
        Self { locks, quotations, ledger }
    }

    pub async fn validate(
        &self,
        held: &HeldLease,
        quotation_id: &QuotationId,
        project_id: &ProjectId,
        requested: &[RequestedLine],
    ) -> Result<(), ApplicationError> {
        held.ensure_key(&LockKey::quotation(quotation_id))?;
        self.locks.verify(held).await?;
        validate_request_shape(requested)?;

        let ledger = self.ledger_for(quotation_id, project_id).await?;
        if let Err(violation) = ledger.check(requested) {
            info!(
                event_name = "quota.rejected",
                quotation_id = %quotation_id,
                project_id = %project_id,
                violation = %violation,
                "fulfillment request exceeds quota"
            );
            return Err(violation.into());
        }

        Ok(())
    }

    /// Read-only snapshot; it may be stale by the time a write happens.
    pub async fn remaining(
        &self,
        quotation_id: &QuotationId,
        project_id: &ProjectId,
    ) -> Result<Vec<QuotaLine>, ApplicationError> {
        Ok(self.ledger_for(quotation_id, project_id).await?.lines())
    }

    async fn ledger_for(
        &self,
        quotation_id: &QuotationId,
        project_id: &ProjectId,
    ) -> Result<QuotaLedger, ApplicationError> {
        let quotation = self.load_quotation(quotation_id, project_id).await?;
        let fulfilled = self.ledger.list_for_project(project_id).await?;
        Ok(QuotaLedger::new(&quotation.lines, &fulfilled))
    }

    async fn load_quotation(
        &self,
        quotation_id: &QuotationId,
        project_id: &ProjectId,
    ) -> Result<Quotation, ApplicationError> {
        let quotation = self.quotations.find_by_id(quotation_id).await?.ok_or_else(|| {
            ApplicationError::NotFound { entity: "quotation", id: quotation_id.0.clone() }
        })?;

        if &quotation.project_id != project_id {
            return Err(DomainError::InvariantViolation(format!(
                "quotation {} belongs to project {}, not {}",
                quotation.id, quotation.project_id, project_id
            ))
            .into());
        }

        Ok(quotation)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FulfillmentCommand {
    pub quotation_id: QuotationId,
    pub project_id: ProjectId,
    pub lines: Vec<RequestedLine>,
    /// Delivery note or payment voucher number.
    pub reference: Option<String>,
    pub recorded_by: String,
}

/// Records deliveries and payments: lock, check, append, release.
pub struct FulfillmentService {
    locks: Arc<LockManager>,
    guard: QuotaGuard,
    ledger: Arc<dyn FulfillmentLedgerRepository>,
    lock_timeout: Duration,
}

impl FulfillmentService {
    pub fn new(
        locks: Arc<LockManager>,
        guard: QuotaGuard,
        ledger: Arc<dyn FulfillmentLedgerRepository>,
        lock_timeout: Duration,
    ) -> Self {
        Self { locks, guard, ledger, lock_timeout }
    }

    /// The lease is taken on the quotation while consumption is summed over the
    /// whole project, so requests against two versions of one project's
    /// quotation do not serialize against each other.
    pub async fn record(
        &self,
        command: FulfillmentCommand,
    ) -> Result<Vec<FulfillmentEntry>, ApplicationError> {
        let key = LockKey::quotation(&command.quotation_id);

        self.locks
            .with_lock(key, self.lock_timeout, |held| async move {
                self.guard
                    .validate(&held, &command.quotation_id, &command.project_id, &command.lines)
                    .await?;

                let recorded_at = Utc::now();
                let entries: Vec<FulfillmentEntry> = command
                    .lines
                    .iter()
                    .map(|line| FulfillmentEntry {
                        id: format!("FUL-{}", Uuid::new_v4()),
                        project_id: command.project_id.clone(),
                        quotation_id: command.quotation_id.clone(),
                        product_id: line.product_id.clone(),
                        quantity: line.quantity,
                        reference: command.reference.clone(),
                        recorded_by: command.recorded_by.clone(),
                        recorded_at,
                    })
                    .collect();

                self.locks.verify(&held).await?;
                self.ledger.append(&entries).await?;

                info!(
                    event_name = "fulfillment.recorded",
                    quotation_id = %command.quotation_id,
                    project_id = %command.project_id,
                    lines = entries.len(),
                    "fulfillment recorded"
                );
                Ok::<_, ApplicationError>(entries)
            })
            .await
    }

    pub async fn remaining(
        &self,
        quotation_id: &QuotationId,
        project_id: &ProjectId,
    ) -> Result<Vec<QuotaLine>, ApplicationError> {
        self.guard.remaining(quotation_id, project_id).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use rust_decimal::Decimal;

    use concord_core::config::LockConfig;
    use concord_core::domain::lease::{LockError, LockKey};
    use concord_core::domain::quotation::{
        ProductId, ProjectId, Quotation, QuotationId, QuotationLine, RequestedLine,
    };
    use concord_core::quota::QuotaViolation;
    use concord_core::{ApplicationError, DomainError};

    use super::{FulfillmentCommand, FulfillmentService, QuotaGuard};
    use crate::repositories::{
        FulfillmentLedgerRepository, InMemoryFulfillmentLedgerRepository,
        InMemoryLeaseRepository, InMemoryQuotationRepository, QuotationRepository,
    };
    use crate::services::locks::LockManager;

    struct Fixture {
        locks: Arc<LockManager>,
        guard: QuotaGuard,
        ledger: Arc<InMemoryFulfillmentLedgerRepository>,
        service: FulfillmentService,
    }

    async fn fixture(quoted: i64) -> Fixture {
        let quotations = Arc::new(InMemoryQuotationRepository::default());
        quotations
            .save(Quotation {
                id: QuotationId("Q-1".to_string()),
                project_id: ProjectId("P-1".to_string()),
                version: 1,
                lines: vec![QuotationLine {
                    product_id: ProductId("7".to_string()),
                    quantity: Decimal::from(quoted),
                    unit_price: Decimal::from(50),
                }],
                created_at: Utc::now(),
            })
            .await
            .expect("save quotation");

        let ledger = Arc::new(InMemoryFulfillmentLedgerRepository::default());
        let locks = Arc::new(LockManager::new(
            Arc::new(InMemoryLeaseRepository::default()),
            &LockConfig { lease_ttl_ms: 30_000, retry_interval_ms: 2, default_timeout_ms: 5_000 },
        ));
        let guard = QuotaGuard::new(Arc::clone(&locks), quotations, ledger.clone());
        let service = FulfillmentService::new(
            Arc::clone(&locks),
            guard.clone(),
            ledger.clone(),
            Duration::from_secs(5),
        );

        Fixture { locks, guard, ledger, service }
    }

    fn command(quantity: i64) -> FulfillmentCommand {
        FulfillmentCommand {
            quotation_id: QuotationId("Q-1".to_string()),
            project_id: ProjectId("P-1".to_string()),
            lines: vec![RequestedLine::new("7", Decimal::from(quantity))],
            reference: Some("DN-100".to_string()),
            recorded_by: "warehouse".to_string(),
        }
    }

    #[tokio::test]
    async fn second_delivery_is_limited_by_remaining_quantity() {
        let fixture = fixture(10).await;

        fixture.service.record(command(6)).await.expect("first delivery");
        let error = fixture.service.record(command(5)).await.expect_err("only 4 remain");

        let ApplicationError::Domain(DomainError::Quota(QuotaViolation::QuotaExceeded {
            remaining,
            shortfall,
            ..
        })) = error
        else {
            panic!("expected quota exceeded, got {error:?}");
        };
        assert_eq!(remaining, Decimal::from(4));
        assert_eq!(shortfall, Decimal::from(1));

        let view = fixture
            .service
            .remaining(&QuotationId("Q-1".to_string()), &ProjectId("P-1".to_string()))
            .await
            .expect("remaining");
        assert_eq!(view[0].remaining, Decimal::from(4));
    }

    #[tokio::test]
    async fn guard_refuses_a_lease_on_another_quotation() {
        let fixture = fixture(10).await;
        let other = fixture
            .locks
            .try_acquire(LockKey::quotation(&QuotationId("Q-2".to_string())))
            .await
            .expect("acquire");

        let error = fixture
            .guard
            .validate(
                &other.held(),
                &QuotationId("Q-1".to_string()),
                &ProjectId("P-1".to_string()),
                &[RequestedLine::new("7", Decimal::ONE)],
            )
            .await
            .expect_err("wrong key");
        assert!(matches!(error, ApplicationError::Lock(LockError::WrongKey { .. })));
        other.release().await.expect("release");
    }

    #[tokio::test]
    async fn guard_refuses_a_lease_that_was_released() {
        let fixture = fixture(10).await;
        let key = LockKey::quotation(&QuotationId("Q-1".to_string()));
        let guard = fixture.locks.try_acquire(key.clone()).await.expect("acquire");
        let stale = guard.held();
        guard.release().await.expect("release");

        let error = fixture
            .guard
            .validate(
                &stale,
                &QuotationId("Q-1".to_string()),
                &ProjectId("P-1".to_string()),
                &[RequestedLine::new("7", Decimal::ONE)],
            )
            .await
            .expect_err("released lease");
        assert_eq!(error, ApplicationError::Lock(LockError::LeaseLost { key }));
    }

    #[tokio::test]
    async fn project_mismatch_and_missing_quotation_are_rejected() {
        let fixture = fixture(10).await;

        let mut wrong_project = command(1);
        wrong_project.project_id = ProjectId("P-2".to_string());
        assert!(matches!(
            fixture.service.record(wrong_project).await,
            Err(ApplicationError::Domain(DomainError::InvariantViolation(_)))
        ));

        let mut missing = command(1);
        missing.quotation_id = QuotationId("Q-404".to_string());
        assert!(matches!(
            fixture.service.record(missing).await,
            Err(ApplicationError::NotFound { entity: "quotation", .. })
        ));
    }

    #[tokio::test]
    async fn rejected_request_releases_the_lease() {
        let fixture = fixture(10).await;
        assert!(fixture.service.record(command(0)).await.is_err());

        let key = LockKey::quotation(&QuotationId("Q-1".to_string()));
        assert!(fixture.locks.inspect(&key).await.expect("inspect").is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_never_exceed_the_quota() {
        let fixture = Arc::new(fixture(10).await);
        let accepted = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let fixture = Arc::clone(&fixture);
            let accepted = Arc::clone(&accepted);
            handles.push(tokio::spawn(async move {
                match fixture.service.record(command(3)).await {
                    Ok(_) => {
                        accepted.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(ApplicationError::Domain(DomainError::Quota(
                        QuotaViolation::QuotaExceeded { .. },
                    ))) => {}
                    Err(other) => panic!("unexpected error: {other:?}"),
                }
            }));
        }
        for handle in handles {
            handle.await.expect("join");
        }

        assert_eq!(accepted.load(Ordering::SeqCst), 3);
        let entries = fixture
            .ledger
            .list_for_project(&ProjectId("P-1".to_string()))
            .await
            .expect("list");
        let total: Decimal = entries.iter().map(|entry| entry.quantity).sum();
        assert_eq!(total, Decimal::from(9));
    }
}
