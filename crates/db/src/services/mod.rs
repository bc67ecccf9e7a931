pub mod approval;
pub mod locks;
pub mod quota;
pub mod sequence;

use std::sync::Arc;

use concord_core::config::AppConfig;
use concord_core::events::EventSink;

use crate::repositories::{
    ApprovalRequestRepository, ChainTemplateRepository, FulfillmentLedgerRepository,
    InMemoryApprovalRequestRepository, InMemoryChainTemplateRepository,
    InMemoryFulfillmentLedgerRepository, InMemoryLeaseRepository, InMemoryQuotationRepository,
    InMemorySequenceRepository, LeaseRepository, QuotationRepository, SequenceRepository,
    SqlApprovalRequestRepository, SqlChainTemplateRepository, SqlFulfillmentLedgerRepository,
    SqlLeaseRepository, SqlQuotationRepository, SqlSequenceRepository,
};
use crate::DbPool;

pub use approval::{ApprovalEngine, ApprovalSettings, ChainTemplateService};
pub use locks::{HeldLease, LockGuard, LockManager};
pub use quota::{FulfillmentCommand, FulfillmentService, QuotaGuard};
pub use sequence::SequenceGenerator;

/// Storage backends the services are wired against.
#[derive(Clone)]
pub struct Stores {
    pub leases: Arc<dyn LeaseRepository>,
    pub sequences: Arc<dyn SequenceRepository>,
    pub chains: Arc<dyn ChainTemplateRepository>,
    pub approvals: Arc<dyn ApprovalRequestRepository>,
    pub quotations: Arc<dyn QuotationRepository>,
    pub ledger: Arc<dyn FulfillmentLedgerRepository>,
}

impl Stores {
    pub fn sql(pool: DbPool) -> Self {
        Self {
            leases: Arc::new(SqlLeaseRepository::new(pool.clone())),
            sequences: Arc::new(SqlSequenceRepository::new(pool.clone())),
            chains: Arc::new(SqlChainTemplateRepository::new(pool.clone())),
            approvals: Arc::new(SqlApprovalRequestRepository::new(pool.clone())),
            quotations: Arc::new(SqlQuotationRepository::new(pool.clone())),
            ledger: Arc::new(SqlFulfillmentLedgerRepository::new(pool)),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            leases: Arc::new(InMemoryLeaseRepository::default()),
            sequences: Arc::new(InMemorySequenceRepository::default()),
            chains: Arc::new(InMemoryChainTemplateRepository::default()),
            approvals: Arc::new(InMemoryApprovalRequestRepository::default()),
            quotations: Arc::new(InMemoryQuotationRepository::default()),
            ledger: Arc::new(InMemoryFulfillmentLedgerRepository::default()),
        }
    }
}

/// Every coordination service built over one set of stores.
pub struct Coordinator {
    pub stores: Stores,
    pub locks: Arc<LockManager>,
    pub chains: ChainTemplateService,
    pub approvals: ApprovalEngine,
    pub quota: QuotaGuard,
    pub fulfillment: FulfillmentService,
    pub sequences: SequenceGenerator,
}

impl Coordinator {
    pub fn new(stores: Stores, config: &AppConfig, events: Arc<dyn EventSink>) -> Self {
        let locks = Arc::new(LockManager::new(Arc::clone(&stores.leases), &config.locks));
        let quota = QuotaGuard::new(
            Arc::clone(&locks),
            Arc::clone(&stores.quotations),
            Arc::clone(&stores.ledger),
        );

        Self {
            locks: Arc::clone(&locks),
            chains: ChainTemplateService::new(Arc::clone(&stores.chains)),
            approvals: ApprovalEngine::new(
                Arc::clone(&locks),
                Arc::clone(&stores.chains),
                Arc::clone(&stores.approvals),
                events,
                ApprovalSettings::from_config(config),
            ),
            fulfillment: FulfillmentService::new(
                Arc::clone(&locks),
                quota.clone(),
                Arc::clone(&stores.ledger),
                config.locks.default_timeout(),
            ),
            quota,
            sequences: SequenceGenerator::new(
                Arc::clone(&stores.sequences),
                config.sequence.code_width,
            ),
            stores,
        }
    }

    pub fn sql(pool: DbPool, config: &AppConfig, events: Arc<dyn EventSink>) -> Self {
        Self::new(Stores::sql(pool), config, events)
    }

    pub fn in_memory(config: &AppConfig, events: Arc<dyn EventSink>) -> Self {
        Self::new(Stores::in_memory(), config, events)
    }
}
