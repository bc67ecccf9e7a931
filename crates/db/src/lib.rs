pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod services;

pub use connection::{connect, connect_with_config, connect_with_settings, DbPool};
pub use repositories::RepositoryError;
pub use services::{
    ApprovalEngine, ApprovalSettings, ChainTemplateService, Coordinator, FulfillmentCommand,
    FulfillmentService, HeldLease, LockGuard, LockManager, QuotaGuard, SequenceGenerator, Stores,
};
