pub mod config;
pub mod domain;
pub mod errors;
pub mod events;
pub mod quota;

pub use chrono;
pub use rust_decimal;

pub use domain::approval::{
    ApprovalError, ApprovalRequest, ApprovalRequestId, ApprovalStatus, ApprovalTransition,
    ChainLevel, ChainTemplate, ChainTemplateError, DecisionOutcome, EntityType, LevelDecision,
};
pub use domain::lease::{Lease, LeaseToken, LockError, LockKey};
pub use domain::quotation::{
    FulfillmentEntry, ProductId, ProjectId, Quotation, QuotationId, QuotationLine, RequestedLine,
};
pub use domain::sequence::{PeriodKey, SequenceCounter, SequenceError};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use events::{ApprovalEvent, EventEnvelope, EventSink, InMemoryEventSink, TracingEventSink};
pub use quota::{QuotaLedger, QuotaLine, QuotaViolation};
