use thiserror::Error;

use crate::domain::approval::{ApprovalError, ChainTemplateError};
use crate::domain::lease::LockError;
use crate::domain::sequence::SequenceError;
use crate::quota::QuotaViolation;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    Approval(#[from] ApprovalError),
    #[error(transparent)]
    Quota(#[from] QuotaViolation),
    #[error(transparent)]
    ChainTemplate(#[from] ChainTemplateError),
    #[error(transparent)]
    Sequence(#[from] SequenceError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: &'static str, id: String },
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl From<ApprovalError> for ApplicationError {
    fn from(value: ApprovalError) -> Self {
        Self::Domain(DomainError::Approval(value))
    }
}

impl From<QuotaViolation> for ApplicationError {
    fn from(value: QuotaViolation) -> Self {
        Self::Domain(DomainError::Quota(value))
    }
}

impl From<ChainTemplateError> for ApplicationError {
    fn from(value: ChainTemplateError) -> Self {
        Self::Domain(DomainError::ChainTemplate(value))
    }
}

impl From<SequenceError> for ApplicationError {
    fn from(value: SequenceError) -> Self {
        Self::Domain(DomainError::Sequence(value))
    }
}

impl ApplicationError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Lock(error) => error.is_retryable(),
            Self::Persistence(_) => true,
            _ => false,
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::Unprocessable { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

/// Boundary representation handed to whatever transport wraps the core.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("conflict: {message}")]
    Conflict { message: String, retryable: bool, correlation_id: String },
    #[error("unprocessable request: {message}")]
    Unprocessable { message: String, detail: Option<serde_json::Value>, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Conflict { retryable: true, .. } => {
                "Someone else is working on this record right now. Please retry shortly."
            }
            Self::Conflict { retryable: false, .. } => {
                "This record has changed since you loaded it. Refresh and try again."
            }
            Self::Unprocessable { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested record does not exist.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let unassigned = || "unassigned".to_owned();
        match value {
            ApplicationError::Lock(error) => Self::Conflict {
                retryable: error.is_retryable(),
                message: error.to_string(),
                correlation_id: unassigned(),
            },
            ApplicationError::Domain(DomainError::Approval(
                error @ (ApprovalError::RequestAlreadyFinalized { .. }
                | ApprovalError::InvalidApprovalState { .. }),
            )) => Self::Conflict {
                retryable: false,
                message: error.to_string(),
                correlation_id: unassigned(),
            },
            ApplicationError::Domain(DomainError::Quota(violation)) => Self::Unprocessable {
                message: violation.to_string(),
                detail: serde_json::to_value(&violation).ok(),
                correlation_id: unassigned(),
            },
            ApplicationError::Domain(error) => Self::Unprocessable {
                message: error.to_string(),
                detail: None,
                correlation_id: unassigned(),
            },
            ApplicationError::NotFound { entity, id } => Self::NotFound {
                message: format!("{entity} `{id}` was not found"),
                correlation_id: unassigned(),
            },
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id: unassigned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: unassigned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use crate::domain::approval::{ApprovalError, ApprovalRequestId, ApprovalStatus};
    use crate::domain::lease::{LockError, LockKey};
    use crate::domain::quotation::ProductId;
    use crate::errors::{ApplicationError, InterfaceError};
    use crate::quota::QuotaViolation;

    #[test]
    fn lock_timeout_maps_to_retryable_conflict() {
        let interface = ApplicationError::from(LockError::AcquisitionTimeout {
            key: LockKey::new("quotation", "42"),
            waited_ms: 5000,
        })
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::Conflict { retryable: true, ref correlation_id, .. }
                if correlation_id == "req-1"
        ));
        assert_eq!(
            interface.user_message(),
            "Someone else is working on this record right now. Please retry shortly."
        );
    }

    #[test]
    fn finalized_request_maps_to_non_retryable_conflict() {
        let interface = ApplicationError::from(ApprovalError::RequestAlreadyFinalized {
            request_id: ApprovalRequestId("APR-1".to_owned()),
            status: ApprovalStatus::Rejected,
        })
        .into_interface("req-2");

        assert!(matches!(interface, InterfaceError::Conflict { retryable: false, .. }));
    }

    #[test]
    fn quota_violation_carries_structured_detail() {
        let interface = ApplicationError::from(QuotaViolation::QuotaExceeded {
            product_id: ProductId("7".to_owned()),
            requested: Decimal::from(5),
            quoted: Decimal::from(10),
            fulfilled: Decimal::from(6),
            remaining: Decimal::from(4),
            shortfall: Decimal::from(1),
        })
        .into_interface("req-3");

        let InterfaceError::Unprocessable { detail: Some(detail), .. } = interface else {
            panic!("expected unprocessable with detail");
        };
        assert_eq!(detail["kind"], "quota_exceeded");
        assert_eq!(detail["remaining"], "4");
    }

    #[test]
    fn persistence_error_is_retryable_and_unavailable() {
        let error = ApplicationError::Persistence("database is locked".to_owned());
        assert!(error.is_retryable());

        let interface = error.into_interface("req-4");
        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
    }

    #[test]
    fn not_found_keeps_entity_in_message() {
        let interface =
            ApplicationError::NotFound { entity: "quotation", id: "Q-404".to_owned() }
                .into_interface("req-5");

        assert!(matches!(
            interface,
            InterfaceError::NotFound { ref message, .. } if message.contains("Q-404")
        ));
    }
}
