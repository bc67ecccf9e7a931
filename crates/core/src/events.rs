use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::approval::{ApprovalRequestId, ApprovalStatus, EntityType};

/// Outbound notifications about approval progress.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ApprovalEvent {
    ApprovalSubmitted {
        request_id: ApprovalRequestId,
        entity_type: EntityType,
        entity_id: String,
        total_levels: u32,
        submitted_by: String,
    },
    ApprovalAdvanced {
        request_id: ApprovalRequestId,
        entity_type: EntityType,
        entity_id: String,
        decided_level: u32,
        next_level: u32,
        approver_id: String,
    },
    ApprovalFinalized {
        request_id: ApprovalRequestId,
        entity_type: EntityType,
        entity_id: String,
        decided_level: u32,
        status: ApprovalStatus,
        approver_id: String,
    },
}

impl ApprovalEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ApprovalSubmitted { .. } => "approval.submitted",
            Self::ApprovalAdvanced { .. } => "approval.advanced",
            Self::ApprovalFinalized { .. } => "approval.finalized",
        }
    }

    pub fn request_id(&self) -> &ApprovalRequestId {
        match self {
            Self::ApprovalSubmitted { request_id, .. }
            | Self::ApprovalAdvanced { request_id, .. }
            | Self::ApprovalFinalized { request_id, .. } => request_id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: String,
    pub correlation_id: String,
    pub occurred_at: DateTime<Utc>,
    pub event: ApprovalEvent,
}

impl EventEnvelope {
    pub fn new(correlation_id: impl Into<String>, event: ApprovalEvent) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            correlation_id: correlation_id.into(),
            occurred_at: Utc::now(),
            event,
        }
    }
}

/// Receives events after a transition has been committed. Implementations must
/// not block: slow delivery belongs in a queue behind the sink.
pub trait EventSink: Send + Sync {
    fn emit(&self, envelope: EventEnvelope);
}

#[derive(Clone, Default)]
pub struct InMemoryEventSink {
    events: Arc<Mutex<Vec<EventEnvelope>>>,
}

impl InMemoryEventSink {
    pub fn events(&self) -> Vec<EventEnvelope> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl EventSink for InMemoryEventSink {
    fn emit(&self, envelope: EventEnvelope) {
        match self.events.lock() {
            Ok(mut events) => events.push(envelope),
            Err(poisoned) => poisoned.into_inner().push(envelope),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, envelope: EventEnvelope) {
        let payload = serde_json::to_string(&envelope.event).unwrap_or_default();
        tracing::info!(
            event_name = envelope.event.name(),
            event_id = %envelope.event_id,
            correlation_id = %envelope.correlation_id,
            request_id = %envelope.event.request_id(),
            payload = %payload,
            "approval event emitted"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::{ApprovalEvent, EventEnvelope, EventSink, InMemoryEventSink};
    use crate::domain::approval::{ApprovalRequestId, ApprovalStatus, EntityType};

    #[test]
    fn in_memory_sink_keeps_emission_order() {
        let sink = InMemoryEventSink::default();
        sink.emit(EventEnvelope::new(
            "req-1",
            ApprovalEvent::ApprovalAdvanced {
                request_id: ApprovalRequestId("APR-1".to_owned()),
                entity_type: EntityType::Quotation,
                entity_id: "Q-42".to_owned(),
                decided_level: 1,
                next_level: 2,
                approver_id: "alice".to_owned(),
            },
        ));
        sink.emit(EventEnvelope::new(
            "req-2",
            ApprovalEvent::ApprovalFinalized {
                request_id: ApprovalRequestId("APR-1".to_owned()),
                entity_type: EntityType::Quotation,
                entity_id: "Q-42".to_owned(),
                decided_level: 2,
                status: ApprovalStatus::Rejected,
                approver_id: "bob".to_owned(),
            },
        ));

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event.name(), "approval.advanced");
        assert_eq!(events[1].correlation_id, "req-2");
        assert_eq!(events[1].event.request_id().0, "APR-1");
    }

    #[test]
    fn events_serialize_with_a_tag() {
        let event = ApprovalEvent::ApprovalSubmitted {
            request_id: ApprovalRequestId("APR-9".to_owned()),
            entity_type: EntityType::PurchaseOrder,
            entity_id: "PO-1".to_owned(),
            total_levels: 3,
            submitted_by: "buyer".to_owned(),
        };

        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["event"], "approval_submitted");
        assert_eq!(json["entity_type"], "purchase_order");
    }
}
