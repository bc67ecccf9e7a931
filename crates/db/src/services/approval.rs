use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use concord_core::config::AppConfig;
use concord_core::domain::approval::{
    ApprovalError, ApprovalRequest, ApprovalRequestId, ApprovalTransition, ChainTemplate,
    EntityType,
};
use concord_core::domain::lease::LockKey;
use concord_core::events::{ApprovalEvent, EventEnvelope, EventSink};
use concord_core::ApplicationError;

use super::locks::LockManager;
use crate::repositories::{ApprovalRequestRepository, ChainTemplateRepository};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApprovalSettings {
    pub lock_timeout: Duration,
    pub min_rejection_comment_chars: usize,
}

impl ApprovalSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            lock_timeout: config.locks.default_timeout(),
            min_rejection_comment_chars: config.approval.min_rejection_comment_chars,
        }
    }
}

impl Default for ApprovalSettings {
    fn default() -> Self {
        Self { lock_timeout: Duration::from_secs(5), min_rejection_comment_chars: 10 }
    }
}

/// Maintains the per-entity-type approval chains.
#[derive(Clone)]
pub struct ChainTemplateService {
    templates: Arc<dyn ChainTemplateRepository>,
}

impl ChainTemplateService {
    pub fn new(templates: Arc<dyn ChainTemplateRepository>) -> Self {
        Self { templates }
    }

    /// Replaces the chain for `entity_type`. Requests already in flight keep the
    /// level count they were submitted with.
    pub async fn configure<I, S>(
        &self,
        entity_type: EntityType,
        approvers: I,
    ) -> Result<ChainTemplate, ApplicationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.configure_with(entity_type, approvers, true).await
    }

    /// Like [`configure`](Self::configure), with the active flag set before the
    /// single write.
    pub async fn configure_with<I, S>(
        &self,
        entity_type: EntityType,
        approvers: I,
        active: bool,
    ) -> Result<ChainTemplate, ApplicationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut template = ChainTemplate::new(entity_type, approvers)?;
        template.active = active;
        self.templates.save(template.clone()).await?;
        info!(
            event_name = "approval.chain_configured",
            entity_type = %entity_type,
            levels = template.total_levels(),
            active,
            "approval chain configured"
        );
        Ok(template)
    }

    pub async fn set_active(
        &self,
        entity_type: EntityType,
        active: bool,
    ) -> Result<ChainTemplate, ApplicationError> {
        let mut template = self.templates.find(entity_type).await?.ok_or_else(|| {
            ApplicationError::NotFound { entity: "approval chain", id: entity_type.to_string() }
        })?;
        template.active = active;
        template.updated_at = Utc::now();
        self.templates.save(template.clone()).await?;
        Ok(template)
    }

    pub async fn find(
        &self,
        entity_type: EntityType,
    ) -> Result<Option<ChainTemplate>, ApplicationError> {
        Ok(self.templates.find(entity_type).await?)
    }
}

/// Drives submissions through their chains. Every decision runs under the
/// request's lease so two approvers racing on one request are serialized.
pub struct ApprovalEngine {
    locks: Arc<LockManager>,
    templates: Arc<dyn ChainTemplateRepository>,
    requests: Arc<dyn ApprovalRequestRepository>,
    events: Arc<dyn EventSink>,
    settings: ApprovalSettings,
}

impl ApprovalEngine {
    pub fn new(
        locks: Arc<LockManager>,
        templates: Arc<dyn ChainTemplateRepository>,
        requests: Arc<dyn ApprovalRequestRepository>,
        events: Arc<dyn EventSink>,
        settings: ApprovalSettings,
    ) -> Self {
        Self { locks, templates, requests, events, settings }
    }

    pub async fn submit(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        submitted_by: &str,
        correlation_id: &str,
    ) -> Result<ApprovalRequest, ApplicationError> {
        let template = self
            .templates
            .find(entity_type)
            .await?
            .filter(|template| template.active)
            .ok_or(ApprovalError::NoActiveChain { entity_type })?;

        let request = ApprovalRequest::submit(
            ApprovalRequestId(format!("APR-{}", Uuid::new_v4())),
            &template,
            entity_id,
            submitted_by,
            Utc::now(),
        )?;
        self.requests.save(request.clone()).await?;

        info!(
            event_name = "approval.submitted",
            correlation_id,
            request_id = %request.id,
            entity_type = %entity_type,
            entity_id,
            total_levels = request.total_levels,
            "approval request submitted"
        );
        self.events.emit(EventEnvelope::new(
            correlation_id,
            ApprovalEvent::ApprovalSubmitted {
                request_id: request.id.clone(),
                entity_type,
                entity_id: request.entity_id.clone(),
                total_levels: request.total_levels,
                submitted_by: request.submitted_by.clone(),
            },
        ));

        Ok(request)
    }

    pub async fn approve(
        &self,
        request_id: &ApprovalRequestId,
        level: u32,
        approver_id: &str,
        comment: Option<String>,
        correlation_id: &str,
    ) -> Result<ApprovalRequest, ApplicationError> {
        self.decide(request_id, correlation_id, move |request, now| {
            request.approve(level, approver_id, comment, now)
        })
        .await
    }

    pub async fn reject(
        &self,
        request_id: &ApprovalRequestId,
        level: u32,
        approver_id: &str,
        comment: &str,
        correlation_id: &str,
    ) -> Result<ApprovalRequest, ApplicationError> {
        let min_chars = self.settings.min_rejection_comment_chars;
        self.decide(request_id, correlation_id, move |request, now| {
            request.reject(level, approver_id, comment, min_chars, now)
        })
        .await
    }

    pub async fn find(
        &self,
        request_id: &ApprovalRequestId,
    ) -> Result<ApprovalRequest, ApplicationError> {
        self.requests.find_by_id(request_id).await?.ok_or_else(|| ApplicationError::NotFound {
            entity: "approval request",
            id: request_id.0.clone(),
        })
    }

    pub async fn history_for(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Vec<ApprovalRequest>, ApplicationError> {
        Ok(self.requests.find_by_entity(entity_type, entity_id).await?)
    }

    /// Pending requests, optionally narrowed to one entity type and the level
    /// they are waiting on, oldest first.
    pub async fn pending(
        &self,
        entity_type: Option<EntityType>,
        level: Option<u32>,
        limit: u32,
    ) -> Result<Vec<ApprovalRequest>, ApplicationError> {
        Ok(self.requests.list_pending(entity_type, level, limit).await?)
    }

    async fn decide<F>(
        &self,
        request_id: &ApprovalRequestId,
        correlation_id: &str,
        apply: F,
    ) -> Result<ApprovalRequest, ApplicationError>
    where
        F: FnOnce(&mut ApprovalRequest, DateTime<Utc>) -> Result<ApprovalTransition, ApprovalError>
            + Send,
    {
        let key = LockKey::approval_request(request_id);

        self.locks
            .with_lock(key, self.settings.lock_timeout, |held| async move {
                let mut request = self.find(request_id).await?;

                let transition = match apply(&mut request, Utc::now()) {
                    Ok(transition) => transition,
                    Err(error) => {
                        info!(
                            event_name = "approval.decision_refused",
                            correlation_id,
                            request_id = %request_id,
                            error = %error,
                            "approval decision refused"
                        );
                        return Err(error.into());
                    }
                };

                self.locks.verify(&held).await?;
                self.requests.save(request.clone()).await?;
                self.announce(&request, transition, correlation_id);

                Ok::<_, ApplicationError>(request)
            })
            .await
    }

    fn announce(
        &self,
        request: &ApprovalRequest,
        transition: ApprovalTransition,
        correlation_id: &str,
    ) {
        let approver_id = request
            .decisions
            .last()
            .map(|decision| decision.approver_id.clone())
            .unwrap_or_default();

        let event = match transition {
            ApprovalTransition::Advanced { decided_level, next_level } => {
                info!(
                    event_name = "approval.advanced",
                    correlation_id,
                    request_id = %request.id,
                    decided_level,
                    next_level,
                    "approval advanced"
                );
                ApprovalEvent::ApprovalAdvanced {
                    request_id: request.id.clone(),
                    entity_type: request.entity_type,
                    entity_id: request.entity_id.clone(),
                    decided_level,
                    next_level,
                    approver_id,
                }
            }
            ApprovalTransition::Finalized { decided_level, status } => {
                info!(
                    event_name = "approval.finalized",
                    correlation_id,
                    request_id = %request.id,
                    decided_level,
                    status = %status,
                    "approval finalized"
                );
                ApprovalEvent::ApprovalFinalized {
                    request_id: request.id.clone(),
                    entity_type: request.entity_type,
                    entity_id: request.entity_id.clone(),
                    decided_level,
                    status,
                    approver_id,
                }
            }
        };

        self.events.emit(EventEnvelope::new(correlation_id, event));
    }
}
