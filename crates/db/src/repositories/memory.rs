use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use concord_core::domain::approval::{
    ApprovalRequest, ApprovalRequestId, ApprovalStatus, ChainTemplate, EntityType,
};
use concord_core::domain::lease::{Lease, LeaseToken, LockKey};
use concord_core::domain::quotation::{FulfillmentEntry, ProjectId, Quotation, QuotationId};
use concord_core::domain::sequence::{PeriodKey, SequenceCounter};

use super::{
    ApprovalRequestRepository, ChainTemplateRepository, FulfillmentLedgerRepository,
    LeaseRepository, QuotationRepository, RepositoryError, SequenceRepository,
};

#[derive(Default)]
pub struct InMemoryLeaseRepository {
    leases: Mutex<HashMap<LockKey, Lease>>,
}

#[async_trait::async_trait]
impl LeaseRepository for InMemoryLeaseRepository {
    async fn try_acquire(
        &self,
        lease: &Lease,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut leases = self.leases.lock().await;
        if leases.get(&lease.key).is_some_and(|existing| existing.is_live(now)) {
            return Ok(false);
        }
        leases.insert(lease.key.clone(), lease.clone());
        Ok(true)
    }

    async fn release(&self, key: &LockKey, token: &LeaseToken) -> Result<bool, RepositoryError> {
        let mut leases = self.leases.lock().await;
        if leases.get(key).is_some_and(|existing| &existing.holder_token == token) {
            leases.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn find(&self, key: &LockKey) -> Result<Option<Lease>, RepositoryError> {
        Ok(self.leases.lock().await.get(key).cloned())
    }

    async fn reap_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut leases = self.leases.lock().await;
        let before = leases.len();
        leases.retain(|_, lease| lease.is_live(now));
        Ok((before - leases.len()) as u64)
    }
}

#[derive(Default)]
pub struct InMemorySequenceRepository {
    counters: Mutex<HashMap<PeriodKey, SequenceCounter>>,
}

#[async_trait::async_trait]
impl SequenceRepository for InMemorySequenceRepository {
    async fn increment(
        &self,
        period_key: &PeriodKey,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let mut counters = self.counters.lock().await;
        let counter = counters.entry(period_key.clone()).or_insert_with(|| SequenceCounter {
            period_key: period_key.clone(),
            last_value: 0,
            updated_at: now,
        });
        counter.last_value += 1;
        counter.updated_at = now;
        Ok(counter.last_value)
    }

    async fn current(
        &self,
        period_key: &PeriodKey,
    ) -> Result<Option<SequenceCounter>, RepositoryError> {
        Ok(self.counters.lock().await.get(period_key).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryChainTemplateRepository {
    templates: RwLock<HashMap<EntityType, ChainTemplate>>,
}

#[async_trait::async_trait]
impl ChainTemplateRepository for InMemoryChainTemplateRepository {
    async fn find(
        &self,
        entity_type: EntityType,
    ) -> Result<Option<ChainTemplate>, RepositoryError> {
        Ok(self.templates.read().await.get(&entity_type).cloned())
    }

    async fn save(&self, template: ChainTemplate) -> Result<(), RepositoryError> {
        self.templates.write().await.insert(template.entity_type, template);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryApprovalRequestRepository {
    requests: RwLock<HashMap<String, ApprovalRequest>>,
}

#[async_trait::async_trait]
impl ApprovalRequestRepository for InMemoryApprovalRequestRepository {
    async fn find_by_id(
        &self,
        id: &ApprovalRequestId,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        Ok(self.requests.read().await.get(&id.0).cloned())
    }

    async fn save(&self, request: ApprovalRequest) -> Result<(), RepositoryError> {
        let mut requests = self.requests.write().await;
        let mut request = request;
        if let Some(stored) = requests.get(&request.id.0) {
            // Keep stored decisions as written; only append the new tail.
            let mut decisions = stored.decisions.clone();
            decisions.extend(request.decisions.into_iter().skip(stored.decisions.len()));
            request.decisions = decisions;
        }
        requests.insert(request.id.0.clone(), request);
        Ok(())
    }

    async fn find_by_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let requests = self.requests.read().await;
        let mut matching: Vec<ApprovalRequest> = requests
            .values()
            .filter(|request| request.entity_type == entity_type && request.entity_id == entity_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        Ok(matching)
    }

    async fn list_pending(
        &self,
        entity_type: Option<EntityType>,
        level: Option<u32>,
        limit: u32,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let requests = self.requests.read().await;
        let mut pending: Vec<ApprovalRequest> = requests
            .values()
            .filter(|request| request.status == ApprovalStatus::Pending)
            .filter(|request| entity_type.map_or(true, |wanted| request.entity_type == wanted))
            .filter(|request| level.map_or(true, |wanted| request.current_level == wanted))
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at).then_with(|| a.id.0.cmp(&b.id.0)));
        pending.truncate(limit as usize);
        Ok(pending)
    }
}

#[derive(Default)]
pub struct InMemoryQuotationRepository {
    quotations: RwLock<HashMap<String, Quotation>>,
}

#[async_trait::async_trait]
impl QuotationRepository for InMemoryQuotationRepository {
    async fn find_by_id(&self, id: &QuotationId) -> Result<Option<Quotation>, RepositoryError> {
        Ok(self.quotations.read().await.get(&id.0).cloned())
    }

    async fn save(&self, quotation: Quotation) -> Result<(), RepositoryError> {
        self.quotations.write().await.insert(quotation.id.0.clone(), quotation);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryFulfillmentLedgerRepository {
    entries: RwLock<Vec<FulfillmentEntry>>,
}

#[async_trait::async_trait]
impl FulfillmentLedgerRepository for InMemoryFulfillmentLedgerRepository {
    async fn list_for_project(
        &self,
        project_id: &ProjectId,
    ) -> Result<Vec<FulfillmentEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        Ok(entries.iter().filter(|entry| &entry.project_id == project_id).cloned().collect())
    }

    async fn append(&self, entries: &[FulfillmentEntry]) -> Result<(), RepositoryError> {
        let mut stored = self.entries.write().await;
        if let Some(duplicate) =
            entries.iter().find(|entry| stored.iter().any(|existing| existing.id == entry.id))
        {
            return Err(RepositoryError::Decode(format!(
                "fulfillment entry `{}` already exists",
                duplicate.id
            )));
        }
        stored.extend_from_slice(entries);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use concord_core::domain::approval::{
        ApprovalRequest, ApprovalRequestId, ChainTemplate, EntityType,
    };
    use concord_core::domain::lease::{Lease, LockKey};
    use concord_core::domain::sequence::PeriodKey;

    use crate::repositories::{
        ApprovalRequestRepository, InMemoryApprovalRequestRepository, InMemoryLeaseRepository,
        InMemorySequenceRepository, LeaseRepository, SequenceRepository,
    };

    #[tokio::test]
    async fn in_memory_lease_matches_sql_takeover_rules() {
        let repo = InMemoryLeaseRepository::default();
        let now = Utc::now();
        let key = LockKey::new("quotation", "1");

        let first = Lease::grant(key.clone(), Duration::milliseconds(50), now);
        let second = Lease::grant(key.clone(), Duration::seconds(5), now);

        assert!(repo.try_acquire(&first, now).await.expect("acquire"));
        assert!(!repo.try_acquire(&second, now).await.expect("blocked"));
        let later = now + Duration::milliseconds(50);
        assert!(repo.try_acquire(&second, later).await.expect("takeover"));
        assert!(!repo.release(&key, &first.holder_token).await.expect("stale release"));
    }

    #[tokio::test]
    async fn in_memory_sequence_starts_at_one() {
        let repo = InMemorySequenceRepository::default();
        let period = PeriodKey::new("25").expect("period");

        assert_eq!(repo.increment(&period, Utc::now()).await.expect("next"), 1);
        assert_eq!(repo.increment(&period, Utc::now()).await.expect("next"), 2);
        assert_eq!(repo.current(&period).await.expect("current").expect("exists").last_value, 2);
    }

    #[tokio::test]
    async fn stored_decisions_are_not_rewritten() {
        let repo = InMemoryApprovalRequestRepository::default();
        let template =
            ChainTemplate::new(EntityType::Delivery, ["lead", "manager"]).expect("template");
        let now = Utc::now();
        let mut request = ApprovalRequest::submit(
            ApprovalRequestId("APR-1".to_string()),
            &template,
            "DN-1",
            "rep",
            now,
        )
        .expect("submit");
        request.approve(1, "lead", Some("ok".to_string()), now).expect("approve");
        repo.save(request.clone()).await.expect("save");

        request.decisions[0].comment = Some("tampered".to_string());
        repo.save(request).await.expect("save again");

        let stored = repo
            .find_by_id(&ApprovalRequestId("APR-1".to_string()))
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(stored.decisions[0].comment.as_deref(), Some("ok"));
    }
}
