use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalRequestId(pub String);

impl std::fmt::Display for ApprovalRequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of business entity that can be routed through an approval chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Quotation,
    PurchaseOrder,
    Delivery,
    Payment,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quotation => "quotation",
            Self::PurchaseOrder => "purchase_order",
            Self::Delivery => "delivery",
            Self::Payment => "payment",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "quotation" => Some(Self::Quotation),
            "purchase_order" => Some(Self::PurchaseOrder),
            "delivery" => Some(Self::Delivery),
            "payment" => Some(Self::Payment),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainLevel {
    pub level: u32,
    pub approver_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ChainTemplateError {
    #[error("approval chain must contain at least one level")]
    Empty,
    #[error("approval chain levels must be contiguous from 1: expected level {expected}, found {found}")]
    NonContiguous { expected: u32, found: u32 },
    #[error("approval chain level {level} has a blank approver")]
    BlankApprover { level: u32 },
}

/// Ordered list of required approvers for one entity type.
///
/// Edits only affect requests submitted afterwards: a request snapshots the
/// number of levels when it is created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTemplate {
    pub entity_type: EntityType,
    pub levels: Vec<ChainLevel>,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

impl ChainTemplate {
    /// Builds an active template whose levels follow the order of `approvers`.
    pub fn new<I, S>(entity_type: EntityType, approvers: I) -> Result<Self, ChainTemplateError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let levels = approvers
            .into_iter()
            .enumerate()
            .map(|(index, approver)| ChainLevel {
                level: index as u32 + 1,
                approver_id: approver.into().trim().to_string(),
            })
            .collect();

        let template = Self { entity_type, levels, active: true, updated_at: Utc::now() };
        template.validate()?;
        Ok(template)
    }

    pub fn validate(&self) -> Result<(), ChainTemplateError> {
        if self.levels.is_empty() {
            return Err(ChainTemplateError::Empty);
        }

        for (index, level) in self.levels.iter().enumerate() {
            let expected = index as u32 + 1;
            if level.level != expected {
                return Err(ChainTemplateError::NonContiguous { expected, found: level.level });
            }
            if level.approver_id.trim().is_empty() {
                return Err(ChainTemplateError::BlankApprover { level: level.level });
            }
        }

        Ok(())
    }

    pub fn total_levels(&self) -> u32 {
        self.levels.len() as u32
    }

    pub fn approver_for(&self, level: u32) -> Option<&str> {
        self.levels
            .iter()
            .find(|candidate| candidate.level == level)
            .map(|candidate| candidate.approver_id.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    Approve,
    Reject,
}

impl DecisionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approve" => Some(Self::Approve),
            "reject" => Some(Self::Reject),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelDecision {
    pub level: u32,
    pub approver_id: String,
    pub outcome: DecisionOutcome,
    pub comment: Option<String>,
    pub decided_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ApprovalError {
    #[error("approval request {request_id} is already finalized with status {status}")]
    RequestAlreadyFinalized { request_id: ApprovalRequestId, status: ApprovalStatus },
    #[error(
        "cannot decide level {attempted_level} on approval request {request_id}: \
         awaiting level {current_level} of {total_levels} ({status})"
    )]
    InvalidApprovalState {
        request_id: ApprovalRequestId,
        status: ApprovalStatus,
        current_level: u32,
        total_levels: u32,
        attempted_level: u32,
    },
    #[error("rejection comment must contain at least {min_chars} characters, got {actual_chars}")]
    RejectionCommentTooShort { min_chars: usize, actual_chars: usize },
    #[error("approver identity must not be blank")]
    MissingApprover,
    #[error("submitter identity must not be blank")]
    MissingSubmitter,
    #[error("no active approval chain is configured for {entity_type}")]
    NoActiveChain { entity_type: EntityType },
    #[error(transparent)]
    InvalidChain(#[from] ChainTemplateError),
}

/// What a successful decision did to the request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApprovalTransition {
    Advanced { decided_level: u32, next_level: u32 },
    Finalized { decided_level: u32, status: ApprovalStatus },
}

/// One submission of an entity through its approval chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: ApprovalRequestId,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub current_level: u32,
    pub total_levels: u32,
    pub status: ApprovalStatus,
    pub submitted_by: String,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub decisions: Vec<LevelDecision>,
}

impl ApprovalRequest {
    pub fn submit(
        id: ApprovalRequestId,
        template: &ChainTemplate,
        entity_id: impl Into<String>,
        submitted_by: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, ApprovalError> {
        if !template.active {
            return Err(ApprovalError::NoActiveChain { entity_type: template.entity_type });
        }
        template.validate()?;

        let submitted_by = submitted_by.into();
        if submitted_by.trim().is_empty() {
            return Err(ApprovalError::MissingSubmitter);
        }

        Ok(Self {
            id,
            entity_type: template.entity_type,
            entity_id: entity_id.into(),
            current_level: 1,
            total_levels: template.total_levels(),
            status: ApprovalStatus::Pending,
            submitted_by,
            submitted_at: now,
            completed_at: None,
            decisions: Vec::new(),
        })
    }

    pub fn is_finalized(&self) -> bool {
        self.status.is_terminal()
    }

    /// Records an approval for the current level and advances or completes the chain.
    pub fn approve(
        &mut self,
        level: u32,
        approver_id: &str,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ApprovalTransition, ApprovalError> {
        self.ensure_decidable(level, approver_id)?;

        self.decisions.push(LevelDecision {
            level,
            approver_id: approver_id.trim().to_string(),
            outcome: DecisionOutcome::Approve,
            comment: normalize_comment(comment),
            decided_at: now,
        });

        if level == self.total_levels {
            self.status = ApprovalStatus::Approved;
            self.completed_at = Some(now);
            return Ok(ApprovalTransition::Finalized {
                decided_level: level,
                status: ApprovalStatus::Approved,
            });
        }

        self.current_level += 1;
        Ok(ApprovalTransition::Advanced { decided_level: level, next_level: self.current_level })
    }

    /// Rejects the request at any level not yet decided, so a later-level approver can stop the
    /// chain before earlier levels act. Rejection is terminal and leaves `current_level` as is.
    pub fn reject(
        &mut self,
        level: u32,
        approver_id: &str,
        comment: &str,
        min_comment_chars: usize,
        now: DateTime<Utc>,
    ) -> Result<ApprovalTransition, ApprovalError> {
        self.ensure_pending()?;
        if level < self.current_level || level > self.total_levels {
            return Err(self.invalid_level(level));
        }
        if approver_id.trim().is_empty() {
            return Err(ApprovalError::MissingApprover);
        }

        let comment = comment.trim();
        let actual_chars = comment.chars().count();
        if actual_chars < min_comment_chars.max(1) {
            return Err(ApprovalError::RejectionCommentTooShort {
                min_chars: min_comment_chars.max(1),
                actual_chars,
            });
        }

        self.decisions.push(LevelDecision {
            level,
            approver_id: approver_id.trim().to_string(),
            outcome: DecisionOutcome::Reject,
            comment: Some(comment.to_string()),
            decided_at: now,
        });
        self.status = ApprovalStatus::Rejected;
        self.completed_at = Some(now);

        Ok(ApprovalTransition::Finalized { decided_level: level, status: ApprovalStatus::Rejected })
    }

    /// Checks the status/decision invariants, used when rehydrating persisted rows.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.total_levels == 0 || self.current_level == 0 {
            return Err(format!("request {} has a zero level counter", self.id));
        }
        if self.current_level > self.total_levels {
            return Err(format!(
                "request {} is at level {} beyond total {}",
                self.id, self.current_level, self.total_levels
            ));
        }

        let (approvals, rejection) = match self.decisions.split_last() {
            Some((last, rest)) if last.outcome == DecisionOutcome::Reject => (rest, Some(last)),
            _ => (self.decisions.as_slice(), None),
        };
        for (index, decision) in approvals.iter().enumerate() {
            if decision.outcome != DecisionOutcome::Approve || decision.level != index as u32 + 1 {
                return Err(format!(
                    "request {} has out-of-order decision for level {}",
                    self.id, decision.level
                ));
            }
        }
        if let Some(rejection) = rejection {
            if rejection.level < self.current_level || rejection.level > self.total_levels {
                return Err(format!(
                    "request {} has a rejection at level {} outside {}..={}",
                    self.id, rejection.level, self.current_level, self.total_levels
                ));
            }
        }

        let approved_levels = approvals.len() as u32;
        let consistent = match self.status {
            ApprovalStatus::Pending => {
                rejection.is_none() && approved_levels == self.current_level - 1
            }
            ApprovalStatus::Approved => {
                rejection.is_none() && approved_levels == self.total_levels
            }
            ApprovalStatus::Rejected => {
                rejection.is_some() && approved_levels == self.current_level - 1
            }
        };
        if !consistent {
            return Err(format!(
                "request {} status {} does not match its {} recorded decisions",
                self.id,
                self.status,
                self.decisions.len()
            ));
        }

        Ok(())
    }

    fn ensure_decidable(&self, level: u32, approver_id: &str) -> Result<(), ApprovalError> {
        self.ensure_pending()?;

        if level != self.current_level {
            return Err(self.invalid_level(level));
        }

        if approver_id.trim().is_empty() {
            return Err(ApprovalError::MissingApprover);
        }

        Ok(())
    }

    fn ensure_pending(&self) -> Result<(), ApprovalError> {
        if self.status.is_terminal() {
            return Err(ApprovalError::RequestAlreadyFinalized {
                request_id: self.id.clone(),
                status: self.status,
            });
        }
        Ok(())
    }

    fn invalid_level(&self, attempted_level: u32) -> ApprovalError {
        ApprovalError::InvalidApprovalState {
            request_id: self.id.clone(),
            status: self.status,
            current_level: self.current_level,
            total_levels: self.total_levels,
            attempted_level,
        }
    }
}

fn normalize_comment(comment: Option<String>) -> Option<String> {
    comment.map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}
