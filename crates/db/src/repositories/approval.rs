use sqlx::Row;

use concord_core::domain::approval::{
    ApprovalRequest, ApprovalRequestId, ApprovalStatus, ChainLevel, ChainTemplate,
    DecisionOutcome, EntityType, LevelDecision,
};

use super::{
    decode_error, parse_timestamp, ApprovalRequestRepository, ChainTemplateRepository,
    RepositoryError,
};
use crate::DbPool;

const REQUEST_COLUMNS: &str = "id, entity_type, entity_id, current_level, total_levels, status,
     submitted_by, submitted_at, completed_at";

pub struct SqlChainTemplateRepository {
    pool: DbPool,
}

impl SqlChainTemplateRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ChainTemplateRepository for SqlChainTemplateRepository {
    async fn find(
        &self,
        entity_type: EntityType,
    ) -> Result<Option<ChainTemplate>, RepositoryError> {
        let Some(row) =
            sqlx::query("SELECT active, updated_at FROM chain_template WHERE entity_type = ?")
                .bind(entity_type.as_str())
                .fetch_optional(&self.pool)
                .await?
        else {
            return Ok(None);
        };

        let active: bool = row.try_get("active").map_err(decode_error)?;
        let updated_at: String = row.try_get("updated_at").map_err(decode_error)?;

        let level_rows = sqlx::query(
            "SELECT level, approver_id FROM chain_level WHERE entity_type = ? ORDER BY level ASC",
        )
        .bind(entity_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        let levels = level_rows
            .iter()
            .map(|row| {
                let level: i64 = row.try_get("level").map_err(decode_error)?;
                Ok(ChainLevel {
                    level: u32::try_from(level).map_err(decode_error)?,
                    approver_id: row.try_get("approver_id").map_err(decode_error)?,
                })
            })
            .collect::<Result<Vec<_>, RepositoryError>>()?;

        let template = ChainTemplate {
            entity_type,
            levels,
            active,
            updated_at: parse_timestamp("updated_at", &updated_at)?,
        };
        template.validate().map_err(decode_error)?;
        Ok(Some(template))
    }

    async fn save(&self, template: ChainTemplate) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO chain_template (entity_type, active, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT(entity_type) DO UPDATE SET
                 active = excluded.active,
                 updated_at = excluded.updated_at",
        )
        .bind(template.entity_type.as_str())
        .bind(template.active)
        .bind(template.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM chain_level WHERE entity_type = ?")
            .bind(template.entity_type.as_str())
            .execute(&mut *tx)
            .await?;

        for level in &template.levels {
            sqlx::query(
                "INSERT INTO chain_level (entity_type, level, approver_id) VALUES (?, ?, ?)",
            )
            .bind(template.entity_type.as_str())
            .bind(i64::from(level.level))
            .bind(&level.approver_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

pub struct SqlApprovalRequestRepository {
    pool: DbPool,
}

impl SqlApprovalRequestRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_decisions(&self, id: &str) -> Result<Vec<LevelDecision>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT level, approver_id, outcome, comment, decided_at
             FROM level_decision WHERE request_id = ? ORDER BY level ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_decision).collect()
    }

    async fn hydrate(
        &self,
        rows: Vec<sqlx::sqlite::SqliteRow>,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let mut requests = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut request = row_to_request(row)?;
            request.decisions = self.load_decisions(&request.id.0).await?;
            request.check_invariants().map_err(RepositoryError::Decode)?;
            requests.push(request);
        }
        Ok(requests)
    }
}

fn row_to_decision(row: &sqlx::sqlite::SqliteRow) -> Result<LevelDecision, RepositoryError> {
    let level: i64 = row.try_get("level").map_err(decode_error)?;
    let outcome: String = row.try_get("outcome").map_err(decode_error)?;
    let decided_at: String = row.try_get("decided_at").map_err(decode_error)?;

    Ok(LevelDecision {
        level: u32::try_from(level).map_err(decode_error)?,
        approver_id: row.try_get("approver_id").map_err(decode_error)?,
        outcome: DecisionOutcome::parse(&outcome)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown outcome `{outcome}`")))?,
        comment: row.try_get("comment").map_err(decode_error)?,
        decided_at: parse_timestamp("decided_at", &decided_at)?,
    })
}

/// Decodes the request row; decisions are attached by the caller.
fn row_to_request(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalRequest, RepositoryError> {
    let entity_type: String = row.try_get("entity_type").map_err(decode_error)?;
    let status: String = row.try_get("status").map_err(decode_error)?;
    let current_level: i64 = row.try_get("current_level").map_err(decode_error)?;
    let total_levels: i64 = row.try_get("total_levels").map_err(decode_error)?;
    let submitted_at: String = row.try_get("submitted_at").map_err(decode_error)?;
    let completed_at: Option<String> = row.try_get("completed_at").map_err(decode_error)?;

    Ok(ApprovalRequest {
        id: ApprovalRequestId(row.try_get("id").map_err(decode_error)?),
        entity_type: EntityType::parse(&entity_type).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown entity type `{entity_type}`"))
        })?,
        entity_id: row.try_get("entity_id").map_err(decode_error)?,
        current_level: u32::try_from(current_level).map_err(decode_error)?,
        total_levels: u32::try_from(total_levels).map_err(decode_error)?,
        status: ApprovalStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown status `{status}`")))?,
        submitted_by: row.try_get("submitted_by").map_err(decode_error)?,
        submitted_at: parse_timestamp("submitted_at", &submitted_at)?,
        completed_at: completed_at
            .as_deref()
            .map(|raw| parse_timestamp("completed_at", raw))
            .transpose()?,
        decisions: Vec::new(),
    })
}

#[async_trait::async_trait]
impl ApprovalRequestRepository for SqlApprovalRequestRepository {
    async fn find_by_id(
        &self,
        id: &ApprovalRequestId,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {REQUEST_COLUMNS} FROM approval_request WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        Ok(self.hydrate(row.into_iter().collect()).await?.pop())
    }

    async fn save(&self, request: ApprovalRequest) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO approval_request (id, entity_type, entity_id, current_level, total_levels,
                                           status, submitted_by, submitted_at, completed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 current_level = excluded.current_level,
                 status = excluded.status,
                 completed_at = excluded.completed_at",
        )
        .bind(&request.id.0)
        .bind(request.entity_type.as_str())
        .bind(&request.entity_id)
        .bind(i64::from(request.current_level))
        .bind(i64::from(request.total_levels))
        .bind(request.status.as_str())
        .bind(&request.submitted_by)
        .bind(request.submitted_at.to_rfc3339())
        .bind(request.completed_at.map(|dt| dt.to_rfc3339()))
        .execute(&mut *tx)
        .await?;

        for decision in &request.decisions {
            sqlx::query(
                "INSERT INTO level_decision (request_id, level, approver_id, outcome, comment,
                                             decided_at)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(request_id, level) DO NOTHING",
            )
            .bind(&request.id.0)
            .bind(i64::from(decision.level))
            .bind(&decision.approver_id)
            .bind(decision.outcome.as_str())
            .bind(&decision.comment)
            .bind(decision.decided_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM approval_request
             WHERE entity_type = ? AND entity_id = ?
             ORDER BY submitted_at DESC"
        ))
        .bind(entity_type.as_str())
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }

    async fn list_pending(
        &self,
        entity_type: Option<EntityType>,
        level: Option<u32>,
        limit: u32,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM approval_request
             WHERE status = 'pending'
               AND (? IS NULL OR entity_type = ?)
               AND (? IS NULL OR current_level = ?)
             ORDER BY submitted_at ASC
             LIMIT ?"
        ))
        .bind(entity_type.map(|value| value.as_str()))
        .bind(entity_type.map(|value| value.as_str()))
        .bind(level.map(i64::from))
        .bind(level.map(i64::from))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }
}
