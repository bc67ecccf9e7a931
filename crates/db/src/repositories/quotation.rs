use sqlx::Row;

use concord_core::domain::quotation::{
    FulfillmentEntry, ProductId, ProjectId, Quotation, QuotationId, QuotationLine,
};

use super::{
    decode_error, parse_decimal, parse_timestamp, FulfillmentLedgerRepository,
    QuotationRepository, RepositoryError,
};
use crate::DbPool;

pub struct SqlQuotationRepository {
    pool: DbPool,
}

impl SqlQuotationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_line(row: &sqlx::sqlite::SqliteRow) -> Result<QuotationLine, RepositoryError> {
    let quantity: String = row.try_get("quantity").map_err(decode_error)?;
    let unit_price: String = row.try_get("unit_price").map_err(decode_error)?;

    Ok(QuotationLine {
        product_id: ProductId(row.try_get("product_id").map_err(decode_error)?),
        quantity: parse_decimal("quantity", &quantity)?,
        unit_price: parse_decimal("unit_price", &unit_price)?,
    })
}

#[async_trait::async_trait]
impl QuotationRepository for SqlQuotationRepository {
    async fn find_by_id(&self, id: &QuotationId) -> Result<Option<Quotation>, RepositoryError> {
        let Some(row) =
            sqlx::query("SELECT id, project_id, version, created_at FROM quotation WHERE id = ?")
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?
        else {
            return Ok(None);
        };

        let version: i64 = row.try_get("version").map_err(decode_error)?;
        let created_at: String = row.try_get("created_at").map_err(decode_error)?;

        let lines = sqlx::query(
            "SELECT product_id, quantity, unit_price
             FROM quotation_line WHERE quotation_id = ? ORDER BY line_no ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(row_to_line)
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(Quotation {
            id: id.clone(),
            project_id: ProjectId(row.try_get("project_id").map_err(decode_error)?),
            version: u32::try_from(version).map_err(decode_error)?,
            lines,
            created_at: parse_timestamp("created_at", &created_at)?,
        }))
    }

    async fn save(&self, quotation: Quotation) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO quotation (id, project_id, version, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 project_id = excluded.project_id,
                 version = excluded.version",
        )
        .bind(&quotation.id.0)
        .bind(&quotation.project_id.0)
        .bind(i64::from(quotation.version))
        .bind(quotation.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM quotation_line WHERE quotation_id = ?")
            .bind(&quotation.id.0)
            .execute(&mut *tx)
            .await?;

        for (index, line) in quotation.lines.iter().enumerate() {
            sqlx::query(
                "INSERT INTO quotation_line (quotation_id, line_no, product_id, quantity, unit_price)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&quotation.id.0)
            .bind(index as i64 + 1)
            .bind(&line.product_id.0)
            .bind(line.quantity.to_string())
            .bind(line.unit_price.to_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

pub struct SqlFulfillmentLedgerRepository {
    pool: DbPool,
}

impl SqlFulfillmentLedgerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<FulfillmentEntry, RepositoryError> {
    let quantity: String = row.try_get("quantity").map_err(decode_error)?;
    let recorded_at: String = row.try_get("recorded_at").map_err(decode_error)?;

    Ok(FulfillmentEntry {
        id: row.try_get("id").map_err(decode_error)?,
        project_id: ProjectId(row.try_get("project_id").map_err(decode_error)?),
        quotation_id: QuotationId(row.try_get("quotation_id").map_err(decode_error)?),
        product_id: ProductId(row.try_get("product_id").map_err(decode_error)?),
        quantity: parse_decimal("quantity", &quantity)?,
        reference: row.try_get("reference").map_err(decode_error)?,
        recorded_by: row.try_get("recorded_by").map_err(decode_error)?,
        recorded_at: parse_timestamp("recorded_at", &recorded_at)?,
    })
}

#[async_trait::async_trait]
impl FulfillmentLedgerRepository for SqlFulfillmentLedgerRepository {
    async fn list_for_project(
        &self,
        project_id: &ProjectId,
    ) -> Result<Vec<FulfillmentEntry>, RepositoryError> {
        sqlx::query(
            "SELECT id, project_id, quotation_id, product_id, quantity, reference, recorded_by,
                    recorded_at
             FROM fulfillment_entry WHERE project_id = ? ORDER BY recorded_at ASC, id ASC",
        )
        .bind(&project_id.0)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(row_to_entry)
        .collect()
    }

    async fn append(&self, entries: &[FulfillmentEntry]) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        for entry in entries {
            sqlx::query(
                "INSERT INTO fulfillment_entry (id, project_id, quotation_id, product_id, quantity,
                                                reference, recorded_by, recorded_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&entry.id)
            .bind(&entry.project_id.0)
            .bind(&entry.quotation_id.0)
            .bind(&entry.product_id.0)
            .bind(entry.quantity.to_string())
            .bind(&entry.reference)
            .bind(&entry.recorded_by)
            .bind(entry.recorded_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
