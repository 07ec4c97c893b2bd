//! Database operations for `sales_snapshots`, the per-cycle sales rows the
//! fetch stage captures for the generate stage to render.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::DbError;

/// A row from the `sales_snapshots` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SalesSnapshotRow {
    pub id: i64,
    pub merchant_id: String,
    pub pipeline_date: NaiveDate,
    pub employee_id: String,
    pub employee_name: String,
    pub total_sales: Decimal,
    pub commission_amount: Decimal,
    pub created_at: DateTime<Utc>,
}

/// A sales row as fetched from the POS provider, ready to insert.
#[derive(Debug, Clone)]
pub struct NewSalesSnapshot {
    pub employee_id: String,
    pub employee_name: String,
    pub total_sales: Decimal,
    pub commission_amount: Decimal,
}

/// Replaces the snapshot set for one merchant-day.
///
/// Delete-then-insert inside a transaction, so a refetched cycle never
/// leaves rows from the previous attempt behind.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement fails.
pub async fn replace_sales_snapshots(
    pool: &PgPool,
    merchant_id: &str,
    pipeline_date: NaiveDate,
    rows: &[NewSalesSnapshot],
) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM sales_snapshots WHERE merchant_id = $1 AND pipeline_date = $2")
        .bind(merchant_id)
        .bind(pipeline_date)
        .execute(&mut *tx)
        .await?;

    for row in rows {
        sqlx::query(
            "INSERT INTO sales_snapshots \
                 (merchant_id, pipeline_date, employee_id, employee_name, \
                  total_sales, commission_amount) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(merchant_id)
        .bind(pipeline_date)
        .bind(&row.employee_id)
        .bind(&row.employee_name)
        .bind(row.total_sales)
        .bind(row.commission_amount)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Returns the snapshot rows for one merchant-day, ordered by employee.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_sales_snapshots(
    pool: &PgPool,
    merchant_id: &str,
    pipeline_date: NaiveDate,
) -> Result<Vec<SalesSnapshotRow>, DbError> {
    let rows = sqlx::query_as::<_, SalesSnapshotRow>(
        "SELECT id, merchant_id, pipeline_date, employee_id, employee_name, \
                total_sales, commission_amount, created_at \
         FROM sales_snapshots \
         WHERE merchant_id = $1 AND pipeline_date = $2 \
         ORDER BY employee_id",
    )
    .bind(merchant_id)
    .bind(pipeline_date)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
