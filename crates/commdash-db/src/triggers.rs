//! Database operations for `pipeline_triggers`, the durable mirror of the
//! triggers registered with the execution runtime.
//!
//! The table is the source of truth across restarts: the server runtime
//! re-registers every row at startup, and status/listing reads come from
//! here rather than from the runtime.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::DbError;

/// A row from the `pipeline_triggers` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TriggerRow {
    pub id: i64,
    pub job_name: String,
    pub cron_expression: String,
    pub merchant_id: String,
    pub stage: String,
    pub created_at: DateTime<Utc>,
}

const TRIGGER_COLUMNS: &str = "id, job_name, cron_expression, merchant_id, stage, created_at";

/// Inserts a trigger row.
///
/// Triggers are never mutated in place; updating a schedule is a delete
/// followed by a fresh insert.
///
/// # Errors
///
/// Returns [`DbError::DuplicateTrigger`] if `job_name` is already
/// registered, or [`DbError::Sqlx`] if the insert fails.
pub async fn insert_trigger(
    pool: &PgPool,
    job_name: &str,
    cron_expression: &str,
    merchant_id: &str,
    stage: &str,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "INSERT INTO pipeline_triggers (job_name, cron_expression, merchant_id, stage) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (job_name) DO NOTHING",
    )
    .bind(job_name)
    .bind(cron_expression)
    .bind(merchant_id)
    .bind(stage)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::DuplicateTrigger(job_name.to_string()));
    }

    Ok(())
}

/// Deletes a trigger row by job name. Idempotent: returns whether a row was
/// actually removed, and an absent row is not an error.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the delete fails.
pub async fn delete_trigger(pool: &PgPool, job_name: &str) -> Result<bool, DbError> {
    let result = sqlx::query("DELETE FROM pipeline_triggers WHERE job_name = $1")
        .bind(job_name)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Returns all trigger rows owned by a merchant, in stage registration order.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_triggers_for_merchant(
    pool: &PgPool,
    merchant_id: &str,
) -> Result<Vec<TriggerRow>, DbError> {
    let rows = sqlx::query_as::<_, TriggerRow>(&format!(
        "SELECT {TRIGGER_COLUMNS} FROM pipeline_triggers \
         WHERE merchant_id = $1 ORDER BY id"
    ))
    .bind(merchant_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Returns every registered trigger, used by the runtime at startup.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_all_triggers(pool: &PgPool) -> Result<Vec<TriggerRow>, DbError> {
    let rows = sqlx::query_as::<_, TriggerRow>(&format!(
        "SELECT {TRIGGER_COLUMNS} FROM pipeline_triggers ORDER BY merchant_id, id"
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
