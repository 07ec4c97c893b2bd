//! Database operations for `pipeline_stage_records` — the sole coordination
//! channel between stage handlers.
//!
//! Transitions are monotonic (`pending → in_progress → completed|failed`)
//! and enforced with conditional updates gated on `rows_affected()`, so a
//! lost claim race or an out-of-order invocation is a typed error rather
//! than silent double work.

use chrono::{DateTime, NaiveDate, Utc};
use commdash_core::Stage;
use sqlx::PgPool;

use crate::DbError;

/// A row from the `pipeline_stage_records` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StageRecordRow {
    pub id: i64,
    pub merchant_id: String,
    pub pipeline_date: NaiveDate,
    pub step: String,
    pub status: String,
    pub data_period_start: DateTime<Utc>,
    pub data_period_end: DateTime<Utc>,
    pub retry_count: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

const RECORD_COLUMNS: &str = "id, merchant_id, pipeline_date, step, status, \
     data_period_start, data_period_end, retry_count, \
     started_at, completed_at, error_message, created_at";

/// Creates (or overwrites) the pending record for one stage of one
/// merchant-day.
///
/// Conflicts on `(merchant_id, pipeline_date, step)` reset the record to a
/// fresh pending state with the new period bounds. Records are never reused
/// across dates; within a date, re-running the upstream stage re-arms the
/// handoff.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn create_pending_record(
    pool: &PgPool,
    merchant_id: &str,
    pipeline_date: NaiveDate,
    step: Stage,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
) -> Result<StageRecordRow, DbError> {
    let row = sqlx::query_as::<_, StageRecordRow>(&format!(
        "INSERT INTO pipeline_stage_records \
             (merchant_id, pipeline_date, step, status, data_period_start, data_period_end) \
         VALUES ($1, $2, $3, 'pending', $4, $5) \
         ON CONFLICT (merchant_id, pipeline_date, step) DO UPDATE SET \
             status            = 'pending', \
             data_period_start = EXCLUDED.data_period_start, \
             data_period_end   = EXCLUDED.data_period_end, \
             retry_count       = 0, \
             started_at        = NULL, \
             completed_at      = NULL, \
             error_message     = NULL \
         RETURNING {RECORD_COLUMNS}"
    ))
    .bind(merchant_id)
    .bind(pipeline_date)
    .bind(step.as_str())
    .bind(period_start)
    .bind(period_end)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Fetches the pending record for one stage of one merchant-day, if any.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_pending_record(
    pool: &PgPool,
    merchant_id: &str,
    pipeline_date: NaiveDate,
    step: Stage,
) -> Result<Option<StageRecordRow>, DbError> {
    let row = sqlx::query_as::<_, StageRecordRow>(&format!(
        "SELECT {RECORD_COLUMNS} FROM pipeline_stage_records \
         WHERE merchant_id = $1 AND pipeline_date = $2 AND step = $3 AND status = 'pending'"
    ))
    .bind(merchant_id)
    .bind(pipeline_date)
    .bind(step.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Atomically claims a pending record, moving it to `in_progress`.
///
/// The transition is a single conditional update; whichever invocation sees
/// `rows_affected() == 1` owns the work. Everyone else gets
/// [`DbError::ClaimConflict`].
///
/// # Errors
///
/// Returns [`DbError::ClaimConflict`] if the record is no longer pending,
/// or [`DbError::Sqlx`] if the update fails.
pub async fn claim_stage_record(pool: &PgPool, id: i64) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE pipeline_stage_records \
         SET status = 'in_progress', started_at = NOW() \
         WHERE id = $1 AND status = 'pending'",
    )
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::ClaimConflict { id });
    }

    Ok(())
}

/// Marks an in-progress record as `completed`.
///
/// # Errors
///
/// Returns [`DbError::InvalidStageTransition`] if the record is not
/// `in_progress`, or [`DbError::Sqlx`] if the update fails.
pub async fn complete_stage_record(pool: &PgPool, id: i64) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE pipeline_stage_records \
         SET status = 'completed', completed_at = NOW() \
         WHERE id = $1 AND status = 'in_progress'",
    )
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidStageTransition {
            id,
            expected_status: "in_progress",
        });
    }

    Ok(())
}

/// Marks an in-progress record as `failed`, storing the error message and
/// bumping `retry_count`.
///
/// The count is bookkeeping for monitoring; nothing in-process retries off
/// the back of it.
///
/// # Errors
///
/// Returns [`DbError::InvalidStageTransition`] if the record is not
/// `in_progress`, or [`DbError::Sqlx`] if the update fails.
pub async fn fail_stage_record(
    pool: &PgPool,
    id: i64,
    error_message: &str,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE pipeline_stage_records \
         SET status = 'failed', completed_at = NOW(), \
             retry_count = retry_count + 1, error_message = $1 \
         WHERE id = $2 AND status = 'in_progress'",
    )
    .bind(error_message)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidStageTransition {
            id,
            expected_status: "in_progress",
        });
    }

    Ok(())
}

/// Returns the merchant's most recent stage record across all dates, used
/// to distinguish "configured but last run failed" in status payloads.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn latest_record_for_merchant(
    pool: &PgPool,
    merchant_id: &str,
) -> Result<Option<StageRecordRow>, DbError> {
    let row = sqlx::query_as::<_, StageRecordRow>(&format!(
        "SELECT {RECORD_COLUMNS} FROM pipeline_stage_records \
         WHERE merchant_id = $1 \
         ORDER BY pipeline_date DESC, created_at DESC, id DESC \
         LIMIT 1"
    ))
    .bind(merchant_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}
