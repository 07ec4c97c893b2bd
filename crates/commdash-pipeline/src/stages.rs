//! Stage handlers: short-lived invocations fired by the trigger runtime.
//!
//! Handlers coordinate exclusively through `pipeline_stage_records` — there
//! is no shared in-memory state between invocations, and a trigger may fire
//! more than once. Every consuming handler therefore claims its pending
//! record with a conditional transition before doing external work, so a
//! duplicate firing loses the race instead of duplicating the cycle.

use chrono::{DateTime, Days, Duration, NaiveDate, Utc};
use sqlx::PgPool;

use commdash_core::{Stage, Timezone};
use commdash_db::{NewSalesSnapshot, ScheduleConfigRow, StageRecordRow};

use crate::error::StageError;
use crate::providers::{EmployeeSales, ReportDocument, ReportRenderer, SalesDataProvider};

/// How far back the first cycle reaches when a merchant has never completed
/// a report.
const FIRST_CYCLE_LOOKBACK_HOURS: i64 = 24;

/// Schedule stage: fires at the merchant's base report time.
///
/// Computes the merchant-local pipeline date and the data period to cover,
/// then writes (or re-arms) the pending `fetch` record. This record is the
/// sole handoff to the fetch stage.
///
/// # Errors
///
/// Returns [`StageError::ConfigNotFound`] when the merchant's configuration
/// is missing (deleted pipelines are tolerated by the runtime), or a
/// database error.
pub async fn run_schedule_stage(
    pool: &PgPool,
    merchant_id: &str,
    now: DateTime<Utc>,
) -> Result<StageRecordRow, StageError> {
    let config = load_config(pool, merchant_id).await?;
    let pipeline_date = local_pipeline_date(&config, now)?;

    let period_start = config
        .last_completed_cycle_time
        .unwrap_or_else(|| now - Duration::hours(FIRST_CYCLE_LOOKBACK_HOURS));

    let record = commdash_db::create_pending_record(
        pool,
        merchant_id,
        pipeline_date,
        Stage::Fetch,
        period_start,
        now,
    )
    .await?;

    tracing::info!(
        merchant_id,
        %pipeline_date,
        period_start = %period_start,
        period_end = %now,
        "schedule stage: armed fetch record"
    );
    Ok(record)
}

/// Fetch stage: fires at base time + fetch delay.
///
/// Claims the pending `fetch` record, pulls sales figures from the POS
/// provider for the record's period, snapshots them, and hands the
/// identical period bounds off to the generate stage. On provider failure
/// the record is marked failed and the error propagates to the runtime.
///
/// # Errors
///
/// Returns [`StageError::NoPendingRecord`] when the schedule stage has not
/// run, [`StageError::ClaimConflict`] when another invocation won the
/// record, or [`StageError::Provider`] when the POS call fails.
pub async fn run_fetch_stage(
    pool: &PgPool,
    provider: &dyn SalesDataProvider,
    merchant_id: &str,
    now: DateTime<Utc>,
) -> Result<usize, StageError> {
    let config = load_config(pool, merchant_id).await?;
    let local_date = local_pipeline_date(&config, now)?;
    let record = claim_pending(pool, merchant_id, local_date, Stage::Fetch).await?;

    let rows = match provider
        .fetch(merchant_id, record.data_period_start, record.data_period_end)
        .await
    {
        Ok(rows) => rows,
        Err(e) => return Err(fail_record(pool, &record, e).await),
    };

    let snapshots: Vec<NewSalesSnapshot> = rows
        .iter()
        .map(|row| NewSalesSnapshot {
            employee_id: row.employee_id.clone(),
            employee_name: row.employee_name.clone(),
            total_sales: row.total_sales,
            commission_amount: row.commission_amount,
        })
        .collect();
    commdash_db::replace_sales_snapshots(pool, merchant_id, record.pipeline_date, &snapshots)
        .await?;

    commdash_db::complete_stage_record(pool, record.id).await?;

    // Continuity invariant: the generate record carries the exact bounds
    // and cycle date this record was claimed with.
    commdash_db::create_pending_record(
        pool,
        merchant_id,
        record.pipeline_date,
        Stage::Generate,
        record.data_period_start,
        record.data_period_end,
    )
    .await?;

    tracing::info!(
        merchant_id,
        pipeline_date = %record.pipeline_date,
        rows = rows.len(),
        "fetch stage: sales captured, generate record armed"
    );
    Ok(rows.len())
}

/// Generate stage: fires at base time + fetch delay + report delay.
///
/// Claims the pending `generate` record, renders the report from the
/// snapshot rows, and on success finalizes the record and advances the
/// merchant's `last_completed_cycle_time` to the period end, so the next
/// cycle starts where this one stopped.
///
/// # Errors
///
/// Mirrors [`run_fetch_stage`], with the renderer as the upstream provider.
pub async fn run_generate_stage(
    pool: &PgPool,
    renderer: &dyn ReportRenderer,
    merchant_id: &str,
    now: DateTime<Utc>,
) -> Result<ReportDocument, StageError> {
    let config = load_config(pool, merchant_id).await?;
    let local_date = local_pipeline_date(&config, now)?;
    let record = claim_pending(pool, merchant_id, local_date, Stage::Generate).await?;

    let rows: Vec<EmployeeSales> =
        commdash_db::list_sales_snapshots(pool, merchant_id, record.pipeline_date)
            .await?
            .into_iter()
            .map(|row| EmployeeSales {
                employee_id: row.employee_id,
                employee_name: row.employee_name,
                total_sales: row.total_sales,
                commission_amount: row.commission_amount,
            })
            .collect();

    let period_description = format!(
        "{} to {}",
        record.data_period_start.format("%Y-%m-%d %H:%M UTC"),
        record.data_period_end.format("%Y-%m-%d %H:%M UTC"),
    );

    let document = match renderer
        .render(merchant_id, &period_description, &rows)
        .await
    {
        Ok(doc) => doc,
        Err(e) => return Err(fail_record(pool, &record, e).await),
    };

    commdash_db::complete_stage_record(pool, record.id).await?;
    commdash_db::set_last_completed_cycle(pool, merchant_id, record.data_period_end).await?;

    tracing::info!(
        merchant_id,
        pipeline_date = %record.pipeline_date,
        url = %document.url,
        "generate stage: report rendered, cycle complete"
    );
    Ok(document)
}

async fn load_config(pool: &PgPool, merchant_id: &str) -> Result<ScheduleConfigRow, StageError> {
    match commdash_db::get_schedule_config(pool, merchant_id).await {
        Ok(config) => Ok(config),
        Err(commdash_db::DbError::NotFound) => {
            Err(StageError::ConfigNotFound(merchant_id.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// The merchant-local calendar date for `now`, per the configured timezone.
fn local_pipeline_date(config: &ScheduleConfigRow, now: DateTime<Utc>) -> Result<NaiveDate, StageError> {
    let tz: Timezone = config.timezone.parse().map_err(StageError::InvalidConfig)?;
    let offset = tz.utc_offset_hours(now.date_naive());
    Ok((now + Duration::hours(i64::from(offset))).date_naive())
}

/// Look up and atomically claim the pending record for a stage.
///
/// Records are keyed to the local date the cycle started on. A trigger
/// delayed past local midnight (report times near 24:00) computes the next
/// calendar date, so an empty lookup falls back to the previous local date
/// before giving up.
async fn claim_pending(
    pool: &PgPool,
    merchant_id: &str,
    local_date: NaiveDate,
    step: Stage,
) -> Result<StageRecordRow, StageError> {
    let record = match commdash_db::get_pending_record(pool, merchant_id, local_date, step).await? {
        Some(record) => Some(record),
        None => {
            commdash_db::get_pending_record(pool, merchant_id, local_date - Days::new(1), step)
                .await?
        }
    }
    .ok_or_else(|| StageError::NoPendingRecord {
        merchant_id: merchant_id.to_string(),
        step,
        pipeline_date: local_date,
    })?;

    commdash_db::claim_stage_record(pool, record.id).await?;
    Ok(record)
}

/// Mark a claimed record failed and return the provider error for
/// propagation. A bookkeeping failure is logged, never masks the original
/// error.
async fn fail_record(
    pool: &PgPool,
    record: &StageRecordRow,
    error: crate::error::ProviderError,
) -> StageError {
    if let Err(db_err) =
        commdash_db::fail_stage_record(pool, record.id, &error.to_string()).await
    {
        tracing::error!(
            record_id = record.id,
            error = %db_err,
            "failed to record stage failure"
        );
    }
    StageError::Provider(error)
}
