//! Database operations for `merchant_schedule_configs`.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::DbError;

/// A row from the `merchant_schedule_configs` table.
///
/// `local_report_time` and `timezone` are stored as text and validated by
/// `commdash-core` at the API/CLI boundary, so a bad row surfaces as a typed
/// parse error instead of a silent misfire.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScheduleConfigRow {
    pub id: i64,
    pub merchant_id: String,
    pub shop_name: String,
    pub local_report_time: String,
    pub timezone: String,
    pub fetch_delay_minutes: i32,
    pub report_delay_minutes: i32,
    pub last_completed_cycle_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const CONFIG_COLUMNS: &str = "id, merchant_id, shop_name, local_report_time, timezone, \
     fetch_delay_minutes, report_delay_minutes, last_completed_cycle_time, \
     created_at, updated_at";

/// Creates or updates a merchant's schedule configuration.
///
/// Conflicts on `merchant_id` update the report time, timezone, and shop
/// name in place; delay minutes keep their existing (or default) values.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn upsert_schedule_config(
    pool: &PgPool,
    merchant_id: &str,
    shop_name: &str,
    local_report_time: &str,
    timezone: &str,
) -> Result<ScheduleConfigRow, DbError> {
    let row = sqlx::query_as::<_, ScheduleConfigRow>(&format!(
        "INSERT INTO merchant_schedule_configs \
             (merchant_id, shop_name, local_report_time, timezone) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (merchant_id) DO UPDATE SET \
             shop_name         = EXCLUDED.shop_name, \
             local_report_time = EXCLUDED.local_report_time, \
             timezone          = EXCLUDED.timezone, \
             updated_at        = NOW() \
         RETURNING {CONFIG_COLUMNS}"
    ))
    .bind(merchant_id)
    .bind(shop_name)
    .bind(local_report_time)
    .bind(timezone)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Fetches a merchant's schedule configuration.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the merchant has no configuration, or
/// [`DbError::Sqlx`] if the query fails.
pub async fn get_schedule_config(
    pool: &PgPool,
    merchant_id: &str,
) -> Result<ScheduleConfigRow, DbError> {
    let row = sqlx::query_as::<_, ScheduleConfigRow>(&format!(
        "SELECT {CONFIG_COLUMNS} FROM merchant_schedule_configs WHERE merchant_id = $1"
    ))
    .bind(merchant_id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// Returns every merchant configuration, ordered by merchant id.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_schedule_configs(pool: &PgPool) -> Result<Vec<ScheduleConfigRow>, DbError> {
    let rows = sqlx::query_as::<_, ScheduleConfigRow>(&format!(
        "SELECT {CONFIG_COLUMNS} FROM merchant_schedule_configs ORDER BY merchant_id"
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Records the completion instant of a merchant's latest report cycle.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the merchant has no configuration, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn set_last_completed_cycle(
    pool: &PgPool,
    merchant_id: &str,
    completed_at: DateTime<Utc>,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE merchant_schedule_configs \
         SET last_completed_cycle_time = $1, updated_at = NOW() \
         WHERE merchant_id = $2",
    )
    .bind(completed_at)
    .bind(merchant_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[sqlx::test(migrations = "../../migrations")]
    async fn upsert_creates_then_updates_in_place(pool: PgPool) {
        let created = upsert_schedule_config(&pool, "m-1", "North Shop", "21:00:00", "eastern")
            .await
            .expect("create config");
        assert_eq!(created.fetch_delay_minutes, 1);
        assert_eq!(created.report_delay_minutes, 2);
        assert!(created.last_completed_cycle_time.is_none());

        let updated = upsert_schedule_config(&pool, "m-1", "North Shop", "09:30:00", "pacific")
            .await
            .expect("update config");
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.local_report_time, "09:30:00");
        assert_eq!(updated.timezone, "pacific");

        let all = list_schedule_configs(&pool).await.expect("list");
        assert_eq!(all.len(), 1);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn get_returns_not_found_for_unknown_merchant(pool: PgPool) {
        let result = get_schedule_config(&pool, "nope").await;
        assert!(matches!(result, Err(DbError::NotFound)));
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn last_completed_cycle_round_trips(pool: PgPool) {
        upsert_schedule_config(&pool, "m-2", "", "08:00:00", "central")
            .await
            .expect("create");

        let at = Utc::now();
        set_last_completed_cycle(&pool, "m-2", at)
            .await
            .expect("set cycle time");

        let row = get_schedule_config(&pool, "m-2").await.expect("get");
        let stored = row.last_completed_cycle_time.expect("cycle time set");
        assert!((stored - at).num_milliseconds().abs() < 1_000);

        let missing = set_last_completed_cycle(&pool, "ghost", at).await;
        assert!(matches!(missing, Err(DbError::NotFound)));
    }
}
