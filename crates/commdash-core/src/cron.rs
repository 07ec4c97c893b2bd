//! Compilation of merchant-local report times into daily UTC cron
//! expressions.
//!
//! Expressions are the canonical 5-field form (`minute hour * * *`); the
//! trigger runtime owns any adaptation its parser needs. The UTC offset is
//! resolved against a reference date at compile time, so expressions go
//! stale across a DST boundary until the pipeline is recompiled (update or
//! bulk-setup).

use chrono::{NaiveDate, Utc};

use crate::{CoreError, ReportTime, Timezone};

/// Compile `local_time` in `timezone`, shifted forward by
/// `extra_delay_minutes`, into a daily UTC cron expression using today as
/// the DST reference date.
///
/// # Errors
///
/// Returns [`CoreError::InvalidReportTime`] if `local_time` is malformed.
pub fn compile_daily_cron(
    local_time: &str,
    timezone: Timezone,
    extra_delay_minutes: u32,
) -> Result<String, CoreError> {
    compile_daily_cron_at(
        local_time,
        timezone,
        extra_delay_minutes,
        Utc::now().date_naive(),
    )
}

/// As [`compile_daily_cron`], with an explicit DST reference date.
///
/// # Errors
///
/// Returns [`CoreError::InvalidReportTime`] if `local_time` is malformed.
pub fn compile_daily_cron_at(
    local_time: &str,
    timezone: Timezone,
    extra_delay_minutes: u32,
    reference: NaiveDate,
) -> Result<String, CoreError> {
    let time: ReportTime = local_time.parse()?;

    // Apply the delay and renormalize minutes before touching hours.
    let total_minutes = time.minute + extra_delay_minutes;
    let minute = total_minutes % 60;
    let local_hour = (time.hour + total_minutes / 60) % 24;

    // All supported zones sit west of UTC, so converting local to UTC means
    // adding the offset magnitude.
    let offset = timezone.utc_offset_hours(reference);
    let mut utc_hour = i64::from(local_hour) + i64::from(offset.abs());
    if utc_hour >= 24 {
        utc_hour -= 24;
    }
    if utc_hour < 0 {
        utc_hour += 24;
    }

    Ok(format!("{minute} {utc_hour} * * *"))
}
