//! The closed set of merchant timezones and DST-aware UTC offset resolution.
//!
//! US DST rules since 2007: daylight time runs from the second Sunday of
//! March at 00:00 local to the first Sunday of November at 00:00 local.
//! Hawaii never observes DST.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::CoreError;

/// A merchant's timezone. The set is closed: merchants outside these six
/// zones are not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timezone {
    Eastern,
    Central,
    Mountain,
    Pacific,
    Alaska,
    Hawaii,
}

impl Timezone {
    pub const ALL: [Timezone; 6] = [
        Timezone::Eastern,
        Timezone::Central,
        Timezone::Mountain,
        Timezone::Pacific,
        Timezone::Alaska,
        Timezone::Hawaii,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Timezone::Eastern => "eastern",
            Timezone::Central => "central",
            Timezone::Mountain => "mountain",
            Timezone::Pacific => "pacific",
            Timezone::Alaska => "alaska",
            Timezone::Hawaii => "hawaii",
        }
    }

    /// Offset from UTC in hours while standard time is in effect.
    #[must_use]
    pub fn standard_offset_hours(self) -> i32 {
        match self {
            Timezone::Eastern => -5,
            Timezone::Central => -6,
            Timezone::Mountain => -7,
            Timezone::Pacific => -8,
            Timezone::Alaska => -9,
            Timezone::Hawaii => -10,
        }
    }

    /// Offset from UTC in hours while daylight time is in effect.
    ///
    /// Hawaii has no daylight regime, so its offset never moves.
    #[must_use]
    pub fn daylight_offset_hours(self) -> i32 {
        match self {
            Timezone::Hawaii => -10,
            other => other.standard_offset_hours() + 1,
        }
    }

    #[must_use]
    pub fn observes_dst(self) -> bool {
        !matches!(self, Timezone::Hawaii)
    }

    /// Resolve the UTC offset (in hours, negative west of UTC) in effect on
    /// `reference` in this zone.
    #[must_use]
    pub fn utc_offset_hours(self, reference: NaiveDate) -> i32 {
        if self.observes_dst() && in_dst_window(reference) {
            self.daylight_offset_hours()
        } else {
            self.standard_offset_hours()
        }
    }
}

impl fmt::Display for Timezone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timezone {
    type Err = CoreError;

    /// Accepts the canonical zone names (case-insensitive) and the common
    /// IANA aliases merchants paste in from their POS settings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eastern" | "us/eastern" | "america/new_york" => Ok(Timezone::Eastern),
            "central" | "us/central" | "america/chicago" => Ok(Timezone::Central),
            "mountain" | "us/mountain" | "america/denver" => Ok(Timezone::Mountain),
            "pacific" | "us/pacific" | "america/los_angeles" => Ok(Timezone::Pacific),
            "alaska" | "us/alaska" | "america/anchorage" => Ok(Timezone::Alaska),
            "hawaii" | "us/hawaii" | "pacific/honolulu" => Ok(Timezone::Hawaii),
            _ => Err(CoreError::InvalidTimezone(s.to_string())),
        }
    }
}

/// The DST window for a given year: `[second Sunday of March, first Sunday
/// of November)`. Both bounds are at local midnight, so date-granularity
/// comparison is exact.
#[must_use]
pub fn dst_window(year: i32) -> (NaiveDate, NaiveDate) {
    let start = first_sunday(year, 3) + Days::new(7);
    let end = first_sunday(year, 11);
    (start, end)
}

fn in_dst_window(date: NaiveDate) -> bool {
    let (start, end) = dst_window(date.year());
    date >= start && date < end
}

/// Day 1 of the month advanced to the next Sunday (zero days if day 1 is
/// already a Sunday).
fn first_sunday(year: i32, month: u32) -> NaiveDate {
    let first = NaiveDate::from_ymd_opt(year, month, 1).expect("valid calendar date");
    let advance = (7 - first.weekday().num_days_from_sunday()) % 7;
    first + Days::new(u64::from(advance))
}
