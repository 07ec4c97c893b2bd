//! Merchant-local report time, validated at the boundary.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// A wall-clock time of day in `HH:MM:SS` form (seconds optional on input).
///
/// Seconds are accepted and preserved for display but ignored by the cron
/// compiler, which schedules at minute granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReportTime {
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

impl ReportTime {
    /// Parse and validate an `HH:MM` or `HH:MM:SS` string.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidReportTime`] for malformed input or
    /// out-of-range fields.
    pub fn parse(input: &str) -> Result<Self, CoreError> {
        let invalid = |reason: &str| CoreError::InvalidReportTime {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = input.trim().split(':').collect();
        if parts.len() != 2 && parts.len() != 3 {
            return Err(invalid("expected HH:MM or HH:MM:SS"));
        }

        let field = |idx: usize, name: &str| -> Result<u32, CoreError> {
            parts[idx]
                .parse::<u32>()
                .map_err(|_| invalid(&format!("{name} is not a number")))
        };

        let hour = field(0, "hour")?;
        let minute = field(1, "minute")?;
        let second = if parts.len() == 3 { field(2, "second")? } else { 0 };

        if hour > 23 {
            return Err(invalid("hour out of range"));
        }
        if minute > 59 {
            return Err(invalid("minute out of range"));
        }
        if second > 59 {
            return Err(invalid("second out of range"));
        }

        Ok(Self { hour, minute, second })
    }
}

impl FromStr for ReportTime {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ReportTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
    }
}

impl TryFrom<String> for ReportTime {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ReportTime> for String {
    fn from(value: ReportTime) -> Self {
        value.to_string()
    }
}
