//! Pipeline stages and deterministic trigger job naming.
//!
//! Job names are derived from the merchant id alone so that create, delete,
//! and status agree on the trigger set without extra lookups. Older naming
//! generations are kept as an explicit list so cleanup sweeps every name a
//! merchant may ever have had.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One phase of the daily report pipeline, in firing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Schedule,
    Fetch,
    Generate,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Schedule, Stage::Fetch, Stage::Generate];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Schedule => "schedule",
            Stage::Fetch => "fetch",
            Stage::Generate => "generate",
        }
    }

    /// The downstream stage this one hands off to, if any.
    ///
    /// Each stage creates the pending record the next stage will claim;
    /// the generate stage is terminal.
    #[must_use]
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Schedule => Some(Stage::Fetch),
            Stage::Fetch => Some(Stage::Generate),
            Stage::Generate => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "schedule" => Ok(Stage::Schedule),
            "fetch" => Ok(Stage::Fetch),
            "generate" => Ok(Stage::Generate),
            other => Err(format!("unknown stage: {other}")),
        }
    }
}

/// Current-generation job name for a merchant's stage trigger.
#[must_use]
pub fn job_name(stage: Stage, merchant_id: &str) -> String {
    match stage {
        Stage::Schedule => format!("schedule-data-fetch-{merchant_id}"),
        Stage::Fetch => format!("fetch-sales-data-{merchant_id}"),
        Stage::Generate => format!("generate-report-{merchant_id}"),
    }
}

/// Job names from retired naming generations, oldest first.
///
/// Generation 1 used a single `auto-report-{id}` job before the pipeline
/// was split into three stages.
#[must_use]
pub fn legacy_job_names(merchant_id: &str) -> Vec<String> {
    vec![format!("auto-report-{merchant_id}")]
}

/// Every job name a merchant's pipeline may own, current generation plus
/// legacy. Deletion sweeps this full set.
#[must_use]
pub fn all_job_names(merchant_id: &str) -> Vec<String> {
    Stage::ALL
        .iter()
        .map(|stage| job_name(*stage, merchant_id))
        .chain(legacy_job_names(merchant_id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_names_are_deterministic_per_stage() {
        assert_eq!(job_name(Stage::Schedule, "m-1"), "schedule-data-fetch-m-1");
        assert_eq!(job_name(Stage::Fetch, "m-1"), "fetch-sales-data-m-1");
        assert_eq!(job_name(Stage::Generate, "m-1"), "generate-report-m-1");
    }

    #[test]
    fn all_job_names_include_legacy_generation() {
        let names = all_job_names("m-9");
        assert_eq!(names.len(), 4);
        assert!(names.contains(&"auto-report-m-9".to_string()));
    }

    #[test]
    fn stage_round_trips_through_str() {
        for stage in Stage::ALL {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
        }
        assert!("render".parse::<Stage>().is_err());
    }
}
