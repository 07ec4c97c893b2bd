//! Domain logic for the commission-report pipeline scheduler.
//!
//! Everything in this crate is pure: timezone offset resolution, report-time
//! parsing, cron-expression compilation, and trigger job-name derivation.
//! Persistence and I/O live in the `commdash-db` and `commdash-server` crates.

use thiserror::Error;

mod app_config;
mod config;
pub mod cron;
pub mod jobs;
pub mod report_time;
pub mod timezone;

pub use app_config::{AppConfig, Environment};
pub use config::{load_app_config, load_app_config_from_env};
pub use cron::{compile_daily_cron, compile_daily_cron_at};
pub use jobs::Stage;
pub use report_time::ReportTime;
pub use timezone::Timezone;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid timezone: {0:?}")]
    InvalidTimezone(String),
    #[error("invalid report time {input:?}: {reason}")]
    InvalidReportTime { input: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    MissingEnvVar(String),
    #[error("invalid value for env var {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}
