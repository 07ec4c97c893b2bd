//! Public pipeline operations: create, update, delete, status, bulk-setup.
//!
//! Each merchant pipeline is three named triggers whose cron expressions are
//! compiled from the merchant's local report time. Operations are atomic
//! from the caller's perspective but not crash-atomic: a failed create
//! reports exactly which stages were registered and rolls nothing back.

use chrono::{DateTime, Days, Duration, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use sqlx::PgPool;

use commdash_core::{compile_daily_cron, jobs, ReportTime, Stage, Timezone};
use commdash_db::DbError;

use crate::error::PipelineError;
use crate::registry::{TriggerRegistry, TriggerSpec};

pub struct PipelineOrchestrator<R> {
    pool: PgPool,
    registry: R,
}

/// One registered trigger, as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerInfo {
    pub job_name: String,
    pub cron_expression: String,
    pub stage: Stage,
}

#[derive(Debug, Serialize)]
pub struct PipelineCreated {
    pub merchant_id: String,
    pub triggers: Vec<TriggerInfo>,
}

/// Result of a delete sweep. Never an error: individual failures are
/// collected here and logged.
#[derive(Debug, Serialize)]
pub struct PipelineDeleted {
    pub merchant_id: String,
    pub removed: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BulkSetupItem {
    pub merchant_id: String,
    pub shop_name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Status payload for the dashboard. `is_configured: false` with no `error`
/// means the merchant simply has no pipeline; with an `error` it means the
/// lookup itself degraded. `last_run_failed` distinguishes a configured
/// pipeline whose most recent cycle broke.
#[derive(Debug, Default, Serialize)]
pub struct PipelineStatus {
    pub is_configured: bool,
    pub triggers: Vec<TriggerInfo>,
    pub next_run_time: Option<DateTime<Utc>>,
    pub last_completed_run: Option<DateTime<Utc>>,
    pub last_run_failed: bool,
    pub report_time: Option<String>,
    pub timezone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<R: TriggerRegistry> PipelineOrchestrator<R> {
    pub fn new(pool: PgPool, registry: R) -> Self {
        Self { pool, registry }
    }

    /// Registers the three stage triggers for a merchant and upserts the
    /// schedule configuration.
    ///
    /// Cron expressions: schedule at the base time, fetch at base + fetch
    /// delay, generate at base + fetch delay + report delay.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Validation`] for bad input,
    /// [`PipelineError::PartialSetup`] when registration fails partway
    /// (earlier triggers stay registered), or a database error.
    pub async fn create_pipeline(
        &self,
        merchant_id: &str,
        local_report_time: &str,
        timezone: &str,
    ) -> Result<PipelineCreated, PipelineError> {
        let merchant_id = validate_merchant_id(merchant_id)?;
        let time: ReportTime = local_report_time.parse()?;
        let tz: Timezone = timezone.parse()?;

        // Preserve the shop name and delay settings of an existing config;
        // settings updates own those fields.
        let shop_name = match commdash_db::get_schedule_config(&self.pool, merchant_id).await {
            Ok(existing) => existing.shop_name,
            Err(DbError::NotFound) => String::new(),
            Err(e) => return Err(e.into()),
        };
        let config = commdash_db::upsert_schedule_config(
            &self.pool,
            merchant_id,
            &shop_name,
            &time.to_string(),
            tz.as_str(),
        )
        .await?;

        let fetch_delay = u32::try_from(config.fetch_delay_minutes).unwrap_or(0);
        let report_delay = u32::try_from(config.report_delay_minutes).unwrap_or(0);

        let stage_delays = [
            (Stage::Schedule, 0),
            (Stage::Fetch, fetch_delay),
            (Stage::Generate, fetch_delay + report_delay),
        ];

        let mut registered = Vec::new();
        let mut triggers = Vec::new();
        for (stage, delay) in stage_delays {
            let cron_expression = compile_daily_cron(&config.local_report_time, tz, delay)?;
            let spec = TriggerSpec {
                job_name: jobs::job_name(stage, merchant_id),
                cron_expression: cron_expression.clone(),
                merchant_id: merchant_id.to_string(),
                stage,
            };

            if let Err(source) = self.registry.create(&spec).await {
                tracing::error!(
                    merchant_id,
                    stage = %stage,
                    error = %source,
                    "pipeline setup aborted mid-registration"
                );
                return Err(PipelineError::PartialSetup {
                    registered,
                    stage,
                    source,
                });
            }

            registered.push(stage);
            triggers.push(TriggerInfo {
                job_name: spec.job_name,
                cron_expression,
                stage,
            });
        }

        tracing::info!(merchant_id, "pipeline created");
        Ok(PipelineCreated {
            merchant_id: merchant_id.to_string(),
            triggers,
        })
    }

    /// Replaces a merchant's pipeline: a full delete sweep followed by a
    /// fresh create. Not atomic; the delete is always safe to repeat.
    ///
    /// # Errors
    ///
    /// Propagates [`Self::create_pipeline`] errors.
    pub async fn update_pipeline(
        &self,
        merchant_id: &str,
        local_report_time: &str,
        timezone: &str,
    ) -> Result<PipelineCreated, PipelineError> {
        self.delete_pipeline(merchant_id).await;
        self.create_pipeline(merchant_id, local_report_time, timezone)
            .await
    }

    /// Deletes every trigger a merchant's pipeline may own, including names
    /// from retired naming generations. Idempotent and infallible:
    /// individual delete failures are logged and reported in the payload.
    pub async fn delete_pipeline(&self, merchant_id: &str) -> PipelineDeleted {
        let mut removed = Vec::new();
        let mut failed = Vec::new();

        for job_name in jobs::all_job_names(merchant_id) {
            match self.registry.delete(&job_name).await {
                Ok(()) => removed.push(job_name),
                Err(e) => {
                    tracing::warn!(merchant_id, job_name, error = %e, "trigger delete failed");
                    failed.push(job_name);
                }
            }
        }

        PipelineDeleted {
            merchant_id: merchant_id.to_string(),
            removed,
            failed,
        }
    }

    /// Rebuilds every configured merchant's pipeline: old and legacy jobs
    /// swept, triggers recompiled from current settings. One merchant's
    /// failure never blocks the rest.
    ///
    /// Also the operator tool for refreshing stale cron expressions after a
    /// DST boundary.
    ///
    /// # Errors
    ///
    /// Returns a database error only if the merchant list itself cannot be
    /// read.
    pub async fn bulk_setup(&self) -> Result<Vec<BulkSetupItem>, PipelineError> {
        let configs = commdash_db::list_schedule_configs(&self.pool).await?;
        tracing::info!(count = configs.len(), "bulk setup started");

        let mut items = Vec::with_capacity(configs.len());
        for config in configs {
            self.delete_pipeline(&config.merchant_id).await;
            let result = self
                .create_pipeline(
                    &config.merchant_id,
                    &config.local_report_time,
                    &config.timezone,
                )
                .await;

            let error = result.err().map(|e| e.to_string());
            if let Some(ref message) = error {
                tracing::warn!(
                    merchant_id = %config.merchant_id,
                    error = %message,
                    "bulk setup: merchant skipped"
                );
            }
            items.push(BulkSetupItem {
                merchant_id: config.merchant_id,
                shop_name: config.shop_name,
                success: error.is_none(),
                error,
            });
        }

        Ok(items)
    }

    /// Reports a merchant's pipeline status. Never fails: lookup errors
    /// degrade to `is_configured: false` with the error message attached.
    pub async fn status(&self, merchant_id: &str) -> PipelineStatus {
        match self.status_inner(merchant_id).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(merchant_id, error = %e, "status lookup degraded");
                PipelineStatus {
                    error: Some(e.to_string()),
                    ..PipelineStatus::default()
                }
            }
        }
    }

    async fn status_inner(&self, merchant_id: &str) -> Result<PipelineStatus, PipelineError> {
        let config = match commdash_db::get_schedule_config(&self.pool, merchant_id).await {
            Ok(config) => config,
            // No configuration at all is a plain "not configured", not an error.
            Err(DbError::NotFound) => return Ok(PipelineStatus::default()),
            Err(e) => return Err(e.into()),
        };

        let triggers: Vec<TriggerInfo> = self
            .registry
            .list_for_merchant(merchant_id)
            .await?
            .into_iter()
            .map(|spec| TriggerInfo {
                job_name: spec.job_name,
                cron_expression: spec.cron_expression,
                stage: spec.stage,
            })
            .collect();
        let is_configured = !triggers.is_empty();

        let time: ReportTime = config.local_report_time.parse()?;
        let tz: Timezone = config.timezone.parse()?;
        let next_run_time = is_configured.then(|| next_run_time(time, tz, Utc::now()));

        let last_run_failed = commdash_db::latest_record_for_merchant(&self.pool, merchant_id)
            .await?
            .is_some_and(|record| record.status == "failed");

        Ok(PipelineStatus {
            is_configured,
            triggers,
            next_run_time,
            last_completed_run: config.last_completed_cycle_time,
            last_run_failed,
            report_time: Some(config.local_report_time),
            timezone: Some(config.timezone),
            error: None,
        })
    }
}

fn validate_merchant_id(merchant_id: &str) -> Result<&str, PipelineError> {
    let trimmed = merchant_id.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::InvalidMerchantId);
    }
    Ok(trimmed)
}

/// The next UTC instant the merchant's base report time occurs: today in
/// merchant-local terms if it is still ahead, otherwise tomorrow.
#[must_use]
pub fn next_run_time(time: ReportTime, tz: Timezone, now: DateTime<Utc>) -> DateTime<Utc> {
    let offset = tz.utc_offset_hours(now.date_naive());
    let local_now = now + Duration::hours(i64::from(offset));

    let report =
        NaiveTime::from_hms_opt(time.hour, time.minute, time.second).expect("validated time");
    let local_date = if local_now.time() < report {
        local_now.date_naive()
    } else {
        local_now.date_naive() + Days::new(1)
    };

    let local_instant = local_date.and_time(report);
    Utc.from_utc_datetime(&(local_instant - Duration::hours(i64::from(offset))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use crate::error::RegistryError;

    /// In-memory registry double. `fail_on` simulates a backend refusing a
    /// specific job name.
    #[derive(Default)]
    struct MemoryRegistry {
        jobs: Mutex<BTreeMap<String, TriggerSpec>>,
        fail_on: Option<String>,
    }

    impl MemoryRegistry {
        fn failing_on(job_name: &str) -> Self {
            Self {
                jobs: Mutex::new(BTreeMap::new()),
                fail_on: Some(job_name.to_string()),
            }
        }

        fn job_names(&self) -> Vec<String> {
            self.jobs.lock().unwrap().keys().cloned().collect()
        }

        fn cron_for(&self, job_name: &str) -> Option<String> {
            self.jobs
                .lock()
                .unwrap()
                .get(job_name)
                .map(|s| s.cron_expression.clone())
        }
    }

    #[async_trait]
    impl TriggerRegistry for MemoryRegistry {
        async fn create(&self, spec: &TriggerSpec) -> Result<(), RegistryError> {
            if self.fail_on.as_deref() == Some(spec.job_name.as_str()) {
                return Err(RegistryError::Backend("injected failure".to_string()));
            }
            let mut jobs = self.jobs.lock().unwrap();
            if jobs.contains_key(&spec.job_name) {
                return Err(RegistryError::Duplicate(spec.job_name.clone()));
            }
            jobs.insert(spec.job_name.clone(), spec.clone());
            Ok(())
        }

        async fn delete(&self, job_name: &str) -> Result<(), RegistryError> {
            self.jobs.lock().unwrap().remove(job_name);
            Ok(())
        }

        async fn list_for_merchant(
            &self,
            merchant_id: &str,
        ) -> Result<Vec<TriggerSpec>, RegistryError> {
            Ok(self
                .jobs
                .lock()
                .unwrap()
                .values()
                .filter(|s| s.merchant_id == merchant_id)
                .cloned()
                .collect())
        }
    }

    fn date(y: i32, m: u32, d: u32) -> chrono::NaiveDate {
        chrono::NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn create_registers_three_staggered_triggers(pool: PgPool) {
        let orchestrator = PipelineOrchestrator::new(pool, MemoryRegistry::default());

        let created = orchestrator
            .create_pipeline("m-1", "21:00:00", "Eastern")
            .await
            .expect("create");

        assert_eq!(created.triggers.len(), 3);
        assert_eq!(created.triggers[0].job_name, "schedule-data-fetch-m-1");
        assert_eq!(created.triggers[1].job_name, "fetch-sales-data-m-1");
        assert_eq!(created.triggers[2].job_name, "generate-report-m-1");

        // Default delays: fetch at base + 1, generate at base + 1 + 2.
        let base_minute: u32 = created.triggers[0]
            .cron_expression
            .split(' ')
            .next()
            .unwrap()
            .parse()
            .unwrap();
        let fetch_minute: u32 = created.triggers[1]
            .cron_expression
            .split(' ')
            .next()
            .unwrap()
            .parse()
            .unwrap();
        let generate_minute: u32 = created.triggers[2]
            .cron_expression
            .split(' ')
            .next()
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(fetch_minute, base_minute + 1);
        assert_eq!(generate_minute, base_minute + 3);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn create_rejects_invalid_input_before_touching_triggers(pool: PgPool) {
        let registry = MemoryRegistry::default();
        let orchestrator = PipelineOrchestrator::new(pool, registry);

        let bad_time = orchestrator
            .create_pipeline("m-1", "25:00:00", "Eastern")
            .await;
        assert!(matches!(bad_time, Err(PipelineError::Validation(_))));

        let bad_zone = orchestrator.create_pipeline("m-1", "21:00:00", "Atlantis").await;
        assert!(matches!(bad_zone, Err(PipelineError::Validation(_))));

        let bad_merchant = orchestrator.create_pipeline("  ", "21:00:00", "Eastern").await;
        assert!(matches!(bad_merchant, Err(PipelineError::InvalidMerchantId)));

        assert!(orchestrator.registry.job_names().is_empty());
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn partial_registration_failure_reports_registered_stages(pool: PgPool) {
        let registry = MemoryRegistry::failing_on("generate-report-m-1");
        let orchestrator = PipelineOrchestrator::new(pool, registry);

        let result = orchestrator.create_pipeline("m-1", "21:00:00", "Eastern").await;
        match result {
            Err(PipelineError::PartialSetup {
                registered, stage, ..
            }) => {
                assert_eq!(registered, vec![Stage::Schedule, Stage::Fetch]);
                assert_eq!(stage, Stage::Generate);
            }
            other => panic!("expected PartialSetup, got {other:?}"),
        }

        // No rollback: the two successful registrations remain.
        assert_eq!(orchestrator.registry.job_names().len(), 2);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn update_equals_delete_then_create(pool: PgPool) {
        let orchestrator = PipelineOrchestrator::new(pool.clone(), MemoryRegistry::default());
        orchestrator
            .create_pipeline("m-1", "21:00:00", "Eastern")
            .await
            .expect("initial create");
        orchestrator
            .update_pipeline("m-1", "09:30:00", "Pacific")
            .await
            .expect("update");

        let reference = PipelineOrchestrator::new(pool, MemoryRegistry::default());
        reference
            .create_pipeline("m-2", "09:30:00", "Pacific")
            .await
            .expect("reference create");

        assert_eq!(orchestrator.registry.job_names().len(), 3);
        for stage in Stage::ALL {
            let updated = orchestrator
                .registry
                .cron_for(&jobs::job_name(stage, "m-1"))
                .expect("updated trigger");
            let fresh = reference
                .registry
                .cron_for(&jobs::job_name(stage, "m-2"))
                .expect("reference trigger");
            assert_eq!(updated, fresh, "stage {stage} cron drifted");
        }
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn delete_sweeps_current_and_legacy_names(pool: PgPool) {
        let registry = MemoryRegistry::default();
        registry
            .create(&TriggerSpec {
                job_name: "auto-report-m-1".to_string(),
                cron_expression: "0 2 * * *".to_string(),
                merchant_id: "m-1".to_string(),
                stage: Stage::Generate,
            })
            .await
            .expect("seed legacy job");
        let orchestrator = PipelineOrchestrator::new(pool, registry);
        orchestrator
            .create_pipeline("m-1", "21:00:00", "Eastern")
            .await
            .expect("create");

        let deleted = orchestrator.delete_pipeline("m-1").await;
        assert_eq!(deleted.removed.len(), 4);
        assert!(deleted.failed.is_empty());
        assert!(orchestrator.registry.job_names().is_empty());

        // Deleting again is harmless.
        let again = orchestrator.delete_pipeline("m-1").await;
        assert!(again.failed.is_empty());
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn bulk_setup_isolates_bad_merchants(pool: PgPool) {
        commdash_db::upsert_schedule_config(&pool, "good", "Good Shop", "21:00:00", "eastern")
            .await
            .expect("seed good");
        // Bypasses boundary validation the way a legacy migration might.
        commdash_db::upsert_schedule_config(&pool, "bad", "Bad Shop", "21:00:00", "saturn")
            .await
            .expect("seed bad");

        let orchestrator = PipelineOrchestrator::new(pool, MemoryRegistry::default());
        let items = orchestrator.bulk_setup().await.expect("bulk setup");

        assert_eq!(items.len(), 2);
        let bad = items.iter().find(|i| i.merchant_id == "bad").unwrap();
        assert!(!bad.success);
        assert!(bad.error.as_deref().is_some_and(|e| e.contains("saturn")));

        let good = items.iter().find(|i| i.merchant_id == "good").unwrap();
        assert!(good.success, "good merchant blocked: {:?}", good.error);
        assert_eq!(orchestrator.registry.job_names().len(), 3);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn status_never_errors(pool: PgPool) {
        let orchestrator = PipelineOrchestrator::new(pool.clone(), MemoryRegistry::default());

        let unknown = orchestrator.status("nobody").await;
        assert!(!unknown.is_configured);
        assert!(unknown.error.is_none());

        orchestrator
            .create_pipeline("m-1", "21:00:00", "Eastern")
            .await
            .expect("create");
        let configured = orchestrator.status("m-1").await;
        assert!(configured.is_configured);
        assert_eq!(configured.triggers.len(), 3);
        assert!(configured.next_run_time.is_some());
        assert!(!configured.last_run_failed);
        assert_eq!(configured.report_time.as_deref(), Some("21:00:00"));

        // A config row with a corrupt timezone degrades, not panics.
        commdash_db::upsert_schedule_config(&pool, "m-1", "", "21:00:00", "saturn")
            .await
            .expect("corrupt");
        let degraded = orchestrator.status("m-1").await;
        assert!(!degraded.is_configured);
        assert!(degraded.error.is_some());
    }

    #[test]
    fn next_run_is_today_before_the_report_time() {
        let time = ReportTime::parse("21:00:00").unwrap();
        // 2024-07-01 18:00 UTC = 14:00 Eastern (DST): report still ahead.
        let now = date(2024, 7, 1).and_hms_opt(18, 0, 0).unwrap().and_utc();
        let next = next_run_time(time, Timezone::Eastern, now);
        assert_eq!(
            next,
            date(2024, 7, 2).and_hms_opt(1, 0, 0).unwrap().and_utc()
        );
    }

    #[test]
    fn next_run_rolls_to_tomorrow_after_the_report_time() {
        let time = ReportTime::parse("21:00:00").unwrap();
        // 2024-07-02 02:00 UTC = 22:00 Eastern on Jul 1: already passed.
        let now = date(2024, 7, 2).and_hms_opt(2, 0, 0).unwrap().and_utc();
        let next = next_run_time(time, Timezone::Eastern, now);
        assert_eq!(
            next,
            date(2024, 7, 3).and_hms_opt(1, 0, 0).unwrap().and_utc()
        );
    }
}
