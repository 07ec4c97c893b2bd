//! Trigger execution runtime.
//!
//! Wraps a [`JobScheduler`] that fires the stage handlers at their compiled
//! UTC cron times. The `pipeline_triggers` table is the source of truth:
//! every row is (re)registered at startup, and [`LiveTriggerRegistry`]
//! keeps the running scheduler in step with row inserts and deletes made
//! through the orchestrator.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use uuid::Uuid;

use commdash_core::Stage;
use commdash_pipeline::{
    stages, DbTriggerRegistry, RegistryError, ReportRenderer, SalesDataProvider, StageError,
    TriggerRegistry, TriggerSpec,
};

/// External collaborators shared by every stage invocation.
pub struct Providers {
    pub sales: Arc<dyn SalesDataProvider>,
    pub renderer: Arc<dyn ReportRenderer>,
}

/// A running scheduler plus the name → job-id map needed to unregister
/// triggers by name. Dropping the runtime shuts down all jobs.
pub struct TriggerRuntime {
    scheduler: JobScheduler,
    jobs: Mutex<HashMap<String, Uuid>>,
    pool: PgPool,
    providers: Arc<Providers>,
}

impl TriggerRuntime {
    /// Builds the runtime, re-registers every persisted trigger, and starts
    /// the scheduler.
    ///
    /// # Errors
    ///
    /// Returns an error if the scheduler cannot be initialised or started,
    /// or if the trigger table cannot be read.
    pub async fn start(pool: PgPool, providers: Arc<Providers>) -> anyhow::Result<Arc<Self>> {
        let runtime = Arc::new(Self {
            scheduler: JobScheduler::new().await?,
            jobs: Mutex::new(HashMap::new()),
            pool,
            providers,
        });

        runtime.resync().await?;
        runtime.scheduler.start().await?;
        Ok(runtime)
    }

    /// Registers every `pipeline_triggers` row with the scheduler. Rows
    /// that fail to parse are logged and skipped so one bad row cannot
    /// block startup.
    async fn resync(&self) -> anyhow::Result<()> {
        let rows = commdash_db::list_all_triggers(&self.pool).await?;
        tracing::info!(count = rows.len(), "scheduler: loading persisted triggers");

        for row in rows {
            let Ok(stage) = row.stage.parse::<Stage>() else {
                tracing::error!(job_name = %row.job_name, stage = %row.stage, "scheduler: unknown stage in trigger row; skipping");
                continue;
            };
            if let Err(e) = self
                .register_job(&row.job_name, &row.cron_expression, &row.merchant_id, stage)
                .await
            {
                tracing::error!(job_name = %row.job_name, error = %e, "scheduler: failed to register trigger; skipping");
            }
        }
        Ok(())
    }

    /// Adds one recurring job to the live scheduler.
    async fn register_job(
        &self,
        job_name: &str,
        cron_expression: &str,
        merchant_id: &str,
        stage: Stage,
    ) -> Result<(), JobSchedulerError> {
        // Stored expressions are canonical 5-field cron; the runtime's
        // parser expects a leading seconds field.
        let schedule = format!("0 {cron_expression}");
        let pool = self.pool.clone();
        let providers = Arc::clone(&self.providers);
        let merchant = merchant_id.to_string();

        let job = Job::new_async(schedule.as_str(), move |_uuid, _lock| {
            let pool = pool.clone();
            let providers = Arc::clone(&providers);
            let merchant = merchant.clone();

            Box::pin(async move {
                run_stage_invocation(&pool, &providers, stage, &merchant).await;
            })
        })?;

        let id = self.scheduler.add(job).await?;
        self.jobs.lock().await.insert(job_name.to_string(), id);
        Ok(())
    }

    /// Removes a job from the live scheduler, if present.
    async fn unregister_job(&self, job_name: &str) {
        let id = self.jobs.lock().await.remove(job_name);
        if let Some(id) = id {
            if let Err(e) = self.scheduler.remove(&id).await {
                tracing::warn!(job_name, error = %e, "scheduler: failed to remove live job");
            }
        }
    }
}

/// Drive one stage invocation and log the outcome.
///
/// Stage handlers propagate errors; this is where they land. A missing
/// configuration is expected after a pipeline delete (the in-flight
/// invocation runs to completion) and is logged at warn, not error.
async fn run_stage_invocation(
    pool: &PgPool,
    providers: &Providers,
    stage: Stage,
    merchant_id: &str,
) {
    let now = Utc::now();
    tracing::info!(merchant_id, %stage, "stage invocation starting");

    let result = match stage {
        Stage::Schedule => stages::run_schedule_stage(pool, merchant_id, now)
            .await
            .map(|_| ()),
        Stage::Fetch => stages::run_fetch_stage(pool, providers.sales.as_ref(), merchant_id, now)
            .await
            .map(|_| ()),
        Stage::Generate => {
            stages::run_generate_stage(pool, providers.renderer.as_ref(), merchant_id, now)
                .await
                .map(|_| ())
        }
    };

    match result {
        Ok(()) => tracing::info!(merchant_id, %stage, "stage invocation complete"),
        Err(StageError::ConfigNotFound(_)) => {
            tracing::warn!(merchant_id, %stage, "stage fired for an unconfigured merchant; skipping");
        }
        Err(StageError::ClaimConflict { id }) => {
            tracing::warn!(merchant_id, %stage, record_id = id, "another invocation owns this cycle");
        }
        Err(e) => {
            tracing::error!(merchant_id, %stage, error = %e, "stage invocation failed");
        }
    }
}

/// Registry that keeps the trigger table and the live scheduler in step.
///
/// Row writes come first: the table survives restarts, the scheduler does
/// not. A scheduler failure after a successful insert rolls the row back so
/// the two views cannot drift.
#[derive(Clone)]
pub struct LiveTriggerRegistry {
    rows: DbTriggerRegistry,
    runtime: Arc<TriggerRuntime>,
}

impl LiveTriggerRegistry {
    #[must_use]
    pub fn new(pool: PgPool, runtime: Arc<TriggerRuntime>) -> Self {
        Self {
            rows: DbTriggerRegistry::new(pool),
            runtime,
        }
    }
}

#[async_trait]
impl TriggerRegistry for LiveTriggerRegistry {
    async fn create(&self, spec: &TriggerSpec) -> Result<(), RegistryError> {
        self.rows.create(spec).await?;

        if let Err(e) = self
            .runtime
            .register_job(
                &spec.job_name,
                &spec.cron_expression,
                &spec.merchant_id,
                spec.stage,
            )
            .await
        {
            if let Err(rollback) = self.rows.delete(&spec.job_name).await {
                tracing::error!(
                    job_name = %spec.job_name,
                    error = %rollback,
                    "failed to roll back trigger row after scheduler rejection"
                );
            }
            return Err(RegistryError::Backend(e.to_string()));
        }

        Ok(())
    }

    async fn delete(&self, job_name: &str) -> Result<(), RegistryError> {
        self.rows.delete(job_name).await?;
        self.runtime.unregister_job(job_name).await;
        Ok(())
    }

    async fn list_for_merchant(
        &self,
        merchant_id: &str,
    ) -> Result<Vec<TriggerSpec>, RegistryError> {
        self.rows.list_for_merchant(merchant_id).await
    }
}
