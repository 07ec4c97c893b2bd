//! Trigger lifecycle: a thin adapter over the trigger execution service.
//!
//! Triggers are named, never mutated in place, and deleted idempotently.
//! The trait is the seam between the orchestrator and whatever actually
//! fires jobs; [`DbTriggerRegistry`] maintains the durable rows the server
//! runtime loads at startup.

use async_trait::async_trait;
use sqlx::PgPool;

use commdash_core::Stage;
use commdash_db::DbError;

use crate::error::RegistryError;

/// A named recurring trigger bound to one merchant stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerSpec {
    pub job_name: String,
    pub cron_expression: String,
    pub merchant_id: String,
    pub stage: Stage,
}

#[async_trait]
pub trait TriggerRegistry: Send + Sync {
    /// Registers a trigger.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if `job_name` already exists;
    /// callers delete first when replacing a trigger.
    async fn create(&self, spec: &TriggerSpec) -> Result<(), RegistryError>;

    /// Unregisters a trigger. Absent names are success, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Backend`] only for backend failures.
    async fn delete(&self, job_name: &str) -> Result<(), RegistryError>;

    /// Lists the merchant's registered triggers; empty is a valid result.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Backend`] if the backend cannot be read.
    async fn list_for_merchant(&self, merchant_id: &str)
        -> Result<Vec<TriggerSpec>, RegistryError>;
}

/// Registry over the `pipeline_triggers` table only.
///
/// Used by the CLI and anything else running outside the server process:
/// rows written here take effect when the server runtime (re)loads them.
#[derive(Debug, Clone)]
pub struct DbTriggerRegistry {
    pool: PgPool,
}

impl DbTriggerRegistry {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TriggerRegistry for DbTriggerRegistry {
    async fn create(&self, spec: &TriggerSpec) -> Result<(), RegistryError> {
        commdash_db::insert_trigger(
            &self.pool,
            &spec.job_name,
            &spec.cron_expression,
            &spec.merchant_id,
            spec.stage.as_str(),
        )
        .await
        .map_err(map_db_error)
    }

    async fn delete(&self, job_name: &str) -> Result<(), RegistryError> {
        commdash_db::delete_trigger(&self.pool, job_name)
            .await
            .map(|_removed| ())
            .map_err(map_db_error)
    }

    async fn list_for_merchant(
        &self,
        merchant_id: &str,
    ) -> Result<Vec<TriggerSpec>, RegistryError> {
        let rows = commdash_db::list_triggers_for_merchant(&self.pool, merchant_id)
            .await
            .map_err(map_db_error)?;

        rows.into_iter()
            .map(|row| {
                let stage = row
                    .stage
                    .parse::<Stage>()
                    .map_err(RegistryError::Backend)?;
                Ok(TriggerSpec {
                    job_name: row.job_name,
                    cron_expression: row.cron_expression,
                    merchant_id: row.merchant_id,
                    stage,
                })
            })
            .collect()
    }
}

fn map_db_error(err: DbError) -> RegistryError {
    match err {
        DbError::DuplicateTrigger(name) => RegistryError::Duplicate(name),
        other => RegistryError::Backend(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[sqlx::test(migrations = "../../migrations")]
    async fn db_registry_round_trips_specs(pool: PgPool) {
        let registry = DbTriggerRegistry::new(pool);
        let spec = TriggerSpec {
            job_name: "fetch-sales-data-m1".to_string(),
            cron_expression: "1 2 * * *".to_string(),
            merchant_id: "m1".to_string(),
            stage: Stage::Fetch,
        };

        registry.create(&spec).await.expect("create");

        let dup = registry.create(&spec).await;
        assert!(matches!(dup, Err(RegistryError::Duplicate(ref n)) if n == &spec.job_name));

        let listed = registry.list_for_merchant("m1").await.expect("list");
        assert_eq!(listed, vec![spec.clone()]);

        registry.delete(&spec.job_name).await.expect("delete");
        registry
            .delete(&spec.job_name)
            .await
            .expect("second delete is success");
        assert!(registry.list_for_merchant("m1").await.expect("list").is_empty());
    }
}
