use chrono::NaiveDate;
use thiserror::Error;

use commdash_core::{CoreError, Stage};
use commdash_db::DbError;

/// Errors from the trigger registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The job name is already registered; callers must delete first when
    /// updating.
    #[error("trigger {0} is already registered")]
    Duplicate(String),

    /// The backing execution service or store rejected the operation.
    #[error("trigger backend error: {0}")]
    Backend(String),
}

/// Errors from the external sales/rendering providers.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport-level failure reaching the provider.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The provider answered with an application-level error.
    #[error("upstream API error: {0}")]
    Api(String),

    /// The response body could not be decoded into the expected shape.
    #[error("response decode error: {0}")]
    Deserialize(String),
}

/// Errors surfaced by the orchestrator's public operations.
///
/// `status` and `delete_pipeline` never return these; they degrade to
/// informative payloads instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("merchant id must not be empty")]
    InvalidMerchantId,

    #[error(transparent)]
    Validation(#[from] CoreError),

    /// One of the three trigger registrations failed after earlier ones
    /// succeeded. No rollback is attempted; `registered` names the stages
    /// whose triggers now exist.
    #[error("pipeline setup failed at the {stage} trigger (registered so far: {registered:?})")]
    PartialSetup {
        registered: Vec<Stage>,
        stage: Stage,
        #[source]
        source: RegistryError,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("database error: {0}")]
    Db(#[from] DbError),
}

/// Errors surfaced by stage handlers to the trigger runtime.
#[derive(Debug, Error)]
pub enum StageError {
    /// The merchant's configuration is gone, typically because the pipeline
    /// was deleted after this invocation was already dispatched.
    #[error("no schedule configuration for merchant {0}")]
    ConfigNotFound(String),

    /// A stored configuration value failed validation when read back.
    #[error("invalid stored configuration: {0}")]
    InvalidConfig(#[source] CoreError),

    /// The upstream stage has not produced a handoff record for this
    /// merchant-day.
    #[error("no pending {step} record for merchant {merchant_id} on {pipeline_date}")]
    NoPendingRecord {
        merchant_id: String,
        step: Stage,
        pipeline_date: NaiveDate,
    },

    /// Another invocation claimed the record first.
    #[error("lost the claim race for stage record {id}")]
    ClaimConflict { id: i64 },

    #[error("upstream provider failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("database error: {0}")]
    Db(DbError),
}

impl From<DbError> for StageError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::ClaimConflict { id } => StageError::ClaimConflict { id },
            other => StageError::Db(other),
        }
    }
}
