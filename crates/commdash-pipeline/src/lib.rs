//! Pipeline orchestration for recurring commission reports.
//!
//! A merchant's pipeline is three externally-scheduled triggers firing in
//! sequence each day (schedule, fetch, generate). This crate owns trigger
//! lifecycle management, the public orchestrator operations, and the stage
//! handlers that coordinate through persisted stage records.

pub mod error;
pub mod orchestrator;
pub mod providers;
pub mod registry;
pub mod stages;

pub use error::{PipelineError, ProviderError, RegistryError, StageError};
pub use orchestrator::{
    BulkSetupItem, PipelineCreated, PipelineDeleted, PipelineOrchestrator, PipelineStatus,
    TriggerInfo,
};
pub use providers::{EmployeeSales, ReportDocument, ReportRenderer, SalesDataProvider};
pub use registry::{DbTriggerRegistry, TriggerRegistry, TriggerSpec};
