//! Contracts for the external collaborators the stage handlers call out to.
//!
//! The POS sales API and the report renderer are external systems; these
//! traits are the narrow seams the pipeline sees. Concrete HTTP
//! implementations live in `commdash-server`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// One employee's sales and commission figures for a data period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeSales {
    pub employee_id: String,
    pub employee_name: String,
    pub total_sales: Decimal,
    pub commission_amount: Decimal,
}

/// A reference to a finished report artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportDocument {
    pub url: String,
}

#[async_trait]
pub trait SalesDataProvider: Send + Sync {
    /// Fetches per-employee sales figures for `[period_start, period_end)`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on transport, API, or decode failure.
    async fn fetch(
        &self,
        merchant_id: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<Vec<EmployeeSales>, ProviderError>;
}

#[async_trait]
pub trait ReportRenderer: Send + Sync {
    /// Renders a commission report and returns a reference to the artifact.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on transport, API, or decode failure.
    async fn render(
        &self,
        merchant_id: &str,
        period_description: &str,
        rows: &[EmployeeSales],
    ) -> Result<ReportDocument, ProviderError>;
}
