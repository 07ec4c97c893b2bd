//! HTTP implementations of the pipeline's external collaborators.
//!
//! Wraps `reqwest` with typed request/response shapes for the POS sales API
//! and the report renderer service. Transport failures, non-2xx statuses,
//! and malformed bodies map onto the corresponding [`ProviderError`]
//! variants so the stage handlers stay transport-agnostic.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};

use commdash_pipeline::{
    EmployeeSales, ProviderError, ReportDocument, ReportRenderer, SalesDataProvider,
};

/// Builds a `reqwest` client with sane timeouts shared by both providers.
fn build_client(timeout_secs: u64) -> Result<Client, ProviderError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .user_agent("commdash/0.1 (report-pipeline)")
        .build()
        .map_err(|e| ProviderError::Http(e.to_string()))
}

// Ensure the base URL ends with exactly one slash so Url::join appends
// path segments instead of replacing the last one.
fn parse_base_url(base_url: &str) -> Result<Url, ProviderError> {
    let normalised = format!("{}/", base_url.trim_end_matches('/'));
    Url::parse(&normalised).map_err(|e| ProviderError::Api(format!("invalid base URL '{base_url}': {e}")))
}

/// POS sales API client.
///
/// `GET {base}/v1/merchants/{merchant_id}/sales?period_start=..&period_end=..`
/// returning `{"sales": [...]}`.
pub struct HttpSalesDataProvider {
    client: Client,
    base_url: Url,
}

#[derive(Debug, Deserialize)]
struct SalesResponse {
    sales: Vec<EmployeeSales>,
}

impl HttpSalesDataProvider {
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the client cannot be built or the base
    /// URL does not parse.
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client(timeout_secs)?,
            base_url: parse_base_url(base_url)?,
        })
    }
}

#[async_trait]
impl SalesDataProvider for HttpSalesDataProvider {
    async fn fetch(
        &self,
        merchant_id: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<Vec<EmployeeSales>, ProviderError> {
        let mut url = self
            .base_url
            .join(&format!("v1/merchants/{merchant_id}/sales"))
            .map_err(|e| ProviderError::Api(format!("invalid merchant path: {e}")))?;
        url.query_pairs_mut()
            .append_pair("period_start", &period_start.to_rfc3339())
            .append_pair("period_end", &period_end.to_rfc3339());

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, "sales API", &body));
        }

        let body: SalesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Deserialize(format!("sales response: {e}")))?;
        Ok(body.sales)
    }
}

/// Report renderer client.
///
/// `POST {base}/v1/reports` with the merchant, period description, and rows;
/// returns `{"url": "..."}`.
pub struct HttpReportRenderer {
    client: Client,
    base_url: Url,
}

#[derive(Debug, Serialize)]
struct RenderRequest<'a> {
    merchant_id: &'a str,
    period_description: &'a str,
    rows: &'a [EmployeeSales],
}

impl HttpReportRenderer {
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the client cannot be built or the base
    /// URL does not parse.
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client(timeout_secs)?,
            base_url: parse_base_url(base_url)?,
        })
    }
}

#[async_trait]
impl ReportRenderer for HttpReportRenderer {
    async fn render(
        &self,
        merchant_id: &str,
        period_description: &str,
        rows: &[EmployeeSales],
    ) -> Result<ReportDocument, ProviderError> {
        let url = self
            .base_url
            .join("v1/reports")
            .map_err(|e| ProviderError::Api(format!("invalid reports path: {e}")))?;

        let response = self
            .client
            .post(url)
            .json(&RenderRequest {
                merchant_id,
                period_description,
                rows,
            })
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, "renderer", &body));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::Deserialize(format!("render response: {e}")))
    }
}

/// 4xx means the service understood us and said no; 5xx and the rest are
/// transport-level trouble.
fn classify_status(status: StatusCode, service: &str, body: &str) -> ProviderError {
    let detail = body.chars().take(200).collect::<String>();
    if status.is_client_error() {
        ProviderError::Api(format!("{service} returned {status}: {detail}"))
    } else {
        ProviderError::Http(format!("{service} returned {status}: {detail}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_rows() -> Vec<EmployeeSales> {
        vec![EmployeeSales {
            employee_id: "emp-1".to_string(),
            employee_name: "Dana".to_string(),
            total_sales: Decimal::new(150_000, 2),
            commission_amount: Decimal::new(7_500, 2),
        }]
    }

    #[tokio::test]
    async fn fetch_parses_sales_and_sends_period_bounds() {
        let server = MockServer::start().await;
        let start: DateTime<Utc> = "2026-03-09T02:00:00Z".parse().expect("start");
        let end: DateTime<Utc> = "2026-03-10T02:00:00Z".parse().expect("end");

        Mock::given(method("GET"))
            .and(path("/v1/merchants/shop-1/sales"))
            .and(query_param("period_start", start.to_rfc3339()))
            .and(query_param("period_end", end.to_rfc3339()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sales": [{
                    "employee_id": "emp-1",
                    "employee_name": "Dana",
                    "total_sales": "1500.00",
                    "commission_amount": "75.00"
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = HttpSalesDataProvider::new(&server.uri(), 5).expect("provider");
        let rows = provider.fetch("shop-1", start, end).await.expect("fetch");

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].employee_id, "emp-1");
        assert_eq!(rows[0].total_sales, Decimal::new(150_000, 2));
    }

    #[tokio::test]
    async fn fetch_maps_4xx_to_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such merchant"))
            .mount(&server)
            .await;

        let provider = HttpSalesDataProvider::new(&server.uri(), 5).expect("provider");
        let err = provider
            .fetch("missing", Utc::now(), Utc::now())
            .await
            .expect_err("should fail");

        assert!(matches!(err, ProviderError::Api(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn fetch_maps_5xx_to_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let provider = HttpSalesDataProvider::new(&server.uri(), 5).expect("provider");
        let err = provider
            .fetch("shop-1", Utc::now(), Utc::now())
            .await
            .expect_err("should fail");

        assert!(matches!(err, ProviderError::Http(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn fetch_maps_bad_body_to_deserialize_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let provider = HttpSalesDataProvider::new(&server.uri(), 5).expect("provider");
        let err = provider
            .fetch("shop-1", Utc::now(), Utc::now())
            .await
            .expect_err("should fail");

        assert!(matches!(err, ProviderError::Deserialize(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn render_posts_rows_and_returns_document() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/reports"))
            .and(body_partial_json(serde_json::json!({
                "merchant_id": "shop-1",
                "period_description": "Mar 9 - Mar 10",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "url": "https://reports.example.com/shop-1/2026-03-10.pdf"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let renderer = HttpReportRenderer::new(&server.uri(), 5).expect("renderer");
        let doc = renderer
            .render("shop-1", "Mar 9 - Mar 10", &sample_rows())
            .await
            .expect("render");

        assert_eq!(doc.url, "https://reports.example.com/shop-1/2026-03-10.pdf");
    }

    #[test]
    fn base_url_trailing_slashes_are_normalised() {
        let provider = HttpSalesDataProvider::new("https://pos.example.com///", 5).expect("provider");
        assert_eq!(provider.base_url.as_str(), "https://pos.example.com/");
    }
}
