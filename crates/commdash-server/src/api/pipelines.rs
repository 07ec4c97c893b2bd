//! Pipeline lifecycle endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;

use commdash_pipeline::{PipelineError, RegistryError};

use super::{ApiError, ApiResponse, AppState, ResponseMeta};
use crate::middleware::RequestId;

#[derive(Debug, Deserialize)]
pub(super) struct CreatePipelineRequest {
    merchant_id: String,
    report_time: String,
    timezone: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct UpdatePipelineRequest {
    report_time: String,
    timezone: String,
}

fn map_pipeline_error(request_id: String, error: &PipelineError) -> ApiError {
    match error {
        PipelineError::InvalidMerchantId | PipelineError::Validation(_) => {
            ApiError::new(request_id, "validation_error", error.to_string())
        }
        PipelineError::Registry(RegistryError::Duplicate(_)) => {
            ApiError::new(request_id, "conflict", error.to_string())
        }
        PipelineError::PartialSetup { .. } => {
            tracing::error!(error = %error, "pipeline setup failed partway");
            ApiError::new(request_id, "partial_pipeline_failure", error.to_string())
        }
        PipelineError::Registry(_) | PipelineError::Db(_) => {
            tracing::error!(error = %error, "pipeline operation failed");
            ApiError::new(request_id, "internal_error", "pipeline operation failed")
        }
    }
}

/// `POST /api/v1/pipelines`
pub(super) async fn create_pipeline(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<CreatePipelineRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state
        .orchestrator
        .create_pipeline(&body.merchant_id, &body.report_time, &body.timezone)
        .await
        .map_err(|e| map_pipeline_error(req_id.0.clone(), &e))?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse {
            data: created,
            meta: ResponseMeta::new(req_id.0),
        }),
    ))
}

/// `PUT /api/v1/pipelines/{merchant_id}`
pub(super) async fn update_pipeline(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(merchant_id): Path<String>,
    Json(body): Json<UpdatePipelineRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state
        .orchestrator
        .update_pipeline(&merchant_id, &body.report_time, &body.timezone)
        .await
        .map_err(|e| map_pipeline_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse {
        data: created,
        meta: ResponseMeta::new(req_id.0),
    }))
}

/// `DELETE /api/v1/pipelines/{merchant_id}` — idempotent, never errors.
pub(super) async fn delete_pipeline(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(merchant_id): Path<String>,
) -> impl IntoResponse {
    let deleted = state.orchestrator.delete_pipeline(&merchant_id).await;

    Json(ApiResponse {
        data: deleted,
        meta: ResponseMeta::new(req_id.0),
    })
}

/// `GET /api/v1/pipelines/{merchant_id}/status` — degrades, never errors.
pub(super) async fn pipeline_status(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(merchant_id): Path<String>,
) -> impl IntoResponse {
    let status = state.orchestrator.status(&merchant_id).await;

    Json(ApiResponse {
        data: status,
        meta: ResponseMeta::new(req_id.0),
    })
}

/// `POST /api/v1/pipelines/bulk-setup`
pub(super) async fn bulk_setup(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Result<impl IntoResponse, ApiError> {
    let items = state
        .orchestrator
        .bulk_setup()
        .await
        .map_err(|e| map_pipeline_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse {
        data: items,
        meta: ResponseMeta::new(req_id.0),
    }))
}

#[cfg(test)]
mod tests {
    use super::super::{build_app, default_rate_limit_state, test_support};
    use crate::middleware::AuthState;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        serde_json::from_slice(&bytes).expect("json parse")
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn create_pipeline_returns_three_triggers(pool: sqlx::PgPool) {
        let auth = AuthState::from_env(true).expect("auth");
        let app = build_app(
            test_support::app_state(pool).await,
            auth,
            default_rate_limit_state(),
        );

        let response = app
            .oneshot(post_json(
                "/api/v1/pipelines",
                serde_json::json!({
                    "merchant_id": "shop-create",
                    "report_time": "21:00:00",
                    "timezone": "pacific"
                }),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        let triggers = json["data"]["triggers"].as_array().expect("triggers array");
        assert_eq!(triggers.len(), 3);
        assert_eq!(
            triggers[0]["job_name"].as_str(),
            Some("schedule-data-fetch-shop-create")
        );
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn create_pipeline_rejects_bad_timezone(pool: sqlx::PgPool) {
        let auth = AuthState::from_env(true).expect("auth");
        let app = build_app(
            test_support::app_state(pool).await,
            auth,
            default_rate_limit_state(),
        );

        let response = app
            .oneshot(post_json(
                "/api/v1/pipelines",
                serde_json::json!({
                    "merchant_id": "shop-bad-tz",
                    "report_time": "21:00:00",
                    "timezone": "mars/olympus-mons"
                }),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"].as_str(), Some("validation_error"));
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn status_of_unconfigured_merchant_is_ok_and_unconfigured(pool: sqlx::PgPool) {
        let auth = AuthState::from_env(true).expect("auth");
        let app = build_app(
            test_support::app_state(pool).await,
            auth,
            default_rate_limit_state(),
        );

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/pipelines/nobody/status")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["data"]["is_configured"].as_bool(), Some(false));
        assert!(json["data"]["error"].is_null());
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn delete_is_idempotent_and_returns_ok(pool: sqlx::PgPool) {
        let auth = AuthState::from_env(true).expect("auth");
        let state = test_support::app_state(pool).await;
        let app = build_app(state, auth, default_rate_limit_state());

        let delete = || {
            Request::builder()
                .method("DELETE")
                .uri("/api/v1/pipelines/never-existed")
                .body(Body::empty())
                .expect("request")
        };

        let first = app.clone().oneshot(delete()).await.expect("response");
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.oneshot(delete()).await.expect("response");
        assert_eq!(second.status(), StatusCode::OK);
        let json = body_json(second).await;
        assert_eq!(json["data"]["failed"].as_array().map(Vec::len), Some(0));
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn create_then_status_reports_configured(pool: sqlx::PgPool) {
        let auth = AuthState::from_env(true).expect("auth");
        let state = test_support::app_state(pool).await;
        let app = build_app(state, auth, default_rate_limit_state());

        let created = app
            .clone()
            .oneshot(post_json(
                "/api/v1/pipelines",
                serde_json::json!({
                    "merchant_id": "shop-status",
                    "report_time": "08:30",
                    "timezone": "hawaii"
                }),
            ))
            .await
            .expect("response");
        assert_eq!(created.status(), StatusCode::CREATED);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/pipelines/shop-status/status")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["data"]["is_configured"].as_bool(), Some(true));
        assert_eq!(json["data"]["report_time"].as_str(), Some("08:30:00"));
        assert_eq!(json["data"]["timezone"].as_str(), Some("hawaii"));
        assert_eq!(
            json["data"]["triggers"].as_array().map(Vec::len),
            Some(3)
        );
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn bulk_setup_reports_per_merchant_results(pool: sqlx::PgPool) {
        commdash_db::upsert_schedule_config(&pool, "bulk-a", "Shop A", "09:00:00", "eastern")
            .await
            .expect("seed bulk-a");
        commdash_db::upsert_schedule_config(&pool, "bulk-b", "Shop B", "10:15:00", "central")
            .await
            .expect("seed bulk-b");

        let auth = AuthState::from_env(true).expect("auth");
        let app = build_app(
            test_support::app_state(pool).await,
            auth,
            default_rate_limit_state(),
        );

        let response = app
            .oneshot(post_json(
                "/api/v1/pipelines/bulk-setup",
                serde_json::json!({}),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let items = json["data"].as_array().expect("items array");
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i["success"].as_bool() == Some(true)));
    }
}
