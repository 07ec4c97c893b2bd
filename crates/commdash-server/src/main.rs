mod api;
mod middleware;
mod providers;
mod scheduler;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use commdash_pipeline::{PipelineOrchestrator, ReportRenderer, SalesDataProvider};

use crate::{
    api::{build_app, default_rate_limit_state, AppState},
    middleware::AuthState,
    providers::{HttpReportRenderer, HttpSalesDataProvider},
    scheduler::{LiveTriggerRegistry, Providers, TriggerRuntime},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(commdash_core::load_app_config()?);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pool_config = commdash_db::PoolConfig::from_app_config(&config);
    let pool = commdash_db::connect_pool(&config.database_url, pool_config).await?;
    commdash_db::run_migrations(&pool).await?;

    let sales: Arc<dyn SalesDataProvider> = Arc::new(
        HttpSalesDataProvider::new(&config.pos_api_base_url, config.pos_api_timeout_secs)
            .map_err(|e| anyhow::anyhow!("sales provider: {e}"))?,
    );
    let renderer: Arc<dyn ReportRenderer> = Arc::new(
        HttpReportRenderer::new(&config.renderer_base_url, config.renderer_timeout_secs)
            .map_err(|e| anyhow::anyhow!("report renderer: {e}"))?,
    );

    let runtime =
        TriggerRuntime::start(pool.clone(), Arc::new(Providers { sales, renderer })).await?;
    let registry = LiveTriggerRegistry::new(pool.clone(), runtime);
    let orchestrator = Arc::new(PipelineOrchestrator::new(pool.clone(), registry));

    let auth = AuthState::from_env(matches!(
        config.env,
        commdash_core::Environment::Development
    ))?;
    let app = build_app(AppState { pool, orchestrator }, auth, default_rate_limit_state());

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "commdash server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
