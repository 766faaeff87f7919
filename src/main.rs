use anyhow::Result;
use receipt_ocr::config::AppConfig;
use receipt_ocr::db;
use receipt_ocr::observability::{self, HealthCheckDeps};
use receipt_ocr::server::{run_api_server, AppState};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file first
    dotenvy::dotenv().ok();

    // Load and validate configuration early
    let config = AppConfig::from_env().map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    // Create database connection pool when persistence is configured
    let db_pool = if config.database.enabled() {
        let pool = db::create_pool(&config.database).await?;
        db::init_database_schema(&pool).await?;
        Some(pool)
    } else {
        None
    };

    // Assemble shared application state
    let state = Arc::new(AppState::new(config, db_pool)?);

    // Initialize complete observability stack with health checks (metrics, tracing, logging)
    observability::init_observability_with_health_checks(
        &state.config.observability,
        HealthCheckDeps {
            db_pool: state.db_pool.clone(),
            results: Some(Arc::clone(&state.results)),
            ocr_languages: state.config.ocr.languages.clone(),
        },
    )
    .await?;

    info!("{}", state.config.summary());

    // Serve the receipt API until interrupted
    tokio::select! {
        result = run_api_server(Arc::clone(&state)) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, stopping receipt API");
            Ok(())
        }
    }
}
