//! Observability module for centralized metrics, tracing, and logging setup.
//!
//! This module provides:
//! - Metrics collection and Prometheus export
//! - Distributed tracing with OpenTelemetry
//! - Structured logging with configurable levels
//! - Health check endpoints for monitoring

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use leptess::LepTess;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use opentelemetry::global;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::Sampler;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tracing_subscriber::prelude::*;

use crate::observability_config::ObservabilityConfig;
use crate::results::ResultStore;

/// Dependencies probed by the readiness endpoint.
#[derive(Clone)]
pub struct HealthCheckDeps {
    pub db_pool: Option<PgPool>,
    pub results: Option<Arc<ResultStore>>,
    pub ocr_languages: String,
}

/// Initialize the complete observability stack with health check dependencies
pub async fn init_observability_with_health_checks(
    config: &ObservabilityConfig,
    deps: HealthCheckDeps,
) -> Result<()> {
    // Validate configuration
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid observability configuration: {}", e))?;

    // Initialize tracing first
    init_tracing_with_config(config)?;

    // Initialize metrics
    let metrics_handle = init_metrics_with_config(config)?;

    // Initialize OpenTelemetry tracing
    init_opentelemetry_tracing_with_config(config)?;

    // Start metrics server with health checks
    start_metrics_server(metrics_handle, config.metrics_port, deps.clone()).await?;

    tracing::info!(
        environment = %config.environment,
        has_db_pool = %deps.db_pool.is_some(),
        metrics_port = %config.metrics_port,
        "Observability stack initialized successfully"
    );
    Ok(())
}

/// Initialize structured logging with tracing and configuration
fn init_tracing_with_config(config: &ObservabilityConfig) -> Result<()> {
    // Create the filter based on configuration
    let mut filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("receipt_ocr={}", config.log_level).parse()?)
        .add_directive("sqlx=warn".parse()?)
        .add_directive("hyper=warn".parse()?);

    // Add observability-specific log level
    if let Ok(obs_log) = std::env::var("OBSERVABILITY_LOG_LEVEL") {
        filter = filter.add_directive(format!("receipt_ocr::observability={}", obs_log).parse()?);
    }

    // Initialize based on environment (pretty for development, JSON for others)
    if config.is_development()
        || std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string()) == "pretty"
    {
        // Pretty formatting for development
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_thread_names(false),
            )
            .init();
    } else {
        // JSON formatting for production (default)
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .init();
    }

    tracing::info!(
        environment = %config.environment,
        log_level = %config.log_level,
        "Tracing initialized with structured logging"
    );
    Ok(())
}

/// Initialize metrics collection with Prometheus exporter and configuration
fn init_metrics_with_config(config: &ObservabilityConfig) -> Result<PrometheusHandle> {
    // Create Prometheus recorder
    let builder = PrometheusBuilder::new();
    let handle = builder.install_recorder()?;

    tracing::info!(
        metrics_enabled = %config.enable_metrics_export,
        "Metrics collection initialized"
    );
    Ok(handle)
}

/// Initialize OpenTelemetry distributed tracing with configuration
fn init_opentelemetry_tracing_with_config(config: &ObservabilityConfig) -> Result<()> {
    // Only initialize if OTLP endpoint is configured
    if let Some(endpoint) = &config.otlp_endpoint {
        // Configure OTLP exporter
        let otlp_exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint.clone())
            .build()?;

        // Configure tracer provider with batch exporter
        let builder =
            opentelemetry_sdk::trace::SdkTracerProvider::builder().with_batch_exporter(otlp_exporter);
        let tracer_provider = if config.enable_trace_sampling {
            builder
                .with_sampler(Sampler::TraceIdRatioBased(config.trace_sampling_ratio))
                .build()
        } else {
            builder.build()
        };

        // Set global tracer provider
        global::set_tracer_provider(tracer_provider);

        tracing::info!(
            otlp_endpoint = %endpoint,
            trace_sampling_enabled = %config.enable_trace_sampling,
            trace_sampling_ratio = %config.trace_sampling_ratio,
            "OpenTelemetry tracing initialized with OTLP export"
        );
    } else {
        tracing::info!("OpenTelemetry tracing disabled (no OTLP endpoint configured)");
    }

    Ok(())
}

async fn start_metrics_server(
    metrics_handle: PrometheusHandle,
    port: u16,
    deps: HealthCheckDeps,
) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Starting metrics server with health checks on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on {}", addr);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let metrics_handle = metrics_handle.clone();
                    let deps = deps.clone();

                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);

                        let service = hyper::service::service_fn(
                            move |req: hyper::Request<hyper::body::Incoming>| {
                                let metrics_handle = metrics_handle.clone();
                                let deps = deps.clone();
                                async move {
                                    match (req.method(), req.uri().path()) {
                                        (&hyper::Method::GET, "/metrics") => {
                                            // Ensure at least one metric is registered to avoid empty render
                                            metrics::gauge!("uptime_seconds").set(1.0);
                                            let metrics = metrics_handle.render();
                                            let mut response = hyper::Response::new(metrics);
                                            response.headers_mut().insert(
                                                "content-type",
                                                hyper::header::HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
                                            );
                                            Ok::<_, std::convert::Infallible>(response)
                                        }
                                        (&hyper::Method::GET, "/health/live") => {
                                            // Liveness probe - just check if the service is running
                                            Ok(hyper::Response::new("OK".to_string()))
                                        }
                                        (&hyper::Method::GET, "/health/ready") => {
                                            // Readiness probe - check if all dependencies are available
                                            match perform_readiness_checks(&deps).await {
                                                Ok(_) => Ok(hyper::Response::new("OK".to_string())),
                                                Err(e) => {
                                                    let mut response = hyper::Response::new(
                                                        format!("NOT READY: {}", e),
                                                    );
                                                    *response.status_mut() =
                                                        hyper::StatusCode::SERVICE_UNAVAILABLE;
                                                    Ok(response)
                                                }
                                            }
                                        }
                                        _ => {
                                            let mut response =
                                                hyper::Response::new("Not Found".to_string());
                                            *response.status_mut() = hyper::StatusCode::NOT_FOUND;
                                            Ok(response)
                                        }
                                    }
                                }
                            },
                        );

                        if let Err(err) = http1::Builder::new().serve_connection(io, service).await
                        {
                            tracing::error!("Error serving connection: {:?}", err);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Error accepting connection: {}", e);
                }
            }
        }
    });

    Ok(())
}

/// Create a span for OCR operations
pub fn ocr_span(operation: &str) -> tracing::Span {
    tracing::info_span!("ocr_operation", operation = operation, component = "ocr")
}

/// Create a tracing span for a receipt reconstruction pass
pub fn parse_span(file: &str) -> tracing::Span {
    tracing::info_span!("parse_operation", file = file, component = "parser")
}

/// Record OCR operation metrics
pub fn record_ocr_metrics(success: bool, duration: std::time::Duration, image_size: u64) {
    metrics::counter!("ocr_operations_total", "result" => if success { "success" } else { "failure" }).increment(1);
    metrics::histogram!("ocr_duration_seconds").record(duration.as_secs_f64());
    metrics::histogram!("ocr_image_size_bytes").record(image_size as f64);
}

/// Parameters for OCR performance metrics recording
#[derive(Debug, Clone)]
pub struct OcrPerformanceMetricsParams {
    pub success: bool,
    pub total_duration: std::time::Duration,
    pub ocr_duration: std::time::Duration,
    pub image_size: u64,
    pub attempt_count: u32,
    pub memory_estimate_mb: f64,
}

/// Record detailed OCR performance metrics including memory and throughput
pub fn record_ocr_performance_metrics(params: OcrPerformanceMetricsParams) {
    let OcrPerformanceMetricsParams {
        success,
        total_duration,
        ocr_duration,
        image_size,
        attempt_count,
        memory_estimate_mb,
    } = params;

    // Basic metrics
    record_ocr_metrics(success, total_duration, image_size);

    // Detailed performance metrics
    metrics::histogram!("ocr_processing_duration_seconds").record(ocr_duration.as_secs_f64());
    metrics::histogram!("ocr_overhead_duration_seconds")
        .record(total_duration.saturating_sub(ocr_duration).as_secs_f64());
    metrics::histogram!("ocr_memory_estimate_mb").record(memory_estimate_mb);
    metrics::histogram!("ocr_retry_attempts").record(attempt_count as f64);

    // Throughput metrics (operations per second)
    let ops_per_sec = if total_duration.as_secs_f64() > 0.0 {
        1.0 / total_duration.as_secs_f64()
    } else {
        0.0
    };
    metrics::histogram!("ocr_throughput_ops_per_sec").record(ops_per_sec);

    // Efficiency metrics (processing time vs total time)
    let efficiency = if total_duration.as_secs_f64() > 0.0 {
        ocr_duration.as_secs_f64() / total_duration.as_secs_f64()
    } else {
        0.0
    };
    metrics::histogram!("ocr_efficiency_ratio").record(efficiency);
}

/// Record a request against the remote recognition service
pub fn record_remote_ocr_request(engine: &str, success: bool, duration: std::time::Duration) {
    let engine = engine.to_string();
    metrics::counter!("remote_ocr_requests_total", "engine" => engine, "result" => if success { "success" } else { "failure" }).increment(1);
    metrics::histogram!("remote_ocr_duration_seconds").record(duration.as_secs_f64());
}

/// Record reconstruction metrics for one parsed receipt
pub fn record_parse_metrics(item_count: usize, total_found: bool) {
    metrics::counter!("parse_operations_total", "total" => if total_found { "found" } else { "missing" }).increment(1);
    metrics::histogram!("parse_items_per_receipt").record(item_count as f64);
}

/// Record an API request against the receipt endpoints
pub fn record_api_request(endpoint: &str, status: u16) {
    // Unmatched paths share one label so label cardinality stays bounded.
    let endpoint = match endpoint {
        "/ocr" | "/status" | "/" => endpoint.to_string(),
        _ => "other".to_string(),
    };
    let status = status.to_string();
    metrics::counter!("api_requests_total", "endpoint" => endpoint, "status" => status)
        .increment(1);
}

/// Record database operation metrics
pub fn record_db_metrics(operation: &str, duration: std::time::Duration) {
    let operation = operation.to_string();
    metrics::counter!("db_operations_total", "operation" => operation).increment(1);
    metrics::histogram!("db_operation_duration_seconds").record(duration.as_secs_f64());
}

/// Update circuit breaker state metric
pub fn update_circuit_breaker_state(is_open: bool) {
    metrics::gauge!("circuit_breaker_state").set(if is_open { 1.0 } else { 0.0 });
}

/// Perform comprehensive readiness checks
pub async fn perform_readiness_checks(deps: &HealthCheckDeps) -> Result<()> {
    // Check database connectivity
    if let Some(pool) = &deps.db_pool {
        check_database_health(pool).await?;
    }

    // Check OCR engine availability
    check_ocr_health(&deps.ocr_languages)?;

    // Check the results store accepts writes
    if let Some(results) = &deps.results {
        check_results_store_health(results)?;
    }

    Ok(())
}

/// Check database connectivity and basic query capability
pub async fn check_database_health(pool: &PgPool) -> Result<()> {
    // Simple query to test database connectivity
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .map_err(|e| anyhow::anyhow!("Database health check failed: {}", e))?;

    tracing::debug!("Database health check passed");
    Ok(())
}

/// Check OCR engine availability by testing Tesseract initialization
pub fn check_ocr_health(languages: &str) -> Result<()> {
    // Try to create a minimal Tesseract instance to test OCR availability
    // This is a lightweight check that doesn't require actual image processing
    match LepTess::new(None, languages) {
        Ok(_) => {
            tracing::debug!("OCR health check passed");
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!("OCR health check failed: {}", e)),
    }
}

/// Check the results store can create and write its results file
pub fn check_results_store_health(results: &ResultStore) -> Result<()> {
    results
        .validate_writable()
        .map_err(|e| anyhow::anyhow!("Results store health check failed: {}", e))?;

    tracing::debug!("Results store health check passed");
    Ok(())
}
