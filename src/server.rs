//! # Receipt API Server
//!
//! HTTP surface of the receipt pipeline. Three endpoints:
//!
//! - `POST /ocr?file=<name>[&engine=<name>]` accepts raw image bytes, saves
//!   them under the media directory and dispatches recognition + parsing as a
//!   background task. Responds immediately with a processing acknowledgement.
//! - `GET /status[?file=<name>]` reports `no_results`, `processing` or `done`
//!   with the stored result(s).
//! - `GET /` returns a service descriptor.
//!
//! Runs on a plain hyper http1 accept loop, one spawned task per connection.
//! Responses carry permissive CORS headers so browser dashboards on other
//! origins can poll `/status` directly.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use http_body_util::{BodyExt, Limited};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::config::AppConfig;
use crate::engine::{RecognizerBackend, RemoteOcrClient};
use crate::errors::{error_logging, AppError};
use crate::instance_manager::OcrInstanceManager;
use crate::lexicon::{load_receipt_lexicon, ReceiptLexicon};
use crate::parser::parse_receipt;
use crate::path_validation;
use crate::results::{ResultEntry, ResultStatus, ResultStore};

/// Shared state behind every request handler.
pub struct AppState {
    pub config: AppConfig,
    pub instance_manager: OcrInstanceManager,
    pub circuit_breaker: CircuitBreaker,
    pub remote: RemoteOcrClient,
    pub results: Arc<ResultStore>,
    pub lexicon: ReceiptLexicon,
    pub db_pool: Option<PgPool>,
}

impl AppState {
    /// Assemble application state from validated configuration.
    pub fn new(config: AppConfig, db_pool: Option<PgPool>) -> Result<Self> {
        let remote = RemoteOcrClient::new(
            config.engine.remote_url.clone(),
            config.engine.remote_timeout_secs,
        )?;
        let results = Arc::new(ResultStore::new(
            &config.storage.results_path,
            &config.storage.debug_dir,
        ));
        let circuit_breaker = CircuitBreaker::new(config.ocr.recovery.clone());

        Ok(Self {
            config,
            instance_manager: OcrInstanceManager::new(),
            circuit_breaker,
            remote,
            results,
            lexicon: load_receipt_lexicon(),
            db_pool,
        })
    }
}

/// Run the receipt API server until the process stops.
pub async fn run_api_server(state: Arc<AppState>) -> Result<()> {
    let addr = format!(
        "{}:{}",
        state.config.server.bind_address, state.config.server.api_port
    );
    let addr: std::net::SocketAddr = addr
        .parse()
        .with_context(|| format!("Invalid API server address: {addr}"))?;

    // The storage directories must exist before the first upload arrives.
    tokio::fs::create_dir_all(&state.config.storage.media_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create media directory: {}",
                state.config.storage.media_dir
            )
        })?;
    tokio::fs::create_dir_all(&state.config.storage.debug_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create debug directory: {}",
                state.config.storage.debug_dir
            )
        })?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API server to {addr}"))?;
    info!("Receipt API listening on {}", addr);

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let state = Arc::clone(&state);

                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = hyper::service::service_fn(move |req: Request<Incoming>| {
                        let state = Arc::clone(&state);
                        async move {
                            Ok::<_, std::convert::Infallible>(route_request(req, state).await)
                        }
                    });

                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        error!("Error serving connection from {}: {:?}", peer, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {}", e);
            }
        }
    }
}

async fn route_request(req: Request<Incoming>, state: Arc<AppState>) -> Response<String> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match (&method, path.as_str()) {
        (&Method::POST, "/ocr") => handle_ocr_upload(req, &state).await,
        (&Method::GET, "/status") => handle_status(&req, &state),
        (&Method::GET, "/") => handle_index(&state),
        (&Method::OPTIONS, _) => json_response(StatusCode::NO_CONTENT, json!({})),
        _ => json_response(StatusCode::NOT_FOUND, json!({"error": "Not found"})),
    };

    crate::observability::record_api_request(path.as_str(), response.status().as_u16());
    response
}

/// Accept an uploaded receipt image and queue it for recognition.
async fn handle_ocr_upload(req: Request<Incoming>, state: &Arc<AppState>) -> Response<String> {
    let params = parse_query(req.uri().query());

    let Some(raw_name) = query_param(&params, "file").filter(|name| !name.is_empty()) else {
        return json_response(StatusCode::BAD_REQUEST, json!({"error": "No file uploaded"}));
    };

    // Engine names are matched case-insensitively at the HTTP boundary.
    let engine_name = query_param(&params, "engine")
        .map(str::to_lowercase)
        .unwrap_or_else(|| state.config.engine.default_engine.clone());
    let backend = match RecognizerBackend::parse(&engine_name) {
        Ok(backend) => backend,
        Err(AppError::InvalidInput(msg)) => {
            return json_response(StatusCode::BAD_REQUEST, json!({"error": msg}));
        }
        Err(e) => {
            return json_response(StatusCode::BAD_REQUEST, json!({"error": e.to_string()}));
        }
    };

    let file_name = path_validation::sanitize_filename(raw_name);
    if path_validation::validate_filename(&file_name).is_err() {
        return json_response(StatusCode::BAD_REQUEST, json!({"error": "Invalid filename"}));
    }

    let max_bytes = state.config.server.max_upload_bytes;
    let body = match Limited::new(req.into_body(), max_bytes).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<http_body_util::LengthLimitError>().is_some() => {
            return json_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                json!({"error": format!("Upload exceeds {max_bytes} bytes")}),
            );
        }
        Err(e) => {
            warn!("Failed to read upload body for {}: {}", file_name, e);
            return json_response(
                StatusCode::BAD_REQUEST,
                json!({"error": "Failed to read upload body"}),
            );
        }
    };
    if body.is_empty() {
        return json_response(StatusCode::BAD_REQUEST, json!({"error": "No file uploaded"}));
    }

    let media_dir = PathBuf::from(&state.config.storage.media_dir);
    let image_path = media_dir.join(&file_name);
    if let Err(e) = tokio::fs::write(&image_path, &body).await {
        error_logging::log_filesystem_error(
            &e,
            "save_upload",
            Some(image_path.to_string_lossy().as_ref()),
            Some(body.len() as u64),
        );
        return json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"error": "Storage unavailable"}),
        );
    }

    // Cheap validation now, so a broken upload fails the request instead of
    // the background task.
    let image_path = image_path.to_string_lossy().to_string();
    if let Err(e) = crate::ocr::validate_image_path(&image_path, &state.config.ocr) {
        warn!("Rejected upload {}: {}", file_name, e);
        return json_response(
            StatusCode::BAD_REQUEST,
            json!({"error": format!("Invalid image: {e}")}),
        );
    }
    if matches!(backend, RecognizerBackend::Tesseract)
        && !crate::ocr::is_supported_image_format(&image_path, &state.config.ocr)
    {
        return json_response(
            StatusCode::BAD_REQUEST,
            json!({"error": "Unsupported image format"}),
        );
    }

    info!(
        "OCR started for file {} with engine {}",
        file_name, engine_name
    );

    let task_state = Arc::clone(state);
    let task_file = file_name.clone();
    tokio::spawn(async move {
        process_receipt(task_state, backend, image_path, task_file).await;
    });

    json_response(
        StatusCode::OK,
        json!({"status": "processing", "file": file_name, "engine": engine_name}),
    )
}

/// Recognize, parse and store one uploaded receipt.
async fn process_receipt(
    state: Arc<AppState>,
    backend: RecognizerBackend,
    image_path: String,
    file_name: String,
) {
    let engine = backend.name().to_string();
    let started = std::time::Instant::now();

    let lines = match backend
        .recognize(
            &image_path,
            &state.config.ocr,
            &state.instance_manager,
            &state.circuit_breaker,
            &state.remote,
        )
        .await
    {
        Ok(lines) => lines,
        Err(e) => {
            error!("OCR failed for {} (engine {}): {}", file_name, engine, e);
            return;
        }
    };

    state.results.dump_debug_lines(&engine, &lines);

    let receipt = {
        let _span = crate::observability::parse_span(&file_name).entered();
        parse_receipt(&lines, &state.lexicon)
    };
    crate::observability::record_parse_metrics(receipt.items.len(), receipt.total.is_some());

    let entry = ResultEntry::new(file_name.clone(), engine.clone(), receipt);

    if let Err(e) = state.results.append(entry.clone()) {
        error!("Failed to store result for {}: {}", file_name, e);
        return;
    }

    if let Some(pool) = &state.db_pool {
        if let Err(e) = crate::db::store_receipt(pool, &entry).await {
            // Non-fatal: the results file already holds the entry.
            error_logging::log_database_error(
                &e,
                "store_receipt",
                Some(file_name.as_str()),
                Some(&[("engine", &engine as &dyn std::fmt::Display)]),
            );
        }
    }

    info!(
        "OCR completed for {} (engine {}) in {:.2}s",
        file_name,
        engine,
        started.elapsed().as_secs_f64()
    );
}

/// Report processing state for one file, or all stored results.
fn handle_status(req: &Request<Incoming>, state: &Arc<AppState>) -> Response<String> {
    let params = parse_query(req.uri().query());

    match query_param(&params, "file").filter(|file| !file.is_empty()) {
        Some(file) => match state.results.lookup(file) {
            ResultStatus::NoResults => json_response(StatusCode::OK, json!({"status": "no_results"})),
            ResultStatus::Processing => {
                json_response(StatusCode::OK, json!({"status": "processing"}))
            }
            ResultStatus::Done(entry) => {
                json_response(StatusCode::OK, json!({"status": "done", "result": entry}))
            }
        },
        None => match state.results.snapshot() {
            None => json_response(StatusCode::OK, json!({"status": "no_results"})),
            Some(all) => json_response(StatusCode::OK, json!({"status": "done", "results": all})),
        },
    }
}

/// Service descriptor for probes and dashboards.
fn handle_index(state: &Arc<AppState>) -> Response<String> {
    json_response(
        StatusCode::OK,
        json!({
            "status": "ready",
            "endpoint": "/ocr",
            "language": state.config.ocr.languages,
            "result_file": state.config.storage.results_path,
            "debug_dir": state.config.storage.debug_dir,
        }),
    )
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<String> {
    let mut response = Response::new(body.to_string());
    *response.status_mut() = status;

    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        hyper::header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        hyper::header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type,Authorization"),
    );
    headers.insert(
        hyper::header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET,PUT,POST,DELETE,OPTIONS"),
    );

    response
}

/// Split a raw query string into key/value pairs. Values are taken literally.
fn parse_query(query: Option<&str>) -> Vec<(String, String)> {
    query
        .map(|q| {
            q.split('&')
                .filter(|pair| !pair.is_empty())
                .map(|pair| match pair.split_once('=') {
                    Some((key, value)) => (key.to_string(), value.to_string()),
                    None => (pair.to_string(), String::new()),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn query_param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_pairs() {
        let params = parse_query(Some("file=receipt.jpg&engine=paddle"));
        assert_eq!(query_param(&params, "file"), Some("receipt.jpg"));
        assert_eq!(query_param(&params, "engine"), Some("paddle"));
        assert_eq!(query_param(&params, "missing"), None);
    }

    #[test]
    fn test_parse_query_handles_empty_and_valueless_keys() {
        assert!(parse_query(None).is_empty());
        assert!(parse_query(Some("")).is_empty());

        let params = parse_query(Some("flag&file=a.jpg"));
        assert_eq!(query_param(&params, "flag"), Some(""));
        assert_eq!(query_param(&params, "file"), Some("a.jpg"));
    }

    #[test]
    fn test_parse_query_keeps_first_occurrence() {
        let params = parse_query(Some("file=a.jpg&file=b.jpg"));
        assert_eq!(query_param(&params, "file"), Some("a.jpg"));
    }

    #[test]
    fn test_parse_query_preserves_equals_in_value() {
        let params = parse_query(Some("file=name=with=equals.jpg"));
        assert_eq!(query_param(&params, "file"), Some("name=with=equals.jpg"));
    }

    #[test]
    fn test_json_response_headers() {
        let response = json_response(StatusCode::OK, json!({"status": "ready"}));

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(
            response
                .headers()
                .get(hyper::header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "*"
        );

        let body: serde_json::Value = serde_json::from_str(response.body()).unwrap();
        assert_eq!(body["status"], "ready");
    }

    #[test]
    fn test_json_response_error_shape() {
        let response = json_response(
            StatusCode::BAD_REQUEST,
            json!({"error": "No file uploaded"}),
        );

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_str(response.body()).unwrap();
        assert_eq!(body["error"], "No file uploaded");
    }
}
