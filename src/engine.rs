//! # Recognition Engine Dispatch
//!
//! A receipt can be recognized by the embedded Tesseract stack or by a remote
//! recognition service speaking HTTP (PaddleOCR, EasyOCR, docTR, TrOCR or
//! keras-ocr behind a line-extraction endpoint). The engine is chosen per
//! request via the `engine` query parameter; unknown names are rejected at the
//! upload boundary before any work is queued.
//!
//! Whatever the engine, the output contract is the same: the receipt's text
//! lines, trimmed and non-empty, in reading order. Everything downstream
//! (parsing, storage) is engine-agnostic.

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::errors::{error_logging, AppError};
use crate::instance_manager::OcrInstanceManager;
use crate::ocr_config::OcrConfig;
use crate::ocr_errors::OcrError;

/// Engine used when a request does not name one.
pub const DEFAULT_ENGINE: &str = "tesseract";

/// Engine names accepted by the service.
pub const SUPPORTED_ENGINES: &[&str] = &[
    "tesseract",
    "paddle",
    "easyocr",
    "doctr",
    "trocr",
    "kerasocr",
];

/// A recognition backend resolved from an engine name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerBackend {
    /// Embedded Tesseract stack (instance pool, retries, circuit breaker)
    Tesseract,
    /// Remote recognition service addressed by engine name
    Remote { engine: String },
}

impl RecognizerBackend {
    /// Resolve an engine name to a backend.
    ///
    /// Returns `AppError::InvalidInput` for names outside [`SUPPORTED_ENGINES`],
    /// so the HTTP layer can answer with a 400 before accepting the upload.
    pub fn parse(name: &str) -> Result<Self, AppError> {
        if !SUPPORTED_ENGINES.contains(&name) {
            return Err(AppError::InvalidInput(format!(
                "Unknown OCR engine: {} (supported: {})",
                name,
                SUPPORTED_ENGINES.join(", ")
            )));
        }

        if name == "tesseract" {
            Ok(RecognizerBackend::Tesseract)
        } else {
            Ok(RecognizerBackend::Remote {
                engine: name.to_string(),
            })
        }
    }

    /// The engine name this backend was resolved from.
    pub fn name(&self) -> &str {
        match self {
            RecognizerBackend::Tesseract => "tesseract",
            RecognizerBackend::Remote { engine } => engine,
        }
    }

    /// Recognize a receipt image and return its text lines in reading order.
    pub async fn recognize(
        &self,
        image_path: &str,
        ocr_config: &OcrConfig,
        instance_manager: &OcrInstanceManager,
        circuit_breaker: &CircuitBreaker,
        remote: &RemoteOcrClient,
    ) -> Result<Vec<String>, OcrError> {
        match self {
            RecognizerBackend::Tesseract => {
                crate::ocr::extract_receipt_lines(
                    image_path,
                    ocr_config,
                    instance_manager,
                    circuit_breaker,
                )
                .await
            }
            RecognizerBackend::Remote { engine } => remote.recognize_lines(engine, image_path).await,
        }
    }
}

/// Response shape of the remote line-extraction endpoint.
#[derive(Debug, Deserialize)]
struct RemoteOcrResponse {
    lines: Vec<String>,
}

/// HTTP client for remote recognition engines.
///
/// Remote engines share a single endpoint scheme: `POST {base_url}/ocr/{engine}`
/// with the raw image bytes as the body, answering `{"lines": [...]}`.
#[derive(Debug, Clone)]
pub struct RemoteOcrClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl RemoteOcrClient {
    /// Create a client for the remote recognition service.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(base_url: String, timeout_secs: u64) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to create HTTP client for remote OCR")?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Base URL the client was configured with.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a receipt image to a remote engine and return the recognized lines.
    pub async fn recognize_lines(
        &self,
        engine: &str,
        image_path: &str,
    ) -> Result<Vec<String>, OcrError> {
        let span = crate::observability::ocr_span("remote_recognize_lines");
        let _enter = span.enter();

        let start_time = std::time::Instant::now();
        let endpoint = format!("{}/ocr/{}", self.base_url, engine);

        let image_bytes = tokio::fs::read(image_path).await.map_err(|e| {
            OcrError::ImageLoad(format!(
                "Failed to read receipt image for remote OCR: {image_path} - {e}"
            ))
        })?;

        info!(
            "Sending receipt image to remote OCR engine '{}' ({} bytes)",
            engine,
            image_bytes.len()
        );

        let response = self
            .http_client
            .post(&endpoint)
            .header("Content-Type", "application/octet-stream")
            .body(image_bytes)
            .send()
            .await
            .map_err(|e| {
                error_logging::log_network_error(
                    &e,
                    "remote_ocr_request",
                    Some(&endpoint),
                    None,
                );
                OcrError::Remote(format!(
                    "Failed to reach remote OCR engine '{engine}': {e}"
                ))
            })?;

        let status = response.status();
        let duration = start_time.elapsed();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                "Remote OCR engine '{}' answered {} after {}ms",
                engine,
                status,
                duration.as_millis()
            );
            crate::observability::record_remote_ocr_request(engine, false, duration);
            return Err(OcrError::Remote(format!(
                "Remote OCR engine '{}' returned status {}: {}",
                engine,
                status,
                truncate_body(&body)
            )));
        }

        let parsed: RemoteOcrResponse = response.json().await.map_err(|e| {
            crate::observability::record_remote_ocr_request(engine, false, duration);
            OcrError::Remote(format!(
                "Invalid response from remote OCR engine '{engine}': {e}"
            ))
        })?;

        // Normalize to the same contract as the embedded stack
        let lines: Vec<String> = parsed
            .lines
            .iter()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        crate::observability::record_remote_ocr_request(engine, true, duration);
        info!(
            "Remote OCR engine '{}' returned {} lines in {}ms",
            engine,
            lines.len(),
            duration.as_millis()
        );

        Ok(lines)
    }
}

/// Cap error bodies so a misbehaving remote cannot flood the logs.
fn truncate_body(body: &str) -> &str {
    match body.char_indices().nth(200) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_all_supported_engines() {
        for &name in SUPPORTED_ENGINES {
            let backend = RecognizerBackend::parse(name)
                .unwrap_or_else(|_| panic!("engine '{}' should be accepted", name));
            assert_eq!(backend.name(), name);
        }
    }

    #[test]
    fn test_parse_maps_tesseract_to_embedded_backend() {
        assert_eq!(
            RecognizerBackend::parse("tesseract").unwrap(),
            RecognizerBackend::Tesseract
        );
    }

    #[test]
    fn test_parse_maps_remote_engines() {
        assert_eq!(
            RecognizerBackend::parse("paddle").unwrap(),
            RecognizerBackend::Remote {
                engine: "paddle".to_string()
            }
        );
    }

    #[test]
    fn test_parse_rejects_unknown_engine() {
        let err = RecognizerBackend::parse("gpt4vision").unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert!(err.to_string().contains("Unknown OCR engine"));
    }

    #[test]
    fn test_parse_is_case_sensitive() {
        assert!(RecognizerBackend::parse("Paddle").is_err());
    }

    #[test]
    fn test_default_engine_is_supported() {
        assert!(SUPPORTED_ENGINES.contains(&DEFAULT_ENGINE));
        assert_eq!(
            RecognizerBackend::parse(DEFAULT_ENGINE).unwrap(),
            RecognizerBackend::Tesseract
        );
    }

    #[test]
    fn test_remote_client_trims_trailing_slash() {
        let client = RemoteOcrClient::new("http://localhost:8871/".to_string(), 30)
            .expect("client should build");
        assert_eq!(client.base_url(), "http://localhost:8871");
    }

    #[test]
    fn test_remote_response_deserialization() {
        let json = r#"{"lines": ["REWE", "Milch 1,29", "  ", "Summe 1,29"]}"#;
        let parsed: RemoteOcrResponse = serde_json::from_str(json).expect("valid response");
        assert_eq!(parsed.lines.len(), 4);
    }

    #[test]
    fn test_truncate_body_limits_length() {
        let long = "x".repeat(500);
        assert_eq!(truncate_body(&long).len(), 200);
        assert_eq!(truncate_body("short"), "short");
    }
}
