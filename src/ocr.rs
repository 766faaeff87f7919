//! # OCR Processing Module
//!
//! This module provides optical character recognition (OCR) functionality for extracting
//! text from receipt photos using the Tesseract OCR engine.
//!
//! ## Features
//!
//! - Line-oriented text extraction tuned for printed German retail receipts
//! - Automatic image format detection and validation
//! - Optional binarization pass for low-contrast thermal paper
//! - Retry logic with exponential backoff and circuit breaker protection
//!
//! ## Supported Image Formats
//!
//! - PNG (Portable Network Graphics)
//! - JPEG/JPG (Joint Photographic Experts Group)
//! - BMP (Bitmap)
//! - TIFF/TIF (Tagged Image File Format)
//!
//! ## Dependencies
//!
//! - `leptess`: Rust bindings for Tesseract OCR and Leptonica
//! - `image`: Image format detection and processing
//! - `anyhow`: Error handling
//! - `tracing`: Logging functionality

use anyhow::Result;
use regex;
use std::fs::File;
use std::io::{BufReader, Read};
use tracing::{info, warn};

// Re-export types for easier access from documentation and external usage
pub use crate::circuit_breaker::CircuitBreaker;
use crate::errors::error_logging;
pub use crate::instance_manager::OcrInstanceManager;
pub use crate::observability;
pub use crate::ocr_config::{OcrConfig, RecoveryConfig};
pub use crate::ocr_errors::OcrError;

/// Validate a receipt image path and basic file properties
///
/// Cheap synchronous check used at the upload boundary before a background
/// recognition job is queued. Format-specific validation happens later in
/// [`validate_image_with_format_limits`].
pub fn validate_image_path(image_path: &str, config: &crate::ocr_config::OcrConfig) -> Result<()> {
    // Use the comprehensive path validation module
    crate::path_validation::validate_file_path(image_path)
        .map_err(|e| anyhow::anyhow!("Image path validation failed: {}", e))?;

    let path = std::path::Path::new(image_path);

    // Check if file exists
    if !path.exists() {
        return Err(anyhow::anyhow!(
            "Image path validation failed: file does not exist ({})",
            image_path
        ));
    }

    // Check if it's actually a file (not a directory)
    if !path.is_file() {
        return Err(anyhow::anyhow!(
            "Image path validation failed: path is not a file ({})",
            image_path
        ));
    }

    // Check file size
    match path.metadata() {
        Ok(metadata) => {
            let file_size = metadata.len();
            if file_size > config.max_file_size {
                return Err(anyhow::anyhow!(
                    "Image validation failed: file too large ({} bytes, maximum allowed: {} bytes)",
                    file_size,
                    config.max_file_size
                ));
            }
            if file_size == 0 {
                return Err(anyhow::anyhow!(
                    "Image validation failed: file is empty ({})",
                    image_path
                ));
            }
        }
        Err(e) => {
            return Err(anyhow::anyhow!(
                "Image validation failed: cannot read file metadata ({}) - {}",
                image_path,
                e
            ));
        }
    }

    Ok(())
}

/// Enhanced validation with format-specific size limits and progressive validation
pub fn validate_image_with_format_limits(
    image_path: &str,
    config: &crate::ocr_config::OcrConfig,
) -> Result<()> {
    // First, perform comprehensive path validation
    crate::path_validation::validate_file_path(image_path)
        .map_err(|e| anyhow::anyhow!("Image path validation failed: {}", e))?;

    let path = std::path::Path::new(image_path);

    // Check if file exists
    if !path.exists() {
        return Err(anyhow::anyhow!(
            "Image validation failed: file does not exist ({})",
            image_path
        ));
    }

    // Check if it's actually a file (not a directory)
    if !path.is_file() {
        return Err(anyhow::anyhow!(
            "Image validation failed: path is not a file ({})",
            image_path
        ));
    }

    let file_size = path.metadata()?.len();

    // Quick rejection for extremely large files
    if file_size > config.format_limits.min_quick_reject {
        info!(
            "Quick rejecting file {image_path}: {file_size} bytes exceeds quick reject threshold"
        );
        return Err(anyhow::anyhow!(
            "File too large for processing: {} bytes (exceeds quick reject threshold of {} bytes)",
            file_size,
            config.format_limits.min_quick_reject
        ));
    }

    // Try to detect format and apply format-specific limits
    match File::open(image_path) {
        Ok(file) => {
            let mut reader = BufReader::new(file);
            let mut buffer = vec![0; config.buffer_size];

            match reader.read(&mut buffer) {
                Ok(bytes_read) if bytes_read >= config.min_format_bytes => {
                    buffer.truncate(bytes_read);

                    match image::guess_format(&buffer) {
                        Ok(format) => {
                            let format_limit = match format {
                                image::ImageFormat::Png => {
                                    info!(
                                        "Detected PNG format for {}, applying {}MB limit",
                                        image_path,
                                        config.format_limits.png_max / (1024 * 1024)
                                    );
                                    config.format_limits.png_max
                                }
                                image::ImageFormat::Jpeg => {
                                    info!(
                                        "Detected JPEG format for {}, applying {}MB limit",
                                        image_path,
                                        config.format_limits.jpeg_max / (1024 * 1024)
                                    );
                                    config.format_limits.jpeg_max
                                }
                                image::ImageFormat::Bmp => {
                                    info!(
                                        "Detected BMP format for {}, applying {}MB limit",
                                        image_path,
                                        config.format_limits.bmp_max / (1024 * 1024)
                                    );
                                    config.format_limits.bmp_max
                                }
                                image::ImageFormat::Tiff => {
                                    info!(
                                        "Detected TIFF format for {}, applying {}MB limit",
                                        image_path,
                                        config.format_limits.tiff_max / (1024 * 1024)
                                    );
                                    config.format_limits.tiff_max
                                }
                                _ => {
                                    info!("Detected unsupported format {format:?} for {image_path}, using general limit");
                                    config.max_file_size
                                }
                            };

                            if file_size > format_limit {
                                return Err(anyhow::anyhow!(
                                    "Image file too large for {:?} format: {} bytes (maximum allowed: {} bytes)",
                                    format, file_size, format_limit
                                ));
                            }

                            // Estimate memory usage for processing
                            let estimated_memory_mb = estimate_memory_usage(file_size, &format);
                            info!(
                                "Estimated memory usage for {image_path}: {estimated_memory_mb}MB"
                            );

                            // Check if estimated memory usage exceeds safe limits
                            let max_memory_mb = std::env::var("OCR_MEMORY_LIMIT_MB")
                                .unwrap_or_else(|_| "80".to_string())
                                .parse::<f64>()
                                .unwrap_or(80.0); // 80MB memory limit for OCR processing (conservative for small VMs)
                            if estimated_memory_mb > max_memory_mb {
                                return Err(anyhow::anyhow!(
                                    "Estimated memory usage too high: {}MB (maximum allowed: {}MB). File would cause out-of-memory errors.",
                                    estimated_memory_mb, max_memory_mb
                                ));
                            }

                            Ok(())
                        }
                        Err(_) => {
                            // Could not determine format, use general limit
                            info!("Could not determine image format for {image_path}, using general size limit");
                            if file_size > config.max_file_size {
                                return Err(anyhow::anyhow!(
                                    "Image file too large: {} bytes (maximum allowed: {} bytes)",
                                    file_size,
                                    config.max_file_size
                                ));
                            }
                            Ok(())
                        }
                    }
                }
                _ => {
                    // Could not read enough bytes, use general limit
                    info!("Could not read enough bytes for format detection from {image_path}, using general size limit");
                    if file_size > config.max_file_size {
                        return Err(anyhow::anyhow!(
                            "Image file too large: {} bytes (maximum allowed: {} bytes)",
                            file_size,
                            config.max_file_size
                        ));
                    }
                    Ok(())
                }
            }
        }
        Err(e) => Err(anyhow::anyhow!(
            "Cannot open image file for validation: {} - {}",
            image_path,
            e
        )),
    }
}

/// Estimate memory usage for image processing based on file size and format
///
/// Calculates expected memory consumption during image decompression and OCR
/// processing. Used for pre-processing validation to prevent out-of-memory errors.
///
/// # Memory Factors by Format
///
/// | Format | Factor | Reason |
/// |--------|--------|--------|
/// | PNG    | 3.0x   | Lossless decompression expands compressed data |
/// | JPEG   | 2.5x   | Lossy decompression with working buffers |
/// | BMP    | 1.2x   | Mostly uncompressed, minimal expansion |
/// | TIFF   | 4.0x   | Complex format with layers and metadata |
///
/// # Examples
///
/// ```rust
/// use receipt_ocr::ocr::estimate_memory_usage;
/// use image::ImageFormat;
///
/// // 1MB PNG file
/// let memory_mb = estimate_memory_usage(1024 * 1024, &ImageFormat::Png);
/// assert_eq!(memory_mb, 3.0); // 3MB estimated usage
///
/// // 2MB JPEG file
/// let memory_mb = estimate_memory_usage(2 * 1024 * 1024, &ImageFormat::Jpeg);
/// assert_eq!(memory_mb, 5.0); // 5MB estimated usage
/// ```
///
/// # Accuracy
///
/// Estimates are conservative and may overestimate actual usage.
pub fn estimate_memory_usage(file_size: u64, format: &image::ImageFormat) -> f64 {
    // Convert file size to MB. Precision loss is acceptable for image files
    // as they rarely exceed sizes where f64 precision becomes an issue.
    #[allow(clippy::cast_precision_loss)]
    let file_size_mb = file_size as f64 / (1024.0 * 1024.0);

    // Memory estimation factors based on format characteristics
    let memory_factor = match format {
        image::ImageFormat::Png => 3.0, // PNG decompression can use 2-4x file size
        image::ImageFormat::Jpeg => 2.5, // JPEG decompression uses ~2-3x
        image::ImageFormat::Bmp => 1.2, // BMP is mostly uncompressed
        image::ImageFormat::Tiff => 4.0, // TIFF can be complex with layers
        _ => 3.0,                       // Default estimation
    };

    file_size_mb * memory_factor
}

/// Correct common OCR digit misreads on receipt amounts
///
/// Thermal receipt prints are low-contrast and Tesseract regularly confuses
/// look-alike glyphs inside amounts. This function fixes the misreads that
/// would otherwise break price recognition downstream.
fn correct_ocr_digit_errors(text: &str) -> String {
    let mut corrected = text.to_string();

    // Common receipt misreads and their corrections
    let corrections = [
        // letter O after a digit is a zero on a printed amount
        (r"(\d)[Oo]", "${1}0"),
        // letter O after the decimal separator
        (r"([.,])[Oo](\d)", "${1}0${2}"),
        // lowercase l inside an amount is a one
        (r"([.,\d])l(\d)", "${1}1${2}"),
        // pound sign read in place of the euro sign
        (r"£", "€"),
    ];

    for (pattern, replacement) in corrections.iter() {
        if let Ok(regex) = regex::Regex::new(pattern) {
            let before = corrected.clone();
            corrected = regex.replace_all(&corrected, *replacement).to_string();
            if before != corrected {
                tracing::debug!(
                    "OCR correction: pattern '{}' applied in text: '{}'",
                    pattern,
                    before
                );
            }
        }
    }

    corrected
}

/// Extract text from a receipt image using OCR with comprehensive error handling and retry logic
///
/// This function implements a robust OCR processing pipeline with the following algorithm:
///
/// ## Processing Algorithm
///
/// ```text
/// 1. Circuit Breaker Check
///    - Check if circuit breaker is open (service unavailable)
///    - Return early if open to prevent cascading failures
///
/// 2. Input Validation
///    - Validate image format and size limits
///    - Pre-calculate memory requirements
///
/// 3. Retry Loop (up to max_retries + 1 attempts)
///    For each attempt:
///      a. Perform OCR extraction with timeout
///      b. On success: Record success, update metrics, return result
///      c. On failure: Calculate delay, wait, retry
///      d. After max attempts: Record failure, return error
///
/// 4. Circuit Breaker Updates
///    - Record success/failure to track system health
///    - Update circuit breaker state based on thresholds
/// ```
///
/// ## Retry Strategy
///
/// Implements exponential backoff with jitter to prevent thundering herd:
/// - **Base Delay**: Configurable starting delay (default: 1000ms)
/// - **Exponential Growth**: Delay doubles each retry (2^(attempt-1))
/// - **Maximum Cap**: Prevents excessively long delays (default: 10000ms)
/// - **Jitter**: Random variation prevents synchronized retries
///
/// # Arguments
///
/// * `image_path` - Path to the receipt image to process (must be absolute path)
/// * `config` - OCR configuration including language settings, timeouts, and recovery options
/// * `instance_manager` - Manager for OCR instance reuse to improve performance
/// * `circuit_breaker` - Circuit breaker for fault tolerance and cascading failure prevention
///
/// # Returns
///
/// Returns `Result<String, OcrError>` containing the extracted text or an error
///
/// # Examples
///
/// ```rust,no_run
/// use receipt_ocr::ocr::{extract_text_from_image, OcrConfig, OcrInstanceManager, CircuitBreaker};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = OcrConfig::default();
/// let instance_manager = OcrInstanceManager::new();
/// let circuit_breaker = CircuitBreaker::new(config.recovery.clone());
///
/// // Process a photographed receipt
/// let text = extract_text_from_image("/path/to/receipt.jpg", &config, &instance_manager, &circuit_breaker).await?;
/// println!("Extracted text: {}", text);
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns `OcrError` for various failure conditions:
/// - `Validation` - Image format not supported or file too large
/// - `Initialization` - OCR engine initialization failed
/// - `ImageLoad` - Could not load the image file
/// - `Extraction` - OCR processing failed, or circuit breaker open
/// - `Timeout` - Operation exceeded timeout (30s default)
pub async fn extract_text_from_image(
    image_path: &str,
    config: &crate::ocr_config::OcrConfig,
    instance_manager: &crate::instance_manager::OcrInstanceManager,
    circuit_breaker: &crate::circuit_breaker::CircuitBreaker,
) -> Result<String, crate::ocr_errors::OcrError> {
    // Create a tracing span for the OCR operation
    let span = crate::observability::ocr_span("extract_text_from_image");
    let _enter = span.enter();

    // Start timing the entire OCR operation
    let start_time = std::time::Instant::now();

    // Check circuit breaker before processing
    if circuit_breaker.is_open() {
        warn!("Circuit breaker is open, rejecting OCR request for image: {image_path}");
        observability::update_circuit_breaker_state(true);
        return Err(crate::ocr_errors::OcrError::Extraction(
            "OCR service is temporarily unavailable due to repeated failures. Please try again later.".to_string()
        ));
    }
    observability::update_circuit_breaker_state(false);

    // Validate input with enhanced format-specific validation
    validate_image_with_format_limits(image_path, config)
        .map_err(|e| crate::ocr_errors::OcrError::Validation(e.to_string()))?;

    info!("Starting OCR text extraction from receipt image: {image_path}");

    // Implement retry logic with exponential backoff
    let mut attempt = 0;
    let max_attempts = config.recovery.max_retries + 1; // +1 for initial attempt

    loop {
        attempt += 1;

        match perform_ocr_extraction(image_path, config, instance_manager).await {
            Ok((text, ocr_duration)) => {
                let total_duration = start_time.elapsed();
                let total_ms = total_duration.as_millis();

                // Record success in circuit breaker
                circuit_breaker.record_success();
                observability::update_circuit_breaker_state(false);

                // Record OCR metrics with enhanced performance data
                let image_size = std::fs::metadata(image_path).map(|m| m.len()).unwrap_or(0);
                let memory_estimate =
                    crate::ocr::estimate_memory_usage(image_size, &image::ImageFormat::Png);
                observability::record_ocr_performance_metrics(
                    observability::OcrPerformanceMetricsParams {
                        success: true,
                        total_duration,
                        ocr_duration,
                        image_size,
                        attempt_count: attempt,
                        memory_estimate_mb: memory_estimate,
                    },
                );

                info!("OCR extraction completed successfully on attempt {} in {}ms. Extracted {} characters of text",
                      attempt, total_ms, text.len());
                return Ok(text);
            }
            Err(err) => {
                if attempt >= max_attempts {
                    let total_duration = start_time.elapsed();

                    // Record failure in circuit breaker
                    circuit_breaker.record_failure();
                    observability::update_circuit_breaker_state(circuit_breaker.is_open());

                    // Record OCR metrics with enhanced performance data
                    let image_size = std::fs::metadata(image_path).map(|m| m.len()).unwrap_or(0);
                    let memory_estimate =
                        crate::ocr::estimate_memory_usage(image_size, &image::ImageFormat::Png);
                    observability::record_ocr_performance_metrics(
                        observability::OcrPerformanceMetricsParams {
                            success: false,
                            total_duration,
                            ocr_duration: std::time::Duration::from_millis(0), // No successful OCR duration on failure
                            image_size,
                            attempt_count: attempt,
                            memory_estimate_mb: memory_estimate,
                        },
                    );

                    error_logging::log_ocr_error(
                        &err,
                        "ocr_extraction_retry",
                        Some("tesseract"),
                        Some(image_size),
                        Some(total_duration),
                    );
                    return Err(err);
                }

                let delay_ms = calculate_retry_delay(attempt, &config.recovery);
                warn!("OCR extraction attempt {attempt} failed: {err:?}. Retrying in {delay_ms}ms");

                tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
            }
        }
    }
}

/// Run OCR on a receipt image and return its text lines in reading order
///
/// Thin wrapper over [`extract_text_from_image`] for the receipt parsing
/// pipeline, which consumes receipts line by line. Lines are already trimmed
/// and non-empty.
pub async fn extract_receipt_lines(
    image_path: &str,
    config: &crate::ocr_config::OcrConfig,
    instance_manager: &crate::instance_manager::OcrInstanceManager,
    circuit_breaker: &crate::circuit_breaker::CircuitBreaker,
) -> Result<Vec<String>, crate::ocr_errors::OcrError> {
    let text =
        extract_text_from_image(image_path, config, instance_manager, circuit_breaker).await?;
    Ok(text.lines().map(str::to_string).collect())
}

/// Helper function to perform OCR extraction with timeout
///
/// This function handles the core OCR processing using Tesseract, including:
/// - OCR instance acquisition from the manager
/// - Optional image preprocessing for low-contrast receipts
/// - Image loading and processing
/// - Text extraction and cleanup
/// - Timeout protection
/// - Performance timing and logging
///
/// # Processing Details
///
/// 1. Acquires or creates OCR instance for specified language
/// 2. Runs the extraction on the blocking thread pool, bounded by the
///    configured operation timeout
/// 3. Binarizes the receipt image first when `preprocess_images` is enabled
/// 4. Loads image into Tesseract engine
/// 5. Performs OCR text extraction
/// 6. Cleans extracted text (removes extra whitespace, empty lines)
/// 7. Corrects common digit misreads in amounts
///
/// # Errors
///
/// - `Initialization` - Failed to get/create OCR instance
/// - `ImageLoad` - Could not load image into Tesseract
/// - `Extraction` - OCR processing failed, or the extraction task died
/// - `Timeout` - Operation exceeded configured timeout
async fn perform_ocr_extraction(
    image_path: &str,
    config: &crate::ocr_config::OcrConfig,
    instance_manager: &crate::instance_manager::OcrInstanceManager,
) -> Result<(String, std::time::Duration), crate::ocr_errors::OcrError> {
    // Start timing the actual OCR processing
    let ocr_start_time = std::time::Instant::now();

    let timeout_duration = tokio::time::Duration::from_secs(config.recovery.operation_timeout_secs);

    // Get or create OCR instance from the manager
    let instance = instance_manager
        .get_instance(config)
        .map_err(|e| crate::ocr_errors::OcrError::Initialization(e.to_string()))?;

    let preprocess = config.preprocess_images;
    let owned_path = image_path.to_string();
    let result = run_blocking_with_timeout(timeout_duration, move || {
        run_tesseract_extraction(instance, &owned_path, preprocess)
    })
    .await;

    let ocr_duration = ocr_start_time.elapsed();
    let ocr_ms = ocr_duration.as_millis();

    match result {
        Ok(text) => {
            info!(
                "OCR processing completed in {}ms, extracted {} characters",
                ocr_ms,
                text.len()
            );
            Ok((text, ocr_duration))
        }
        Err(e @ crate::ocr_errors::OcrError::Timeout(_)) => {
            warn!(
                "OCR processing timed out after {}ms (limit: {}s)",
                ocr_ms, config.recovery.operation_timeout_secs
            );
            Err(e)
        }
        Err(e) => {
            warn!("OCR processing failed after {ocr_ms}ms: {e:?}");
            Err(e)
        }
    }
}

/// Run one extraction pass on the blocking pool, bounded by the operation
/// timeout.
///
/// Tesseract work is synchronous FFI with no await points; it runs off the
/// async executor so the timeout can fire mid-extraction. On timeout the
/// worker finishes in the background and releases its instance lock when
/// Tesseract returns, so a follow-up attempt queues on the instance rather
/// than on a runtime worker.
async fn run_blocking_with_timeout<T: Send + 'static>(
    timeout_duration: tokio::time::Duration,
    work: impl FnOnce() -> Result<T, crate::ocr_errors::OcrError> + Send + 'static,
) -> Result<T, crate::ocr_errors::OcrError> {
    let handle = tokio::task::spawn_blocking(work);
    match tokio::time::timeout(timeout_duration, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => {
            error_logging::log_internal_error(&join_error, "ocr", "blocking_extraction");
            Err(crate::ocr_errors::OcrError::Extraction(format!(
                "OCR extraction task died: {join_error}"
            )))
        }
        Err(_) => Err(crate::ocr_errors::OcrError::Timeout(format!(
            "OCR operation timed out after {} seconds",
            timeout_duration.as_secs()
        ))),
    }
}

/// Synchronous Tesseract pass over one receipt image. Runs on the blocking
/// pool via [`run_blocking_with_timeout`].
fn run_tesseract_extraction(
    instance: std::sync::Arc<std::sync::Mutex<leptess::LepTess>>,
    image_path: &str,
    preprocess: bool,
) -> Result<String, crate::ocr_errors::OcrError> {
    // Optional binarization pass. Falls back to the original image when
    // preprocessing fails so a bad filter never loses a receipt.
    let preprocessed = if preprocess {
        match crate::preprocessing::prepare_receipt_image(image_path) {
            Ok(file) => Some(file),
            Err(e) => {
                warn!("Receipt preprocessing failed for {image_path}, using original image: {e}");
                None
            }
        }
    } else {
        None
    };
    let ocr_input: std::path::PathBuf = preprocessed
        .as_ref()
        .map(|file| file.path().to_path_buf())
        .unwrap_or_else(|| std::path::PathBuf::from(image_path));

    // Perform OCR processing with the reused instance
    let extracted_text = {
        let mut tess = instance
            .lock()
            .expect("Failed to acquire Tesseract instance lock");
        // Set the image for OCR processing
        tess.set_image(&ocr_input).map_err(|e| {
            crate::ocr_errors::OcrError::ImageLoad(format!("Failed to load image for OCR: {e}"))
        })?;

        // Extract text from the image
        tess.get_utf8_text().map_err(|e| {
            crate::ocr_errors::OcrError::Extraction(format!(
                "Failed to extract text from image: {e}"
            ))
        })?
    };

    // Clean up the extracted text (remove extra whitespace and empty lines)
    let cleaned_text = extracted_text
        .trim()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<&str>>()
        .join("\n");

    // Apply OCR error correction for common digit misreads
    Ok(correct_ocr_digit_errors(&cleaned_text))
}

/// Calculate retry delay with exponential backoff
///
/// Implements exponential backoff with jitter to prevent thundering herd problems.
/// Delay increases exponentially with each retry attempt, with random jitter added
/// to distribute retry attempts over time.
///
/// ```text
/// delay = min(base_delay * (2^(attempt-1)), max_delay)
/// jitter = random(0, delay/4)
/// final_delay = delay + jitter
/// ```
///
/// ## Delay Progression Examples
///
/// | Attempt | Base Delay | Exponential | Jitter Range | Final Delay Range |
/// |---------|------------|-------------|--------------|-------------------|
/// | 1       | 1000ms     | 1000ms      | 0-250ms      | 1000-1250ms      |
/// | 2       | 1000ms     | 2000ms      | 0-500ms      | 2000-2500ms      |
/// | 3       | 1000ms     | 4000ms      | 0-1000ms     | 4000-5000ms      |
/// | 4       | 1000ms     | 8000ms      | 0-2000ms     | 8000-10000ms     |
/// | 5+      | 1000ms     | 10000ms*    | 0-2500ms     | 10000-12500ms    |
///
/// *Capped at max_retry_delay_ms
///
/// # Arguments
///
/// * `attempt` - Current retry attempt number (1-based, first retry = 1)
/// * `recovery` - Recovery configuration with delay settings
///
/// # Returns
///
/// Returns delay in milliseconds before next retry attempt
///
/// # Examples
///
/// ```rust
/// use receipt_ocr::ocr::{calculate_retry_delay, RecoveryConfig};
///
/// let config = RecoveryConfig::default();
/// // First retry: ~1000-1250ms (1000ms + jitter)
/// let delay1 = calculate_retry_delay(1, &config);
/// assert!(delay1 >= 1000 && delay1 <= 1250);
/// // Second retry: ~2000-2500ms (2000ms + jitter)
/// let delay2 = calculate_retry_delay(2, &config);
/// assert!(delay2 >= 2000 && delay2 <= 2500);
/// ```
pub fn calculate_retry_delay(attempt: u32, recovery: &crate::ocr_config::RecoveryConfig) -> u64 {
    // Calculate exponential backoff with minimal precision loss
    // For retry delays, precision loss is acceptable as delays are typically small
    #[allow(clippy::cast_precision_loss)]
    let base_delay = recovery.base_retry_delay_ms as f64;

    #[allow(clippy::cast_precision_loss)]
    let exponential_delay = base_delay * (2.0_f64).powf((attempt - 1) as f64);

    #[allow(clippy::cast_precision_loss)]
    let delay = exponential_delay.min(recovery.max_retry_delay_ms as f64) as u64;

    // Add some jitter to prevent thundering herd. The divisor is clamped so
    // sub-4ms delays cannot divide by zero.
    let jitter = rand::random::<u64>() % (delay / 4).max(1);
    delay + jitter
}

/// Validate if an image file is supported for OCR processing using `image::guess_format`
///
/// Performs comprehensive validation including:
/// 1. File existence and accessibility checks
/// 2. Format detection using magic bytes
/// 3. File size validation against format-specific limits
/// 4. Memory usage estimation
///
/// # Supported Formats
///
/// | Format | Max Size | Description |
/// |--------|----------|-------------|
/// | PNG    | 15MB     | Lossless compression, best for text |
/// | JPEG   | 10MB     | Lossy compression, typical phone capture |
/// | BMP    | 5MB      | Uncompressed, fast but large files |
/// | TIFF   | 20MB     | Multi-page support, high quality |
///
/// # Examples
///
/// ```rust,no_run
/// use receipt_ocr::ocr::{is_supported_image_format, OcrConfig};
///
/// let config = OcrConfig::default();
/// if is_supported_image_format("/path/to/receipt.jpg", &config) {
///     println!("Image is supported for OCR processing");
/// } else {
///     println!("Image format not supported or file too large");
/// }
/// ```
pub fn is_supported_image_format(file_path: &str, config: &crate::ocr_config::OcrConfig) -> bool {
    // Enhanced validation first (includes size checks)
    if validate_image_with_format_limits(file_path, config).is_err() {
        return false;
    }

    match File::open(file_path) {
        Ok(file) => {
            let mut reader = BufReader::new(file);
            let mut buffer = vec![0; config.buffer_size]; // Pre-allocate buffer for format detection

            match reader.read(&mut buffer) {
                Ok(bytes_read) if bytes_read >= config.min_format_bytes => {
                    // Truncate buffer to actual bytes read
                    buffer.truncate(bytes_read);

                    info!("Read {bytes_read} bytes from file {file_path} for format detection");

                    match image::guess_format(&buffer) {
                        Ok(format) => {
                            // Tesseract supports: PNG, JPEG/JPG, BMP, TIFF
                            let supported = matches!(
                                format,
                                image::ImageFormat::Png
                                    | image::ImageFormat::Jpeg
                                    | image::ImageFormat::Bmp
                                    | image::ImageFormat::Tiff
                            );

                            if supported {
                                info!("Detected supported image format: {format:?} for file: {file_path}");
                            } else {
                                info!("Detected unsupported image format: {format:?} for file: {file_path}");
                            }

                            supported
                        }
                        Err(e) => {
                            info!("Could not determine image format for file: {file_path} - {e}");
                            false
                        }
                    }
                }
                Ok(bytes_read) => {
                    info!("Could not read enough bytes to determine image format for file: {} (read {} bytes, need at least {})", file_path, bytes_read, config.min_format_bytes);
                    false
                }
                Err(e) => {
                    info!("Error reading image file for format detection: {file_path} - {e}");
                    false
                }
            }
        }
        Err(e) => {
            info!("Could not open image file for format detection: {file_path} - {e}");
            false
        }
    }
}
