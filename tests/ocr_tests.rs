//! # OCR Pipeline Tests
//!
//! Tests for the validation and fault-tolerance layers around text
//! recognition: image path validation, magic-byte format detection, retry
//! backoff, circuit breaker short-circuiting and the remote engine client.
//! None of these require a Tesseract install or a reachable remote service,
//! so the suite runs on bare build hosts.

#[cfg(test)]
mod tests {
    use receipt_ocr::engine::RemoteOcrClient;
    use receipt_ocr::errors::AppError;
    use receipt_ocr::ocr::{
        calculate_retry_delay, estimate_memory_usage, extract_text_from_image,
        is_supported_image_format, validate_image_path, CircuitBreaker, OcrConfig,
        OcrError, OcrInstanceManager, RecoveryConfig,
    };
    use receipt_ocr::ocr_config::ModelType;
    use std::fs;

    const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    const JFIF_HEADER: &[u8] = &[
        0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01,
    ];

    fn write_file(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> String {
        let path = dir.path().join(name);
        fs::write(&path, bytes).unwrap();
        path.to_string_lossy().to_string()
    }

    #[test]
    fn test_validate_image_path_accepts_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "receipt.png", PNG_SIGNATURE);

        assert!(validate_image_path(&path, &OcrConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_image_path_rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.png").to_string_lossy().to_string();

        let err = validate_image_path(&path, &OcrConfig::default()).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_validate_image_path_rejects_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_string_lossy().to_string();

        let err = validate_image_path(&path, &OcrConfig::default()).unwrap_err();
        assert!(err.to_string().contains("not a file"));
    }

    #[test]
    fn test_validate_image_path_rejects_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "empty.png", b"");

        let err = validate_image_path(&path, &OcrConfig::default()).unwrap_err();
        assert!(err.to_string().contains("file is empty"));
    }

    #[test]
    fn test_validate_image_path_enforces_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "large.png", &[0u8; 64]);

        let config = OcrConfig {
            max_file_size: 4,
            ..Default::default()
        };
        let err = validate_image_path(&path, &config).unwrap_err();
        assert!(err.to_string().contains("file too large"));
    }

    /// Upload filenames are attacker-controlled, so traversal sequences and
    /// system paths must be rejected before any filesystem access.
    #[test]
    fn test_validate_image_path_blocks_unsafe_paths() {
        let config = OcrConfig::default();

        assert!(validate_image_path("../etc/passwd", &config).is_err());
        assert!(validate_image_path("/etc/passwd", &config).is_err());
        assert!(validate_image_path("receipt\0.png", &config).is_err());
    }

    #[test]
    fn test_format_detection_accepts_receipt_formats() {
        let dir = tempfile::tempdir().unwrap();
        let config = OcrConfig::default();

        let png = write_file(&dir, "scan.png", PNG_SIGNATURE);
        assert!(is_supported_image_format(&png, &config));

        let jpeg = write_file(&dir, "photo.jpg", JFIF_HEADER);
        assert!(is_supported_image_format(&jpeg, &config));
    }

    #[test]
    fn test_format_detection_rejects_unsupported_content() {
        let dir = tempfile::tempdir().unwrap();
        let config = OcrConfig::default();

        // GIF is a real image format but not one Tesseract accepts
        let gif = write_file(&dir, "anim.gif", b"GIF89a\x01\x00\x01\x00");
        assert!(!is_supported_image_format(&gif, &config));

        let text = write_file(&dir, "notes.txt", b"just some plain text");
        assert!(!is_supported_image_format(&text, &config));

        // Too short for magic-byte detection
        let stub = write_file(&dir, "stub.png", &PNG_SIGNATURE[..4]);
        assert!(!is_supported_image_format(&stub, &config));
    }

    #[test]
    fn test_memory_estimates_scale_with_format() {
        let one_mb = 1024 * 1024;

        assert_eq!(estimate_memory_usage(one_mb, &image::ImageFormat::Png), 3.0);
        assert_eq!(
            estimate_memory_usage(2 * one_mb, &image::ImageFormat::Jpeg),
            5.0
        );
        assert_eq!(estimate_memory_usage(one_mb, &image::ImageFormat::Bmp), 1.2);
        assert_eq!(estimate_memory_usage(one_mb, &image::ImageFormat::Tiff), 4.0);
    }

    /// Delays double per attempt with at most 25% jitter on top.
    #[test]
    fn test_retry_delays_grow_exponentially() {
        let recovery = RecoveryConfig {
            base_retry_delay_ms: 100,
            max_retry_delay_ms: 10_000,
            ..Default::default()
        };

        let first = calculate_retry_delay(1, &recovery);
        assert!((100..125).contains(&first), "first delay was {}", first);

        let second = calculate_retry_delay(2, &recovery);
        assert!((200..250).contains(&second), "second delay was {}", second);

        let third = calculate_retry_delay(3, &recovery);
        assert!((400..500).contains(&third), "third delay was {}", third);
    }

    /// An open circuit breaker rejects work before validation or Tesseract
    /// are ever touched.
    #[tokio::test]
    async fn test_open_circuit_breaker_short_circuits_extraction() {
        let breaker = CircuitBreaker::new(RecoveryConfig {
            circuit_breaker_threshold: 1,
            ..Default::default()
        });
        breaker.record_failure();
        assert!(breaker.is_open());

        let result = extract_text_from_image(
            "receipt.png",
            &OcrConfig::default(),
            &OcrInstanceManager::new(),
            &breaker,
        )
        .await;

        match result {
            Err(OcrError::Extraction(msg)) => {
                assert!(msg.contains("temporarily unavailable"));
            }
            other => panic!("expected extraction rejection, got {:?}", other),
        }
    }

    /// Validation failures surface immediately instead of burning retries.
    #[tokio::test]
    async fn test_extraction_rejects_invalid_images_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.png").to_string_lossy().to_string();
        let breaker = CircuitBreaker::new(RecoveryConfig::default());

        let result = extract_text_from_image(
            &missing,
            &OcrConfig::default(),
            &OcrInstanceManager::new(),
            &breaker,
        )
        .await;

        assert!(matches!(result, Err(OcrError::Validation(_))));
        // A rejected input is not a backend failure
        assert!(!breaker.is_open());
    }

    #[tokio::test]
    async fn test_remote_client_reports_unreachable_engine() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_file(&dir, "scan.png", PNG_SIGNATURE);

        let client = RemoteOcrClient::new("http://127.0.0.1:9".to_string(), 2).unwrap();
        let result = client.recognize_lines("paddle", &image).await;

        match result {
            Err(OcrError::Remote(msg)) => assert!(msg.contains("paddle")),
            other => panic!("expected remote failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_remote_client_fails_fast_on_missing_image() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone.png").to_string_lossy().to_string();

        let client = RemoteOcrClient::new("http://127.0.0.1:9".to_string(), 2).unwrap();
        let result = client.recognize_lines("easyocr", &missing).await;

        assert!(matches!(result, Err(OcrError::ImageLoad(_))));
    }

    /// Error categories carry stable prefixes for log scraping.
    #[test]
    fn test_error_types_have_stable_prefixes() {
        assert!(OcrError::Validation("bad".to_string())
            .to_string()
            .starts_with("[VALIDATION]"));
        assert!(OcrError::Timeout("slow".to_string())
            .to_string()
            .starts_with("[OCR_TIMEOUT]"));
        assert!(OcrError::Remote("down".to_string())
            .to_string()
            .starts_with("[OCR_REMOTE]"));

        let app_err = AppError::from(OcrError::Extraction("failed".to_string()));
        assert!(matches!(app_err, AppError::Ocr(_)));
        assert!(app_err.to_string().starts_with("[OCR]"));
    }

    #[test]
    fn test_instance_manager_starts_empty() {
        let manager = OcrInstanceManager::new();
        assert_eq!(manager._instance_count(), 0);
        assert_eq!(OcrInstanceManager::default()._instance_count(), 0);
    }

    #[test]
    fn test_evicting_missing_instances_is_a_no_op() {
        let manager = OcrInstanceManager::new();
        let config = OcrConfig::default();

        // Eviction keys on the language/model combination; combinations that
        // were never created leave the pool untouched, repeatedly.
        manager._remove_instance(&config.languages, ModelType::default());
        assert_eq!(manager._instance_count(), 0);
        manager._remove_instance(&config.languages, ModelType::default());
        assert_eq!(manager._instance_count(), 0);
        manager._remove_instance("eng", ModelType::Best);
        assert_eq!(manager._instance_count(), 0);
    }
}
