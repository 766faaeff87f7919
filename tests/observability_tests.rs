//! # Observability Tests
//!
//! Tests for metrics recording, Prometheus rendering, span creation, config
//! validation and health checks. Binaries install recorders and subscribers
//! in main, so every helper here must also be safe to call without that
//! setup in place.

#[cfg(test)]
mod tests {
    use metrics_exporter_prometheus::PrometheusBuilder;
    use receipt_ocr::observability::{
        check_results_store_health, ocr_span, parse_span, record_api_request, record_db_metrics,
        record_ocr_metrics, record_ocr_performance_metrics, record_parse_metrics,
        record_remote_ocr_request, update_circuit_breaker_state, HealthCheckDeps,
        OcrPerformanceMetricsParams,
    };
    use receipt_ocr::observability_config::ObservabilityConfig;
    use receipt_ocr::results::ResultStore;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_metric_helpers_need_no_recorder() {
        record_ocr_metrics(true, Duration::from_millis(850), 1024 * 1024);
        record_ocr_metrics(false, Duration::from_secs(2), 0);
        record_remote_ocr_request("paddle", true, Duration::from_millis(300));
        record_parse_metrics(4, true);
        record_parse_metrics(0, false);
        record_db_metrics("insert_result", Duration::from_millis(12));
        update_circuit_breaker_state(true);
        update_circuit_breaker_state(false);
    }

    /// Stage clocks are sampled separately, so the OCR stage can come out
    /// longer than the wall-clock total.
    #[test]
    fn test_performance_metrics_tolerate_clock_skew() {
        record_ocr_performance_metrics(OcrPerformanceMetricsParams {
            success: true,
            total_duration: Duration::from_secs(2),
            ocr_duration: Duration::from_secs(5),
            image_size: 2 * 1024 * 1024,
            attempt_count: 1,
            memory_estimate_mb: 6.0,
        });
    }

    #[test]
    fn test_performance_metrics_handle_zero_durations() {
        record_ocr_performance_metrics(OcrPerformanceMetricsParams {
            success: false,
            total_duration: Duration::ZERO,
            ocr_duration: Duration::ZERO,
            image_size: 0,
            attempt_count: 0,
            memory_estimate_mb: 0.0,
        });
    }

    #[test]
    fn test_spans_can_be_entered_without_subscriber() {
        let ocr = ocr_span("extract_text");
        let _ocr_guard = ocr.enter();

        let parse = parse_span("kassenbon.png");
        let _parse_guard = parse.enter();
    }

    /// Unmatched endpoints collapse into one label so a URL scanner cannot
    /// blow up metric cardinality.
    #[test]
    fn test_api_requests_render_with_bounded_endpoint_labels() {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install metrics recorder");

        record_api_request("/ocr", 200);
        record_api_request("/status", 404);
        record_api_request("/wp-admin/setup.php", 200);

        let rendered = handle.render();
        assert!(rendered.contains("api_requests_total"));
        assert!(rendered.contains("endpoint=\"/ocr\""));
        assert!(rendered.contains("endpoint=\"other\""));
        assert!(!rendered.contains("wp-admin"));
    }

    #[test]
    fn test_results_store_health_reflects_writability() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path().join("results.json"), dir.path().join("debug"));
        assert!(check_results_store_health(&store).is_ok());

        // System directories are outside the write allowlist
        let broken = ResultStore::new("/etc/receipt_results.json", "/etc/receipt_debug");
        let err = check_results_store_health(&broken).unwrap_err();
        assert!(err.to_string().contains("Results store health check failed"));
    }

    #[test]
    fn test_observability_config_validation() {
        assert!(ObservabilityConfig::default().validate().is_ok());

        let bad_endpoint = ObservabilityConfig {
            otlp_endpoint: Some("grpc://collector:4317".to_string()),
            ..Default::default()
        };
        assert!(bad_endpoint.validate().is_err());

        let bad_ratio = ObservabilityConfig {
            trace_sampling_ratio: 1.5,
            ..Default::default()
        };
        assert!(bad_ratio.validate().is_err());

        let bad_port = ObservabilityConfig {
            metrics_port: 0,
            ..Default::default()
        };
        assert!(bad_port.validate().is_err());

        let good = ObservabilityConfig {
            otlp_endpoint: Some("https://otel-collector.internal:4317".to_string()),
            trace_sampling_ratio: 0.25,
            ..Default::default()
        };
        assert!(good.validate().is_ok());
    }

    /// Health check dependencies are cloned into the readiness endpoint, and
    /// the database handle stays optional for db-less deployments.
    #[test]
    fn test_health_deps_share_without_database() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path().join("results.json"), dir.path().join("debug"));

        let deps = HealthCheckDeps {
            db_pool: None,
            results: Some(Arc::new(store)),
            ocr_languages: "deu".to_string(),
        };
        let cloned = deps.clone();

        assert!(cloned.db_pool.is_none());
        assert!(cloned.results.is_some());
        assert_eq!(cloned.ocr_languages, "deu");
    }
}
