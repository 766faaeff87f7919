//! # Production Configuration
//!
//! Environment-specific configuration for observability features
//! in production deployments.

use std::env;

/// Observability configuration for different environments
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Environment name (development, staging, production)
    pub environment: String,
    /// OTLP endpoint for trace export
    pub otlp_endpoint: Option<String>,
    /// Prometheus metrics endpoint port
    pub metrics_port: u16,
    /// Log level for observability components
    pub log_level: String,
    /// Whether to enable trace sampling
    pub enable_trace_sampling: bool,
    /// Trace sampling ratio (0.0-1.0)
    pub trace_sampling_ratio: f64,
    /// Whether to export metrics to external Prometheus
    pub enable_metrics_export: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            otlp_endpoint: None,
            metrics_port: 9090,
            log_level: "info".to_string(),
            enable_trace_sampling: false,
            trace_sampling_ratio: 1.0,
            enable_metrics_export: true,
        }
    }
}

impl ObservabilityConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            metrics_port: env::var("METRICS_PORT")
                .unwrap_or_else(|_| "9090".to_string())
                .parse()
                .unwrap_or(9090),
            log_level: env::var("OBSERVABILITY_LOG_LEVEL")
                .unwrap_or_else(|_| "info".to_string()),
            enable_trace_sampling: env::var("ENABLE_TRACE_SAMPLING")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            trace_sampling_ratio: env::var("TRACE_SAMPLING_RATIO")
                .unwrap_or_else(|_| "1.0".to_string())
                .parse()
                .unwrap_or(1.0),
            enable_metrics_export: env::var("ENABLE_METRICS_EXPORT")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
        }
    }

    /// Check if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Check if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        // Validate OTLP endpoint format if provided
        if let Some(endpoint) = &self.otlp_endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(format!("Invalid OTLP endpoint format: {}", endpoint));
            }
        }

        // Validate sampling ratio
        if !(0.0..=1.0).contains(&self.trace_sampling_ratio) {
            return Err(format!(
                "Invalid trace sampling ratio: {}",
                self.trace_sampling_ratio
            ));
        }

        // Validate port range
        if self.metrics_port == 0 {
            return Err(format!("Invalid metrics port: {}", self.metrics_port));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.environment, "development");
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.log_level, "info");
        assert!(!config.enable_trace_sampling);
        assert_eq!(config.trace_sampling_ratio, 1.0);
        assert!(config.enable_metrics_export);
    }

    #[test]
    fn test_config_validation() {
        let mut config = ObservabilityConfig::default();

        // Valid config should pass
        assert!(config.validate().is_ok());

        // Invalid OTLP endpoint
        config.otlp_endpoint = Some("invalid-endpoint".to_string());
        assert!(config.validate().is_err());

        // Reset and test invalid sampling ratio
        config.otlp_endpoint = None;
        config.trace_sampling_ratio = 1.5;
        assert!(config.validate().is_err());

        // Reset and test invalid port
        config.trace_sampling_ratio = 1.0;
        config.metrics_port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_environment_detection() {
        let mut config = ObservabilityConfig::default();
        assert!(config.is_development());
        assert!(!config.is_production());

        config.environment = "production".to_string();
        assert!(!config.is_development());
        assert!(config.is_production());
    }
}
