//! # Circuit Breaker Module
//!
//! This module implements the circuit breaker pattern for recognition
//! operations. It prevents cascading failures by temporarily rejecting
//! work when a recognition backend fails repeatedly.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::ocr_config::RecoveryConfig;

/// Circuit breaker for recognition operations
///
/// Opens after `circuit_breaker_threshold` consecutive failures and rejects
/// further work until `circuit_breaker_reset_secs` have elapsed since the
/// last failure, at which point the counters reset and the next operation
/// probes the backend again.
///
/// ```text
/// CLOSED ──failures ≥ threshold──► OPEN ──reset timeout──► CLOSED
/// ```
///
/// All state mutations go through `Mutex` so the breaker can be shared
/// across request handlers.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_count: Mutex<u32>,
    last_failure_time: Mutex<Option<Instant>>,
    config: RecoveryConfig,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    ///
    /// # Examples
    ///
    /// ```rust
    /// use receipt_ocr::ocr_config::RecoveryConfig;
    /// use receipt_ocr::circuit_breaker::CircuitBreaker;
    ///
    /// let config = RecoveryConfig::default();
    /// let circuit_breaker = CircuitBreaker::new(config);
    /// ```
    pub fn new(config: RecoveryConfig) -> Self {
        Self {
            failure_count: Mutex::new(0),
            last_failure_time: Mutex::new(None),
            config,
        }
    }

    /// Check if the circuit breaker is open (blocking requests)
    ///
    /// Returns `true` while the failure count has reached the threshold and
    /// the reset timeout has not yet elapsed. Once the timeout passes, the
    /// counters are cleared and the breaker reports closed so the next
    /// operation can probe the backend.
    pub fn is_open(&self) -> bool {
        let failure_count = *self
            .failure_count
            .lock()
            .expect("Failed to acquire failure count lock");
        let last_failure = *self
            .last_failure_time
            .lock()
            .expect("Failed to acquire last failure time lock");

        if failure_count >= self.config.circuit_breaker_threshold {
            if let Some(last_time) = last_failure {
                let elapsed = last_time.elapsed();
                if elapsed < Duration::from_secs(self.config.circuit_breaker_reset_secs) {
                    return true; // Circuit is still open
                }
                // Reset circuit breaker
                *self
                    .failure_count
                    .lock()
                    .expect("Failed to acquire failure count lock") = 0;
                *self
                    .last_failure_time
                    .lock()
                    .expect("Failed to acquire last failure time lock") = None;
            }
        }
        false
    }

    /// Record a failed recognition attempt
    ///
    /// Increments the failure count and stamps the failure time.
    pub fn record_failure(&self) {
        *self
            .failure_count
            .lock()
            .expect("Failed to acquire failure count lock") += 1;
        *self
            .last_failure_time
            .lock()
            .expect("Failed to acquire last failure time lock") = Some(Instant::now());
    }

    /// Record a successful recognition attempt
    ///
    /// Resets the failure count and clears the last failure timestamp.
    pub fn record_success(&self) {
        *self
            .failure_count
            .lock()
            .expect("Failed to acquire failure count lock") = 0;
        *self
            .last_failure_time
            .lock()
            .expect("Failed to acquire last failure time lock") = None;
    }
}
