//! # Receipt Lexicon Module
//!
//! Token sets that drive the reconstruction passes: the retailer catalog for
//! store identification, noise markers for payment/administrative lines and
//! the labels that open a receipt's summary region.
//!
//! The lexicon is loaded once at process start from
//! `config/receipt_lexicon.json` (overridable via `RECEIPT_LEXICON_PATH`)
//! and is read-only afterwards. Built-in German defaults are used when no
//! config file is found, so the service works without any file present.

use serde::{Deserialize, Serialize};
use std::fs;
use tracing::{info, warn};

use crate::errors::{AppError, AppResult};

/// Wrapper matching the JSON config file layout
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReceiptLexiconConfig {
    pub receipt_lexicon: ReceiptLexicon,
}

/// Fixed token sets used by the receipt parser
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ReceiptLexicon {
    /// Retailer catalog; canonical casing is kept for the output token
    pub known_stores: Vec<String>,
    /// Lower-case markers for payment, currency and administrative lines
    pub noise_tokens: Vec<String>,
    /// Lower-case markers that open the summary region of a receipt
    pub total_labels: Vec<String>,
}

impl Default for ReceiptLexicon {
    fn default() -> Self {
        Self {
            known_stores: [
                "EDEKA", "REWE", "ALDI", "NETTO", "PENNY", "LIDL", "KAUFLAND", "REAL", "GLOBUS",
                "DM", "ROSSMANN", "BIO COMPANY", "DENNREE", "ALNATURA", "HIT", "TEGUT", "FAMILA",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            noise_tokens: ["eur", "€", "visa", "mastercard", "posten", "theke"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            total_labels: ["summe", "gesamt", "total", "betrag"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl ReceiptLexicon {
    /// True when the lower-cased text contains any noise token
    pub fn is_noise(&self, lowered: &str) -> bool {
        self.noise_tokens
            .iter()
            .any(|token| lowered.contains(token.as_str()))
    }

    /// True when the lower-cased text contains any total label
    pub fn is_total_label(&self, lowered: &str) -> bool {
        self.total_labels
            .iter()
            .any(|token| lowered.contains(token.as_str()))
    }

    /// Lower-case the matcher token sets so containment checks against
    /// lower-cased lines behave regardless of the casing in the config file
    fn normalize(mut self) -> Self {
        self.noise_tokens = self
            .noise_tokens
            .iter()
            .map(|t| t.to_lowercase())
            .collect();
        self.total_labels = self
            .total_labels
            .iter()
            .map(|t| t.to_lowercase())
            .collect();
        self
    }

    /// Validate lexicon contents
    pub fn validate(&self) -> AppResult<()> {
        if self.known_stores.is_empty() {
            return Err(AppError::Config(
                "known_stores cannot be empty".to_string(),
            ));
        }
        if self.noise_tokens.is_empty() {
            return Err(AppError::Config(
                "noise_tokens cannot be empty".to_string(),
            ));
        }
        if self.total_labels.is_empty() {
            return Err(AppError::Config(
                "total_labels cannot be empty".to_string(),
            ));
        }

        for token in self
            .known_stores
            .iter()
            .chain(self.noise_tokens.iter())
            .chain(self.total_labels.iter())
        {
            if token.trim().is_empty() {
                return Err(AppError::Config(
                    "lexicon tokens cannot be empty or whitespace".to_string(),
                ));
            }
            if token.chars().any(|c| c.is_control()) {
                return Err(AppError::Config(format!(
                    "lexicon token '{}' contains control characters",
                    token.escape_debug()
                )));
            }
        }

        // Noise skipping runs before the total-label check in the segmenter;
        // overlapping sets would make the summary region undetectable
        for label in &self.total_labels {
            if self
                .noise_tokens
                .iter()
                .any(|noise| label.contains(noise.as_str()))
            {
                return Err(AppError::Config(format!(
                    "total label '{}' overlaps a noise token",
                    label
                )));
            }
        }

        Ok(())
    }
}

/// Load the receipt lexicon from its JSON config file
pub fn load_receipt_lexicon() -> ReceiptLexicon {
    // First, try to get the path from the environment variable
    if let Ok(config_path) = std::env::var("RECEIPT_LEXICON_PATH") {
        info!(
            "Loading receipt lexicon from environment variable: {}",
            config_path
        );
        match fs::read_to_string(&config_path) {
            Ok(content) => match serde_json::from_str::<ReceiptLexiconConfig>(&content) {
                Ok(config) => {
                    info!("Successfully loaded receipt lexicon from: {}", config_path);
                    return config.receipt_lexicon.normalize();
                }
                Err(e) => {
                    warn!(
                        "Failed to parse receipt lexicon from '{}': {}. Falling back to default paths.",
                        config_path, e
                    );
                }
            },
            Err(e) => {
                warn!(
                    "Failed to read receipt lexicon from '{}': {}. Falling back to default paths.",
                    config_path, e
                );
            }
        }
    }

    // Fallback to the conventional locations
    let possible_paths = [
        "/app/config/receipt_lexicon.json", // Docker path
        "config/receipt_lexicon.json",      // Local development path
        "../config/receipt_lexicon.json",   // Test path
    ];

    for config_path in &possible_paths {
        match fs::read_to_string(config_path) {
            Ok(content) => match serde_json::from_str::<ReceiptLexiconConfig>(&content) {
                Ok(config) => {
                    info!(
                        "Successfully loaded receipt lexicon from fallback path: {}",
                        config_path
                    );
                    return config.receipt_lexicon.normalize();
                }
                Err(e) => {
                    warn!(
                        "Failed to parse receipt lexicon at '{}': {}. Trying next path.",
                        config_path, e
                    );
                    continue;
                }
            },
            Err(_) => continue, // Try next path
        }
    }

    info!("No receipt lexicon config file found, using built-in German defaults");
    ReceiptLexicon::default()
}
