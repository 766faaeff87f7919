//! # OCR Instance Manager Module
//!
//! This module provides thread-safe OCR instance management for reusing Tesseract instances.
//! Receipt uploads arrive in bursts; reusing instances avoids paying the
//! Tesseract initialization overhead on every image.

use leptess::LepTess;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::ocr_config::OcrConfig;

/// Thread-safe OCR instance manager for reusing Tesseract instances
///
/// Manages a pool of Tesseract OCR instances keyed by language and model
/// configuration. Instances are created on first request for a combination
/// and reused for subsequent requests with the same configuration.
///
/// # Thread Safety
///
/// Uses `Mutex<HashMap<>>` internally for thread-safe instance management.
/// Multiple threads can safely request instances concurrently; each instance
/// itself is wrapped in `Arc<Mutex<>>` so only one extraction runs on it at
/// a time.
pub struct OcrInstanceManager {
    instances: Mutex<HashMap<String, Arc<Mutex<LepTess>>>>,
}

impl OcrInstanceManager {
    /// Create a new OCR instance manager
    ///
    /// Initializes an empty instance pool. Instances will be created
    /// on-demand when first requested via `get_instance()`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use receipt_ocr::instance_manager::OcrInstanceManager;
    ///
    /// let manager = OcrInstanceManager::new();
    /// // Manager is ready to provide OCR instances
    /// ```
    pub fn new() -> Self {
        Self {
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Get or create an OCR instance for the given configuration
    ///
    /// Returns an existing instance if one exists for the language/model
    /// combination, otherwise creates a new instance configured for receipt
    /// scans (page segmentation mode, user words, character whitelist) and
    /// stores it for future reuse.
    ///
    /// # Arguments
    ///
    /// * `config` - OCR configuration containing language settings and other options
    ///
    /// # Errors
    ///
    /// Returns an error if Tesseract instance creation fails (e.g., invalid
    /// language codes or missing traineddata files)
    pub fn get_instance(&self, config: &OcrConfig) -> anyhow::Result<Arc<Mutex<LepTess>>> {
        // Key includes both languages and model type
        let key = format!("{}:{}", config.languages, config.model_type.tessdata_dir());

        // Try to get existing instance
        {
            let instances = self
                .instances
                .lock()
                .expect("Failed to acquire instances lock");
            if let Some(instance) = instances.get(&key) {
                return Ok(Arc::clone(instance));
            }
        }

        // Create new instance if none exists
        info!(
            "Creating new OCR instance for languages: {} with model: {}",
            config.languages,
            config.model_type.tessdata_dir()
        );

        // Determine tessdata path based on model type
        let tessdata_path = Self::get_tessdata_path(config.model_type);

        let mut tess = LepTess::new(tessdata_path.as_deref(), &config.languages)
            .map_err(|e| anyhow::anyhow!("Failed to initialize Tesseract OCR instance: {}", e))?;

        // Set default PSM mode (can be overridden later)
        tess.set_variable(
            leptess::Variable::TesseditPagesegMode,
            config.psm_mode.as_str(),
        )
        .map_err(|e| anyhow::anyhow!("Failed to set PSM mode: {}", e))?;

        // Set custom user words file if configured (retailer names and
        // receipt vocabulary feed Tesseract's language model)
        if let Some(user_words_path) = &config.user_words_file {
            tess.set_variable(leptess::Variable::UserWordsFile, user_words_path)
                .map_err(|e| anyhow::anyhow!("Failed to set user words file: {}", e))?;
            info!(
                "Configured Tesseract with custom user words file: {}",
                user_words_path
            );
        }

        // Set character whitelist if configured
        if let Some(whitelist) = &config.character_whitelist {
            tess.set_variable(leptess::Variable::TesseditCharWhitelist, whitelist)
                .map_err(|e| anyhow::anyhow!("Failed to set character whitelist: {}", e))?;
            info!(
                "Configured Tesseract with character whitelist: {} characters",
                whitelist.len()
            );
        }

        let instance = Arc::new(Mutex::new(tess));

        // Store the instance
        {
            let mut instances = self
                .instances
                .lock()
                .expect("Failed to acquire instances lock");
            instances.insert(key, Arc::clone(&instance));
        }

        Ok(instance)
    }

    /// Get the tessdata path for the specified model type
    ///
    /// Attempts to find the appropriate tessdata directory based on the model type.
    /// Falls back to default path if specific model directory is not found.
    fn get_tessdata_path(model_type: crate::ocr_config::ModelType) -> Option<String> {
        use crate::ocr_config::ModelType;

        // Common tessdata installation paths to try
        let possible_paths = match model_type {
            ModelType::Fast => vec![
                "/usr/share/tesseract-ocr/5/tessdata_fast",
                "/usr/share/tesseract-ocr/4.00/tessdata_fast",
                "/usr/share/tessdata_fast",
                "/usr/local/share/tessdata_fast",
            ],
            ModelType::Best => vec![
                "/usr/share/tesseract-ocr/5/tessdata_best",
                "/usr/share/tesseract-ocr/4.00/tessdata_best",
                "/usr/share/tessdata_best",
                "/usr/local/share/tessdata_best",
            ],
        };

        // Try each path and return the first one that exists
        for path in possible_paths {
            if std::path::Path::new(path).exists() {
                info!("Using tessdata path: {}", path);
                return Some(path.to_string());
            }
        }

        // Fall back to default (None) if no specific path found
        info!(
            "No specific tessdata path found for model type {:?}, using default",
            model_type
        );
        None
    }

    /// Remove an instance (useful for cleanup or when configuration changes)
    pub fn _remove_instance(&self, languages: &str, model_type: crate::ocr_config::ModelType) {
        let key = format!("{}:{}", languages, model_type.tessdata_dir());
        let mut instances = self
            .instances
            .lock()
            .expect("Failed to acquire instances lock");
        if instances.remove(&key).is_some() {
            info!(
                "Removed OCR instance for languages: {} with model: {}",
                languages,
                model_type.tessdata_dir()
            );
        }
    }

    /// Get the number of cached instances
    pub fn _instance_count(&self) -> usize {
        let instances = self
            .instances
            .lock()
            .expect("Failed to acquire instances lock");
        instances.len()
    }
}

impl Default for OcrInstanceManager {
    fn default() -> Self {
        Self::new()
    }
}
