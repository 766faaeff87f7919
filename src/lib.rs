//! # Receipt OCR Service
//!
//! An HTTP service that reconstructs structured purchase data from noisy
//! OCR output of German retail receipts: the store, the purchased line
//! items and the receipt total.

pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod engine;
pub mod errors;
pub mod instance_manager;
pub mod lexicon;
pub mod observability;
pub mod observability_config;
pub mod ocr;
pub mod ocr_config;
pub mod ocr_errors;
pub mod parser;
pub mod path_validation;
pub mod preprocessing;
pub mod results;
pub mod server;

// Re-export types for easier access
pub use lexicon::ReceiptLexicon;
pub use parser::{parse_receipt, LineItem, ReceiptRecord};
