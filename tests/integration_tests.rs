//! # Integration Tests
//!
//! End-to-end tests for the receipt service: recognized OCR lines flow
//! through reconstruction into the results store, and the stored file keeps
//! the shape downstream consumers read.

use receipt_ocr::circuit_breaker::CircuitBreaker;
use receipt_ocr::config::AppConfig;
use receipt_ocr::engine::{RecognizerBackend, RemoteOcrClient, DEFAULT_ENGINE, SUPPORTED_ENGINES};
use receipt_ocr::errors::AppError;
use receipt_ocr::instance_manager::OcrInstanceManager;
use receipt_ocr::lexicon::{load_receipt_lexicon, ReceiptLexicon};
use receipt_ocr::parser::{parse_receipt, LineItem, ReceiptRecord};
use receipt_ocr::results::{ResultEntry, ResultStatus, ResultStore};

fn empty_record() -> ReceiptRecord {
    ReceiptRecord {
        store: String::new(),
        total: None,
        items: Vec::new(),
    }
}

/// A full pass over a realistic supermarket receipt: OCR lines in, parsed
/// record out, stored and queryable by upload filename.
#[test]
fn test_recognized_lines_become_a_stored_result() {
    let ocr_text = r#"
    REWE
    Markt GmbH + Co. KG
    Musterstr. 12, 10115 Berlin
    Milch 1,5L
    1,29 A
    Brot Vollkorn 2,49 B
    Joghurt Natur 0,89
    2 Stk x 0,90
    Kaffee Crema 6,99 A
    Summe
    11,67 EUR
    VISA Kartenzahlung
    Vielen Dank fuer Ihren Einkauf
    "#;

    let lines: Vec<String> = ocr_text
        .lines()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect();

    let record = parse_receipt(&lines, &ReceiptLexicon::default());

    assert_eq!(record.store, "REWE");
    assert_eq!(record.total, Some(11.67));
    assert_eq!(record.items.len(), 4);

    // Name printed on its own line, price on the next
    assert_eq!(record.items[0].name, "Milch 1,5L");
    assert_eq!(record.items[0].quantity, 1.0);
    assert_eq!(record.items[0].price, 1.29);

    assert_eq!(record.items[1].name, "Brot Vollkorn");
    assert_eq!(record.items[1].price, 2.49);

    // "2 Stk x 0,90" corrects the item printed right above it
    assert_eq!(record.items[2].name, "Joghurt Natur");
    assert_eq!(record.items[2].quantity, 2.0);
    assert_eq!(record.items[2].price, 0.90);

    assert_eq!(record.items[3].name, "Kaffee Crema");
    assert_eq!(record.items[3].price, 6.99);

    let dir = tempfile::tempdir().unwrap();
    let store = ResultStore::new(dir.path().join("results.json"), dir.path().join("debug"));
    store
        .append(ResultEntry::new("rewe_bon.jpg", "tesseract", record))
        .unwrap();

    match store.lookup("rewe_bon.jpg") {
        ResultStatus::Done(entry) => {
            assert_eq!(entry.file, "rewe_bon.jpg");
            assert_eq!(entry.engine, "tesseract");
            assert_eq!(entry.receipt.store, "REWE");
            assert_eq!(entry.receipt.total, Some(11.67));
            assert_eq!(entry.receipt.items.len(), 4);
        }
        other => panic!("expected a stored result, got {:?}", other),
    }
}

#[test]
fn test_status_lifecycle_tracks_processing_state() {
    let dir = tempfile::tempdir().unwrap();
    let store = ResultStore::new(dir.path().join("results.json"), dir.path().join("debug"));

    // Nothing stored yet at all
    assert_eq!(store.lookup("kassenbon.png"), ResultStatus::NoResults);
    assert!(store.snapshot().is_none());

    // Other files have results, this one is still in flight
    store
        .append(ResultEntry::new("other_receipt.png", "tesseract", empty_record()))
        .unwrap();
    assert_eq!(store.lookup("kassenbon.png"), ResultStatus::Processing);

    // Re-running with another engine supersedes the earlier entry
    store
        .append(ResultEntry::new("kassenbon.png", "tesseract", empty_record()))
        .unwrap();
    store
        .append(ResultEntry::new("kassenbon.png", "paddle", empty_record()))
        .unwrap();

    match store.lookup("kassenbon.png") {
        ResultStatus::Done(entry) => assert_eq!(entry.engine, "paddle"),
        other => panic!("expected most recent result, got {:?}", other),
    }

    let snapshot = store.snapshot().unwrap();
    assert_eq!(snapshot.len(), 3);
    assert_eq!(snapshot[0].file, "other_receipt.png");
    assert_eq!(snapshot[2].engine, "paddle");
}

/// The results file is read by scripts outside this codebase, so its JSON
/// shape is a contract: a flat array of entries with receipt fields inlined.
#[test]
fn test_results_file_matches_consumer_contract() {
    let dir = tempfile::tempdir().unwrap();
    let store = ResultStore::new(dir.path().join("results.json"), dir.path().join("debug"));

    let record = ReceiptRecord {
        store: "EDEKA".to_string(),
        total: Some(3.98),
        items: vec![LineItem {
            name: "Butter".to_string(),
            quantity: 2.0,
            price: 1.99,
        }],
    };
    store
        .append(ResultEntry::new("edeka_bon.jpg", "tesseract", record))
        .unwrap();

    let raw = std::fs::read_to_string(store.results_path()).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();

    let entries = parsed.as_array().expect("results file holds a JSON array");
    assert_eq!(entries.len(), 1);

    let entry = entries[0].as_object().unwrap();
    for key in ["timestamp", "file", "engine", "store", "total", "items"] {
        assert!(entry.contains_key(key), "missing key: {}", key);
    }
    // Receipt fields are flattened into the entry, not nested
    assert!(!entry.contains_key("receipt"));
    assert!(entry["timestamp"].as_str().is_some_and(|t| !t.is_empty()));

    assert_eq!(entry["store"], "EDEKA");
    assert_eq!(entry["total"], 3.98);

    let item = entries[0]["items"][0].as_object().unwrap();
    assert!(item.contains_key("name"));
    assert!(item.contains_key("qty"));
    assert!(item.contains_key("price"));
    assert!(!item.contains_key("quantity"));
    assert_eq!(entries[0]["items"][0]["qty"], 2.0);
}

/// A scan where recognition produced only payment noise still gets stored,
/// with an explicit null total.
#[test]
fn test_noise_only_scan_still_records_an_entry() {
    let lines = vec![
        "VISA".to_string(),
        "EUR".to_string(),
        "Posten: 2".to_string(),
    ];
    let record = parse_receipt(&lines, &ReceiptLexicon::default());

    assert_eq!(record.store, "");
    assert!(record.items.is_empty());
    assert_eq!(record.total, None);

    let dir = tempfile::tempdir().unwrap();
    let store = ResultStore::new(dir.path().join("results.json"), dir.path().join("debug"));
    store
        .append(ResultEntry::new("blurry.png", "tesseract", record))
        .unwrap();

    assert!(matches!(store.lookup("blurry.png"), ResultStatus::Done(_)));

    let raw = std::fs::read_to_string(store.results_path()).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert!(parsed[0]["total"].is_null());
    assert_eq!(parsed[0]["items"].as_array().unwrap().len(), 0);
}

#[test]
fn test_engine_selection_boundaries() {
    assert_eq!(
        RecognizerBackend::parse(DEFAULT_ENGINE).unwrap().name(),
        "tesseract"
    );

    for name in SUPPORTED_ENGINES {
        assert!(RecognizerBackend::parse(name).is_ok());
    }

    // Matching is exact; the HTTP layer lowercases before parsing
    assert!(RecognizerBackend::parse("TESSERACT").is_err());
    assert_eq!(
        RecognizerBackend::parse(&"PADDLE".to_lowercase())
            .unwrap()
            .name(),
        "paddle"
    );

    match RecognizerBackend::parse("docling") {
        Err(AppError::InvalidInput(msg)) => {
            assert!(msg.contains("Unknown OCR engine: docling"));
            assert!(msg.contains("tesseract"));
        }
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[test]
fn test_debug_dumps_are_per_engine_and_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let debug_dir = dir.path().join("debug");
    let store = ResultStore::new(dir.path().join("results.json"), debug_dir.clone());

    store.dump_debug_lines("tesseract", &["REWE".to_string(), "Summe".to_string()]);
    store.dump_debug_lines("paddle", &["EDEKA".to_string()]);

    let tesseract_dump = debug_dir.join("debug_last_ocr_tesseract.txt");
    let paddle_dump = debug_dir.join("debug_last_ocr_paddle.txt");
    assert_eq!(
        std::fs::read_to_string(&tesseract_dump).unwrap(),
        "REWE\nSumme"
    );
    assert_eq!(std::fs::read_to_string(&paddle_dump).unwrap(), "EDEKA");

    // A second run for the same engine replaces its dump
    store.dump_debug_lines("tesseract", &["NETTO".to_string()]);
    assert_eq!(std::fs::read_to_string(&tesseract_dump).unwrap(), "NETTO");

    assert_eq!(std::fs::read_dir(&debug_dir).unwrap().count(), 2);
}

/// The default configuration wires up the same components main() builds,
/// minus the pieces that need Tesseract or a database.
#[test]
fn test_default_configuration_wires_up() {
    let config = AppConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.engine.default_engine, DEFAULT_ENGINE);
    assert_eq!(config.ocr.languages, "deu");

    let breaker = CircuitBreaker::new(config.ocr.recovery.clone());
    assert!(!breaker.is_open());

    let manager = OcrInstanceManager::default();
    assert_eq!(manager._instance_count(), 0);

    let client = RemoteOcrClient::new(
        config.engine.remote_url.clone(),
        config.engine.remote_timeout_secs,
    )
    .unwrap();
    assert_eq!(client.base_url(), "http://127.0.0.1:8868");
}

#[test]
fn test_bundled_lexicon_loads() {
    let lexicon = load_receipt_lexicon();
    assert!(lexicon.validate().is_ok());

    assert!(!lexicon.known_stores.is_empty());
    assert!(lexicon.is_total_label("Summe: 11,67"));
    assert!(lexicon.is_noise("VISA Kartenzahlung"));
    assert!(!lexicon.is_noise("Milch 1,5L"));
}
