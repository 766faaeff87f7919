//! # Receipt Parsing Module
//!
//! This module reconstructs a structured receipt record from the ordered,
//! noisy line sequence produced by a text recognition engine.
//!
//! ## Features
//!
//! - Normalization and repair of amounts split across recognized lines
//! - Store identification against a fixed retailer catalog
//! - **Line item segmentation**: name, quantity and price recovery with
//!   carry-over of wrapped names and quantity-correction lines
//! - Two-phase total resolution (labeled lines first, trailing numerics second)
//! - Noise filtering of payment and summary tokens
//!
//! The whole pass is a pure function of the input lines and the configured
//! [`ReceiptLexicon`]; it owns no state between invocations and is safe to
//! call concurrently for independent receipts.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::lexicon::ReceiptLexicon;

/// Lines scanned from the top of the receipt for a known retailer name
const STORE_SCAN_LINES: usize = 10;
/// Lines collected after a total label when searching for the total amount
const TOTAL_LABEL_WINDOW: usize = 5;
/// Trailing lines considered by the positional total fallback
const TOTAL_TAIL_LINES: usize = 10;

/// A single purchased product entry reconstructed from recognized text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    /// Product name as printed, with quantity and price tokens removed
    pub name: String,
    /// Purchased quantity, 1.0 when the receipt shows no quantity cue
    #[serde(rename = "qty")]
    pub quantity: f64,
    /// Line price in euros
    pub price: f64,
}

/// Structured result of one reconstruction pass over a receipt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptRecord {
    /// Issuing store token, empty when no known retailer matched
    pub store: String,
    /// Receipt total, `None` when neither resolver phase found an amount
    pub total: Option<f64>,
    /// Line items in receipt order
    pub items: Vec<LineItem>,
}

lazy_static! {
    /// Trailing monetary amount with optional currency or tax-code suffix
    static ref PRICE_RE: Regex = Regex::new(r"(\d+[.,]\d{2})\s?(?:€|[A-Z]{1,3})?$")
        .expect("price pattern should be valid");
    /// Quantity cue: number-unit form or the reversed "x number" form
    static ref QTY_RE: Regex =
        Regex::new(r"(?i)(?:(\d+[.,]?\d*)\s*(?:x|stk|stück|kg)\b)|(?:x\s?(\d+[.,]?\d*))")
            .expect("quantity pattern should be valid");
    /// Bare two-decimal amount, candidate for boundary-checked searches
    static ref AMOUNT_RE: Regex =
        Regex::new(r"\d+[.,]\d{2}").expect("amount pattern should be valid");
    /// First half of an amount split across two lines ("38," or "38,6")
    static ref SPLIT_HEAD_RE: Regex =
        Regex::new(r"^\d+[.,]\d?$").expect("split-head pattern should be valid");
    /// Continuation line carrying only digits
    static ref DIGITS_RE: Regex = Regex::new(r"^\d+$").expect("digits pattern should be valid");
    /// Line that is purely numeric: digits plus at most one separator
    static ref NUMERIC_LINE_RE: Regex =
        Regex::new(r"^\d+(?:[.,]\d*)?$").expect("numeric-line pattern should be valid");
}

/// Reconstruct a receipt record from recognized text lines.
///
/// The pipeline runs strictly top to bottom: lines are trimmed and emptied
/// lines dropped, decimal amounts split across adjacent lines are merged,
/// then store identification, item segmentation and total resolution run as
/// independent passes over the same merged sequence. A final filter drops
/// items whose name picked up noise tokens through buffered continuation
/// text.
///
/// Degradation is graceful by construction: an unknown store yields an empty
/// string, an unresolvable total yields `None`, and unclassifiable lines are
/// absorbed without side effects. The function never fails on receipt text.
///
/// # Arguments
///
/// * `lines` - Recognized text fragments in top-to-bottom receipt order
/// * `lexicon` - Fixed retailer/noise/total token sets
///
/// # Examples
///
/// ```
/// use receipt_ocr::lexicon::ReceiptLexicon;
/// use receipt_ocr::parser::parse_receipt;
///
/// let lines = vec![
///     "REWE Filiale 12".to_string(),
///     "Milch 1,5L".to_string(),
///     "1,29 A".to_string(),
///     "Summe".to_string(),
///     "1,29 EUR".to_string(),
/// ];
/// let record = parse_receipt(&lines, &ReceiptLexicon::default());
/// assert_eq!(record.store, "REWE");
/// assert_eq!(record.items.len(), 1);
/// assert_eq!(record.total, Some(1.29));
/// ```
pub fn parse_receipt(lines: &[String], lexicon: &ReceiptLexicon) -> ReceiptRecord {
    let normalized = normalize_lines(lines);
    let merged = merge_split_amounts(&normalized);
    debug!(
        input_lines = lines.len(),
        merged_lines = merged.len(),
        "Parsing recognized receipt lines"
    );

    let store = identify_store(&merged, lexicon);
    let items = segment_items(&merged, lexicon);
    let total = resolve_total(&merged, lexicon);
    let items = filter_noise(items, lexicon);

    ReceiptRecord {
        store,
        total,
        items,
    }
}

/// Trim every fragment and drop the ones that are empty afterwards.
///
/// Order is preserved and no lines are merged; casing is left untouched so
/// item names keep their printed form.
pub fn normalize_lines(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

/// Re-join decimal amounts that the recognizer split across two lines.
///
/// A line matching "digits, separator, at most one digit" followed by a line
/// of pure digits is concatenated into a single line. The scan is greedy and
/// local: a merged pair is never re-examined against a third line, so the
/// output length shrinks by exactly one per merge.
pub fn merge_split_amounts(lines: &[String]) -> Vec<String> {
    let mut merged = Vec::with_capacity(lines.len());
    let mut i = 0;
    while i < lines.len() {
        if i + 1 < lines.len()
            && SPLIT_HEAD_RE.is_match(&lines[i])
            && DIGITS_RE.is_match(&lines[i + 1])
        {
            let joined = format!("{}{}", lines[i], lines[i + 1]);
            merged.push(truncate_merged_amount(&joined));
            i += 2;
        } else {
            merged.push(lines[i].clone());
            i += 1;
        }
    }
    merged
}

/// Cap a merged amount at two fractional digits.
///
/// Printed amounts always carry exactly two decimals, so any further digits
/// in the continuation line are recognition junk and are dropped.
fn truncate_merged_amount(joined: &str) -> String {
    if let Some(pos) = joined.find([',', '.']) {
        let fraction_start = pos + 1;
        if joined.len() > fraction_start + 2 {
            return joined[..fraction_start + 2].to_string();
        }
    }
    joined.to_string()
}

/// Scan the first lines of the merged sequence for a known retailer.
///
/// Matching is case-insensitive containment; the first catalog entry found
/// in the earliest matching line wins and its canonical token is returned.
/// An empty string means "unknown store" and is a valid outcome.
fn identify_store(lines: &[String], lexicon: &ReceiptLexicon) -> String {
    for line in lines.iter().take(STORE_SCAN_LINES) {
        let lowered = line.to_lowercase();
        for store in &lexicon.known_stores {
            if lowered.contains(&store.to_lowercase()) {
                return store.clone();
            }
        }
    }
    String::new()
}

/// Walk the merged lines and emit structured line items.
///
/// ## State machine
///
/// The segmenter threads two pieces of local state through the walk:
///
/// - a pending-name buffer holding the most recent line that could not be
///   classified, presumed to be a wrapped product name for the next price
///   line (a fresh unclassified line supersedes the buffered one);
/// - a last-item reference so that quantity annotations printed on the line
///   *after* an item ("2 Stk x 0,90") correct that item instead of creating
///   a new one.
///
/// ## Per-line transitions, in priority order
///
/// 1. Line contains a noise token: skipped, no state change.
/// 2. Line contains a total label: segmentation terminates, the summary
///    region never produces items.
/// 3. Line ends in a price: the text before the price is the candidate
///    name. Empty or single-letter candidates are replaced by the buffered
///    pending name; a single-letter tax-category marker is stripped; an
///    embedded quantity cue sets the quantity and is removed from the name.
///    Names longer than one character become a new item. A name that
///    collapsed to nothing but carried a quantity cue is a correction to
///    the last item (quantity update, price overwrite). The pending buffer
///    is empty after every price line.
/// 4. No price: with a last item present, a quantity cue turns the line
///    into a correction (quantity update, plus price overwrite when an
///    amount occurs elsewhere in the line); otherwise the line becomes the
///    pending name.
///
/// Quantity defaults to 1.0 and only positive parsed values replace it.
fn segment_items(lines: &[String], lexicon: &ReceiptLexicon) -> Vec<LineItem> {
    let mut items: Vec<LineItem> = Vec::new();
    let mut pending_name: Option<String> = None;

    for line in lines {
        let lowered = line.to_lowercase();
        if lexicon.is_noise(&lowered) {
            continue;
        }
        if lexicon.is_total_label(&lowered) {
            break;
        }

        if let Some((price, split)) = match_trailing_price(line) {
            let mut name = trim_name(&line[..split]);
            if name.chars().count() <= 1 {
                if let Some(buffered) = pending_name.take() {
                    name = buffered;
                }
            }
            name = strip_tax_marker(&name);

            let mut quantity = 1.0;
            let mut cue_value = None;
            let mut had_cue = false;
            if let Some((value, remainder)) = extract_quantity(&name) {
                had_cue = true;
                cue_value = value.filter(|v| *v > 0.0);
                if let Some(v) = cue_value {
                    quantity = v;
                }
                name = remainder;
            }

            if name.chars().count() > 1 {
                items.push(LineItem {
                    name,
                    quantity,
                    price,
                });
            } else if had_cue {
                // Quantity/unit-price annotation for the previous item
                if let Some(last) = items.last_mut() {
                    if let Some(v) = cue_value {
                        last.quantity = v;
                    }
                    last.price = price;
                }
            }
            pending_name = None;
            continue;
        }

        if let Some(last) = items.last_mut() {
            if let Some((value, _)) = extract_quantity(line) {
                if let Some(v) = value.filter(|v| *v > 0.0) {
                    last.quantity = v;
                }
                if let Some(amount) = find_amount(line) {
                    last.price = amount;
                }
                continue;
            }
        }
        pending_name = Some(line.clone());
    }

    items
}

/// Locate the receipt total over the full merged sequence.
///
/// Phase 1 collects the first total-label line and up to the next five
/// lines, concatenates the digit-bearing ones and searches the result for a
/// two-decimal amount. Phase 2, used only when phase 1 finds nothing, keeps
/// the purely numeric lines among the last ten and extracts from the last
/// two of them (concatenated) or from a single survivor directly.
fn resolve_total(lines: &[String], lexicon: &ReceiptLexicon) -> Option<f64> {
    if let Some(idx) = lines
        .iter()
        .position(|line| lexicon.is_total_label(&line.to_lowercase()))
    {
        let window_end = (idx + 1 + TOTAL_LABEL_WINDOW).min(lines.len());
        let concatenated: String = lines[idx..window_end]
            .iter()
            .filter(|line| line.chars().any(|c| c.is_ascii_digit()))
            .map(|line| line.as_str())
            .collect();
        if let Some(total) = find_amount(&concatenated) {
            return Some(total);
        }
    }

    let tail_start = lines.len().saturating_sub(TOTAL_TAIL_LINES);
    let numeric: Vec<&String> = lines[tail_start..]
        .iter()
        .filter(|line| NUMERIC_LINE_RE.is_match(line))
        .collect();
    match numeric.len() {
        0 => None,
        1 => find_amount(numeric[0]),
        n => find_amount(&format!("{}{}", numeric[n - 2], numeric[n - 1])),
    }
}

/// Drop items whose name picked up noise or summary tokens.
///
/// Runs once after segmentation as a safety net for tokens introduced via
/// the pending-name buffer.
fn filter_noise(items: Vec<LineItem>, lexicon: &ReceiptLexicon) -> Vec<LineItem> {
    items
        .into_iter()
        .filter(|item| {
            let lowered = item.name.to_lowercase();
            !lexicon.is_noise(&lowered) && !lexicon.is_total_label(&lowered)
        })
        .collect()
}

/// First two-decimal amount in `text` that is not the prefix of a longer
/// number.
///
/// A candidate immediately followed by another digit is rejected and the
/// search resumes one character further, so "1.234,56" yields 234.56 rather
/// than 1.23.
pub fn find_amount(text: &str) -> Option<f64> {
    let mut start = 0;
    while let Some(m) = AMOUNT_RE.find_at(text, start) {
        let next_is_digit = text
            .as_bytes()
            .get(m.end())
            .is_some_and(|b| b.is_ascii_digit());
        if !next_is_digit {
            return parse_decimal(m.as_str());
        }
        start = m.start() + 1;
    }
    None
}

/// Anchored price match: the amount value and the byte offset where the
/// matched price token starts, for splitting off the name part.
fn match_trailing_price(line: &str) -> Option<(f64, usize)> {
    let caps = PRICE_RE.captures(line)?;
    let whole = caps.get(0)?;
    let amount = caps.get(1)?;
    let price = parse_decimal(amount.as_str())?;
    Some((price, whole.start()))
}

/// Quantity cue inside a span: `None` when the pattern does not match,
/// otherwise the parsed value (if parseable) and the span with every cue
/// occurrence removed.
fn extract_quantity(text: &str) -> Option<(Option<f64>, String)> {
    let caps = QTY_RE.captures(text)?;
    let value = caps
        .get(1)
        .or_else(|| caps.get(2))
        .and_then(|m| parse_decimal(m.as_str()));
    let remainder = trim_name(&QTY_RE.replace_all(text, ""));
    Some((value, remainder))
}

/// Parse a recognized decimal with either separator convention.
///
/// Failures are reported as `None` and treated by callers as "no cue";
/// malformed numerics never propagate out of the parsing pass.
fn parse_decimal(text: &str) -> Option<f64> {
    text.replace(',', ".").parse::<f64>().ok()
}

/// Trim spaces, dots and dashes from both ends of a candidate name
fn trim_name(text: &str) -> String {
    text.trim_matches(|c: char| c == ' ' || c == '.' || c == '-')
        .to_string()
}

/// Strip a single leading or trailing tax-category letter from a name.
///
/// German receipts print the tax class as a lone uppercase letter next to
/// the item ("Milch A"); the marker is dropped only when more of the name
/// remains.
fn strip_tax_marker(name: &str) -> String {
    let mut parts: Vec<&str> = name.split_whitespace().collect();
    if parts.len() > 1 && is_single_uppercase(parts[parts.len() - 1]) {
        parts.pop();
    }
    if parts.len() > 1 && is_single_uppercase(parts[0]) {
        parts.remove(0);
    }
    parts.join(" ")
}

fn is_single_uppercase(token: &str) -> bool {
    token.len() == 1 && token.chars().all(|c| c.is_ascii_uppercase())
}
