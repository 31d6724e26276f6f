//! Text folding used when comparing header names and natural keys.

use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

const BOM: char = '\u{feff}';

/// Fold a value for loose comparison.
///
/// Strips a leading byte-order mark, decomposes to NFD, drops combining
/// marks (so `Ñ` and `N`, `é` and `e` compare equal), collapses runs of
/// whitespace to a single space, and lower-cases the result.
///
/// ```
/// use tarja_sync::normalize::fold_for_compare;
///
/// assert_eq!(fold_for_compare("  Cerezo   Lapíns "), "cerezo lapins");
/// assert_eq!(fold_for_compare("AÑO"), "ano");
/// ```
pub fn fold_for_compare(value: &str) -> String {
    let trimmed = value.strip_prefix(BOM).unwrap_or(value);
    let stripped: String = trimmed.nfd().filter(|c| !is_combining_mark(*c)).collect();
    stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Parse a surrogate id the way spreadsheet exports write them.
pub fn parse_id(token: &str) -> Option<i64> {
    token.trim().parse::<i64>().ok()
}
