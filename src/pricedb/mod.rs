//! Reading and parsing the flat-file price database
//!
//! Every meaningful line is a price directive:
//!
//! ```text
//! P 2021/02/19 18:30:01 BTC     $22384.1824282
//! P 2021/02/27 22:45:00 "VFV.TO" USD$4,382.38
//! ```
//!
//! Blank lines and `;` comments are skipped. Anything else is an error.

pub mod dedup;

use crate::core::error::{PriceDbError, Result};
use crate::core::price::{DATE_TIME_FORMAT, PriceData, PriceRecord};
use chrono::NaiveDateTime;
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

pub use dedup::dedup_against_fetched;

static DIRECTIVE_RX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^P\s+([0-9]{4}/[0-9]{2}/[0-9]{2} [0-9]{2}:[0-9]{2}:[0-9]{2})\s+([^\s"]+|"[^"]+")([^0-9]+)((?:[0-9],?)+(?:\.[0-9]+)?)$"#,
    )
    .expect("price directive pattern is valid")
});

/// Fields of a single price directive, before any symbol remapping.
#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    pub timestamp: NaiveDateTime,
    pub symbol: String,
    pub price: String,
    pub currency: String,
}

pub fn is_blank_or_comment(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with(';')
}

/// Parses one directive line. Returns `None` when the line does not match
/// the directive grammar.
pub fn parse_directive(line: &str) -> Option<Directive> {
    let caps = DIRECTIVE_RX.captures(line.trim())?;
    let timestamp = NaiveDateTime::parse_from_str(&caps[1], DATE_TIME_FORMAT).ok()?;
    Some(Directive {
        timestamp,
        symbol: caps[2].to_string(),
        currency: caps[3].trim().to_string(),
        price: caps[4].to_string(),
    })
}

/// The directive lines of a price database, with their 1-based line numbers.
#[derive(Debug, Clone)]
pub struct PriceDatabase {
    path: PathBuf,
    lines: Vec<(usize, String)>,
}

impl PriceDatabase {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| PriceDbError::io(path, e))?;
        let db = Self::from_contents(path, &contents);
        debug!(
            "Read {} price directives from {}",
            db.lines.len(),
            path.display()
        );
        Ok(db)
    }

    pub fn from_contents(path: impl Into<PathBuf>, contents: &str) -> Self {
        let lines = contents
            .split('\n')
            .enumerate()
            .filter(|(_, line)| !is_blank_or_comment(line))
            .map(|(idx, line)| (idx + 1, line.to_string()))
            .collect();
        PriceDatabase {
            path: path.into(),
            lines,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Parses every line into a record, translating display names through
    /// `symbol_map` into canonical symbols. Fails on the first bad line.
    pub fn parse(&self, symbol_map: &HashMap<String, String>) -> Result<Vec<PriceRecord>> {
        self.lines
            .iter()
            .map(|(line_number, line)| {
                let directive = parse_directive(line).ok_or_else(|| PriceDbError::Parse {
                    path: self.path.clone(),
                    line_number: *line_number,
                    line: line.clone(),
                })?;
                let symbol = symbol_map
                    .get(&directive.symbol)
                    .cloned()
                    .unwrap_or(directive.symbol);
                Ok(PriceRecord::new(
                    directive.timestamp,
                    symbol,
                    PriceData::Recorded {
                        price: directive.price,
                        currency: directive.currency,
                    },
                ))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::core::price::sort_chronologically;

    const PRICE_DB: &str = "
P 2021/01/18 19:23:00 £       $6.23635
P 2021/01/18 19:23:00 GOOG    £2362.428722

P 2021/02/19 12:42:40 BTC     $25135.3262473
P 2021/02/19 12:42:40 DOGE    $99.2384627935711

; this is a comment
   ; and so is this

P 2021/02/19 18:30:01 BTC     $22384.1824282
P 2021/02/27 22:45:00 GOOG    USD$4382.385283
";

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, DATE_TIME_FORMAT).unwrap()
    }

    #[test]
    fn test_blank_or_comment() {
        assert!(is_blank_or_comment(""));
        assert!(is_blank_or_comment("   \t"));
        assert!(is_blank_or_comment("; comment"));
        assert!(is_blank_or_comment("   ; indented comment"));
        assert!(!is_blank_or_comment("P 2021/01/18 19:23:00 GOOG $1"));
    }

    #[test]
    fn test_parse_directive_fields() {
        let d = parse_directive("P 2021/02/27 22:45:00 GOOG    USD$4382.385283").unwrap();
        assert_eq!(d.timestamp, at("2021/02/27 22:45:00"));
        assert_eq!(d.symbol, "GOOG");
        assert_eq!(d.currency, "USD$");
        assert_eq!(d.price, "4382.385283");
    }

    #[test]
    fn test_parse_directive_quoted_symbol_and_grouped_amount() {
        let d = parse_directive("  P 2021/02/27 22:45:00 \"VFV.TO\"  $1,234,567.5  ").unwrap();
        assert_eq!(d.symbol, "\"VFV.TO\"");
        assert_eq!(d.currency, "$");
        assert_eq!(d.price, "1,234,567.5");
    }

    #[test]
    fn test_parse_directive_multibyte_symbol() {
        let d = parse_directive("P 2021/01/18 19:23:00 £       $6.23635").unwrap();
        assert_eq!(d.symbol, "£");
        assert_eq!(d.currency, "$");
        assert_eq!(d.price, "6.23635");
    }

    #[test]
    fn test_parse_directive_integer_amount() {
        let d = parse_directive("P 2021/01/18 19:23:00 GOOG £2362").unwrap();
        assert_eq!(d.currency, "£");
        assert_eq!(d.price, "2362");
    }

    #[test]
    fn test_parse_directive_rejects_malformed() {
        assert!(parse_directive("P 2021-01-18 19:23:00 GOOG $1").is_none());
        assert!(parse_directive("P 2021/01/18 GOOG $1").is_none());
        assert!(parse_directive("X 2021/01/18 19:23:00 GOOG $1").is_none());
        assert!(parse_directive("P 2021/01/18 19:23:00 GOOG $1.").is_none());
        assert!(parse_directive("P 2021/01/18 19:23:00 GOOG").is_none());
        assert!(parse_directive("P 2021/13/45 19:23:00 GOOG $1").is_none());
    }

    #[test]
    fn test_parse_database() {
        let db = PriceDatabase::from_contents("price.db", PRICE_DB);
        assert_eq!(db.len(), 6);
        assert!(!db.is_empty());
        assert!(PriceDatabase::from_contents("price.db", "\n; only a comment\n").is_empty());

        let mut records = db.parse(&HashMap::new()).unwrap();
        sort_chronologically(&mut records);

        let got: Vec<_> = records
            .iter()
            .map(|r| {
                (
                    r.timestamp,
                    r.symbol.as_str(),
                    r.data.last_price(),
                    r.data.currency().unwrap().to_string(),
                )
            })
            .collect();
        assert_eq!(
            got,
            vec![
                (at("2021/01/18 19:23:00"), "GOOG", "2362.428722".to_string(), "£".to_string()),
                (at("2021/01/18 19:23:00"), "£", "6.23635".to_string(), "$".to_string()),
                (at("2021/02/19 12:42:40"), "BTC", "25135.3262473".to_string(), "$".to_string()),
                (at("2021/02/19 12:42:40"), "DOGE", "99.2384627935711".to_string(), "$".to_string()),
                (at("2021/02/19 18:30:01"), "BTC", "22384.1824282".to_string(), "$".to_string()),
                (at("2021/02/27 22:45:00"), "GOOG", "4382.385283".to_string(), "USD$".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_applies_symbol_map() {
        let db = PriceDatabase::from_contents("price.db", "P 2021/02/19 22:45:00 B $1.5\n");
        let map = HashMap::from([("B".to_string(), "BTC".to_string())]);
        let records = db.parse(&map).unwrap();
        assert_eq!(records[0].symbol, "BTC");
    }

    #[test]
    fn test_parse_error_reports_line_number() {
        let contents = "; header\nP 2021/02/19 22:45:00 BTC $1.5\n\nthis is not a price\n";
        let db = PriceDatabase::from_contents("price.db", contents);
        let err = db.parse(&HashMap::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
        match err {
            PriceDbError::Parse {
                line_number, line, ..
            } => {
                assert_eq!(line_number, 4);
                assert_eq!(line, "this is not a price");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_read_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = PriceDatabase::read(dir.path().join("missing.db")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
