use crate::core::price::PriceRecord;
use chrono::{NaiveDate, NaiveTime};
use std::collections::HashSet;
use tracing::debug;

/// Returns the database records that are not superseded by `fetched`.
///
/// A database record is superseded when a fetched record covers the same
/// trading day and symbol, unless the database record was taken strictly
/// before `close_time`. Such intraday entries are kept next to the fetched
/// close.
pub fn dedup_against_fetched(
    fetched: &[PriceRecord],
    database: &[PriceRecord],
    close_time: NaiveTime,
) -> Vec<PriceRecord> {
    let covered: HashSet<(NaiveDate, &str)> = fetched
        .iter()
        .map(|record| (record.date(), record.symbol.as_str()))
        .collect();

    let kept: Vec<PriceRecord> = database
        .iter()
        .filter(|record| {
            !covered.contains(&(record.date(), record.symbol.as_str()))
                || record.timestamp.time() < close_time
        })
        .cloned()
        .collect();

    debug!(
        "Kept {} of {} database records against {} fetched",
        kept.len(),
        database.len(),
        fetched.len()
    );
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::price::{DATE_TIME_FORMAT, PriceData};
    use chrono::NaiveDateTime;

    fn close() -> NaiveTime {
        NaiveTime::from_hms_opt(22, 45, 0).unwrap()
    }

    fn record(ts: &str, symbol: &str, price: &str) -> PriceRecord {
        PriceRecord::new(
            NaiveDateTime::parse_from_str(ts, DATE_TIME_FORMAT).unwrap(),
            symbol,
            PriceData::Recorded {
                price: price.to_string(),
                currency: "$".to_string(),
            },
        )
    }

    fn fetched(ts: &str, symbol: &str, close: &str) -> PriceRecord {
        PriceRecord::new(
            NaiveDateTime::parse_from_str(ts, DATE_TIME_FORMAT).unwrap(),
            symbol,
            PriceData::DailyBar {
                open: close.to_string(),
                high: close.to_string(),
                low: close.to_string(),
                close: close.to_string(),
            },
        )
    }

    #[test]
    fn test_no_fetched_keeps_everything() {
        let db = vec![
            record("2021/02/19 12:42:40", "BTC", "1"),
            record("2021/02/19 22:45:00", "BTC", "2"),
        ];
        assert_eq!(dedup_against_fetched(&[], &db, close()), db);
    }

    #[test]
    fn test_close_entry_superseded_by_fetched() {
        let db = vec![record("2021/02/27 22:45:00", "GOOG", "4382.38")];
        let new = vec![fetched("2021/02/27 22:45:00", "GOOG", "4400.00")];
        assert!(dedup_against_fetched(&new, &db, close()).is_empty());
    }

    #[test]
    fn test_after_close_entry_superseded_by_fetched() {
        let db = vec![record("2021/02/27 23:10:00", "GOOG", "4382.38")];
        let new = vec![fetched("2021/02/27 22:45:00", "GOOG", "4400.00")];
        assert!(dedup_against_fetched(&new, &db, close()).is_empty());
    }

    #[test]
    fn test_intraday_entry_kept_next_to_fetched_close() {
        let db = vec![record("2021/02/19 18:30:01", "BTC", "22384.18")];
        let new = vec![fetched("2021/02/19 22:45:00", "BTC", "23000.00")];
        let kept = dedup_against_fetched(&new, &db, close());
        assert_eq!(kept, db);
    }

    #[test]
    fn test_other_dates_and_symbols_untouched() {
        let db = vec![
            record("2021/02/26 22:45:00", "GOOG", "1"),
            record("2021/02/27 22:45:00", "DOGE", "2"),
            record("2021/02/27 22:45:00", "GOOG", "3"),
        ];
        let new = vec![fetched("2021/02/27 22:45:00", "GOOG", "4")];
        let kept = dedup_against_fetched(&new, &db, close());
        assert_eq!(kept, db[..2].to_vec());
    }

    #[test]
    fn test_inputs_not_mutated_and_deterministic() {
        let db = vec![
            record("2021/02/27 22:45:00", "GOOG", "3"),
            record("2021/02/27 12:00:00", "GOOG", "2"),
        ];
        let new = vec![fetched("2021/02/27 22:45:00", "GOOG", "4")];
        let first = dedup_against_fetched(&new, &db, close());
        let second = dedup_against_fetched(&new, &db, close());
        assert_eq!(first, second);
        assert_eq!(first, vec![db[1].clone()]);
        assert_eq!(db.len(), 2);
    }
}
