//! Price records and the price source abstraction

use crate::core::error::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use std::cmp::Ordering;
use std::fmt::Display;

/// Layout of timestamps in price directives, e.g. `2021/02/19 22:45:00`.
pub const DATE_TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// The price carried by a record, shaped by where it came from.
#[derive(Debug, Clone, PartialEq)]
pub enum PriceData {
    /// A line already present in the price database.
    Recorded { price: String, currency: String },
    /// A daily open/high/low/close bar.
    DailyBar {
        open: String,
        high: String,
        low: String,
        close: String,
    },
    /// A brokerage candle.
    Candle {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
    /// A brokerage position snapshot.
    Position { current_price: f64, open_quantity: f64 },
    /// A spot exchange rate.
    ExchangeRate { rate: String },
}

impl PriceData {
    /// The last (closing) price as it should appear in a price directive.
    pub fn last_price(&self) -> String {
        match self {
            PriceData::Recorded { price, .. } => price.clone(),
            PriceData::DailyBar { close, .. } => close.clone(),
            PriceData::Candle { close, .. } => format!("{close:.6}"),
            PriceData::Position { current_price, .. } => format!("{current_price:.6}"),
            PriceData::ExchangeRate { rate } => rate.clone(),
        }
    }

    /// Currency symbol recorded next to the price, only known for database lines.
    pub fn currency(&self) -> Option<&str> {
        match self {
            PriceData::Recorded { currency, .. } => Some(currency),
            _ => None,
        }
    }
}

/// One timestamped price observation for a commodity.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceRecord {
    pub timestamp: NaiveDateTime,
    pub symbol: String,
    pub data: PriceData,
}

impl PriceRecord {
    pub fn new(timestamp: NaiveDateTime, symbol: impl Into<String>, data: PriceData) -> Self {
        PriceRecord {
            timestamp,
            symbol: symbol.into(),
            data,
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }

    /// Total order used everywhere records are merged: timestamp, then symbol.
    pub fn chronological(a: &PriceRecord, b: &PriceRecord) -> Ordering {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.symbol.cmp(&b.symbol))
    }
}

impl Display for PriceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.timestamp.format(DATE_TIME_FORMAT),
            self.symbol,
            self.data.last_price()
        )
    }
}

/// Sorts records by [`PriceRecord::chronological`]. The sort is stable.
pub fn sort_chronologically(records: &mut [PriceRecord]) {
    records.sort_by(PriceRecord::chronological);
}

#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Short provider name used in logs and errors.
    fn name(&self) -> &str;

    /// Fetches every configured symbol, already in canonical form.
    async fn fetch(&self) -> Result<Vec<PriceRecord>>;
}
