//! Exporting the price database as CSV

use crate::core::error::{PriceDbError, Result};
use crate::core::price::{DATE_TIME_FORMAT, PriceRecord, sort_chronologically};
use crate::pricedb::PriceDatabase;
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use tracing::{info, warn};

const UNKNOWN_CURRENCY: &str = "UNK";

#[derive(Serialize)]
struct CsvRow<'a> {
    timestamp: String,
    symbol: &'a str,
    currency: &'a str,
    price: String,
}

/// Writes `records` as CSV, header first, in the given order.
pub fn write_csv<W: Write>(records: &[PriceRecord], out: W) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(out);
    writer
        .write_record(["timestamp", "symbol", "currency", "price"])
        .map_err(|e| PriceDbError::io("<csv output>", e.into()))?;
    for record in records {
        let currency = record.data.currency().unwrap_or_else(|| {
            warn!("No currency known for {}, writing {}", record, UNKNOWN_CURRENCY);
            UNKNOWN_CURRENCY
        });
        writer
            .serialize(CsvRow {
                timestamp: record.timestamp.format(DATE_TIME_FORMAT).to_string(),
                symbol: &record.symbol,
                currency,
                price: record.data.last_price(),
            })
            .map_err(|e| PriceDbError::io("<csv output>", e.into()))?;
    }
    writer
        .flush()
        .map_err(|e| PriceDbError::io("<csv output>", e))
}

/// Parses the whole database as-is (symbols are not remapped) and writes it
/// as chronologically sorted CSV.
pub fn export_csv<W: Write>(database: &PriceDatabase, out: W) -> Result<usize> {
    let mut records = database.parse(&HashMap::new())?;
    sort_chronologically(&mut records);
    write_csv(&records, out)?;
    info!(
        count = records.len(),
        "Exported {} as CSV",
        database.path().display()
    );
    Ok(records.len())
}
