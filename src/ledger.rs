//! Rendering records as ledger price directives

use crate::core::config::Commodities;
use crate::core::price::{DATE_TIME_FORMAT, PriceRecord};
use std::io::{self, Write};

/// Width of the display column: the widest display name plus two spaces.
pub fn display_column_width(records: &[PriceRecord], commodities: &Commodities) -> usize {
    records
        .iter()
        .map(|record| {
            let (_, display) = commodities.currency_and_display(&record.symbol);
            display.chars().count()
        })
        .max()
        .unwrap_or(0)
        + 2
}

/// Writes one directive per record, with a blank line whenever the
/// timestamp changes.
pub fn render_ledger<W: Write>(
    records: &[PriceRecord],
    commodities: &Commodities,
    out: &mut W,
) -> io::Result<()> {
    let width = display_column_width(records, commodities);
    let mut previous = None;
    for record in records {
        if previous.is_some_and(|ts| ts != record.timestamp) {
            writeln!(out)?;
        }
        let (currency, display) = commodities.currency_and_display(&record.symbol);
        let padding = width.saturating_sub(display.chars().count());
        writeln!(
            out,
            "P {} {}{}{}{}",
            record.timestamp.format(DATE_TIME_FORMAT),
            display,
            " ".repeat(padding),
            currency,
            record.data.last_price()
        )?;
        previous = Some(record.timestamp);
    }
    Ok(())
}
