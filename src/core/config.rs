use crate::core::error::{PriceDbError, Result};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::{fs, path::Path, path::PathBuf};
use tracing::debug;

pub const DEFAULT_CONFIG_FILE: &str = "~/.pricedbfetcher_config";
pub const DEFAULT_PRICE_DB_FILE: &str = "~/.price.db";
pub const DEFAULT_CLOSE_TIME: &str = "22:45:00";

const CLOSE_TIME_FORMAT: &str = "%H:%M:%S";
const START_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AlphaVantageConfig {
    #[serde(default)]
    pub stock_symbols: Vec<String>,
    #[serde(default)]
    pub forex_symbols: Vec<String>,
    #[serde(default)]
    pub cryptocurrency_symbols: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct QuestradeConfig {
    #[serde(default)]
    pub market_symbols: Vec<String>,
    #[serde(default)]
    pub position_symbols: Vec<String>,
}

impl QuestradeConfig {
    pub fn is_empty(&self) -> bool {
        self.market_symbols.is_empty() && self.position_symbols.is_empty()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct CoinbaseConfig {
    #[serde(default)]
    pub currencies: Vec<String>,
}

/// How a commodity is written in the ledger. Empty fields fall back to
/// `$` and the canonical symbol.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct CommodityConfig {
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub display: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(transparent)]
pub struct Commodities(pub BTreeMap<String, CommodityConfig>);

impl Commodities {
    /// Currency and display name used when rendering `symbol`.
    pub fn currency_and_display<'a>(&'a self, symbol: &'a str) -> (&'a str, &'a str) {
        let mut currency: &'a str = "$";
        let mut display: &'a str = symbol;
        if let Some(config) = self.0.get(symbol) {
            if !config.currency.is_empty() {
                currency = config.currency.as_str();
            }
            if !config.display.is_empty() {
                display = config.display.as_str();
            }
        }
        (currency, display)
    }

    /// Maps each configured display name back to its canonical symbol.
    pub fn symbol_map(&self) -> HashMap<String, String> {
        self.0
            .iter()
            .filter(|(_, config)| !config.display.is_empty())
            .map(|(symbol, config)| (config.display.clone(), symbol.clone()))
            .collect()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub start_date: String,
    #[serde(default)]
    pub alphavantage: AlphaVantageConfig,
    #[serde(default)]
    pub questrade: QuestradeConfig,
    #[serde(default)]
    pub coinbase: CoinbaseConfig,
    #[serde(default)]
    pub commodity: Commodities,
}

impl AppConfig {
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config_str =
            fs::read_to_string(path).map_err(|e| PriceDbError::io(path, e))?;

        let config: Self = serde_json::from_str(&config_str).map_err(|e| {
            PriceDbError::config_with(format!("failed to parse {}", path.display()), e)
        })?;
        debug!("Successfully loaded config from {}", path.display());
        Ok(config)
    }

    /// The configured start date, `None` when unset.
    pub fn start_date(&self) -> Result<Option<NaiveDate>> {
        let raw = self.start_date.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        NaiveDate::parse_from_str(raw, START_DATE_FORMAT)
            .map(Some)
            .map_err(|e| PriceDbError::config_with(format!("invalid start_date {raw:?}"), e))
    }
}

pub fn parse_close_time(raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), CLOSE_TIME_FORMAT)
        .map_err(|e| PriceDbError::config_with(format!("invalid close time {raw:?}"), e))
}

/// Local wall-clock "now", or the RFC 3339 override at its own offset.
pub fn resolve_now(raw: Option<&str>) -> Result<NaiveDateTime> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(Local::now().naive_local()),
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.naive_local())
            .map_err(|e| PriceDbError::config_with(format!("invalid --now value {s:?}"), e)),
    }
}

/// Expands a leading `~/` to the user's home directory.
pub fn expand_home(raw: &str) -> Result<PathBuf> {
    let trimmed = raw.trim();
    match trimmed.strip_prefix("~/") {
        Some(rest) => {
            let dirs = BaseDirs::new()
                .ok_or_else(|| PriceDbError::config("could not determine home directory"))?;
            Ok(dirs.home_dir().join(rest))
        }
        None => Ok(PathBuf::from(trimmed)),
    }
}
