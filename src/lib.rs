pub mod core;
pub mod csv_export;
pub mod ledger;
pub mod pipeline;
pub mod pricedb;
pub mod providers;
pub mod ui;

use crate::core::config::{self, AppConfig, expand_home};
use crate::core::error::{PriceDbError, Result};
use crate::core::price::PriceSource;
use crate::pipeline::{
    Destination, Pipeline, PipelineFailure, PipelineOptions, PipelineReport, Stage,
};
use crate::pricedb::PriceDatabase;
use crate::providers::{
    AlphaVantageProvider, CoinbaseProvider, QuestradeProvider, alphavantage, coinbase, questrade,
};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::fs;
use std::io::Write;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Everything a `fetch` run needs besides the config file contents. Paths may
/// start with `~/`.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub config_file: String,
    pub price_db_file: String,
    /// Empty means standard output.
    pub out_file: String,
    pub close_time: String,
    /// RFC 3339 override for the current time.
    pub now: Option<String>,
    pub alphavantage_base_url: String,
    pub alphavantage_api_key_file: String,
    pub alphavantage_backoff: Duration,
    pub alphavantage_backoff_retry: usize,
    pub questrade_oauth_url: String,
    pub questrade_token_file: String,
    pub questrade_account_numbers_file: String,
    pub coinbase_base_url: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        FetchSettings {
            config_file: config::DEFAULT_CONFIG_FILE.to_string(),
            price_db_file: config::DEFAULT_PRICE_DB_FILE.to_string(),
            out_file: String::new(),
            close_time: config::DEFAULT_CLOSE_TIME.to_string(),
            now: None,
            alphavantage_base_url: alphavantage::DEFAULT_BASE_URL.to_string(),
            alphavantage_api_key_file: alphavantage::DEFAULT_API_KEY_FILE.to_string(),
            alphavantage_backoff: alphavantage::DEFAULT_BACKOFF,
            alphavantage_backoff_retry: alphavantage::DEFAULT_BACKOFF_RETRY,
            questrade_oauth_url: questrade::DEFAULT_OAUTH_URL.to_string(),
            questrade_token_file: questrade::DEFAULT_TOKEN_FILE.to_string(),
            questrade_account_numbers_file: questrade::DEFAULT_ACCOUNT_NUMBERS_FILE.to_string(),
            coinbase_base_url: coinbase::DEFAULT_BASE_URL.to_string(),
        }
    }
}

/// Fetches fresh prices, reconciles them with the price database and
/// writes the result. Anything that fails before fetching starts is
/// reported at [`Stage::Init`].
pub async fn run_fetch(settings: &FetchSettings) -> Result<PipelineReport, PipelineFailure> {
    let pipeline = prepare_fetch(settings).map_err(|error| PipelineFailure {
        stage: Stage::Init,
        error,
    })?;
    pipeline.run().await
}

/// Loads and validates every input of a run without touching the network.
pub fn prepare_fetch(settings: &FetchSettings) -> Result<Pipeline> {
    let config = AppConfig::load_from_path(expand_home(&settings.config_file)?)?;
    debug!("Loaded config: {config:#?}");

    let close_time = config::parse_close_time(&settings.close_time)?;
    let now = config::resolve_now(settings.now.as_deref())?;
    let start_date = config.start_date()?;
    let database = PriceDatabase::read(expand_home(&settings.price_db_file)?)?;
    if database.is_empty() {
        warn!(
            "Price database {} has no directives, writing fetched prices only",
            database.path().display()
        );
    }
    let destination = Destination::from_path(expand_home(&settings.out_file)?);

    let sources = build_sources(settings, &config, close_time, now, start_date)?;
    info!(
        sources = sources.len(),
        database = %database.path().display(),
        directives = database.len(),
        %destination,
        "Prepared price update"
    );

    let options = PipelineOptions {
        close_time,
        start_date,
        commodities: config.commodity,
        destination,
    };
    Ok(Pipeline::new(options, database, sources))
}

fn build_sources(
    settings: &FetchSettings,
    config: &AppConfig,
    close_time: NaiveTime,
    now: NaiveDateTime,
    start_date: Option<NaiveDate>,
) -> Result<Vec<Box<dyn PriceSource>>> {
    let mut sources: Vec<Box<dyn PriceSource>> = Vec::new();

    let av = &config.alphavantage;
    if !(av.stock_symbols.is_empty()
        && av.forex_symbols.is_empty()
        && av.cryptocurrency_symbols.is_empty())
    {
        let key_file = expand_home(&settings.alphavantage_api_key_file)?;
        let api_key = fs::read_to_string(&key_file).map_err(|e| PriceDbError::io(&key_file, e))?;
        sources.push(Box::new(
            AlphaVantageProvider::new(
                &settings.alphavantage_base_url,
                api_key.trim(),
                av.clone(),
                close_time,
            )
            .with_backoff(
                settings.alphavantage_backoff,
                settings.alphavantage_backoff_retry,
            ),
        ));
    }

    if !config.questrade.is_empty() {
        let account_numbers = questrade::read_account_numbers(&expand_home(
            &settings.questrade_account_numbers_file,
        )?)?;
        sources.push(Box::new(QuestradeProvider::new(
            &settings.questrade_oauth_url,
            expand_home(&settings.questrade_token_file)?,
            account_numbers,
            config.questrade.clone(),
            close_time,
            now,
            start_date,
        )));
    }

    if !config.coinbase.currencies.is_empty() {
        sources.push(Box::new(CoinbaseProvider::new(
            &settings.coinbase_base_url,
            config.coinbase.clone(),
            now,
        )));
    }

    Ok(sources)
}

/// Writes the price database at `price_db_file` to `out` as CSV.
pub fn run_to_csv<W: Write>(price_db_file: &str, out: W) -> Result<usize> {
    let database = PriceDatabase::read(expand_home(price_db_file)?)?;
    csv_export::export_csv(&database, out)
}
