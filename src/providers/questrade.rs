//! Questrade candles and positions
//!
//! Authentication uses a refresh token stored on disk. Every successful
//! login hands out a new refresh token, which is written back to the same
//! file for the next run.

use crate::core::config::QuestradeConfig;
use crate::core::error::{PriceDbError, Result};
use crate::core::price::{PriceData, PriceRecord, PriceSource};
use crate::providers::util::{decode, fetch_text, http_client};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};

pub const DEFAULT_OAUTH_URL: &str = "https://login.questrade.com/oauth2/token";
pub const DEFAULT_TOKEN_FILE: &str = "~/.questrade_token";
pub const DEFAULT_ACCOUNT_NUMBERS_FILE: &str = "~/.questrade_account_numbers";

const PROVIDER: &str = "questrade";

#[derive(Deserialize, Debug)]
struct OAuthToken {
    access_token: String,
    token_type: String,
    refresh_token: String,
    api_server: String,
}

impl OAuthToken {
    fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    symbol_id: u64,
}

#[derive(Deserialize, Debug)]
struct SymbolSearchResponse {
    symbols: Vec<SymbolInfo>,
}

#[derive(Deserialize, Debug)]
struct Candle {
    start: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
}

#[derive(Deserialize, Debug)]
struct CandlesResponse {
    candles: Vec<Candle>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Position {
    symbol: String,
    open_quantity: f64,
    current_price: f64,
}

#[derive(Deserialize, Debug)]
struct PositionsResponse {
    positions: Vec<Position>,
}

/// Reads the comma-separated account numbers file.
pub fn read_account_numbers(path: &Path) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path).map_err(|e| PriceDbError::io(path, e))?;
    Ok(contents
        .trim()
        .split(',')
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .collect())
}

/// Formats a local wall-clock time the way the candles endpoint expects,
/// e.g. `2021-02-19T00:00:00.000000-05:00`.
fn api_time(naive: NaiveDateTime) -> String {
    match Local.from_local_datetime(&naive).earliest() {
        Some(local) => local.to_rfc3339_opts(SecondsFormat::Micros, false),
        None => Utc
            .from_utc_datetime(&naive)
            .to_rfc3339_opts(SecondsFormat::Micros, false),
    }
}

pub struct QuestradeProvider {
    oauth_url: String,
    token_file: PathBuf,
    account_numbers: Vec<String>,
    config: QuestradeConfig,
    close_time: NaiveTime,
    now: NaiveDateTime,
    start_date: Option<NaiveDate>,
}

impl QuestradeProvider {
    pub fn new(
        oauth_url: &str,
        token_file: PathBuf,
        account_numbers: Vec<String>,
        config: QuestradeConfig,
        close_time: NaiveTime,
        now: NaiveDateTime,
        start_date: Option<NaiveDate>,
    ) -> Self {
        QuestradeProvider {
            oauth_url: oauth_url.to_string(),
            token_file,
            account_numbers,
            config,
            close_time,
            now,
            start_date,
        }
    }

    async fn authenticate(&self, client: &reqwest::Client) -> Result<OAuthToken> {
        let refresh_token = fs::read_to_string(&self.token_file)
            .map_err(|e| PriceDbError::io(&self.token_file, e))?;
        let request = client.get(&self.oauth_url).query(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.trim()),
        ]);
        let body = fetch_text(PROVIDER, request).await?;
        let token: OAuthToken = decode(PROVIDER, "oauth response", &body)?;

        if let Err(e) = fs::write(&self.token_file, &token.refresh_token) {
            warn!(
                "Unable to write refresh token back to {}: {}",
                self.token_file.display(),
                e
            );
        }
        Ok(token)
    }

    #[instrument(name = "QuestradeCandles", skip(self, client, token))]
    async fn fetch_candles(
        &self,
        client: &reqwest::Client,
        token: &OAuthToken,
        symbol: &str,
    ) -> Result<Vec<PriceRecord>> {
        let search_url = format!("{}v1/symbols/search", token.api_server);
        let request = client
            .get(&search_url)
            .header("Authorization", token.authorization())
            .query(&[("prefix", symbol)]);
        let body = fetch_text(PROVIDER, request).await?;
        let search: SymbolSearchResponse = decode(PROVIDER, "symbol search", &body)?;
        let info = search
            .symbols
            .iter()
            .find(|s| s.symbol == symbol)
            .ok_or_else(|| PriceDbError::fetch(PROVIDER, anyhow!("couldn't find {symbol}")))?;

        let start = self.start_date.unwrap_or_default().and_time(NaiveTime::MIN);
        let candles_url = format!("{}v1/markets/candles/{}", token.api_server, info.symbol_id);
        let request = client
            .get(&candles_url)
            .header("Authorization", token.authorization())
            .query(&[
                ("startTime", api_time(start)),
                ("endTime", api_time(self.now)),
                ("interval", "OneDay".to_string()),
            ]);
        let body = fetch_text(PROVIDER, request).await?;
        let response: CandlesResponse = decode(PROVIDER, "candles", &body)?;
        debug!("Received {} candles for {}", response.candles.len(), symbol);

        response
            .candles
            .into_iter()
            .map(|candle| {
                let start = DateTime::parse_from_rfc3339(&candle.start).map_err(|e| {
                    PriceDbError::payload(
                        PROVIDER,
                        anyhow::Error::new(e)
                            .context(format!("invalid candle start {:?}", candle.start)),
                    )
                })?;
                Ok(PriceRecord::new(
                    start.date_naive().and_time(self.close_time),
                    symbol,
                    PriceData::Candle {
                        open: candle.open,
                        high: candle.high,
                        low: candle.low,
                        close: candle.close,
                    },
                ))
            })
            .collect()
    }

    async fn fetch_positions(
        &self,
        client: &reqwest::Client,
        token: &OAuthToken,
        account_number: &str,
    ) -> Result<Vec<Position>> {
        let url = format!("{}v1/accounts/{}/positions", token.api_server, account_number);
        let request = client
            .get(&url)
            .header("Authorization", token.authorization());
        let body = fetch_text(PROVIDER, request).await.map_err(|e| match e {
            PriceDbError::SourceFetch { provider, source } => PriceDbError::SourceFetch {
                provider,
                source: source.context(format!("positions for account {account_number}")),
            },
            other => other,
        })?;
        let response: PositionsResponse = decode(PROVIDER, "positions", &body)?;
        Ok(response.positions)
    }
}

#[async_trait]
impl PriceSource for QuestradeProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn fetch(&self) -> Result<Vec<PriceRecord>> {
        let client = http_client(PROVIDER)?;
        let token = self.authenticate(&client).await?;

        let mut records = Vec::new();
        for symbol in &self.config.market_symbols {
            records.extend(self.fetch_candles(&client, &token, symbol).await?);
        }

        let wanted: HashSet<&str> = self
            .config
            .position_symbols
            .iter()
            .map(String::as_str)
            .collect();
        let mut seen = HashSet::new();
        for account_number in &self.account_numbers {
            for position in self.fetch_positions(&client, &token, account_number).await? {
                if wanted.contains(position.symbol.as_str()) {
                    records.push(PriceRecord::new(
                        self.now,
                        position.symbol.clone(),
                        PriceData::Position {
                            current_price: position.current_price,
                            open_quantity: position.open_quantity,
                        },
                    ));
                    seen.insert(position.symbol);
                }
            }
        }

        if let Some(missing) = self
            .config
            .position_symbols
            .iter()
            .find(|s| !seen.contains(s.as_str()))
        {
            return Err(PriceDbError::fetch(
                PROVIDER,
                anyhow!("did not find {missing} in positions"),
            ));
        }
        Ok(records)
    }
}
