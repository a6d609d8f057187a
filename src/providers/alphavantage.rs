//! Alpha Vantage daily series for stocks, forex and cryptocurrencies
//!
//! Every series is quoted in CAD. The free tier answers with a `Note` body
//! once the call frequency is exceeded, which is retried after a fixed
//! backoff.

use crate::core::config::AlphaVantageConfig;
use crate::core::error::{PriceDbError, Result};
use crate::core::price::{PriceData, PriceRecord, PriceSource};
use crate::providers::util::{Attempt, decode, fetch_text, http_client, with_backoff};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, instrument};

pub const DEFAULT_BASE_URL: &str = "https://www.alphavantage.co/query";
pub const DEFAULT_API_KEY_FILE: &str = "~/.alphavantage_api_key";
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(60);
pub const DEFAULT_BACKOFF_RETRY: usize = 3;

const PROVIDER: &str = "alphavantage";
const MARKET: &str = "CAD";
const RATE_LIMIT_MARKER: &str = "API call frequency";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeriesKind {
    Stock,
    Forex,
    Cryptocurrency,
}

impl SeriesKind {
    fn function(self) -> &'static str {
        match self {
            SeriesKind::Stock => "TIME_SERIES_DAILY",
            SeriesKind::Forex => "FX_DAILY",
            SeriesKind::Cryptocurrency => "DIGITAL_CURRENCY_DAILY",
        }
    }
}

#[derive(Deserialize, Debug)]
struct RateLimitNote {
    #[serde(rename = "Note", default)]
    note: String,
}

#[derive(Deserialize, Debug)]
struct DailyQuote {
    #[serde(rename = "1. open")]
    open: String,
    #[serde(rename = "2. high")]
    high: String,
    #[serde(rename = "3. low")]
    low: String,
    #[serde(rename = "4. close")]
    close: String,
}

impl From<DailyQuote> for PriceData {
    fn from(q: DailyQuote) -> Self {
        PriceData::DailyBar {
            open: q.open,
            high: q.high,
            low: q.low,
            close: q.close,
        }
    }
}

#[derive(Deserialize, Debug)]
struct CryptoDailyQuote {
    #[serde(rename = "1a. open (CAD)")]
    open: String,
    #[serde(rename = "2a. high (CAD)")]
    high: String,
    #[serde(rename = "3a. low (CAD)")]
    low: String,
    #[serde(rename = "4a. close (CAD)")]
    close: String,
}

impl From<CryptoDailyQuote> for PriceData {
    fn from(q: CryptoDailyQuote) -> Self {
        PriceData::DailyBar {
            open: q.open,
            high: q.high,
            low: q.low,
            close: q.close,
        }
    }
}

#[derive(Deserialize, Debug)]
struct StockMeta {
    #[serde(rename = "2. Symbol")]
    symbol: String,
}

#[derive(Deserialize, Debug)]
struct StockResponse {
    #[serde(rename = "Meta Data")]
    meta: StockMeta,
    #[serde(rename = "Time Series (Daily)")]
    series: BTreeMap<String, DailyQuote>,
}

#[derive(Deserialize, Debug)]
struct ForexMeta {
    #[serde(rename = "2. From Symbol")]
    from_symbol: String,
}

#[derive(Deserialize, Debug)]
struct ForexResponse {
    #[serde(rename = "Meta Data")]
    meta: ForexMeta,
    #[serde(rename = "Time Series FX (Daily)")]
    series: BTreeMap<String, DailyQuote>,
}

#[derive(Deserialize, Debug)]
struct CryptoMeta {
    #[serde(rename = "2. Digital Currency Code")]
    code: String,
}

#[derive(Deserialize, Debug)]
struct CryptoResponse {
    #[serde(rename = "Meta Data")]
    meta: CryptoMeta,
    #[serde(rename = "Time Series (Digital Currency Daily)")]
    series: BTreeMap<String, CryptoDailyQuote>,
}

/// Symbol and dated bars extracted from any of the three response shapes.
type Series = (String, Vec<(String, PriceData)>);

fn into_series<Q: Into<PriceData>>(symbol: String, series: BTreeMap<String, Q>) -> Series {
    let bars = series
        .into_iter()
        .map(|(date, quote)| (date, quote.into()))
        .collect();
    (symbol, bars)
}

fn decode_series(kind: SeriesKind, body: &str) -> Result<Series> {
    let what = format!("{} response", kind.function());
    Ok(match kind {
        SeriesKind::Stock => {
            let r: StockResponse = decode(PROVIDER, &what, body)?;
            into_series(r.meta.symbol, r.series)
        }
        SeriesKind::Forex => {
            let r: ForexResponse = decode(PROVIDER, &what, body)?;
            into_series(r.meta.from_symbol, r.series)
        }
        SeriesKind::Cryptocurrency => {
            let r: CryptoResponse = decode(PROVIDER, &what, body)?;
            into_series(r.meta.code, r.series)
        }
    })
}

pub struct AlphaVantageProvider {
    base_url: String,
    api_key: String,
    config: AlphaVantageConfig,
    close_time: NaiveTime,
    backoff: Duration,
    backoff_retry: usize,
}

impl AlphaVantageProvider {
    pub fn new(
        base_url: &str,
        api_key: &str,
        config: AlphaVantageConfig,
        close_time: NaiveTime,
    ) -> Self {
        AlphaVantageProvider {
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            config,
            close_time,
            backoff: DEFAULT_BACKOFF,
            backoff_retry: DEFAULT_BACKOFF_RETRY,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration, backoff_retry: usize) -> Self {
        self.backoff = backoff;
        self.backoff_retry = backoff_retry;
        self
    }

    fn query<'a>(&'a self, kind: SeriesKind, symbol: &'a str) -> [(&'static str, &'a str); 7] {
        [
            ("function", kind.function()),
            ("symbol", symbol),
            ("from_symbol", symbol),
            ("to_symbol", MARKET),
            ("market", MARKET),
            ("outputsize", "full"),
            ("apikey", self.api_key.as_str()),
        ]
    }

    async fn fetch_once(
        &self,
        client: &reqwest::Client,
        kind: SeriesKind,
        symbol: &str,
    ) -> Result<Attempt<String>> {
        let request = client.get(&self.base_url).query(&self.query(kind, symbol));
        let body = fetch_text(PROVIDER, request).await?;

        let note: RateLimitNote = decode(PROVIDER, "rate limit note", &body)?;
        if note.note.contains(RATE_LIMIT_MARKER) {
            return Ok(Attempt::RateLimited);
        }
        Ok(Attempt::Ready(body))
    }

    #[instrument(name = "AlphaVantageFetch", skip(self, client), fields(function = kind.function()))]
    async fn fetch_symbol(
        &self,
        client: &reqwest::Client,
        kind: SeriesKind,
        symbol: &str,
    ) -> Result<Vec<PriceRecord>> {
        let body = with_backoff(
            PROVIDER,
            || self.fetch_once(client, kind, symbol),
            self.backoff_retry,
            self.backoff,
        )
        .await
        .map_err(|e| match e {
            PriceDbError::SourceFetch { provider, source } => PriceDbError::SourceFetch {
                provider,
                source: source.context(format!("symbol {symbol}")),
            },
            other => other,
        })?;

        let (series_symbol, bars) = decode_series(kind, &body)?;
        debug!("Received {} daily bars for {}", bars.len(), series_symbol);

        bars.into_iter()
            .map(|(date, data)| {
                let day = NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(|e| {
                    PriceDbError::payload(
                        PROVIDER,
                        anyhow::Error::new(e).context(format!("invalid date {date:?} for {series_symbol}")),
                    )
                })?;
                Ok(PriceRecord::new(
                    day.and_time(self.close_time),
                    series_symbol.clone(),
                    data,
                ))
            })
            .collect()
    }
}

#[async_trait]
impl PriceSource for AlphaVantageProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn fetch(&self) -> Result<Vec<PriceRecord>> {
        let client = http_client(PROVIDER)?;
        let mut records = Vec::new();
        for (kind, symbols) in [
            (SeriesKind::Stock, &self.config.stock_symbols),
            (SeriesKind::Forex, &self.config.forex_symbols),
            (SeriesKind::Cryptocurrency, &self.config.cryptocurrency_symbols),
        ] {
            for symbol in symbols {
                records.extend(self.fetch_symbol(&client, kind, symbol).await?);
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const STOCK_RESPONSE: &str = r#"{
        "Meta Data": {
            "1. Information": "Daily Prices (open, high, low, close) and Volumes",
            "2. Symbol": "GOOG",
            "3. Last Refreshed": "2021-02-26",
            "4. Output Size": "Full size",
            "5. Time Zone": "US/Eastern"
        },
        "Time Series (Daily)": {
            "2021-02-26": {
                "1. open": "2050.52",
                "2. high": "2078.04",
                "3. low": "2041.26",
                "4. close": "2036.86",
                "5. volume": "1238451"
            },
            "2021-02-25": {
                "1. open": "2107.00",
                "2. high": "2123.62",
                "3. low": "2029.91",
                "4. close": "2031.36",
                "5. volume": "1590416"
            }
        }
    }"#;

    const FOREX_RESPONSE: &str = r#"{
        "Meta Data": {
            "1. Information": "Forex Daily Prices (open, high, low, close)",
            "2. From Symbol": "USD",
            "3. To Symbol": "CAD",
            "4. Output Size": "Full size",
            "5. Last Refreshed": "2021-02-26 21:55:00",
            "6. Time Zone": "UTC"
        },
        "Time Series FX (Daily)": {
            "2021-02-26": {
                "1. open": "1.26390",
                "2. high": "1.27900",
                "3. low": "1.26200",
                "4. close": "1.27380"
            }
        }
    }"#;

    const CRYPTO_RESPONSE: &str = r#"{
        "Meta Data": {
            "1. Information": "Daily Prices and Volumes for Digital Currency",
            "2. Digital Currency Code": "BTC",
            "3. Digital Currency Name": "Bitcoin",
            "4. Market Code": "CAD",
            "5. Market Name": "Canadian Dollar",
            "6. Last Refreshed": "2021-02-26 00:00:00",
            "7. Time Zone": "UTC"
        },
        "Time Series (Digital Currency Daily)": {
            "2021-02-26": {
                "1a. open (CAD)": "59000.10",
                "1b. open (USD)": "46000.10",
                "2a. high (CAD)": "61000.00",
                "2b. high (USD)": "48000.00",
                "3a. low (CAD)": "58000.00",
                "3b. low (USD)": "45000.00",
                "4a. close (CAD)": "60123.45",
                "4b. close (USD)": "47000.45",
                "5. volume": "12345.6",
                "6. market cap (USD)": "12345.6"
            }
        }
    }"#;

    const RATE_LIMITED: &str = r#"{"Note": "Thank you for using Alpha Vantage! Our standard API call frequency is 5 calls per minute and 500 calls per day."}"#;

    async fn mount(server: &MockServer, function: &str, symbol: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path("/query"))
            .and(query_param("function", function))
            .and(query_param("symbol", symbol))
            .and(query_param("apikey", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    fn provider(server: &MockServer, config: AlphaVantageConfig) -> AlphaVantageProvider {
        AlphaVantageProvider::new(
            &format!("{}/query", server.uri()),
            "test-key",
            config,
            NaiveTime::from_hms_opt(22, 45, 0).unwrap(),
        )
        .with_backoff(Duration::from_millis(5), 3)
    }

    #[tokio::test]
    async fn test_fetch_all_series_kinds() {
        let server = MockServer::start().await;
        mount(&server, "TIME_SERIES_DAILY", "GOOG", STOCK_RESPONSE).await;
        mount(&server, "FX_DAILY", "USD", FOREX_RESPONSE).await;
        mount(&server, "DIGITAL_CURRENCY_DAILY", "BTC", CRYPTO_RESPONSE).await;

        let config = AlphaVantageConfig {
            stock_symbols: vec!["GOOG".to_string()],
            forex_symbols: vec!["USD".to_string()],
            cryptocurrency_symbols: vec!["BTC".to_string()],
        };
        let records = provider(&server, config).fetch().await.unwrap();

        let got: Vec<_> = records
            .iter()
            .map(|r| (r.timestamp.to_string(), r.symbol.as_str(), r.data.last_price()))
            .collect();
        assert_eq!(
            got,
            vec![
                ("2021-02-25 22:45:00".to_string(), "GOOG", "2031.36".to_string()),
                ("2021-02-26 22:45:00".to_string(), "GOOG", "2036.86".to_string()),
                ("2021-02-26 22:45:00".to_string(), "USD", "1.27380".to_string()),
                ("2021-02-26 22:45:00".to_string(), "BTC", "60123.45".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_rate_limit_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/query"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RATE_LIMITED))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mount(&server, "TIME_SERIES_DAILY", "GOOG", STOCK_RESPONSE).await;

        let config = AlphaVantageConfig {
            stock_symbols: vec!["GOOG".to_string()],
            ..Default::default()
        };
        let records = provider(&server, config).fetch().await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/query"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RATE_LIMITED))
            .expect(3)
            .mount(&server)
            .await;

        let config = AlphaVantageConfig {
            stock_symbols: vec!["GOOG".to_string()],
            ..Default::default()
        };
        let err = provider(&server, config).fetch().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SourceFetch);
        assert_eq!(
            err.chain(),
            vec![
                "failed to fetch prices from alphavantage".to_string(),
                "symbol GOOG".to_string(),
                "exhausted backoff retry limit".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_http_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/query"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let config = AlphaVantageConfig {
            stock_symbols: vec!["GOOG".to_string()],
            ..Default::default()
        };
        let err = provider(&server, config).fetch().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SourceFetch);
        assert!(err.chain().iter().any(|m| m.contains("HTTP error: 500")));
    }

    #[tokio::test]
    async fn test_malformed_series_is_parse_error() {
        let server = MockServer::start().await;
        mount(
            &server,
            "TIME_SERIES_DAILY",
            "GOOG",
            r#"{"Error Message": "Invalid API call."}"#,
        )
        .await;

        let config = AlphaVantageConfig {
            stock_symbols: vec!["GOOG".to_string()],
            ..Default::default()
        };
        let err = provider(&server, config).fetch().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }
}
