use crate::core::config::CoinbaseConfig;
use crate::core::error::{PriceDbError, Result};
use crate::core::price::{PriceData, PriceRecord, PriceSource};
use crate::providers::util::{decode, fetch_text, http_client};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, instrument};

pub const DEFAULT_BASE_URL: &str = "https://api.coinbase.com/v2/exchange-rates?currency=";

const PROVIDER: &str = "coinbase";

#[derive(Deserialize, Debug)]
struct ExchangeRates {
    rates: HashMap<String, String>,
}

#[derive(Deserialize, Debug)]
struct ExchangeRatesResponse {
    data: ExchangeRates,
}

/// Spot CAD exchange rates for each configured currency, stamped at `now`.
pub struct CoinbaseProvider {
    base_url: String,
    config: CoinbaseConfig,
    now: NaiveDateTime,
}

impl CoinbaseProvider {
    pub fn new(base_url: &str, config: CoinbaseConfig, now: NaiveDateTime) -> Self {
        CoinbaseProvider {
            base_url: base_url.to_string(),
            config,
            now,
        }
    }

    #[instrument(name = "CoinbaseRate", skip(self, client))]
    async fn fetch_rate(&self, client: &reqwest::Client, currency: &str) -> Result<PriceRecord> {
        let url = format!("{}{}", self.base_url, currency);
        let body = fetch_text(PROVIDER, client.get(&url)).await?;
        let mut response: ExchangeRatesResponse = decode(PROVIDER, "exchange rates", &body)?;
        let rate = response.data.rates.remove("CAD").ok_or_else(|| {
            PriceDbError::payload(PROVIDER, anyhow!("no CAD rate for {currency}"))
        })?;
        debug!("{} is {} CAD", currency, rate);
        Ok(PriceRecord::new(
            self.now,
            currency,
            PriceData::ExchangeRate { rate },
        ))
    }
}

#[async_trait]
impl PriceSource for CoinbaseProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn fetch(&self) -> Result<Vec<PriceRecord>> {
        let client = http_client(PROVIDER)?;
        let mut records = Vec::with_capacity(self.config.currencies.len());
        for currency in &self.config.currencies {
            records.push(self.fetch_rate(&client, currency).await?);
        }
        Ok(records)
    }
}
