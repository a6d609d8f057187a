use crate::core::error::{PriceDbError, Result};
use anyhow::anyhow;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT: &str = "pricedb/0.3";

/// Outcome of one request against a rate-limited API.
pub enum Attempt<T> {
    Ready(T),
    RateLimited,
}

/// Runs `operation` until it is not rate limited, sleeping `delay` after
/// every rate-limited attempt.
///
/// # Parameters
/// - `operation`: Closure returning a future
/// - `attempts`: Maximum number of runs before giving up
/// - `delay`: Pause after each rate-limited run
///
/// Errors from `operation` are returned immediately. Running out of
/// attempts is a [`PriceDbError::SourceFetch`] for `provider`.
pub async fn with_backoff<F, Fut, T>(
    provider: &str,
    mut operation: F,
    attempts: usize,
    delay: Duration,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Attempt<T>>>,
{
    for attempt in 1..=attempts {
        match operation().await? {
            Attempt::Ready(val) => return Ok(val),
            Attempt::RateLimited => {
                warn!(
                    "Rate limited, backing off for {:?} (attempt {}/{})",
                    delay, attempt, attempts
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
    Err(PriceDbError::fetch(
        provider,
        anyhow!("exhausted backoff retry limit"),
    ))
}

pub fn http_client(provider: &str) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| PriceDbError::fetch(provider, e))
}

/// Sends `request` and returns the body of a successful response.
pub async fn fetch_text(provider: &str, request: reqwest::RequestBuilder) -> Result<String> {
    let response = request
        .send()
        .await
        .map_err(|e| PriceDbError::fetch(provider, anyhow!("Request error: {e}")))?;

    let status = response.status();
    let endpoint = response.url().path().to_string();
    if !status.is_success() {
        warn!("Fetch failed: {} returned {}", endpoint, status);
        return Err(PriceDbError::fetch(
            provider,
            anyhow!("HTTP error: {} for {}", status, endpoint),
        ));
    }

    let body = response
        .text()
        .await
        .map_err(|e| PriceDbError::fetch(provider, e))?;
    debug!("Fetch succeeded: {}", endpoint);
    Ok(body)
}

pub fn decode<T: DeserializeOwned>(provider: &str, what: &str, body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| {
        PriceDbError::payload(provider, anyhow::Error::new(e).context(format!("decoding {what}")))
    })
}
