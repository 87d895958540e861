// History Client - REST fetch of recent closed candles for warm starts
// Rate-limited public endpoint access with retry and backoff

use reqwest::Client;
use serde_json::Value;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::core::types::{Candle, StreamKey, Timeframe};

/// Exchange hard limit per klines request.
const MAX_PER_REQUEST: usize = 1500;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("malformed kline row: {0}")]
    Malformed(String),
    #[error("max retries exceeded")]
    MaxRetries,
}

// ============================================================================
// Rate Limiter
// ============================================================================

/// Token bucket rate limiter for API requests.
/// Used behind a Mutex, so no internal lock is needed.
pub struct RateLimiter {
    tokens: f64,
    max_tokens: f64,
    rate_per_sec: f64,
    last_update: f64,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        let rpm = requests_per_minute as f64;
        Self {
            tokens: rpm,
            max_tokens: rpm,
            rate_per_sec: rpm / 60.0,
            last_update: now_secs(),
        }
    }

    /// Wait until a token is available (caller must hold the Mutex).
    pub async fn acquire(&mut self) {
        loop {
            self.add_tokens();
            if self.tokens >= 1.0 {
                self.tokens -= 1.0;
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    fn add_tokens(&mut self) {
        let now = now_secs();
        let elapsed = now - self.last_update;
        self.tokens = (self.tokens + elapsed * self.rate_per_sec).min(self.max_tokens);
        self.last_update = now;
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

// ============================================================================
// History Client
// ============================================================================

/// Client for the public klines endpoint. All returned rows are final.
pub struct HistoryClient {
    base_url: String,
    client: Client,
    limiter: Mutex<RateLimiter>,
    retries: u32,
}

impl HistoryClient {
    pub fn new(
        base_url: &str,
        rate_limit_per_minute: u32,
        request_timeout: Duration,
        retries: u32,
    ) -> Result<Self, HistoryError> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            limiter: Mutex::new(RateLimiter::new(rate_limit_per_minute)),
            retries,
        })
    }

    /// Fetch up to `limit` (<= 1500) most-recent closed candles, oldest first.
    pub async fn fetch_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
        end_time: Option<i64>,
    ) -> Result<Vec<Candle>, HistoryError> {
        let limit = limit.min(MAX_PER_REQUEST);
        let url = format!("{}/fapi/v1/klines", self.base_url);

        let mut params: Vec<(&str, String)> = vec![
            ("symbol", symbol.to_string()),
            ("interval", timeframe.as_str().to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(end) = end_time {
            params.push(("endTime", end.to_string()));
        }

        let rows = self.request_with_retry(&url, &params).await?;
        parse_rows(symbol, timeframe, rows)
    }

    /// Fetch `limit` candles, batching backwards when the request exceeds the
    /// exchange per-request cap.
    pub async fn fetch_history(
        &self,
        key: &StreamKey,
        limit: usize,
    ) -> Result<Vec<Candle>, HistoryError> {
        if limit <= MAX_PER_REQUEST {
            let candles = self.fetch_klines(&key.symbol, key.timeframe, limit, None).await?;
            info!(key = %key, candles = candles.len(), "History fetched");
            return Ok(candles);
        }

        let mut all: Vec<Candle> = Vec::with_capacity(limit);
        let mut remaining = limit;
        let mut end_time: Option<i64> = None;

        while remaining > 0 {
            let batch_limit = remaining.min(MAX_PER_REQUEST);
            let batch = self
                .fetch_klines(&key.symbol, key.timeframe, batch_limit, end_time)
                .await?;
            if batch.is_empty() {
                break;
            }

            remaining = remaining.saturating_sub(batch.len());
            end_time = Some(batch[0].open_time - 1);
            let exhausted = batch.len() < batch_limit;

            // Prepend older candles
            let mut merged = batch;
            merged.extend(all);
            all = merged;

            if exhausted {
                break;
            }
        }

        info!(key = %key, candles = all.len(), "History fetched (batched)");
        Ok(all)
    }

    async fn request_with_retry(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<Value>, HistoryError> {
        for attempt in 0..self.retries {
            self.limiter.lock().await.acquire().await;

            let response = match self.client.get(url).query(params).send().await {
                Ok(r) => r,
                Err(e) => {
                    if attempt + 1 >= self.retries {
                        return Err(e.into());
                    }
                    let wait = Duration::from_secs(1 << attempt);
                    warn!(error = %e, attempt, "History request failed, retrying in {:?}", wait);
                    tokio::time::sleep(wait).await;
                    continue;
                }
            };

            let status = response.status();
            if status.as_u16() == 429 {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(60);
                warn!(retry_after, "Rate limit exceeded, backing off");
                tokio::time::sleep(Duration::from_secs(retry_after)).await;
                continue;
            }

            if status.is_server_error() {
                if attempt + 1 >= self.retries {
                    return Err(HistoryError::Api {
                        status: status.as_u16(),
                        body: response.text().await.unwrap_or_default(),
                    });
                }
                let wait = Duration::from_secs(1 << attempt);
                warn!(status = status.as_u16(), attempt, "Server error, retrying in {:?}", wait);
                tokio::time::sleep(wait).await;
                continue;
            }

            if !status.is_success() {
                return Err(HistoryError::Api {
                    status: status.as_u16(),
                    body: response.text().await.unwrap_or_default(),
                });
            }

            debug!(url, "History request succeeded");
            return Ok(response.json::<Vec<Value>>().await?);
        }

        Err(HistoryError::MaxRetries)
    }
}

// ============================================================================
// Row Parsing
// ============================================================================

/// Parse positional kline rows:
/// [open_time, o, h, l, c, v, close_time, quote_volume, trades, tbb, tbq, _]
fn parse_rows(
    symbol: &str,
    timeframe: Timeframe,
    rows: Vec<Value>,
) -> Result<Vec<Candle>, HistoryError> {
    rows.iter().map(|row| parse_row(symbol, timeframe, row)).collect()
}

fn parse_row(symbol: &str, timeframe: Timeframe, row: &Value) -> Result<Candle, HistoryError> {
    let fields = row
        .as_array()
        .ok_or_else(|| HistoryError::Malformed(format!("not an array: {}", row)))?;
    if fields.len() < 11 {
        return Err(HistoryError::Malformed(format!(
            "expected 11+ fields, got {}",
            fields.len()
        )));
    }

    Ok(Candle {
        symbol: symbol.to_uppercase(),
        timeframe,
        open_time: field_i64(&fields[0])?,
        close_time: field_i64(&fields[6])?,
        open: field_f64(&fields[1])?,
        high: field_f64(&fields[2])?,
        low: field_f64(&fields[3])?,
        close: field_f64(&fields[4])?,
        volume: field_f64(&fields[5])?,
        quote_volume: Some(field_f64(&fields[7])?),
        trade_count: Some(field_i64(&fields[8])?),
        taker_buy_base: Some(field_f64(&fields[9])?),
        taker_buy_quote: Some(field_f64(&fields[10])?),
    })
}

fn field_f64(value: &Value) -> Result<f64, HistoryError> {
    match value {
        Value::String(s) => s
            .parse::<f64>()
            .map_err(|_| HistoryError::Malformed(format!("bad number: '{}'", s))),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| HistoryError::Malformed(format!("bad number: {}", n))),
        other => Err(HistoryError::Malformed(format!("bad number: {}", other))),
    }
}

fn field_i64(value: &Value) -> Result<i64, HistoryError> {
    value
        .as_i64()
        .ok_or_else(|| HistoryError::Malformed(format!("bad integer: {}", value)))
}
