// Kline Message Parser - exchange WebSocket payloads to candle updates
// Handles combined-stream envelopes, bare events and subscription acks

use serde::Deserialize;
use std::str::FromStr;
use thiserror::Error;

use crate::core::types::{Candle, Timeframe};

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid {field}: '{value}'")]
    InvalidField { field: &'static str, value: String },
    #[error("unknown timeframe tag: '{0}'")]
    UnknownTimeframe(String),
    #[error("unexpected message shape")]
    UnexpectedShape,
}

fn parse_f64_field(value: &str, field: &'static str) -> Result<f64, ParseError> {
    value.parse::<f64>().map_err(|_| ParseError::InvalidField {
        field,
        value: value.to_string(),
    })
}

// ============================================================================
// Wire Structures
// ============================================================================

#[derive(Debug, Deserialize)]
struct KlineEvent {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: RawKline,
}

#[derive(Debug, Deserialize)]
struct RawKline {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "T")]
    close_time: i64,
    #[serde(rename = "i")]
    interval: String,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "q")]
    quote_volume: String,
    #[serde(rename = "n")]
    trades: i64,
    #[serde(rename = "V")]
    taker_buy_base: String,
    #[serde(rename = "Q")]
    taker_buy_quote: String,
    #[serde(rename = "x")]
    is_final: bool,
}

// ============================================================================
// Parsed Update
// ============================================================================

/// A live kline update forwarded to the aggregator. Non-final updates carry
/// the in-progress bar.
#[derive(Debug, Clone)]
pub struct KlineUpdate {
    pub candle: Candle,
    pub is_final: bool,
    pub event_time: i64,
}

// ============================================================================
// Parser
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct ParserStats {
    pub messages_parsed: u64,
    pub klines: u64,
    pub control_messages: u64,
    pub parse_errors: u64,
}

/// Parses raw stream messages. Combined-stream envelopes (`{stream, data}`)
/// and bare kline events are both accepted.
pub struct MessageParser {
    pub stats: ParserStats,
}

impl MessageParser {
    pub fn new() -> Self {
        Self {
            stats: ParserStats::default(),
        }
    }

    /// Parse one raw message. `Ok(None)` means a well-formed non-kline
    /// message (subscription ack, other control frame).
    pub fn parse(&mut self, raw: &str) -> Result<Option<KlineUpdate>, ParseError> {
        self.stats.messages_parsed += 1;

        let value: serde_json::Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                self.stats.parse_errors += 1;
                return Err(ParseError::Json(e));
            }
        };

        // Subscription ack: {"result":null,"id":N}
        if value.get("result").is_some() && value.get("id").is_some() {
            self.stats.control_messages += 1;
            return Ok(None);
        }

        let data = value.get("data").unwrap_or(&value);

        match data.get("e").and_then(|e| e.as_str()) {
            Some("kline") => {}
            Some(_) => {
                self.stats.control_messages += 1;
                return Ok(None);
            }
            None => {
                self.stats.parse_errors += 1;
                return Err(ParseError::UnexpectedShape);
            }
        }

        match self.parse_kline(data) {
            Ok(update) => {
                self.stats.klines += 1;
                Ok(Some(update))
            }
            Err(e) => {
                self.stats.parse_errors += 1;
                Err(e)
            }
        }
    }

    fn parse_kline(&self, data: &serde_json::Value) -> Result<KlineUpdate, ParseError> {
        let event: KlineEvent = serde_json::from_value(data.clone())?;
        debug_assert_eq!(event.event_type, "kline");

        let k = &event.kline;
        let timeframe = Timeframe::from_str(&k.interval)
            .map_err(|_| ParseError::UnknownTimeframe(k.interval.clone()))?;

        let candle = Candle {
            symbol: event.symbol.to_uppercase(),
            timeframe,
            open_time: k.open_time,
            close_time: k.close_time,
            open: parse_f64_field(&k.open, "open")?,
            high: parse_f64_field(&k.high, "high")?,
            low: parse_f64_field(&k.low, "low")?,
            close: parse_f64_field(&k.close, "close")?,
            volume: parse_f64_field(&k.volume, "volume")?,
            quote_volume: Some(parse_f64_field(&k.quote_volume, "quote_volume")?),
            trade_count: Some(k.trades),
            taker_buy_base: Some(parse_f64_field(&k.taker_buy_base, "taker_buy_base")?),
            taker_buy_quote: Some(parse_f64_field(&k.taker_buy_quote, "taker_buy_quote")?),
        };

        Ok(KlineUpdate {
            candle,
            is_final: k.is_final,
            event_time: event.event_time,
        })
    }
}

impl Default for MessageParser {
    fn default() -> Self {
        Self::new()
    }
}
