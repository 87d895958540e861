// Configuration Management for Wavehunt
// JSON file + environment overrides; invalid configuration is fatal at startup

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};

use crate::core::types::{StreamKey, Timeframe};

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Validation error:\n{0}")]
    Validation(String),
}

// ============================================================================
// Configuration Structures
// ============================================================================

/// Exchange connectivity settings (public endpoints only).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BinanceConfig {
    pub base_url: String,
    pub ws_url: String,

    // REST settings
    pub rate_limit_per_minute: u32,
    pub request_timeout_secs: u64,
    pub request_retries: u32,

    // WebSocket settings
    pub reconnect_delay_secs: u64,
    pub reconnect_cap_secs: u64,
    pub max_streams_per_connection: usize,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://fapi.binance.com".to_string(),
            ws_url: "wss://fstream.binance.com".to_string(),
            rate_limit_per_minute: 1200,
            request_timeout_secs: 10,
            request_retries: 3,
            reconnect_delay_secs: 5,
            reconnect_cap_secs: 60,
            max_streams_per_connection: 200,
        }
    }
}

/// Signal generation settings: monitored universe, window sizing, fusion
/// thresholds, cooldown/conflict rules and analyzer toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub symbols: Vec<String>,
    pub timeframes: Vec<String>,

    pub window_size: usize,
    pub startup_candles: usize,
    pub min_candles: usize,

    pub min_confidence: f64,
    pub cooldown_seconds: i64,
    pub prevent_conflicts: bool,
    pub conflict_window_seconds: i64,

    pub atr_sl_mult: f64,
    pub atr_tp_mult: f64,

    pub enable_wyckoff: bool,
    pub enable_elliott: bool,
    pub enable_rsi: bool,
    pub enable_macd: bool,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string(), "BNBUSDT".to_string()],
            timeframes: vec!["15m".to_string(), "1h".to_string(), "4h".to_string()],
            window_size: 500,
            startup_candles: 500,
            min_candles: 100,
            min_confidence: 0.55,
            cooldown_seconds: 300,
            prevent_conflicts: true,
            conflict_window_seconds: 3600,
            atr_sl_mult: 2.0,
            atr_tp_mult: 3.0,
            enable_wyckoff: true,
            enable_elliott: true,
            enable_rsi: true,
            enable_macd: true,
        }
    }
}

impl SignalConfig {
    /// All monitored (symbol, timeframe) keys. Call after validation.
    pub fn stream_keys(&self) -> Vec<StreamKey> {
        let mut keys = Vec::with_capacity(self.symbols.len() * self.timeframes.len());
        for symbol in &self.symbols {
            for tf in &self.timeframes {
                if let Ok(timeframe) = Timeframe::from_str(tf) {
                    keys.push(StreamKey::new(symbol.clone(), timeframe));
                }
            }
        }
        keys
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: String,
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: "data/wavehunt.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Webhook endpoint for emitted signals; logs only when unset.
    pub webhook_url: Option<String>,
    pub send_timeout_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            send_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub log_json: bool,
    pub report_interval_secs: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
            log_json: false,
            report_interval_secs: 300,
        }
    }
}

// ============================================================================
// AppConfig
// ============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub binance: BinanceConfig,
    pub signals: SignalConfig,
    pub storage: StorageConfig,
    pub notifier: NotifierConfig,
    pub monitoring: MonitoringConfig,
}

impl AppConfig {
    /// Load configuration: defaults, then JSON file (if present), then
    /// environment variable overrides.
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = config_path {
            config.load_from_file(path)?;
        }

        config.load_from_env();
        Ok(config)
    }

    fn load_from_file(&mut self, config_path: &str) -> Result<(), ConfigError> {
        let path = Path::new(config_path);
        if !path.exists() {
            warn!(path = config_path, "Config file not found, using defaults");
            return Ok(());
        }

        let content = fs::read_to_string(path)?;
        let config_data: HashMap<String, serde_json::Value> = serde_json::from_str(&content)?;

        if let Some(data) = config_data.get("binance") {
            self.binance = serde_json::from_value(data.clone())?;
        }
        if let Some(data) = config_data.get("signals") {
            self.signals = serde_json::from_value(data.clone())?;
        }
        if let Some(data) = config_data.get("storage") {
            self.storage = serde_json::from_value(data.clone())?;
        }
        if let Some(data) = config_data.get("notifier") {
            self.notifier = serde_json::from_value(data.clone())?;
        }
        if let Some(data) = config_data.get("monitoring") {
            self.monitoring = serde_json::from_value(data.clone())?;
        }

        info!(path = config_path, "Configuration loaded");
        Ok(())
    }

    fn load_from_env(&mut self) {
        if let Ok(symbols) = std::env::var("WAVEHUNT_SYMBOLS") {
            self.signals.symbols = symbols
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(timeframes) = std::env::var("WAVEHUNT_TIMEFRAMES") {
            self.signals.timeframes = timeframes
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(v) = std::env::var("WAVEHUNT_MIN_CONFIDENCE") {
            if let Ok(parsed) = v.parse() {
                self.signals.min_confidence = parsed;
            }
        }
        if let Ok(v) = std::env::var("WAVEHUNT_DATABASE_PATH") {
            self.storage.database_path = v;
        }
        if let Ok(v) = std::env::var("WAVEHUNT_WEBHOOK_URL") {
            if !v.is_empty() {
                self.notifier.webhook_url = Some(v);
            }
        }
        if let Ok(v) = std::env::var("WAVEHUNT_LOG_LEVEL") {
            self.monitoring.log_level = v;
        }
    }

    /// Validate the configuration, collecting every problem. A non-empty
    /// error list is fatal: the process must exit non-zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        let s = &self.signals;

        if s.symbols.is_empty() {
            errors.push("at least one symbol is required".to_string());
        }
        for symbol in &s.symbols {
            if symbol.trim().is_empty()
                || *symbol != symbol.to_uppercase()
                || !symbol.ends_with("USDT")
            {
                errors.push(format!(
                    "symbol '{}' must be an uppercase USDT-quoted ticker",
                    symbol
                ));
            }
        }

        if s.timeframes.is_empty() {
            errors.push("at least one timeframe is required".to_string());
        }
        for tf in &s.timeframes {
            if Timeframe::from_str(tf).is_err() {
                errors.push(format!("unknown timeframe tag '{}'", tf));
            }
        }

        if !(0.0 < s.min_confidence && s.min_confidence <= 1.0) {
            errors.push(format!(
                "min_confidence must be in (0, 1], got {}",
                s.min_confidence
            ));
        }
        if s.min_candles < 100 {
            errors.push(format!("min_candles must be >= 100, got {}", s.min_candles));
        }
        if s.window_size < s.min_candles {
            errors.push(format!(
                "window_size ({}) must be >= min_candles ({})",
                s.window_size, s.min_candles
            ));
        }
        if s.cooldown_seconds < 0 {
            errors.push("cooldown_seconds must not be negative".to_string());
        }
        if s.conflict_window_seconds < 0 {
            errors.push("conflict_window_seconds must not be negative".to_string());
        }
        if s.atr_sl_mult <= 0.0 || s.atr_tp_mult <= 0.0 {
            errors.push("atr_sl_mult and atr_tp_mult must be positive".to_string());
        }

        if self.binance.max_streams_per_connection == 0 || self.binance.max_streams_per_connection > 200 {
            errors.push(format!(
                "max_streams_per_connection must be in 1..=200, got {}",
                self.binance.max_streams_per_connection
            ));
        }
        if self.storage.database_path.trim().is_empty() {
            errors.push("database_path must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(
                errors
                    .iter()
                    .map(|e| format!("  - {}", e))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ))
        }
    }

    pub fn summary(&self) -> ConfigSummary {
        ConfigSummary {
            symbols: self.signals.symbols.len(),
            timeframes: self.signals.timeframes.len(),
            streams: self.signals.symbols.len() * self.signals.timeframes.len(),
            min_confidence: self.signals.min_confidence,
            database_path: self.storage.database_path.clone(),
            webhook_configured: self.notifier.webhook_url.is_some(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigSummary {
    pub symbols: usize,
    pub timeframes: usize,
    pub streams: usize,
    pub min_confidence: f64,
    pub database_path: String,
    pub webhook_configured: bool,
}
