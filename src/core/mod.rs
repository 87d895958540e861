// Core Module - Foundational types, config, logging, metrics

pub mod config;
pub mod logger;
pub mod metrics;
pub mod types;

// Re-export commonly used items for convenience
pub use config::{
    AppConfig, BinanceConfig, ConfigError, MonitoringConfig, NotifierConfig, SignalConfig,
    StorageConfig,
};
pub use logger::setup_logging;
pub use metrics::{format_uptime, PipelineMetrics};
pub use types::{
    AnalyzerResult, Candle, ConnectionStatus, Direction, FusionTier, Signal, StreamKey, Timeframe,
};
