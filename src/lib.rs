// Wavehunt - Streaming candle analysis and trade-signal engine
// Ingests live Binance kline streams, analyzes closed candles with
// Wyckoff / Elliott / RSI / MACD detectors and fuses them into signals.

pub mod core;
pub mod ingest;
pub mod notify;
pub mod signals;
pub mod storage;

pub use crate::core::types::{
    AnalyzerResult, Candle, Direction, FusionTier, Signal, StreamKey, Timeframe,
};
