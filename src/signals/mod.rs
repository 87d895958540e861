// Signals Module - indicators, pattern analyzers and the fuser
// Analyzers are pure functions over a window snapshot

pub mod elliott;
pub mod fuser;
pub mod indicators;
pub mod macd;
pub mod rsi;
pub mod wyckoff;

use crate::core::types::{AnalyzerResult, Candle, StreamKey};

/// A pattern or indicator analyzer. Implementations are pure: two calls with
/// equal windows return equal results, and nothing is mutated.
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &'static str;

    fn analyze(&self, window: &[Candle], key: &StreamKey) -> AnalyzerResult;
}

// Re-export commonly used items
pub use elliott::ElliottAnalyzer;
pub use fuser::{FuserStats, FusionOutcome, SignalCounts, SignalFuser};
pub use macd::MacdAnalyzer;
pub use rsi::RsiAnalyzer;
pub use wyckoff::{WyckoffAnalyzer, WyckoffPhase};
