// Core Type Definitions for Wavehunt
// Candles, stream keys, analyzer verdicts and emitted signals

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Enums
// ============================================================================

/// Trade direction of a signal or analyzer verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "LONG" => Ok(Direction::Long),
            "SHORT" => Ok(Direction::Short),
            _ => Err(format!("Invalid Direction: '{}'. Expected 'LONG' or 'SHORT'", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// Timeframe
// ============================================================================

/// Kline interval tag. Covers every interval the exchange streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M3,
    M5,
    M15,
    M30,
    H1,
    H2,
    H4,
    H6,
    H8,
    H12,
    D1,
    D3,
    W1,
    Mo1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 15] = [
        Timeframe::M1,
        Timeframe::M3,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H2,
        Timeframe::H4,
        Timeframe::H6,
        Timeframe::H8,
        Timeframe::H12,
        Timeframe::D1,
        Timeframe::D3,
        Timeframe::W1,
        Timeframe::Mo1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H2 => "2h",
            Timeframe::H4 => "4h",
            Timeframe::H6 => "6h",
            Timeframe::H8 => "8h",
            Timeframe::H12 => "12h",
            Timeframe::D1 => "1d",
            Timeframe::D3 => "3d",
            Timeframe::W1 => "1w",
            Timeframe::Mo1 => "1M",
        }
    }

    /// Interval duration in milliseconds. A month candle is calendar-bound
    /// upstream; 30 days is used here for window bookkeeping only.
    pub fn duration_ms(&self) -> i64 {
        const MINUTE: i64 = 60_000;
        match self {
            Timeframe::M1 => MINUTE,
            Timeframe::M3 => 3 * MINUTE,
            Timeframe::M5 => 5 * MINUTE,
            Timeframe::M15 => 15 * MINUTE,
            Timeframe::M30 => 30 * MINUTE,
            Timeframe::H1 => 60 * MINUTE,
            Timeframe::H2 => 120 * MINUTE,
            Timeframe::H4 => 240 * MINUTE,
            Timeframe::H6 => 360 * MINUTE,
            Timeframe::H8 => 480 * MINUTE,
            Timeframe::H12 => 720 * MINUTE,
            Timeframe::D1 => 1_440 * MINUTE,
            Timeframe::D3 => 3 * 1_440 * MINUTE,
            Timeframe::W1 => 7 * 1_440 * MINUTE,
            Timeframe::Mo1 => 30 * 1_440 * MINUTE,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::ALL
            .iter()
            .find(|tf| tf.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Invalid timeframe tag: '{}'", s))
    }
}

// ============================================================================
// StreamKey
// ============================================================================

/// Identifies one (symbol, timeframe) stream. Used as the map key for
/// windows, cooldowns and worker channels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamKey {
    pub symbol: String,
    pub timeframe: Timeframe,
}

impl StreamKey {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into().to_uppercase(),
            timeframe,
        }
    }

    /// Stream name in exchange format, e.g. `btcusdt@kline_15m`.
    pub fn stream_name(&self) -> String {
        format!("{}@kline_{}", self.symbol.to_lowercase(), self.timeframe)
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.symbol, self.timeframe)
    }
}

// ============================================================================
// Candle
// ============================================================================

/// One closed (or in-progress) OHLCV bar. Immutable once committed by the
/// aggregator; `(symbol, timeframe, open_time)` is the unique key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: Option<f64>,
    pub trade_count: Option<i64>,
    pub taker_buy_base: Option<f64>,
    pub taker_buy_quote: Option<f64>,
}

impl Candle {
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    pub fn key(&self) -> StreamKey {
        StreamKey {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe,
        }
    }
}

impl fmt::Display for Candle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Candle({} {} t={} O={:.4} H={:.4} L={:.4} C={:.4} V={:.2})",
            self.symbol, self.timeframe, self.open_time, self.open, self.high, self.low, self.close, self.volume
        )
    }
}

// ============================================================================
// AnalyzerResult
// ============================================================================

/// Verdict of a single analyzer for one close event.
/// `direction == None` implies `confidence == 0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerResult {
    pub direction: Option<Direction>,
    pub confidence: f64,
    pub detail: String,
}

impl AnalyzerResult {
    pub fn none() -> Self {
        Self {
            direction: None,
            confidence: 0.0,
            detail: String::new(),
        }
    }

    pub fn none_with(detail: impl Into<String>) -> Self {
        Self {
            direction: None,
            confidence: 0.0,
            detail: detail.into(),
        }
    }

    pub fn verdict(direction: Direction, confidence: f64, detail: impl Into<String>) -> Self {
        Self {
            direction: Some(direction),
            confidence: confidence.clamp(0.0, 1.0),
            detail: detail.into(),
        }
    }

    pub fn is_none(&self) -> bool {
        self.direction.is_none()
    }

    /// Direction if present, regardless of confidence.
    pub fn dir(&self) -> Option<Direction> {
        self.direction
    }
}

impl fmt::Display for AnalyzerResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            Some(d) => write!(f, "{} ({:.1}%)", d, self.confidence * 100.0),
            None => write!(f, "NONE"),
        }
    }
}

// ============================================================================
// FusionTier
// ============================================================================

/// Which fusion rule produced a signal. First matching tier wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FusionTier {
    /// Wyckoff and Elliott agree.
    PatternConsensus,
    /// One pattern analyzer confirmed by both indicators.
    PatternConfirmed,
    /// RSI and MACD agree with no pattern signal.
    IndicatorConsensus,
    /// A single strong indicator.
    StrongIndicator,
    /// A single strong pattern analyzer.
    StrongPattern,
}

impl FusionTier {
    /// Numeric tier label: 1, 2, 3, 3.5 or 4.
    pub fn label(&self) -> f32 {
        match self {
            FusionTier::PatternConsensus => 1.0,
            FusionTier::PatternConfirmed => 2.0,
            FusionTier::IndicatorConsensus => 3.0,
            FusionTier::StrongIndicator => 3.5,
            FusionTier::StrongPattern => 4.0,
        }
    }

    pub fn from_label(label: f32) -> Option<FusionTier> {
        [
            FusionTier::PatternConsensus,
            FusionTier::PatternConfirmed,
            FusionTier::IndicatorConsensus,
            FusionTier::StrongIndicator,
            FusionTier::StrongPattern,
        ]
        .into_iter()
        .find(|tier| (tier.label() - label).abs() < f32::EPSILON)
    }
}

impl fmt::Display for FusionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

// ============================================================================
// Signal
// ============================================================================

/// Per-analyzer sub-results attached to an emitted signal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyzerBreakdown {
    pub wyckoff: Option<AnalyzerResult>,
    pub elliott: Option<AnalyzerResult>,
    pub rsi: Option<AnalyzerResult>,
    pub macd: Option<AnalyzerResult>,
}

/// The emitted artifact: a directional trade signal with levels.
///
/// Invariant: for LONG, `stop_loss < entry < tp1 < tp2 < tp3`; mirrored for
/// SHORT. `confidence` has already passed the configured threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: Option<i64>,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit_1: f64,
    pub take_profit_2: f64,
    pub take_profit_3: f64,
    pub confidence: f64,
    pub tier: FusionTier,
    pub reason: String,
    pub atr: f64,
    pub breakdown: AnalyzerBreakdown,
    /// Epoch milliseconds, UTC.
    pub generated_at: i64,
}

impl Signal {
    /// Distance from entry to stop, always positive for well-formed levels.
    pub fn risk(&self) -> f64 {
        match self.direction {
            Direction::Long => self.entry_price - self.stop_loss,
            Direction::Short => self.stop_loss - self.entry_price,
        }
    }

    pub fn reward(&self) -> f64 {
        match self.direction {
            Direction::Long => self.take_profit_1 - self.entry_price,
            Direction::Short => self.entry_price - self.take_profit_1,
        }
    }

    pub fn risk_reward_ratio(&self) -> f64 {
        let risk = self.risk();
        if risk > 0.0 {
            self.reward() / risk
        } else {
            0.0
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Signal({} {} {} entry={:.4} sl={:.4} tp={:.4} conf={:.1}% tier={})",
            self.direction,
            self.symbol,
            self.timeframe,
            self.entry_price,
            self.stop_loss,
            self.take_profit_1,
            self.confidence * 100.0,
            self.tier
        )
    }
}
