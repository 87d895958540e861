// Signal Fuser - multi-tier combination of analyzer verdicts
// First matching tier wins; cooldown and per-symbol conflict state gate the
// emit path; a successful emit is the only state-mutation exit

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::core::config::SignalConfig;
use crate::core::types::{
    AnalyzerBreakdown, AnalyzerResult, Candle, Direction, FusionTier, Signal, StreamKey,
};
use crate::ingest::aggregator::CloseHandler;
use crate::notify::SignalNotifier;
use crate::signals::{
    indicators, Analyzer, ElliottAnalyzer, MacdAnalyzer, RsiAnalyzer, WyckoffAnalyzer,
};
use crate::storage::SignalStore;

const ATR_PERIOD: usize = 14;

// Solo-analyzer gates for tiers 3.5 and 4
const RSI_SOLO_MIN: f64 = 0.80;
const MACD_SOLO_MIN: f64 = 0.75;
const PATTERN_SOLO_MIN: f64 = 0.75;
const TIER1_CAP: f64 = 0.95;
const AGREEING_INDICATOR_BONUS: f64 = 0.05;
const SOLO_INDICATOR_PENALTY: f64 = 0.85;
const SOLO_PATTERN_PENALTY: f64 = 0.90;

// Reject reasons, exported via counters only
pub const REASON_INSUFFICIENT: &str = "insufficient-candles";
pub const REASON_NO_TIER: &str = "no-tier";
pub const REASON_CONTRADICTION: &str = "contradiction";
pub const REASON_LOW_CONFIDENCE: &str = "low-confidence";
pub const REASON_COOLDOWN: &str = "cooldown";
pub const REASON_CONFLICT: &str = "conflict";
pub const REASON_DEGENERATE: &str = "degenerate-levels";

/// Verdicts of all four analyzers for one close event. Disabled analyzers
/// contribute a NONE verdict.
#[derive(Debug, Clone)]
pub struct AnalyzerSet {
    pub wyckoff: AnalyzerResult,
    pub elliott: AnalyzerResult,
    pub rsi: AnalyzerResult,
    pub macd: AnalyzerResult,
}

impl AnalyzerSet {
    pub fn none() -> Self {
        Self {
            wyckoff: AnalyzerResult::none(),
            elliott: AnalyzerResult::none(),
            rsi: AnalyzerResult::none(),
            macd: AnalyzerResult::none(),
        }
    }
}

/// Outcome of one close event.
#[derive(Debug, Clone)]
pub enum FusionOutcome {
    Emitted(Signal),
    Rejected(&'static str),
}

impl FusionOutcome {
    pub fn signal(&self) -> Option<&Signal> {
        match self {
            FusionOutcome::Emitted(signal) => Some(signal),
            FusionOutcome::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<&'static str> {
        match self {
            FusionOutcome::Emitted(_) => None,
            FusionOutcome::Rejected(reason) => Some(reason),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    direction: Direction,
    confidence: f64,
    tier: FusionTier,
}

/// Emitted-signal counts for one (symbol, timeframe) key.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalCounts {
    pub long: u64,
    pub short: u64,
}

impl SignalCounts {
    pub fn total(&self) -> u64 {
        self.long + self.short
    }

    fn record(&mut self, direction: Direction) {
        match direction {
            Direction::Long => self.long += 1,
            Direction::Short => self.short += 1,
        }
    }
}

// ============================================================================
// Fuser State
// ============================================================================

#[derive(Default)]
struct FuserState {
    /// Cooldown stamps, per (symbol, timeframe).
    last_signal_by_key: HashMap<StreamKey, i64>,
    /// Conflict-prevention stamps, per symbol across all timeframes.
    /// Same-direction emits refresh the stamp.
    last_direction_by_symbol: HashMap<String, (Direction, i64)>,

    events_processed: u64,
    signals_emitted: u64,
    long_signals: u64,
    short_signals: u64,
    signals_by_key: HashMap<StreamKey, SignalCounts>,
    rejects_by_reason: HashMap<&'static str, u64>,
}

#[derive(Debug, Clone)]
pub struct FuserStats {
    pub events_processed: u64,
    pub signals_emitted: u64,
    pub long_signals: u64,
    pub short_signals: u64,
    /// Emitted signals broken down by (symbol, timeframe).
    pub signals_by_key: HashMap<StreamKey, SignalCounts>,
    pub rejects_by_reason: HashMap<&'static str, u64>,
    pub active_cooldowns: usize,
}

// ============================================================================
// Signal Fuser
// ============================================================================

pub struct SignalFuser {
    config: SignalConfig,
    wyckoff: Option<WyckoffAnalyzer>,
    elliott: Option<ElliottAnalyzer>,
    rsi: Option<RsiAnalyzer>,
    macd: Option<MacdAnalyzer>,

    state: Mutex<FuserState>,
    store: Arc<dyn SignalStore>,
    notifier: Arc<dyn SignalNotifier>,
}

impl SignalFuser {
    pub fn new(
        config: SignalConfig,
        store: Arc<dyn SignalStore>,
        notifier: Arc<dyn SignalNotifier>,
    ) -> Self {
        let min_candles = config.min_candles;
        Self {
            wyckoff: config
                .enable_wyckoff
                .then(|| WyckoffAnalyzer::new(50, 20, min_candles)),
            elliott: config.enable_elliott.then(|| ElliottAnalyzer::new(5, min_candles)),
            rsi: config.enable_rsi.then(RsiAnalyzer::default),
            macd: config.enable_macd.then(MacdAnalyzer::default),
            config,
            state: Mutex::new(FuserState::default()),
            store,
            notifier,
        }
    }

    /// Full close-event path: run analyzers, fuse, then persist and notify on
    /// emit. Store and notifier failures are never fatal.
    pub async fn process_close(
        &self,
        key: &StreamKey,
        candle: &Candle,
        window: &[Candle],
        now_ms: i64,
    ) -> FusionOutcome {
        let results = self.run_analyzers(window, key);
        info!(
            key = %key,
            close = candle.close,
            wyckoff = %results.wyckoff,
            elliott = %results.elliott,
            rsi = %results.rsi,
            macd = %results.macd,
            "Analyzed close"
        );

        let outcome = self.evaluate(key, candle, window, now_ms, &results);
        match &outcome {
            FusionOutcome::Rejected(reason) => {
                debug!(key = %key, reason, "Candidate rejected");
                outcome
            }
            FusionOutcome::Emitted(signal) => {
                let mut signal = signal.clone();
                match self.store.insert_signal(&signal).await {
                    Ok(id) => signal.id = Some(id),
                    Err(e) => error!(error = %e, "Signal insert failed"),
                }

                if let Err(e) = self.notifier.publish_signal(&signal).await {
                    warn!(error = %e, "Signal publication failed, dropping");
                }

                info!(
                    signal = %signal,
                    reason = %signal.reason,
                    "Signal emitted"
                );
                FusionOutcome::Emitted(signal)
            }
        }
    }

    /// Run all enabled analyzers once. A panicking analyzer is logged and
    /// treated as NONE; it never aborts fusion of the others.
    pub fn run_analyzers(&self, window: &[Candle], key: &StreamKey) -> AnalyzerSet {
        let run = |analyzer: Option<&dyn Analyzer>| -> AnalyzerResult {
            let Some(analyzer) = analyzer else {
                return AnalyzerResult::none();
            };
            match catch_unwind(AssertUnwindSafe(|| analyzer.analyze(window, key))) {
                Ok(result) => result,
                Err(_) => {
                    error!(key = %key, analyzer = analyzer.name(), "Analyzer panicked");
                    AnalyzerResult::none()
                }
            }
        };

        AnalyzerSet {
            wyckoff: run(self.wyckoff.as_ref().map(|a| a as &dyn Analyzer)),
            elliott: run(self.elliott.as_ref().map(|a| a as &dyn Analyzer)),
            rsi: run(self.rsi.as_ref().map(|a| a as &dyn Analyzer)),
            macd: run(self.macd.as_ref().map(|a| a as &dyn Analyzer)),
        }
    }

    /// Decide one close event against pre-computed analyzer verdicts. State
    /// checks and mutations happen in a single critical section, so
    /// same-symbol events are linearized for conflict evaluation.
    pub fn evaluate(
        &self,
        key: &StreamKey,
        candle: &Candle,
        window: &[Candle],
        now_ms: i64,
        results: &AnalyzerSet,
    ) -> FusionOutcome {
        self.state.lock().events_processed += 1;

        if window.len() < self.config.min_candles {
            return self.reject(REASON_INSUFFICIENT);
        }

        let (candidate, reason_text) = match Self::fuse(results) {
            Ok(found) => found,
            Err(reason) => return self.reject(reason),
        };

        if candidate.confidence < self.config.min_confidence {
            return self.reject(REASON_LOW_CONFIDENCE);
        }

        // SL/TP from volatility
        let atr = indicators::atr(window, ATR_PERIOD);
        if !atr.is_finite() || atr <= 0.0 {
            return self.reject(REASON_DEGENERATE);
        }

        let entry = candle.close;
        let sl_distance = self.config.atr_sl_mult * atr;
        let tp_distance = self.config.atr_tp_mult * atr;
        let (stop_loss, tp1, tp2, tp3) = match candidate.direction {
            Direction::Long => (
                entry - sl_distance,
                entry + tp_distance,
                entry + 2.0 * tp_distance,
                entry + 3.0 * tp_distance,
            ),
            Direction::Short => (
                entry + sl_distance,
                entry - tp_distance,
                entry - 2.0 * tp_distance,
                entry - 3.0 * tp_distance,
            ),
        };

        let risk = match candidate.direction {
            Direction::Long => entry - stop_loss,
            Direction::Short => stop_loss - entry,
        };
        if risk <= 0.0 {
            return self.reject(REASON_DEGENERATE);
        }

        // Cooldown and conflict checks plus the stamp updates are atomic
        {
            let mut state = self.state.lock();

            if let Some(&last) = state.last_signal_by_key.get(key) {
                if now_ms - last < self.config.cooldown_seconds * 1000 {
                    *state.rejects_by_reason.entry(REASON_COOLDOWN).or_default() += 1;
                    return FusionOutcome::Rejected(REASON_COOLDOWN);
                }
            }

            if self.config.prevent_conflicts {
                if let Some(&(last_direction, stamp)) =
                    state.last_direction_by_symbol.get(&key.symbol)
                {
                    let age_ms = now_ms - stamp;
                    if last_direction != candidate.direction
                        && age_ms < self.config.conflict_window_seconds * 1000
                    {
                        *state.rejects_by_reason.entry(REASON_CONFLICT).or_default() += 1;
                        return FusionOutcome::Rejected(REASON_CONFLICT);
                    }
                }
            }

            state.last_signal_by_key.insert(key.clone(), now_ms);
            state
                .last_direction_by_symbol
                .insert(key.symbol.clone(), (candidate.direction, now_ms));
            state.signals_emitted += 1;
            match candidate.direction {
                Direction::Long => state.long_signals += 1,
                Direction::Short => state.short_signals += 1,
            }
            state
                .signals_by_key
                .entry(key.clone())
                .or_default()
                .record(candidate.direction);
        }

        let breakdown = AnalyzerBreakdown {
            wyckoff: self.wyckoff.is_some().then(|| results.wyckoff.clone()),
            elliott: self.elliott.is_some().then(|| results.elliott.clone()),
            rsi: self.rsi.is_some().then(|| results.rsi.clone()),
            macd: self.macd.is_some().then(|| results.macd.clone()),
        };

        FusionOutcome::Emitted(Signal {
            id: None,
            symbol: key.symbol.clone(),
            timeframe: key.timeframe,
            direction: candidate.direction,
            entry_price: entry,
            stop_loss,
            take_profit_1: tp1,
            take_profit_2: tp2,
            take_profit_3: tp3,
            confidence: candidate.confidence,
            tier: candidate.tier,
            reason: reason_text,
            atr,
            breakdown,
            generated_at: now_ms,
        })
    }

    /// Tiered decision rule; first matching tier wins. A matched tier whose
    /// direction is contradicted by a present-and-opposite analyzer it did
    /// not require is rejected outright.
    fn fuse(results: &AnalyzerSet) -> Result<(Candidate, String), &'static str> {
        let w = results.wyckoff.dir();
        let e = results.elliott.dir();
        let r = results.rsi.dir();
        let m = results.macd.dir();
        let wc = results.wyckoff.confidence;
        let ec = results.elliott.confidence;
        let rc = results.rsi.confidence;
        let mc = results.macd.confidence;

        // TIER 1: both pattern analyzers agree
        if let (Some(wd), Some(ed)) = (w, e) {
            if wd == ed {
                let opposite = Some(wd.opposite());
                if r == opposite || m == opposite {
                    return Err(REASON_CONTRADICTION);
                }

                let mut confidence = (wc + ec) / 2.0;
                let mut agreeing = Vec::new();
                if r == Some(wd) {
                    confidence += AGREEING_INDICATOR_BONUS;
                    agreeing.push("RSI");
                }
                if m == Some(wd) {
                    confidence += AGREEING_INDICATOR_BONUS;
                    agreeing.push("MACD");
                }
                confidence = confidence.min(TIER1_CAP);

                let mut reason = format!("Wyckoff+Elliott agree on {}", wd);
                if !agreeing.is_empty() {
                    reason.push_str(&format!(" (confirmed by {})", agreeing.join(", ")));
                }
                return Ok((
                    Candidate {
                        direction: wd,
                        confidence,
                        tier: FusionTier::PatternConsensus,
                    },
                    reason,
                ));
            }
        }

        // TIER 2: one pattern analyzer confirmed by both indicators
        if w.is_some() || e.is_some() {
            let (pattern_dir, pattern_conf, pattern_name, other_pattern) = if let Some(wd) = w {
                (wd, wc, "Wyckoff", e)
            } else {
                (e.unwrap(), ec, "Elliott", w)
            };

            if r == Some(pattern_dir) && m == Some(pattern_dir) {
                if other_pattern == Some(pattern_dir.opposite()) {
                    return Err(REASON_CONTRADICTION);
                }
                let confidence = (pattern_conf + rc + mc) / 3.0;
                return Ok((
                    Candidate {
                        direction: pattern_dir,
                        confidence,
                        tier: FusionTier::PatternConfirmed,
                    },
                    format!("{}+RSI+MACD agree on {}", pattern_name, pattern_dir),
                ));
            }
        }

        // TIER 3: indicators agree with no pattern signal
        if w.is_none() && e.is_none() {
            if let (Some(rd), Some(md)) = (r, m) {
                if rd == md {
                    let confidence = (rc + mc) / 2.0;
                    return Ok((
                        Candidate {
                            direction: rd,
                            confidence,
                            tier: FusionTier::IndicatorConsensus,
                        },
                        format!("RSI+MACD agree on {}", rd),
                    ));
                }
                // Indicators present but opposed: nothing to emit
                return Err(REASON_NO_TIER);
            }
        }

        // TIER 3.5: one strong indicator alone
        if let Some(rd) = r {
            if e.is_none() && w.is_none() && m.is_none() && rc >= RSI_SOLO_MIN {
                return Ok((
                    Candidate {
                        direction: rd,
                        confidence: rc * SOLO_INDICATOR_PENALTY,
                        tier: FusionTier::StrongIndicator,
                    },
                    format!("Strong RSI {} alone ({:.0}%)", rd, rc * 100.0),
                ));
            }
        }
        if let Some(md) = m {
            if w.is_none() && e.is_none() && r.is_none() && mc >= MACD_SOLO_MIN {
                return Ok((
                    Candidate {
                        direction: md,
                        confidence: mc * SOLO_INDICATOR_PENALTY,
                        tier: FusionTier::StrongIndicator,
                    },
                    format!("Strong MACD {} alone ({:.0}%)", md, mc * 100.0),
                ));
            }
        }

        // TIER 4: one strong pattern analyzer alone
        if let Some(wd) = w {
            if e.is_none() && r.is_none() && m.is_none() && wc >= PATTERN_SOLO_MIN {
                return Ok((
                    Candidate {
                        direction: wd,
                        confidence: wc * SOLO_PATTERN_PENALTY,
                        tier: FusionTier::StrongPattern,
                    },
                    format!("Strong Wyckoff {} alone ({:.0}%)", wd, wc * 100.0),
                ));
            }
        }
        if let Some(ed) = e {
            if w.is_none() && r.is_none() && m.is_none() && ec >= PATTERN_SOLO_MIN {
                return Ok((
                    Candidate {
                        direction: ed,
                        confidence: ec * SOLO_PATTERN_PENALTY,
                        tier: FusionTier::StrongPattern,
                    },
                    format!("Strong Elliott {} alone ({:.0}%)", ed, ec * 100.0),
                ));
            }
        }

        Err(REASON_NO_TIER)
    }

    fn reject(&self, reason: &'static str) -> FusionOutcome {
        let mut state = self.state.lock();
        *state.rejects_by_reason.entry(reason).or_default() += 1;
        FusionOutcome::Rejected(reason)
    }

    pub fn stats(&self) -> FuserStats {
        let state = self.state.lock();
        FuserStats {
            events_processed: state.events_processed,
            signals_emitted: state.signals_emitted,
            long_signals: state.long_signals,
            short_signals: state.short_signals,
            signals_by_key: state.signals_by_key.clone(),
            rejects_by_reason: state.rejects_by_reason.clone(),
            active_cooldowns: state.last_signal_by_key.len(),
        }
    }
}

impl CloseHandler for SignalFuser {
    fn on_close(
        &self,
        key: StreamKey,
        candle: Candle,
        window: Arc<Vec<Candle>>,
    ) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let now_ms = chrono::Utc::now().timestamp_millis();
            self.process_close(&key, &candle, &window, now_ms).await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Timeframe;
    use crate::notify::LogNotifier;
    use crate::storage::MemoryStore;

    fn result(direction: Direction, confidence: f64) -> AnalyzerResult {
        AnalyzerResult::verdict(direction, confidence, "test")
    }

    fn set(
        wyckoff: Option<(Direction, f64)>,
        elliott: Option<(Direction, f64)>,
        rsi: Option<(Direction, f64)>,
        macd: Option<(Direction, f64)>,
    ) -> AnalyzerSet {
        let build = |v: Option<(Direction, f64)>| match v {
            Some((d, c)) => result(d, c),
            None => AnalyzerResult::none(),
        };
        AnalyzerSet {
            wyckoff: build(wyckoff),
            elliott: build(elliott),
            rsi: build(rsi),
            macd: build(macd),
        }
    }

    fn fuser() -> SignalFuser {
        SignalFuser::new(
            SignalConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(LogNotifier::new()),
        )
    }

    fn fuse(results: &AnalyzerSet) -> Result<(Candidate, String), &'static str> {
        SignalFuser::fuse(results)
    }

    const LONG: Direction = Direction::Long;
    const SHORT: Direction = Direction::Short;

    // ------------------------------------------------------------------
    // Tier selection
    // ------------------------------------------------------------------

    #[test]
    fn test_tier1_pattern_consensus_with_bonus() {
        // Wyckoff 0.70 + Elliott 0.76, both indicators agreeing
        let results = set(
            Some((LONG, 0.70)),
            Some((LONG, 0.76)),
            Some((LONG, 0.60)),
            Some((LONG, 0.62)),
        );
        let (candidate, reason) = fuse(&results).unwrap();
        assert_eq!(candidate.tier, FusionTier::PatternConsensus);
        assert_eq!(candidate.direction, LONG);
        assert!((candidate.confidence - 0.83).abs() < 1e-9);
        assert!(reason.contains("RSI"));
        assert!(reason.contains("MACD"));
    }

    #[test]
    fn test_tier1_confidence_cap() {
        let results = set(
            Some((SHORT, 0.95)),
            Some((SHORT, 0.95)),
            Some((SHORT, 0.9)),
            Some((SHORT, 0.9)),
        );
        let (candidate, _) = fuse(&results).unwrap();
        assert_eq!(candidate.confidence, 0.95);
    }

    #[test]
    fn test_tier1_contradicted_by_indicator() {
        let results = set(
            Some((LONG, 0.8)),
            Some((LONG, 0.8)),
            Some((SHORT, 0.6)),
            None,
        );
        assert_eq!(fuse(&results).unwrap_err(), REASON_CONTRADICTION);
    }

    #[test]
    fn test_tier2_pattern_confirmed() {
        let results = set(Some((LONG, 0.80)), None, Some((LONG, 0.60)), Some((LONG, 0.70)));
        let (candidate, reason) = fuse(&results).unwrap();
        assert_eq!(candidate.tier, FusionTier::PatternConfirmed);
        assert!((candidate.confidence - 0.70).abs() < 1e-9);
        assert!(reason.starts_with("Wyckoff"));
    }

    #[test]
    fn test_tier2_opposed_patterns_contradict() {
        // Indicators back Wyckoff but Elliott points the other way
        let results = set(
            Some((LONG, 0.8)),
            Some((SHORT, 0.5)),
            Some((LONG, 0.6)),
            Some((LONG, 0.7)),
        );
        assert_eq!(fuse(&results).unwrap_err(), REASON_CONTRADICTION);
    }

    #[test]
    fn test_tier3_indicator_consensus() {
        let results = set(None, None, Some((SHORT, 0.64)), Some((SHORT, 0.58)));
        let (candidate, _) = fuse(&results).unwrap();
        assert_eq!(candidate.tier, FusionTier::IndicatorConsensus);
        assert_eq!(candidate.direction, SHORT);
        assert!((candidate.confidence - 0.61).abs() < 1e-9);
    }

    #[test]
    fn test_tier3_opposed_indicators_reject() {
        let results = set(None, None, Some((LONG, 0.7)), Some((SHORT, 0.7)));
        assert_eq!(fuse(&results).unwrap_err(), REASON_NO_TIER);
    }

    #[test]
    fn test_tier35_strong_rsi_alone() {
        let results = set(None, None, Some((LONG, 0.85)), None);
        let (candidate, _) = fuse(&results).unwrap();
        assert_eq!(candidate.tier, FusionTier::StrongIndicator);
        assert!((candidate.confidence - 0.85 * 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_tier35_weak_rsi_alone_rejected() {
        // RSI 25 alone gives 0.667, below the solo gate
        let results = set(None, None, Some((LONG, 0.667)), None);
        assert_eq!(fuse(&results).unwrap_err(), REASON_NO_TIER);
    }

    #[test]
    fn test_tier35_strong_macd_alone() {
        let results = set(None, None, None, Some((SHORT, 0.78)));
        let (candidate, _) = fuse(&results).unwrap();
        assert_eq!(candidate.tier, FusionTier::StrongIndicator);
        assert!((candidate.confidence - 0.78 * 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_tier4_strong_pattern_alone() {
        let results = set(Some((LONG, 0.80)), None, None, None);
        let (candidate, _) = fuse(&results).unwrap();
        assert_eq!(candidate.tier, FusionTier::StrongPattern);
        assert!((candidate.confidence - 0.72).abs() < 1e-9);

        let results = set(None, Some((SHORT, 0.76)), None, None);
        let (candidate, _) = fuse(&results).unwrap();
        assert_eq!(candidate.tier, FusionTier::StrongPattern);
        assert!((candidate.confidence - 0.76 * 0.90).abs() < 1e-9);
    }

    #[test]
    fn test_tier4_weak_pattern_alone_rejected() {
        let results = set(Some((LONG, 0.70)), None, None, None);
        assert_eq!(fuse(&results).unwrap_err(), REASON_NO_TIER);
    }

    #[test]
    fn test_all_none_rejects() {
        assert_eq!(fuse(&AnalyzerSet::none()).unwrap_err(), REASON_NO_TIER);
    }

    // ------------------------------------------------------------------
    // Evaluate: thresholds, levels, cooldown, conflict
    // ------------------------------------------------------------------

    const HOUR: i64 = 3_600_000;

    fn candle_at(i: usize, close: f64, symbol: &str, timeframe: Timeframe) -> Candle {
        let duration = timeframe.duration_ms();
        Candle {
            symbol: symbol.to_string(),
            timeframe,
            open_time: i as i64 * duration,
            close_time: (i as i64 + 1) * duration - 1,
            open: close - 0.5,
            high: close + 2.0,
            low: close - 2.0,
            close,
            volume: 100.0,
            quote_volume: None,
            trade_count: None,
            taker_buy_base: None,
            taker_buy_quote: None,
        }
    }

    /// Window with enough bars and a real trading range so ATR is positive.
    fn live_window(symbol: &str, timeframe: Timeframe) -> Vec<Candle> {
        (0..150)
            .map(|i| candle_at(i, 100.0 + (i % 7) as f64, symbol, timeframe))
            .collect()
    }

    fn flat_window(symbol: &str, timeframe: Timeframe) -> Vec<Candle> {
        (0..150)
            .map(|i| {
                let mut c = candle_at(i, 100.0, symbol, timeframe);
                c.open = 100.0;
                c.high = 100.0;
                c.low = 100.0;
                c
            })
            .collect()
    }

    fn tier3_long() -> AnalyzerSet {
        set(None, None, Some((LONG, 0.70)), Some((LONG, 0.70)))
    }

    fn tier3_short() -> AnalyzerSet {
        set(None, None, Some((SHORT, 0.80)), Some((SHORT, 0.80)))
    }

    #[test]
    fn test_emit_long_level_ordering() {
        let fuser = fuser();
        let key = StreamKey::new("BTCUSDT", Timeframe::H1);
        let window = live_window("BTCUSDT", Timeframe::H1);
        let candle = window.last().unwrap().clone();

        let outcome = fuser.evaluate(&key, &candle, &window, 0, &tier3_long());
        let signal = outcome.signal().expect("expected emit");
        assert!(signal.stop_loss < signal.entry_price);
        assert!(signal.entry_price < signal.take_profit_1);
        assert!(signal.take_profit_1 < signal.take_profit_2);
        assert!(signal.take_profit_2 < signal.take_profit_3);
        assert!(signal.confidence >= 0.55);
        assert!(signal.atr > 0.0);
    }

    #[test]
    fn test_emit_short_level_ordering() {
        let fuser = fuser();
        let key = StreamKey::new("BTCUSDT", Timeframe::H1);
        let window = live_window("BTCUSDT", Timeframe::H1);
        let candle = window.last().unwrap().clone();

        let outcome = fuser.evaluate(&key, &candle, &window, 0, &tier3_short());
        let signal = outcome.signal().expect("expected emit");
        assert!(signal.take_profit_3 < signal.take_profit_2);
        assert!(signal.take_profit_2 < signal.take_profit_1);
        assert!(signal.take_profit_1 < signal.entry_price);
        assert!(signal.entry_price < signal.stop_loss);
    }

    #[test]
    fn test_low_confidence_rejected() {
        let fuser = fuser();
        let key = StreamKey::new("BTCUSDT", Timeframe::H1);
        let window = live_window("BTCUSDT", Timeframe::H1);
        let candle = window.last().unwrap().clone();

        let weak = set(None, None, Some((LONG, 0.52)), Some((LONG, 0.52)));
        let outcome = fuser.evaluate(&key, &candle, &window, 0, &weak);
        assert_eq!(outcome.rejection(), Some(REASON_LOW_CONFIDENCE));
    }

    #[test]
    fn test_insufficient_candles_rejected() {
        let fuser = fuser();
        let key = StreamKey::new("BTCUSDT", Timeframe::H1);
        let window: Vec<Candle> = live_window("BTCUSDT", Timeframe::H1)[..50].to_vec();
        let candle = window.last().unwrap().clone();

        let outcome = fuser.evaluate(&key, &candle, &window, 0, &tier3_long());
        assert_eq!(outcome.rejection(), Some(REASON_INSUFFICIENT));
    }

    #[test]
    fn test_cooldown_blocks_second_signal() {
        // Two closes for the same key 120 s apart
        let fuser = fuser();
        let key = StreamKey::new("ETHUSDT", Timeframe::M15);
        let window = live_window("ETHUSDT", Timeframe::M15);
        let candle = window.last().unwrap().clone();

        let first = fuser.evaluate(&key, &candle, &window, 0, &tier3_long());
        assert!(first.signal().is_some());

        let second = fuser.evaluate(&key, &candle, &window, 120_000, &tier3_long());
        assert_eq!(second.rejection(), Some(REASON_COOLDOWN));
        assert_eq!(fuser.stats().signals_emitted, 1);

        // After the cooldown expires the key may emit again
        let third = fuser.evaluate(&key, &candle, &window, 301_000, &tier3_long());
        assert!(third.signal().is_some());
    }

    #[test]
    fn test_conflict_blocks_opposite_direction() {
        // LONG on the 1h, then a SHORT candidate on the 15m 600 s later
        let fuser = fuser();
        let hourly = StreamKey::new("BTCUSDT", Timeframe::H1);
        let quarter = StreamKey::new("BTCUSDT", Timeframe::M15);
        let hourly_window = live_window("BTCUSDT", Timeframe::H1);
        let quarter_window = live_window("BTCUSDT", Timeframe::M15);

        let first = fuser.evaluate(
            &hourly,
            hourly_window.last().unwrap(),
            &hourly_window,
            0,
            &tier3_long(),
        );
        assert!(first.signal().is_some());

        let second = fuser.evaluate(
            &quarter,
            quarter_window.last().unwrap(),
            &quarter_window,
            600_000,
            &tier3_short(),
        );
        assert_eq!(second.rejection(), Some(REASON_CONFLICT));

        // The conflict stamp still points at the original LONG: an opposite
        // candidate after the window expires is allowed
        let third = fuser.evaluate(
            &quarter,
            quarter_window.last().unwrap(),
            &quarter_window,
            3_700_000,
            &tier3_short(),
        );
        assert!(third.signal().is_some());
    }

    #[test]
    fn test_same_direction_refreshes_conflict_stamp() {
        let fuser = fuser();
        let hourly = StreamKey::new("BTCUSDT", Timeframe::H1);
        let quarter = StreamKey::new("BTCUSDT", Timeframe::M15);
        let hourly_window = live_window("BTCUSDT", Timeframe::H1);
        let quarter_window = live_window("BTCUSDT", Timeframe::M15);

        fuser.evaluate(&hourly, hourly_window.last().unwrap(), &hourly_window, 0, &tier3_long());
        // Same-direction emit on another timeframe refreshes the stamp
        let refresh = fuser.evaluate(
            &quarter,
            quarter_window.last().unwrap(),
            &quarter_window,
            1_000_000,
            &tier3_long(),
        );
        assert!(refresh.signal().is_some());

        // 3600 s after the first emit but only ~2600 s after the refresh:
        // the opposite direction is still blocked
        let blocked = fuser.evaluate(
            &hourly,
            hourly_window.last().unwrap(),
            &hourly_window,
            3_650_000,
            &tier3_short(),
        );
        assert_eq!(blocked.rejection(), Some(REASON_CONFLICT));
    }

    #[test]
    fn test_degenerate_levels_rejected_without_state_change() {
        // Flat window: ATR is zero
        let fuser = fuser();
        let key = StreamKey::new("BTCUSDT", Timeframe::H1);
        let window = flat_window("BTCUSDT", Timeframe::H1);
        let candle = window.last().unwrap().clone();

        let outcome = fuser.evaluate(&key, &candle, &window, 0, &tier3_long());
        assert_eq!(outcome.rejection(), Some(REASON_DEGENERATE));

        // State untouched: a later valid candidate emits immediately
        let live = live_window("BTCUSDT", Timeframe::H1);
        let outcome = fuser.evaluate(&key, live.last().unwrap(), &live, 1_000, &tier3_long());
        assert!(outcome.signal().is_some());
    }

    #[test]
    fn test_signal_counts_broken_down_by_key() {
        let fuser = fuser();
        let hourly = StreamKey::new("BTCUSDT", Timeframe::H1);
        let quarter = StreamKey::new("BTCUSDT", Timeframe::M15);
        let hourly_window = live_window("BTCUSDT", Timeframe::H1);
        let quarter_window = live_window("BTCUSDT", Timeframe::M15);

        fuser.evaluate(&hourly, hourly_window.last().unwrap(), &hourly_window, 0, &tier3_long());
        fuser.evaluate(
            &quarter,
            quarter_window.last().unwrap(),
            &quarter_window,
            1_000_000,
            &tier3_long(),
        );
        // Same key again after the cooldown, opposite direction after the
        // conflict window
        fuser.evaluate(
            &hourly,
            hourly_window.last().unwrap(),
            &hourly_window,
            5_000_000,
            &tier3_short(),
        );

        let stats = fuser.stats();
        assert_eq!(stats.signals_emitted, 3);
        let hourly_counts = stats.signals_by_key.get(&hourly).unwrap();
        assert_eq!(hourly_counts.long, 1);
        assert_eq!(hourly_counts.short, 1);
        assert_eq!(hourly_counts.total(), 2);
        let quarter_counts = stats.signals_by_key.get(&quarter).unwrap();
        assert_eq!(quarter_counts.long, 1);
        assert_eq!(quarter_counts.short, 0);
    }

    #[test]
    fn test_reject_counters_exported() {
        let fuser = fuser();
        let key = StreamKey::new("BTCUSDT", Timeframe::H1);
        let window = live_window("BTCUSDT", Timeframe::H1);
        let candle = window.last().unwrap().clone();

        fuser.evaluate(&key, &candle, &window, 0, &AnalyzerSet::none());
        let stats = fuser.stats();
        assert_eq!(stats.rejects_by_reason.get(REASON_NO_TIER), Some(&1));
        assert_eq!(stats.signals_emitted, 0);
        assert_eq!(stats.events_processed, 1);
    }

    #[test]
    fn test_tier_exclusivity_on_emit() {
        // Every emitted signal records exactly one tier matching first-match
        let fuser = fuser();
        let key = StreamKey::new("BTCUSDT", Timeframe::H1);
        let window = live_window("BTCUSDT", Timeframe::H1);
        let candle = window.last().unwrap().clone();

        // Tier-1-shaped inputs also satisfy tier 2/3 conditions; first match
        // must win
        let results = set(
            Some((LONG, 0.70)),
            Some((LONG, 0.76)),
            Some((LONG, 0.60)),
            Some((LONG, 0.62)),
        );
        let outcome = fuser.evaluate(&key, &candle, &window, 0, &results);
        assert_eq!(outcome.signal().unwrap().tier, FusionTier::PatternConsensus);
    }

    #[tokio::test]
    async fn test_process_close_persists_and_counts() {
        let store = Arc::new(MemoryStore::new());
        let fuser = SignalFuser::new(
            SignalConfig::default(),
            store.clone(),
            Arc::new(LogNotifier::new()),
        );
        let key = StreamKey::new("BTCUSDT", Timeframe::H1);
        let window = live_window("BTCUSDT", Timeframe::H1);
        let candle = window.last().unwrap().clone();

        // Disabled pattern analyzers return NONE, indicators drive a tier-3
        // emit through the full async path
        let results = tier3_long();
        let outcome = fuser.evaluate(&key, &candle, &window, 0, &results);
        assert!(outcome.signal().is_some());

        // Drive the persistence path directly with a fresh fuser so cooldown
        // does not interfere
        let fuser2 = SignalFuser::new(
            SignalConfig {
                enable_wyckoff: false,
                enable_elliott: false,
                enable_macd: false,
                ..SignalConfig::default()
            },
            store.clone(),
            Arc::new(LogNotifier::new()),
        );
        // Oversold window: steady decline then the analyzers fire for real
        let mut closes_window = Vec::new();
        for i in 0..150 {
            let close = 400.0 - 2.0 * i as f64;
            let mut c = candle_at(i, close, "BTCUSDT", Timeframe::H1);
            c.open = close + 1.0;
            closes_window.push(c);
        }
        let last = closes_window.last().unwrap().clone();
        let outcome = fuser2.process_close(&key, &last, &closes_window, 0).await;
        let signal = outcome.signal().expect("expected a solo-RSI emit");
        assert!(signal.id.is_some());
        assert_eq!(signal.tier, FusionTier::StrongIndicator);
        assert_eq!(store.signal_count(), 1);
    }
}
