// End-to-End Pipeline Tests
//
// Exercise the full data path without network connections:
//   raw stream JSON -> MessageParser -> CandleAggregator -> SignalFuser
//   -> store + notifier
//
// Run with: cargo test --test pipeline_flow_test

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use wavehunt::core::config::SignalConfig;
use wavehunt::core::types::{Candle, Direction, FusionTier, Signal, StreamKey, Timeframe};
use wavehunt::ingest::aggregator::{CandleAggregator, CloseHandler};
use wavehunt::ingest::parser::MessageParser;
use wavehunt::notify::{NotifyError, SignalNotifier};
use wavehunt::signals::SignalFuser;
use wavehunt::storage::{MemoryStore, SignalStore};

const M15: i64 = 900_000;

// ============================================================================
// Helpers
// ============================================================================

/// Build a combined-stream kline message as the exchange sends it.
fn kline_json(
    symbol: &str,
    interval: &str,
    open_time: i64,
    close: f64,
    volume: f64,
    is_final: bool,
) -> String {
    let duration = match interval {
        "15m" => M15,
        "1h" => 3_600_000,
        _ => M15,
    };
    format!(
        r#"{{"stream":"{stream}","data":{{"e":"kline","E":{et},"s":"{sym}","k":{{"t":{t},"T":{tc},"s":"{sym}","i":"{iv}","f":1,"L":2,"o":"{o}","c":"{c}","h":"{h}","l":"{l}","v":"{v}","n":100,"x":{x},"q":"{q}","V":"{tv}","Q":"{tq}","B":"0"}}}}}}"#,
        stream = format!("{}@kline_{}", symbol.to_lowercase(), interval),
        et = open_time + 500,
        sym = symbol,
        t = open_time,
        tc = open_time + duration - 1,
        iv = interval,
        o = close + 1.0,
        c = close,
        h = close + 2.0,
        l = close - 2.0,
        v = volume,
        x = is_final,
        q = close * volume,
        tv = volume / 2.0,
        tq = close * volume / 2.0,
    )
}

fn history_candle(symbol: &str, timeframe: Timeframe, open_time: i64, close: f64) -> Candle {
    Candle {
        symbol: symbol.to_string(),
        timeframe,
        open_time,
        close_time: open_time + timeframe.duration_ms() - 1,
        open: close + 1.0,
        high: close + 2.0,
        low: close - 2.0,
        close,
        volume: 100.0,
        quote_volume: Some(close * 100.0),
        trade_count: Some(100),
        taker_buy_base: Some(50.0),
        taker_buy_quote: Some(close * 50.0),
    }
}

struct CountingHandler {
    fired: Mutex<Vec<(StreamKey, i64)>>,
}

impl CountingHandler {
    fn new() -> Self {
        Self {
            fired: Mutex::new(Vec::new()),
        }
    }

    fn fired(&self) -> Vec<(StreamKey, i64)> {
        self.fired.lock().clone()
    }
}

impl CloseHandler for CountingHandler {
    fn on_close(
        &self,
        key: StreamKey,
        candle: Candle,
        _window: Arc<Vec<Candle>>,
    ) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.fired.lock().push((key, candle.open_time));
        })
    }
}

struct RecordingNotifier {
    published: Mutex<Vec<Signal>>,
}

impl RecordingNotifier {
    fn new() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
        }
    }

    fn published(&self) -> Vec<Signal> {
        self.published.lock().clone()
    }
}

impl SignalNotifier for RecordingNotifier {
    fn publish_signal<'a>(&'a self, signal: &'a Signal) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move {
            self.published.lock().push(signal.clone());
            Ok(())
        })
    }
}

/// Feed one raw message through parser + aggregator.
async fn feed(parser: &mut MessageParser, aggregator: &CandleAggregator, raw: &str) {
    if let Some(update) = parser.parse(raw).expect("valid test message") {
        aggregator.process_update(update).await;
    }
}

// ============================================================================
// TEST 1 - Raw JSON through parser and aggregator, with persistence
// ============================================================================

#[tokio::test]
async fn test_stream_json_to_close_events() {
    let aggregator = CandleAggregator::new(500);
    let store = Arc::new(MemoryStore::new());
    aggregator.set_store(store.clone());
    let handler = Arc::new(CountingHandler::new());
    aggregator.register(handler.clone());

    let mut parser = MessageParser::new();
    let t = 1_700_000_000_000;

    // Two intermediate updates, then the final transition, then the next bar
    feed(&mut parser, &aggregator, &kline_json("BTCUSDT", "15m", t, 42_000.0, 10.0, false)).await;
    feed(&mut parser, &aggregator, &kline_json("BTCUSDT", "15m", t, 42_010.0, 20.0, false)).await;
    feed(&mut parser, &aggregator, &kline_json("BTCUSDT", "15m", t, 42_020.0, 30.0, true)).await;
    feed(&mut parser, &aggregator, &kline_json("BTCUSDT", "15m", t + M15, 42_030.0, 5.0, false)).await;

    // A subscription ack in the middle is ignored
    assert!(parser.parse(r#"{"result":null,"id":7}"#).unwrap().is_none());

    aggregator.shutdown(Duration::from_secs(5)).await;

    let fired = handler.fired();
    assert_eq!(fired.len(), 1, "only the final transition commits");
    assert_eq!(fired[0].1, t);

    // Committed candle was persisted exactly once
    assert_eq!(store.candle_count(), 1);

    // Window tail is the in-progress next bar
    let key = StreamKey::new("BTCUSDT", Timeframe::M15);
    let window = aggregator.window(&key).unwrap();
    assert_eq!(window.last().unwrap().open_time, t + M15);
    assert_eq!(window.first().unwrap().close, 42_020.0);
}

// ============================================================================
// TEST 2 - Warm start then live updates (history tail finalized by stream)
// ============================================================================

#[tokio::test]
async fn test_warm_start_then_live_flow() {
    let aggregator = CandleAggregator::new(500);
    let handler = Arc::new(CountingHandler::new());
    aggregator.register(handler.clone());

    let key = StreamKey::new("BNBUSDT", Timeframe::H1);
    let hour = Timeframe::H1.duration_ms();
    let t = 1_700_000_000_000;

    // History returns 500 closed candles ending at open_time T
    let history: Vec<Candle> = (0..500)
        .map(|i| history_candle("BNBUSDT", Timeframe::H1, t - (499 - i) * hour, 600.0))
        .collect();
    aggregator.preload(key.clone(), history);

    let mut parser = MessageParser::new();
    // Stream re-delivers T (non-final), T (final), then T+1h (non-final)
    feed(&mut parser, &aggregator, &kline_json("BNBUSDT", "1h", t, 601.0, 10.0, false)).await;
    feed(&mut parser, &aggregator, &kline_json("BNBUSDT", "1h", t, 601.5, 12.0, true)).await;
    feed(&mut parser, &aggregator, &kline_json("BNBUSDT", "1h", t + hour, 602.0, 3.0, false)).await;

    // An update older than the warm-start tail is dropped
    feed(&mut parser, &aggregator, &kline_json("BNBUSDT", "1h", t - hour, 599.0, 3.0, true)).await;

    // Final transition of T+1h
    feed(&mut parser, &aggregator, &kline_json("BNBUSDT", "1h", t + hour, 602.5, 8.0, true)).await;
    aggregator.shutdown(Duration::from_secs(5)).await;

    let fired = handler.fired();
    assert_eq!(fired.len(), 2);
    assert_eq!(fired[0].1, t);
    assert_eq!(fired[1].1, t + hour);

    let window = aggregator.window(&key).unwrap();
    assert_eq!(window.last().unwrap().open_time, t + hour);
    assert_eq!(window.len(), 500, "window stays bounded");
    assert_eq!(aggregator.stats().stale_dropped, 1);
}

// ============================================================================
// TEST 3 - Full signal path: oversold close drives a solo-RSI emit
// ============================================================================

#[tokio::test]
async fn test_oversold_close_emits_signal_end_to_end() {
    let aggregator = CandleAggregator::new(500);
    let store = Arc::new(MemoryStore::new());
    aggregator.set_store(store.clone());

    let notifier = Arc::new(RecordingNotifier::new());
    // RSI only: the decline must emit through the solo-indicator tier
    let config = SignalConfig {
        symbols: vec!["SOLUSDT".to_string()],
        timeframes: vec!["15m".to_string()],
        enable_wyckoff: false,
        enable_elliott: false,
        enable_macd: false,
        ..SignalConfig::default()
    };
    let fuser = Arc::new(SignalFuser::new(config, store.clone(), notifier.clone()));
    aggregator.register(fuser.clone());

    let key = StreamKey::new("SOLUSDT", Timeframe::M15);
    let t0 = 1_700_000_000_000;

    // A long steady decline leaves RSI deeply oversold; MACD shows no
    // crossover and the pattern analyzers stay silent
    let history: Vec<Candle> = (0..160)
        .map(|i| history_candle("SOLUSDT", Timeframe::M15, t0 + i * M15, 1000.0 - 2.0 * i as f64))
        .collect();
    aggregator.preload(key.clone(), history);

    // The next bar closes even lower
    let mut parser = MessageParser::new();
    let t_next = t0 + 160 * M15;
    feed(&mut parser, &aggregator, &kline_json("SOLUSDT", "15m", t_next, 678.0, 100.0, true)).await;
    aggregator.shutdown(Duration::from_secs(5)).await;

    let published = notifier.published();
    assert_eq!(published.len(), 1, "expected exactly one emitted signal");
    let signal = &published[0];
    assert_eq!(signal.direction, Direction::Long);
    assert_eq!(signal.tier, FusionTier::StrongIndicator);
    assert_eq!(signal.symbol, "SOLUSDT");
    assert!(signal.id.is_some(), "signal was assigned a store id");
    assert!(signal.confidence >= 0.55);

    // Level ordering for a LONG
    assert!(signal.stop_loss < signal.entry_price);
    assert!(signal.entry_price < signal.take_profit_1);
    assert!(signal.take_profit_1 < signal.take_profit_2);
    assert!(signal.take_profit_2 < signal.take_profit_3);

    // Signal persisted alongside the committed candle
    assert_eq!(store.signal_count(), 1);
    let recent = store.recent_signals("SOLUSDT", Some(Timeframe::M15), 5).await.unwrap();
    assert_eq!(recent.len(), 1);

    // Fuser state reflects the emit, including the per-key breakdown
    let stats = fuser.stats();
    assert_eq!(stats.signals_emitted, 1);
    assert_eq!(stats.long_signals, 1);
    let counts = stats.signals_by_key.get(&key).unwrap();
    assert_eq!(counts.long, 1);
    assert_eq!(counts.short, 0);
}

// ============================================================================
// TEST 4 - Cooldown suppresses back-to-back emits for the same key
// ============================================================================

#[tokio::test]
async fn test_cooldown_suppresses_second_emit_end_to_end() {
    let aggregator = CandleAggregator::new(500);
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let config = SignalConfig {
        enable_wyckoff: false,
        enable_elliott: false,
        enable_macd: false,
        ..SignalConfig::default()
    };
    let fuser = Arc::new(SignalFuser::new(config, store.clone(), notifier.clone()));
    aggregator.register(fuser.clone());

    let key = StreamKey::new("ETHUSDT", Timeframe::M15);
    let t0 = 1_700_000_000_000;
    let history: Vec<Candle> = (0..160)
        .map(|i| history_candle("ETHUSDT", Timeframe::M15, t0 + i * M15, 2000.0 - 3.0 * i as f64))
        .collect();
    aggregator.preload(key.clone(), history);

    // Two consecutive oversold closes arrive within the cooldown window
    // (wall-clock: both evaluated well under 300 s apart)
    let mut parser = MessageParser::new();
    let t1 = t0 + 160 * M15;
    feed(&mut parser, &aggregator, &kline_json("ETHUSDT", "15m", t1, 1518.0, 100.0, true)).await;
    feed(&mut parser, &aggregator, &kline_json("ETHUSDT", "15m", t1 + M15, 1515.0, 100.0, true)).await;
    aggregator.shutdown(Duration::from_secs(5)).await;

    assert_eq!(notifier.published().len(), 1, "later candidates hit the cooldown");
    assert_eq!(store.signal_count(), 1, "no store write for rejected candidates");

    // The warm-start tail commits on the first live bar, so three close
    // events fired in total: one emit, two cooldown rejections
    let stats = fuser.stats();
    assert_eq!(stats.signals_emitted, 1);
    assert_eq!(stats.rejects_by_reason.get("cooldown"), Some(&2));
}
