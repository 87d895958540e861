// RSI Analyzer - oversold/overbought mean-reversion verdicts
// RSI < 30 -> LONG, RSI > 70 -> SHORT, confidence scales with distance

use tracing::debug;

use crate::core::types::{AnalyzerResult, Candle, Direction, StreamKey};
use crate::signals::indicators;
use crate::signals::Analyzer;

pub struct RsiAnalyzer {
    period: usize,
    oversold: f64,
    overbought: f64,
}

impl RsiAnalyzer {
    pub fn new(period: usize, oversold: f64, overbought: f64) -> Self {
        Self {
            period,
            oversold,
            overbought,
        }
    }

    pub fn min_candles(&self) -> usize {
        self.period + 1
    }
}

impl Default for RsiAnalyzer {
    fn default() -> Self {
        Self::new(14, 30.0, 70.0)
    }
}

impl Analyzer for RsiAnalyzer {
    fn name(&self) -> &'static str {
        "rsi"
    }

    fn analyze(&self, window: &[Candle], key: &StreamKey) -> AnalyzerResult {
        if window.len() < self.min_candles() {
            return AnalyzerResult::none();
        }

        let closes: Vec<f64> = window.iter().map(|c| c.close).collect();
        let value = indicators::rsi(&closes, self.period);
        if !value.is_finite() {
            return AnalyzerResult::none();
        }

        debug!(key = %key, rsi = value, "RSI computed");

        if value < self.oversold {
            let confidence = 0.5 + (self.oversold - value) / 30.0;
            AnalyzerResult::verdict(
                Direction::Long,
                confidence,
                format!("RSI oversold: {:.1} < {:.0}", value, self.oversold),
            )
        } else if value > self.overbought {
            let confidence = 0.5 + (value - self.overbought) / 30.0;
            AnalyzerResult::verdict(
                Direction::Short,
                confidence,
                format!("RSI overbought: {:.1} > {:.0}", value, self.overbought),
            )
        } else {
            AnalyzerResult::none_with(format!("RSI neutral: {:.1}", value))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Timeframe;

    fn window_with_closes(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                symbol: "BTCUSDT".to_string(),
                timeframe: Timeframe::M15,
                open_time: i as i64 * 900_000,
                close_time: (i as i64 + 1) * 900_000 - 1,
                open: close,
                high: close + 0.5,
                low: close - 0.5,
                close,
                volume: 100.0,
                quote_volume: None,
                trade_count: None,
                taker_buy_base: None,
                taker_buy_quote: None,
            })
            .collect()
    }

    fn key() -> StreamKey {
        StreamKey::new("BTCUSDT", Timeframe::M15)
    }

    #[test]
    fn test_oversold_emits_long() {
        // Steady decline drives RSI toward 0
        let closes: Vec<f64> = (0..40).map(|i| 200.0 - 2.0 * i as f64).collect();
        let result = RsiAnalyzer::default().analyze(&window_with_closes(&closes), &key());
        assert_eq!(result.direction, Some(Direction::Long));
        assert!(result.confidence > 0.5);
        assert!(result.confidence <= 1.0);
    }

    #[test]
    fn test_overbought_emits_short() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + 2.0 * i as f64).collect();
        let result = RsiAnalyzer::default().analyze(&window_with_closes(&closes), &key());
        assert_eq!(result.direction, Some(Direction::Short));
        assert!(result.confidence > 0.5);
    }

    #[test]
    fn test_neutral_is_none() {
        // Alternating closes keep RSI near 50
        let closes: Vec<f64> = (0..40)
            .map(|i| if i % 2 == 0 { 100.0 } else { 101.0 })
            .collect();
        let result = RsiAnalyzer::default().analyze(&window_with_closes(&closes), &key());
        assert!(result.is_none());
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_insufficient_window_is_none() {
        let closes = vec![100.0; 10];
        let result = RsiAnalyzer::default().analyze(&window_with_closes(&closes), &key());
        assert!(result.is_none());
    }

    #[test]
    fn test_purity() {
        let closes: Vec<f64> = (0..40).map(|i| 200.0 - 2.0 * i as f64).collect();
        let window = window_with_closes(&closes);
        let analyzer = RsiAnalyzer::default();
        let a = analyzer.analyze(&window, &key());
        let b = analyzer.analyze(&window, &key());
        assert_eq!(a.direction, b.direction);
        assert_eq!(a.confidence, b.confidence);
    }
}
