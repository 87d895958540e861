// MACD Analyzer - histogram crossover detection on the latest close
// Bullish crossover -> LONG, bearish crossover -> SHORT

use tracing::debug;

use crate::core::types::{AnalyzerResult, Candle, Direction, StreamKey};
use crate::signals::indicators;
use crate::signals::Analyzer;

pub struct MacdAnalyzer {
    fast: usize,
    slow: usize,
    signal: usize,
}

impl MacdAnalyzer {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        Self { fast, slow, signal }
    }

    pub fn min_candles(&self) -> usize {
        // One extra close so the previous histogram exists for crossover checks
        self.slow + self.signal + 1
    }

    fn confidence(histogram: f64, macd_line: f64, direction: Direction) -> f64 {
        let histogram_strength = (histogram.abs() * 100.0).min(0.4);
        let zero_line_bonus = match direction {
            Direction::Long if macd_line > 0.0 => 0.2,
            Direction::Short if macd_line < 0.0 => 0.2,
            _ => 0.1,
        };
        (0.5 + histogram_strength + zero_line_bonus).clamp(0.0, 1.0)
    }
}

impl Default for MacdAnalyzer {
    fn default() -> Self {
        Self::new(12, 26, 9)
    }
}

impl Analyzer for MacdAnalyzer {
    fn name(&self) -> &'static str {
        "macd"
    }

    fn analyze(&self, window: &[Candle], key: &StreamKey) -> AnalyzerResult {
        if window.len() < self.min_candles() {
            return AnalyzerResult::none();
        }

        let closes: Vec<f64> = window.iter().map(|c| c.close).collect();
        let out = indicators::macd(&closes, self.fast, self.slow, self.signal);
        if !out.is_valid() {
            return AnalyzerResult::none();
        }

        debug!(
            key = %key,
            macd = out.macd,
            signal = out.signal,
            histogram = out.histogram,
            "MACD computed"
        );

        // Bullish crossover: histogram flips from <= 0 to > 0
        if out.prev_histogram <= 0.0 && out.histogram > 0.0 {
            let confidence = Self::confidence(out.histogram, out.macd, Direction::Long);
            AnalyzerResult::verdict(
                Direction::Long,
                confidence,
                format!(
                    "MACD bullish crossover: histogram {:.4} (line {:.4})",
                    out.histogram, out.macd
                ),
            )
        } else if out.prev_histogram >= 0.0 && out.histogram < 0.0 {
            let confidence = Self::confidence(out.histogram, out.macd, Direction::Short);
            AnalyzerResult::verdict(
                Direction::Short,
                confidence,
                format!(
                    "MACD bearish crossover: histogram {:.4} (line {:.4})",
                    out.histogram, out.macd
                ),
            )
        } else {
            AnalyzerResult::none_with(format!("MACD no crossover: histogram {:.4}", out.histogram))
        }
    }
}
