// Wyckoff Analyzer - phase classification plus spring/upthrust detection
// Spring in accumulation -> LONG, upthrust in distribution -> SHORT

use std::fmt;
use tracing::debug;

use crate::core::types::{AnalyzerResult, Candle, Direction, StreamKey};
use crate::signals::indicators;
use crate::signals::Analyzer;

/// Market phase in the Wyckoff reading of the trailing range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WyckoffPhase {
    Accumulation,
    Markup,
    Distribution,
    Markdown,
    Unknown,
}

impl fmt::Display for WyckoffPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WyckoffPhase::Accumulation => "accumulation",
            WyckoffPhase::Markup => "markup",
            WyckoffPhase::Distribution => "distribution",
            WyckoffPhase::Markdown => "markdown",
            WyckoffPhase::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

pub struct WyckoffAnalyzer {
    /// Trailing range length, excluding the trigger candle.
    range_lookback: usize,
    /// Volume SMA length for the climax-volume test.
    volume_lookback: usize,
    min_candles: usize,
}

/// Range width below this percent of the range low counts as sideways.
const SIDEWAYS_RANGE_PCT: f64 = 5.0;
/// Trigger volume must exceed this multiple of the volume SMA.
const CLIMAX_VOLUME_MULT: f64 = 1.5;
/// Verdicts below this confidence are discarded.
const MIN_CONFIDENCE: f64 = 0.35;

impl WyckoffAnalyzer {
    pub fn new(range_lookback: usize, volume_lookback: usize, min_candles: usize) -> Self {
        Self {
            range_lookback,
            volume_lookback,
            min_candles,
        }
    }

    /// Classify the phase of the trailing range segment (the candles feeding
    /// the range bounds, not the trigger candle itself).
    pub fn classify_phase(&self, window: &[Candle]) -> WyckoffPhase {
        let len = window.len();
        if len < self.range_lookback + 1 {
            return WyckoffPhase::Unknown;
        }

        let segment = &window[len - 1 - self.range_lookback..len - 1];
        let range_high = segment.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let range_low = segment.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        if range_low <= 0.0 {
            return WyckoffPhase::Unknown;
        }

        let range_percent = (range_high - range_low) / range_low * 100.0;

        let mid = segment.len() / 2;
        let first_half: f64 =
            segment[..mid].iter().map(|c| c.close).sum::<f64>() / mid.max(1) as f64;
        let second_half: f64 = segment[mid..].iter().map(|c| c.close).sum::<f64>()
            / (segment.len() - mid).max(1) as f64;
        let trend = second_half - first_half;

        // Volume slope: last 10 bars of the segment vs the 10 before them
        let vols: Vec<f64> = segment.iter().map(|c| c.volume).collect();
        let vol_ratio = if vols.len() >= 20 {
            let recent = indicators::sma(&vols, 10);
            let earlier = indicators::sma(&vols[..vols.len() - 10], 10);
            if earlier > 0.0 {
                recent / earlier
            } else {
                1.0
            }
        } else {
            1.0
        };

        let sideways = range_percent < SIDEWAYS_RANGE_PCT;

        if sideways && vol_ratio >= 1.1 {
            return WyckoffPhase::Accumulation;
        }

        if sideways && vol_ratio <= 0.9 && self.had_prior_rally(window) {
            return WyckoffPhase::Distribution;
        }

        if !sideways {
            return if trend > 0.0 {
                WyckoffPhase::Markup
            } else {
                WyckoffPhase::Markdown
            };
        }

        WyckoffPhase::Unknown
    }

    /// Was price rallying before the trailing range formed?
    fn had_prior_rally(&self, window: &[Candle]) -> bool {
        let len = window.len();
        if len < self.range_lookback + 11 {
            return false;
        }
        let pre = &window[..len - 1 - self.range_lookback];
        if pre.len() < 10 {
            return false;
        }
        pre[pre.len() - 1].close > pre[pre.len() - 10].close
    }

    fn confidence(penetration_ratio: f64, volume_mult: f64) -> f64 {
        let raw = 0.25 + penetration_ratio + 0.15 * (volume_mult - 1.0);
        raw.min(1.0)
    }
}

impl Default for WyckoffAnalyzer {
    fn default() -> Self {
        Self::new(50, 20, 100)
    }
}

impl Analyzer for WyckoffAnalyzer {
    fn name(&self) -> &'static str {
        "wyckoff"
    }

    fn analyze(&self, window: &[Candle], key: &StreamKey) -> AnalyzerResult {
        let len = window.len();
        if len < self.min_candles || len < self.range_lookback + self.volume_lookback + 1 {
            return AnalyzerResult::none();
        }

        let segment = &window[len - 1 - self.range_lookback..len - 1];
        let range_high = segment.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let range_low = segment.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        let range_width = range_high - range_low;
        if range_width <= 0.0 {
            return AnalyzerResult::none();
        }

        let trigger = &window[len - 1];
        let vol_sma = indicators::volume_sma(&window[..len - 1], self.volume_lookback);
        if !vol_sma.is_finite() || vol_sma <= 0.0 {
            return AnalyzerResult::none();
        }
        let volume_mult = trigger.volume / vol_sma;

        let phase = self.classify_phase(window);
        debug!(key = %key, phase = %phase, volume_mult, "Wyckoff phase classified");

        // Spring: failed breakdown under the range low on climax volume
        if trigger.low < range_low
            && trigger.close >= range_low
            && phase == WyckoffPhase::Accumulation
            && volume_mult > CLIMAX_VOLUME_MULT
        {
            let penetration = (range_low - trigger.low) / range_width;
            let confidence = Self::confidence(penetration, volume_mult);
            if confidence >= MIN_CONFIDENCE {
                return AnalyzerResult::verdict(
                    Direction::Long,
                    confidence,
                    format!(
                        "Wyckoff spring in {}: support {:.4} undercut to {:.4}, closed {:.4} on {:.1}x volume",
                        phase, range_low, trigger.low, trigger.close, volume_mult
                    ),
                );
            }
        }

        // Upthrust: failed breakout over the range high on climax volume
        if trigger.high > range_high
            && trigger.close <= range_high
            && phase == WyckoffPhase::Distribution
            && volume_mult > CLIMAX_VOLUME_MULT
        {
            let penetration = (trigger.high - range_high) / range_width;
            let confidence = Self::confidence(penetration, volume_mult);
            if confidence >= MIN_CONFIDENCE {
                return AnalyzerResult::verdict(
                    Direction::Short,
                    confidence,
                    format!(
                        "Wyckoff upthrust in {}: resistance {:.4} pierced to {:.4}, closed {:.4} on {:.1}x volume",
                        phase, range_high, trigger.high, trigger.close, volume_mult
                    ),
                );
            }
        }

        AnalyzerResult::none_with(format!("phase {}", phase))
    }
}
