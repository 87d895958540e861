// Elliott Wave Analyzer - pivot extraction and impulse/correction validation
// A completed impulse emits the mean-reversion direction; a completed ABC
// correction emits continuation of the prior trend

use std::fmt;
use tracing::debug;

use crate::core::types::{AnalyzerResult, Candle, Direction, StreamKey};
use crate::signals::Analyzer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PivotKind {
    High,
    Low,
}

impl fmt::Display for PivotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PivotKind::High => write!(f, "high"),
            PivotKind::Low => write!(f, "low"),
        }
    }
}

/// A local price extremum.
#[derive(Debug, Clone, Copy)]
pub struct Pivot {
    pub kind: PivotKind,
    pub price: f64,
    pub index: usize,
}

pub struct ElliottAnalyzer {
    /// Pivot half-width: a pivot must be the strict extremum of +/- this many bars.
    halfwidth: usize,
    min_candles: usize,
}

/// Fewer alternating pivots than this and no wave count is attempted.
const MIN_ALTERNATING_PIVOTS: usize = 5;

impl ElliottAnalyzer {
    pub fn new(halfwidth: usize, min_candles: usize) -> Self {
        Self {
            halfwidth,
            min_candles,
        }
    }

    /// Extract strict swing highs and lows.
    pub fn find_pivots(&self, window: &[Candle]) -> Vec<Pivot> {
        let w = self.halfwidth;
        let mut pivots = Vec::new();
        if window.len() < 2 * w + 1 {
            return pivots;
        }

        for i in w..window.len() - w {
            let candle = &window[i];

            let is_high = (i - w..=i + w)
                .filter(|&j| j != i)
                .all(|j| window[j].high < candle.high);
            if is_high {
                pivots.push(Pivot {
                    kind: PivotKind::High,
                    price: candle.high,
                    index: i,
                });
                continue;
            }

            let is_low = (i - w..=i + w)
                .filter(|&j| j != i)
                .all(|j| window[j].low > candle.low);
            if is_low {
                pivots.push(Pivot {
                    kind: PivotKind::Low,
                    price: candle.low,
                    index: i,
                });
            }
        }
        pivots
    }

    /// Longest alternating high/low suffix of the pivot sequence.
    fn alternating_suffix(pivots: &[Pivot]) -> Vec<Pivot> {
        let mut suffix: Vec<Pivot> = Vec::new();
        for pivot in pivots.iter().rev() {
            match suffix.last() {
                Some(prev) if prev.kind == pivot.kind => break,
                _ => suffix.push(*pivot),
            }
        }
        suffix.reverse();
        suffix
    }

    /// Validate a completed five-wave impulse over points p0..p5.
    /// Returns the direction to emit (against the completed impulse).
    fn check_impulse(points: &[Pivot]) -> Option<(Direction, f64, String)> {
        if points.len() < 6 {
            return None;
        }
        let p = &points[points.len() - 6..];

        let up_shape = p[0].kind == PivotKind::Low
            && p[1].kind == PivotKind::High
            && p[2].kind == PivotKind::Low
            && p[3].kind == PivotKind::High
            && p[4].kind == PivotKind::Low
            && p[5].kind == PivotKind::High;
        let down_shape = p[0].kind == PivotKind::High
            && p[1].kind == PivotKind::Low
            && p[2].kind == PivotKind::High
            && p[3].kind == PivotKind::Low
            && p[4].kind == PivotKind::High
            && p[5].kind == PivotKind::Low;

        let (waves, overlap_ok, emit) = if up_shape {
            let waves = [
                p[1].price - p[0].price,
                p[1].price - p[2].price,
                p[3].price - p[2].price,
                p[3].price - p[4].price,
                p[5].price - p[4].price,
            ];
            // Wave 4 must hold above the wave-1 top
            (waves, p[4].price > p[1].price, Direction::Short)
        } else if down_shape {
            let waves = [
                p[0].price - p[1].price,
                p[2].price - p[1].price,
                p[2].price - p[3].price,
                p[4].price - p[3].price,
                p[4].price - p[5].price,
            ];
            (waves, p[4].price < p[1].price, Direction::Long)
        } else {
            return None;
        };

        if waves.iter().any(|&w| w <= 0.0) {
            return None;
        }
        let [w1, w2, w3, _w4, w5] = waves;

        let retrace_ok = w2 <= w1;
        let third_ok = !(w3 < w1 && w3 < w5);
        if !(retrace_ok && third_ok && overlap_ok) {
            return None;
        }

        let confidence = Self::impulse_confidence(&waves, p);
        let label = if up_shape { "up" } else { "down" };
        let detail = format!(
            "completed 5-wave impulse {} at {:.4}; wave3/wave1 {:.2}",
            label,
            p[5].price,
            w3 / w1
        );
        Some((emit, confidence, detail))
    }

    /// Confidence from Fibonacci-ratio fit and pivot-spacing symmetry.
    fn impulse_confidence(waves: &[f64; 5], points: &[Pivot]) -> f64 {
        let [w1, w2, w3, _w4, w5] = *waves;

        let fit = |ratio: f64, target: f64| -> f64 {
            if target <= 0.0 {
                return 0.0;
            }
            (1.0 - ((ratio - target).abs() / target).min(1.0)).max(0.0)
        };

        // Wave 3 extension toward 1.618, wave 5 toward 0.618 or parity,
        // wave 2 retrace toward 0.618
        let fit3 = fit(w3 / w1, 1.618);
        let fit5 = fit(w5 / w1, 0.618).max(fit(w5 / w1, 1.0));
        let fit2 = fit(w2 / w1, 0.618);

        // Spacing symmetry: regular pivot spacing scores higher
        let spans: Vec<f64> = points
            .windows(2)
            .map(|pair| (pair[1].index - pair[0].index) as f64)
            .collect();
        let mean = spans.iter().sum::<f64>() / spans.len() as f64;
        let variance = spans.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / spans.len() as f64;
        let symmetry = if mean > 0.0 {
            (1.0 - (variance.sqrt() / mean).min(1.0)).max(0.0)
        } else {
            0.0
        };

        (0.4 + 0.2 * fit3 + 0.15 * fit5 + 0.15 * fit2 + 0.1 * symmetry).clamp(0.0, 1.0)
    }

    /// Validate a completed ABC correction over points p0..p3 and return the
    /// trend-continuation direction.
    fn check_correction(points: &[Pivot]) -> Option<(Direction, f64, String)> {
        if points.len() < 4 {
            return None;
        }
        let p = &points[points.len() - 4..];

        // Correction down after an uptrend: H-L-H-L, resumes LONG.
        // Correction up after a downtrend: L-H-L-H, resumes SHORT.
        let (emit, wave_a, wave_b, wave_c) = if p[0].kind == PivotKind::High
            && p[1].kind == PivotKind::Low
            && p[2].kind == PivotKind::High
            && p[3].kind == PivotKind::Low
        {
            (
                Direction::Long,
                p[0].price - p[1].price,
                p[2].price - p[1].price,
                p[2].price - p[3].price,
            )
        } else if p[0].kind == PivotKind::Low
            && p[1].kind == PivotKind::High
            && p[2].kind == PivotKind::Low
            && p[3].kind == PivotKind::High
        {
            (
                Direction::Short,
                p[1].price - p[0].price,
                p[1].price - p[2].price,
                p[3].price - p[2].price,
            )
        } else {
            return None;
        };

        if wave_a <= 0.0 || wave_b <= 0.0 || wave_c <= 0.0 {
            return None;
        }

        // B retraces 50-100% of A; C extends 100-161.8% of A
        let b_ratio = wave_b / wave_a;
        let c_ratio = wave_c / wave_a;
        if !(0.5..=1.0).contains(&b_ratio) || !(1.0..=1.618).contains(&c_ratio) {
            return None;
        }

        // Best confidence when C lands on a Fibonacci target of A
        let fit = (1.0 - (c_ratio - 1.0).abs().min((c_ratio - 1.618).abs()) / 0.618).clamp(0.0, 1.0);
        let confidence = (0.5 + 0.3 * fit).clamp(0.0, 1.0);
        let detail = format!(
            "ABC correction complete at {:.4}; C/A {:.2}, B retrace {:.2}",
            p[3].price, c_ratio, b_ratio
        );
        Some((emit, confidence, detail))
    }
}

impl Default for ElliottAnalyzer {
    fn default() -> Self {
        Self::new(5, 100)
    }
}

impl Analyzer for ElliottAnalyzer {
    fn name(&self) -> &'static str {
        "elliott"
    }

    fn analyze(&self, window: &[Candle], key: &StreamKey) -> AnalyzerResult {
        if window.len() < self.min_candles {
            return AnalyzerResult::none();
        }

        let pivots = self.find_pivots(window);
        let alternating = Self::alternating_suffix(&pivots);
        debug!(
            key = %key,
            pivots = pivots.len(),
            alternating = alternating.len(),
            "Elliott pivots extracted"
        );

        if alternating.len() < MIN_ALTERNATING_PIVOTS {
            return AnalyzerResult::none_with(format!(
                "only {} alternating pivots",
                alternating.len()
            ));
        }

        if let Some((direction, confidence, detail)) = Self::check_impulse(&alternating) {
            return AnalyzerResult::verdict(direction, confidence, detail);
        }

        if let Some((direction, confidence, detail)) = Self::check_correction(&alternating) {
            return AnalyzerResult::verdict(direction, confidence, detail);
        }

        AnalyzerResult::none_with("no valid wave count")
    }
}
