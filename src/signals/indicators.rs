// Technical Indicators - pure functions over candle slices
// Deterministic and side-effect-free; insufficient data returns NaN

use crate::core::types::Candle;

/// Simple moving average of the last `period` values.
pub fn sma(values: &[f64], period: usize) -> f64 {
    if period == 0 || values.len() < period {
        return f64::NAN;
    }
    let tail = &values[values.len() - period..];
    tail.iter().sum::<f64>() / period as f64
}

/// Full EMA series. Entries before the seed index are NaN; the seed at
/// index `period - 1` is the simple average of the first `period` values.
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }

    let seed: f64 = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = seed;

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut prev = seed;
    for i in period..values.len() {
        prev = (values[i] - prev) * multiplier + prev;
        out[i] = prev;
    }
    out
}

/// Latest EMA value.
pub fn ema(values: &[f64], period: usize) -> f64 {
    ema_series(values, period).last().copied().unwrap_or(f64::NAN)
}

/// RSI with Wilder smoothing of average gain / average loss.
/// Needs at least `period + 1` closes.
pub fn rsi(closes: &[f64], period: usize) -> f64 {
    if period == 0 || closes.len() < period + 1 {
        return f64::NAN;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = closes[i] - closes[i - 1];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss += -change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;

    let w = period as f64;
    for i in (period + 1)..closes.len() {
        let change = closes[i] - closes[i - 1];
        let gain = if change > 0.0 { change } else { 0.0 };
        let loss = if change < 0.0 { -change } else { 0.0 };
        avg_gain = (avg_gain * (w - 1.0) + gain) / w;
        avg_loss = (avg_loss * (w - 1.0) + loss) / w;
    }

    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

/// MACD output for the most recent close. `prev_histogram` is the histogram
/// one bar earlier, for crossover detection.
#[derive(Debug, Clone, Copy)]
pub struct MacdOutput {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
    pub prev_histogram: f64,
}

impl MacdOutput {
    pub fn is_valid(&self) -> bool {
        self.macd.is_finite()
            && self.signal.is_finite()
            && self.histogram.is_finite()
            && self.prev_histogram.is_finite()
    }
}

/// MACD(fast, slow, signal): line = EMA(fast) - EMA(slow), signal line =
/// EMA(signal) of the line, histogram = line - signal line.
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> MacdOutput {
    let invalid = MacdOutput {
        macd: f64::NAN,
        signal: f64::NAN,
        histogram: f64::NAN,
        prev_histogram: f64::NAN,
    };
    if fast == 0 || slow <= fast || signal == 0 || closes.len() < slow + signal {
        return invalid;
    }

    let fast_ema = ema_series(closes, fast);
    let slow_ema = ema_series(closes, slow);

    // MACD line is defined from the slow seed onward.
    let macd_line: Vec<f64> = (slow - 1..closes.len())
        .map(|i| fast_ema[i] - slow_ema[i])
        .collect();

    let signal_series = ema_series(&macd_line, signal);

    let n = macd_line.len();
    let histogram = macd_line[n - 1] - signal_series[n - 1];
    let prev_histogram = if n >= 2 {
        macd_line[n - 2] - signal_series[n - 2]
    } else {
        f64::NAN
    };

    MacdOutput {
        macd: macd_line[n - 1],
        signal: signal_series[n - 1],
        histogram,
        prev_histogram,
    }
}

/// ATR with Wilder smoothing of the true range.
/// Needs at least `period + 1` candles.
pub fn atr(candles: &[Candle], period: usize) -> f64 {
    if period == 0 || candles.len() < period + 1 {
        return f64::NAN;
    }

    let true_range = |i: usize| -> f64 {
        let c = &candles[i];
        let prev_close = candles[i - 1].close;
        let h_l = c.high - c.low;
        let h_pc = (c.high - prev_close).abs();
        let l_pc = (c.low - prev_close).abs();
        h_l.max(h_pc).max(l_pc)
    };

    let mut value = 0.0;
    for i in 1..=period {
        value += true_range(i);
    }
    value /= period as f64;

    let w = period as f64;
    for i in (period + 1)..candles.len() {
        value = (value * (w - 1.0) + true_range(i)) / w;
    }
    value
}

/// SMA of candle volumes over the last `period` entries.
pub fn volume_sma(candles: &[Candle], period: usize) -> f64 {
    if period == 0 || candles.len() < period {
        return f64::NAN;
    }
    let tail = &candles[candles.len() - period..];
    tail.iter().map(|c| c.volume).sum::<f64>() / period as f64
}
