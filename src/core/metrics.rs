// Unified Metrics - Collects and formats stats from all pipeline components
// Aggregates existing per-component stats into a single view

use std::fmt;
use std::time::Duration;
use tracing::info;

use crate::ingest::aggregator::AggregatorStats;
use crate::ingest::stream::StreamClientStats;
use crate::signals::fuser::FuserStats;

/// Unified metrics snapshot from all pipeline components.
#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub stream: Option<StreamClientStats>,
    pub aggregator: Option<AggregatorStats>,
    pub fuser: Option<FuserStats>,
    /// Time since process start, captured at snapshot time.
    pub uptime: Duration,
}

impl PipelineMetrics {
    pub fn from_parts(
        stream: Option<StreamClientStats>,
        aggregator: Option<AggregatorStats>,
        fuser: Option<FuserStats>,
        uptime: Duration,
    ) -> Self {
        Self {
            stream,
            aggregator,
            fuser,
            uptime,
        }
    }

    /// Total messages received from the exchange stream.
    pub fn total_stream_messages(&self) -> u64 {
        self.stream.as_ref().map(|s| s.messages_received).unwrap_or(0)
    }

    /// Total committed (closed) candles.
    pub fn total_commits(&self) -> u64 {
        self.aggregator.as_ref().map(|a| a.commits).unwrap_or(0)
    }

    /// Total errors across all components.
    pub fn total_errors(&self) -> u64 {
        let stream_errs = self.stream.as_ref().map(|s| s.parse_errors + s.connection_errors).unwrap_or(0);
        let agg_dropped = self.aggregator.as_ref().map(|a| a.stale_dropped).unwrap_or(0);
        stream_errs + agg_dropped
    }

    /// Print detailed multi-line report.
    pub fn print_report(&self) {
        info!("=== PIPELINE METRICS (up {}) ===", format_uptime(self.uptime));

        if let Some(s) = &self.stream {
            info!(
                "  Stream:     msgs={} klines={} parse_errs={} conn_errs={} reconnects={} status={:?}",
                s.messages_received, s.klines_received, s.parse_errors, s.connection_errors,
                s.reconnects, s.status
            );
        }

        if let Some(a) = &self.aggregator {
            info!(
                "  Aggregator: keys={} candles={} commits={} stale_dropped={}",
                a.keys, a.candles_in_memory, a.commits, a.stale_dropped
            );
        }

        if let Some(f) = &self.fuser {
            info!(
                "  Fuser:      events={} emitted={} long={} short={} cooldowns={}",
                f.events_processed, f.signals_emitted, f.long_signals, f.short_signals,
                f.active_cooldowns
            );
            if !f.signals_by_key.is_empty() {
                let mut keys: Vec<_> = f.signals_by_key.iter().collect();
                keys.sort_by(|a, b| {
                    (&a.0.symbol, a.0.timeframe).cmp(&(&b.0.symbol, b.0.timeframe))
                });
                let formatted: Vec<String> = keys
                    .iter()
                    .map(|(key, counts)| {
                        format!("{} {}L/{}S", key, counts.long, counts.short)
                    })
                    .collect();
                info!("              signals: {}", formatted.join(", "));
            }
            if !f.rejects_by_reason.is_empty() {
                let mut reasons: Vec<_> = f.rejects_by_reason.iter().collect();
                reasons.sort_by(|a, b| b.1.cmp(a.1));
                let formatted: Vec<String> =
                    reasons.iter().map(|(r, n)| format!("{}={}", r, n)).collect();
                info!("              rejects: {}", formatted.join(" "));
            }
        }
    }
}

impl fmt::Display for PipelineMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PipelineMetrics(up={}, msgs={}, commits={}, errors={})",
            format_uptime(self.uptime),
            self.total_stream_messages(),
            self.total_commits(),
            self.total_errors()
        )
    }
}

/// Compact uptime rendering, largest unit first.
pub fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{}d", days));
    }
    if hours > 0 {
        parts.push(format!("{}h", hours));
    }
    if minutes > 0 {
        parts.push(format!("{}m", minutes));
    }
    if seconds > 0 || parts.is_empty() {
        parts.push(format!("{}s", seconds));
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_metrics() {
        let metrics = PipelineMetrics::from_parts(None, None, None, Duration::ZERO);
        assert_eq!(metrics.total_stream_messages(), 0);
        assert_eq!(metrics.total_commits(), 0);
        assert_eq!(metrics.total_errors(), 0);
        assert_eq!(metrics.uptime, Duration::ZERO);
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::ZERO), "0s");
        assert_eq!(format_uptime(Duration::from_secs(59)), "59s");
        assert_eq!(format_uptime(Duration::from_secs(61)), "1m 1s");
        assert_eq!(format_uptime(Duration::from_secs(3_600)), "1h");
        assert_eq!(format_uptime(Duration::from_secs(90_061)), "1d 1h 1m 1s");
    }
}
