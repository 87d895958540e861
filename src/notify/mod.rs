// Notify Module - downstream signal publication
// The core calls publish_signal at most once per emitted signal; failures
// are logged and dropped, the signal stays persisted

pub mod webhook;

use futures::future::BoxFuture;
use thiserror::Error;
use tracing::info;

use crate::core::types::Signal;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("webhook returned status {0}")]
    Status(u16),
}

/// Sink for emitted signals.
pub trait SignalNotifier: Send + Sync {
    fn publish_signal<'a>(&'a self, signal: &'a Signal) -> BoxFuture<'a, Result<(), NotifyError>>;
}

/// Logs signals instead of delivering them. Used when no webhook is
/// configured and in headless test runs.
#[derive(Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl SignalNotifier for LogNotifier {
    fn publish_signal<'a>(&'a self, signal: &'a Signal) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move {
            info!(
                symbol = %signal.symbol,
                timeframe = %signal.timeframe,
                direction = %signal.direction,
                entry = signal.entry_price,
                stop_loss = signal.stop_loss,
                take_profit = signal.take_profit_1,
                confidence = signal.confidence,
                tier = %signal.tier,
                "SIGNAL"
            );
            Ok(())
        })
    }
}

pub use webhook::WebhookNotifier;
