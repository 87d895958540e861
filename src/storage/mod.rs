// Storage Module - persistence contract for candles and signals
// The core treats the schema as opaque beyond these method contracts

pub mod memory;
pub mod sqlite;

use futures::future::BoxFuture;
use thiserror::Error;

use crate::core::types::{Candle, Signal, Timeframe};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("malformed row: {0}")]
    MalformedRow(String),
}

/// Persistence contract used by the pipeline. Implementations are safe for
/// concurrent use.
pub trait SignalStore: Send + Sync {
    /// Idempotent candle insert keyed by `(symbol, timeframe, open_time)`.
    /// Re-ingesting an already stored candle is not an error.
    fn upsert_candle<'a>(&'a self, candle: &'a Candle) -> BoxFuture<'a, Result<(), StorageError>>;

    /// Upsert a batch of candles (warm-start persistence). Returns the number
    /// of newly inserted rows.
    fn bulk_upsert_candles<'a>(
        &'a self,
        candles: &'a [Candle],
    ) -> BoxFuture<'a, Result<u64, StorageError>>;

    /// Append a signal row and return its assigned id.
    fn insert_signal<'a>(&'a self, signal: &'a Signal) -> BoxFuture<'a, Result<i64, StorageError>>;

    /// Most recent signals for a symbol, newest first.
    fn recent_signals<'a>(
        &'a self,
        symbol: &'a str,
        timeframe: Option<Timeframe>,
        limit: u32,
    ) -> BoxFuture<'a, Result<Vec<Signal>, StorageError>>;

    /// Maintenance: drop candles older than the cutoff. Not invoked by the
    /// core pipeline.
    fn delete_candles_before(&self, cutoff_ms: i64) -> BoxFuture<'_, Result<u64, StorageError>>;

    /// Maintenance: drop candles whose timeframe is not in the given set.
    fn delete_candles_not_in<'a>(
        &'a self,
        timeframes: &'a [Timeframe],
    ) -> BoxFuture<'a, Result<u64, StorageError>>;
}

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
