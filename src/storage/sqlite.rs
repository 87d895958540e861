// SQLite Store - sqlx-backed SignalStore
// Candles unique on (symbol, timeframe, open_time); duplicate inserts are
// expected during reconnects and treated as success

use futures::future::BoxFuture;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::core::types::{
    AnalyzerBreakdown, Candle, Direction, FusionTier, Signal, Timeframe,
};
use crate::storage::{SignalStore, StorageError};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS candles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        symbol TEXT NOT NULL,
        timeframe TEXT NOT NULL,
        open_time INTEGER NOT NULL,
        close_time INTEGER NOT NULL,
        open REAL NOT NULL,
        high REAL NOT NULL,
        low REAL NOT NULL,
        close REAL NOT NULL,
        volume REAL NOT NULL,
        quote_volume REAL,
        trade_count INTEGER,
        taker_buy_base REAL,
        taker_buy_quote REAL,
        UNIQUE(symbol, timeframe, open_time)
    )",
    "CREATE TABLE IF NOT EXISTS signals (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        symbol TEXT NOT NULL,
        timeframe TEXT NOT NULL,
        direction TEXT NOT NULL,
        entry_price REAL NOT NULL,
        stop_loss REAL NOT NULL,
        take_profit_1 REAL NOT NULL,
        take_profit_2 REAL NOT NULL,
        take_profit_3 REAL NOT NULL,
        confidence REAL NOT NULL,
        tier REAL NOT NULL,
        reason TEXT NOT NULL,
        atr REAL NOT NULL,
        breakdown TEXT NOT NULL,
        generated_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_candles_key
        ON candles(symbol, timeframe, open_time)",
    "CREATE INDEX IF NOT EXISTS idx_signals_symbol_time
        ON signals(symbol, timeframe, generated_at DESC)",
];

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and ensure the schema exists.
    pub async fn open(path: &str, max_connections: u32) -> Result<Self, StorageError> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))
            .map_err(sqlx::Error::from)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        info!(path = path, "SQLite store opened");
        Ok(store)
    }

    /// In-memory database. A single connection keeps all queries on the same
    /// database instance.
    pub async fn open_in_memory() -> Result<Self, StorageError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:").map_err(sqlx::Error::from)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn signal_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Signal, StorageError> {
        let direction: String = row.get("direction");
        let timeframe: String = row.get("timeframe");
        let tier: f64 = row.get("tier");
        let breakdown: String = row.get("breakdown");

        Ok(Signal {
            id: Some(row.get("id")),
            symbol: row.get("symbol"),
            timeframe: Timeframe::from_str(&timeframe)
                .map_err(StorageError::MalformedRow)?,
            direction: Direction::from_str(&direction).map_err(StorageError::MalformedRow)?,
            entry_price: row.get("entry_price"),
            stop_loss: row.get("stop_loss"),
            take_profit_1: row.get("take_profit_1"),
            take_profit_2: row.get("take_profit_2"),
            take_profit_3: row.get("take_profit_3"),
            confidence: row.get("confidence"),
            tier: FusionTier::from_label(tier as f32)
                .ok_or_else(|| StorageError::MalformedRow(format!("unknown tier {}", tier)))?,
            reason: row.get("reason"),
            atr: row.get("atr"),
            breakdown: serde_json::from_str::<AnalyzerBreakdown>(&breakdown)?,
            generated_at: row.get("generated_at"),
        })
    }
}

impl SignalStore for SqliteStore {
    fn upsert_candle<'a>(&'a self, candle: &'a Candle) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            let result = sqlx::query(
                "INSERT INTO candles \
                 (symbol, timeframe, open_time, close_time, open, high, low, close, volume, \
                  quote_volume, trade_count, taker_buy_base, taker_buy_quote) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(symbol, timeframe, open_time) DO NOTHING",
            )
            .bind(&candle.symbol)
            .bind(candle.timeframe.as_str())
            .bind(candle.open_time)
            .bind(candle.close_time)
            .bind(candle.open)
            .bind(candle.high)
            .bind(candle.low)
            .bind(candle.close)
            .bind(candle.volume)
            .bind(candle.quote_volume)
            .bind(candle.trade_count)
            .bind(candle.taker_buy_base)
            .bind(candle.taker_buy_quote)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                info!(
                    symbol = %candle.symbol,
                    timeframe = %candle.timeframe,
                    open_time = candle.open_time,
                    "Duplicate candle ignored"
                );
            }
            Ok(())
        })
    }

    fn bulk_upsert_candles<'a>(
        &'a self,
        candles: &'a [Candle],
    ) -> BoxFuture<'a, Result<u64, StorageError>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await?;
            let mut inserted = 0;

            for candle in candles {
                let result = sqlx::query(
                    "INSERT INTO candles \
                     (symbol, timeframe, open_time, close_time, open, high, low, close, volume, \
                      quote_volume, trade_count, taker_buy_base, taker_buy_quote) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
                     ON CONFLICT(symbol, timeframe, open_time) DO NOTHING",
                )
                .bind(&candle.symbol)
                .bind(candle.timeframe.as_str())
                .bind(candle.open_time)
                .bind(candle.close_time)
                .bind(candle.open)
                .bind(candle.high)
                .bind(candle.low)
                .bind(candle.close)
                .bind(candle.volume)
                .bind(candle.quote_volume)
                .bind(candle.trade_count)
                .bind(candle.taker_buy_base)
                .bind(candle.taker_buy_quote)
                .execute(&mut *tx)
                .await?;
                inserted += result.rows_affected();
            }

            tx.commit().await?;
            debug!(total = candles.len(), inserted, "Bulk candle upsert");
            Ok(inserted)
        })
    }

    fn insert_signal<'a>(&'a self, signal: &'a Signal) -> BoxFuture<'a, Result<i64, StorageError>> {
        Box::pin(async move {
            let breakdown = serde_json::to_string(&signal.breakdown)?;
            let result = sqlx::query(
                "INSERT INTO signals \
                 (symbol, timeframe, direction, entry_price, stop_loss, \
                  take_profit_1, take_profit_2, take_profit_3, confidence, tier, \
                  reason, atr, breakdown, generated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&signal.symbol)
            .bind(signal.timeframe.as_str())
            .bind(signal.direction.to_string())
            .bind(signal.entry_price)
            .bind(signal.stop_loss)
            .bind(signal.take_profit_1)
            .bind(signal.take_profit_2)
            .bind(signal.take_profit_3)
            .bind(signal.confidence)
            .bind(signal.tier.label() as f64)
            .bind(&signal.reason)
            .bind(signal.atr)
            .bind(breakdown)
            .bind(signal.generated_at)
            .execute(&self.pool)
            .await?;

            Ok(result.last_insert_rowid())
        })
    }

    fn recent_signals<'a>(
        &'a self,
        symbol: &'a str,
        timeframe: Option<Timeframe>,
        limit: u32,
    ) -> BoxFuture<'a, Result<Vec<Signal>, StorageError>> {
        Box::pin(async move {
            let rows = match timeframe {
                Some(tf) => {
                    sqlx::query(
                        "SELECT * FROM signals \
                         WHERE symbol = ? AND timeframe = ? \
                         ORDER BY generated_at DESC LIMIT ?",
                    )
                    .bind(symbol)
                    .bind(tf.as_str())
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
                }
                None => {
                    sqlx::query(
                        "SELECT * FROM signals \
                         WHERE symbol = ? \
                         ORDER BY generated_at DESC LIMIT ?",
                    )
                    .bind(symbol)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
                }
            };

            rows.iter().map(Self::signal_from_row).collect()
        })
    }

    fn delete_candles_before(&self, cutoff_ms: i64) -> BoxFuture<'_, Result<u64, StorageError>> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM candles WHERE open_time < ?")
                .bind(cutoff_ms)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        })
    }

    fn delete_candles_not_in<'a>(
        &'a self,
        timeframes: &'a [Timeframe],
    ) -> BoxFuture<'a, Result<u64, StorageError>> {
        Box::pin(async move {
            if timeframes.is_empty() {
                return Ok(0);
            }
            let placeholders = vec!["?"; timeframes.len()].join(", ");
            let sql = format!(
                "DELETE FROM candles WHERE timeframe NOT IN ({})",
                placeholders
            );
            let mut query = sqlx::query(&sql);
            for tf in timeframes {
                query = query.bind(tf.as_str());
            }
            let result = query.execute(&self.pool).await?;
            Ok(result.rows_affected())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::AnalyzerResult;

    fn candle(open_time: i64) -> Candle {
        Candle {
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::H1,
            open_time,
            close_time: open_time + 3_599_999,
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: 10.0,
            quote_volume: Some(1_000.0),
            trade_count: Some(42),
            taker_buy_base: Some(5.0),
            taker_buy_quote: Some(500.0),
        }
    }

    fn signal(generated_at: i64, timeframe: Timeframe) -> Signal {
        Signal {
            id: None,
            symbol: "BTCUSDT".to_string(),
            timeframe,
            direction: Direction::Long,
            entry_price: 100.0,
            stop_loss: 96.0,
            take_profit_1: 106.0,
            take_profit_2: 112.0,
            take_profit_3: 118.0,
            confidence: 0.72,
            tier: FusionTier::StrongIndicator,
            reason: "RSI+MACD agree on LONG".to_string(),
            atr: 2.0,
            breakdown: AnalyzerBreakdown {
                rsi: Some(AnalyzerResult::verdict(Direction::Long, 0.7, "oversold")),
                ..AnalyzerBreakdown::default()
            },
            generated_at,
        }
    }

    #[tokio::test]
    async fn test_upsert_candle_is_idempotent() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let c = candle(0);
        store.upsert_candle(&c).await.unwrap();
        // Re-ingesting the same candle leaves the store unchanged and raises
        // no observable error
        store.upsert_candle(&c).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM candles")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_bulk_upsert_reports_new_rows_only() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let batch: Vec<Candle> = (0..5).map(|i| candle(i * 3_600_000)).collect();
        assert_eq!(store.bulk_upsert_candles(&batch).await.unwrap(), 5);
        assert_eq!(store.bulk_upsert_candles(&batch).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_signal_roundtrip() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let id = store.insert_signal(&signal(1_000, Timeframe::H1)).await.unwrap();
        assert!(id > 0);

        let signals = store.recent_signals("BTCUSDT", Some(Timeframe::H1), 10).await.unwrap();
        assert_eq!(signals.len(), 1);
        let restored = &signals[0];
        assert_eq!(restored.id, Some(id));
        assert_eq!(restored.direction, Direction::Long);
        assert_eq!(restored.tier, FusionTier::StrongIndicator);
        assert_eq!(restored.entry_price, 100.0);
        assert!(restored.breakdown.rsi.is_some());
    }

    #[tokio::test]
    async fn test_recent_signals_order_and_filter() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.insert_signal(&signal(1_000, Timeframe::H1)).await.unwrap();
        store.insert_signal(&signal(3_000, Timeframe::H1)).await.unwrap();
        store.insert_signal(&signal(2_000, Timeframe::M15)).await.unwrap();

        let all = store.recent_signals("BTCUSDT", None, 10).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].generated_at, 3_000);

        let hourly = store.recent_signals("BTCUSDT", Some(Timeframe::H1), 10).await.unwrap();
        assert_eq!(hourly.len(), 2);

        let limited = store.recent_signals("BTCUSDT", None, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_maintenance_deletes() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.upsert_candle(&candle(0)).await.unwrap();
        store.upsert_candle(&candle(10_000)).await.unwrap();

        assert_eq!(store.delete_candles_before(5_000).await.unwrap(), 1);
        assert_eq!(
            store.delete_candles_not_in(&[Timeframe::M15]).await.unwrap(),
            1
        );
    }
}
