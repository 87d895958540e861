// In-Memory Store - map-backed SignalStore
// Used by tests and database-less runs; mirrors the SQLite adapter's contract

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::core::types::{Candle, Signal, Timeframe};
use crate::storage::{SignalStore, StorageError};

#[derive(Default)]
struct MemoryState {
    candles: HashMap<(String, Timeframe, i64), Candle>,
    signals: Vec<Signal>,
    next_signal_id: i64,
}

/// Map-backed store with the same dedup semantics as the SQLite adapter.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn candle_count(&self) -> usize {
        self.state.lock().candles.len()
    }

    pub fn signal_count(&self) -> usize {
        self.state.lock().signals.len()
    }
}

impl SignalStore for MemoryStore {
    fn upsert_candle<'a>(&'a self, candle: &'a Candle) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            let key = (candle.symbol.clone(), candle.timeframe, candle.open_time);
            self.state.lock().candles.entry(key).or_insert_with(|| candle.clone());
            Ok(())
        })
    }

    fn bulk_upsert_candles<'a>(
        &'a self,
        candles: &'a [Candle],
    ) -> BoxFuture<'a, Result<u64, StorageError>> {
        Box::pin(async move {
            let mut inserted = 0;
            let mut state = self.state.lock();
            for candle in candles {
                let key = (candle.symbol.clone(), candle.timeframe, candle.open_time);
                if !state.candles.contains_key(&key) {
                    state.candles.insert(key, candle.clone());
                    inserted += 1;
                }
            }
            Ok(inserted)
        })
    }

    fn insert_signal<'a>(&'a self, signal: &'a Signal) -> BoxFuture<'a, Result<i64, StorageError>> {
        Box::pin(async move {
            let mut state = self.state.lock();
            state.next_signal_id += 1;
            let id = state.next_signal_id;
            let mut stored = signal.clone();
            stored.id = Some(id);
            state.signals.push(stored);
            Ok(id)
        })
    }

    fn recent_signals<'a>(
        &'a self,
        symbol: &'a str,
        timeframe: Option<Timeframe>,
        limit: u32,
    ) -> BoxFuture<'a, Result<Vec<Signal>, StorageError>> {
        Box::pin(async move {
            let state = self.state.lock();
            let mut matching: Vec<Signal> = state
                .signals
                .iter()
                .filter(|s| s.symbol == symbol)
                .filter(|s| timeframe.map_or(true, |tf| s.timeframe == tf))
                .cloned()
                .collect();
            matching.sort_by(|a, b| b.generated_at.cmp(&a.generated_at));
            matching.truncate(limit as usize);
            Ok(matching)
        })
    }

    fn delete_candles_before(&self, cutoff_ms: i64) -> BoxFuture<'_, Result<u64, StorageError>> {
        Box::pin(async move {
            let mut state = self.state.lock();
            let before = state.candles.len();
            state.candles.retain(|&(_, _, open_time), _| open_time >= cutoff_ms);
            Ok((before - state.candles.len()) as u64)
        })
    }

    fn delete_candles_not_in<'a>(
        &'a self,
        timeframes: &'a [Timeframe],
    ) -> BoxFuture<'a, Result<u64, StorageError>> {
        Box::pin(async move {
            let mut state = self.state.lock();
            let before = state.candles.len();
            state.candles.retain(|&(_, tf, _), _| timeframes.contains(&tf));
            Ok((before - state.candles.len()) as u64)
        })
    }
}
