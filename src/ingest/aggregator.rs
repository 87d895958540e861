// Candle Aggregator - rolling window per (symbol, timeframe)
// Detects candle-close transitions and dispatches close events to per-key
// workers: same-key callbacks run serialized in open_time order, distinct
// keys run concurrently

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::types::{Candle, StreamKey};
use crate::ingest::parser::KlineUpdate;
use crate::storage::SignalStore;

/// Callback invoked once per committed candle. The window snapshot is the
/// full rolling window at commit time, oldest first, committed candle last.
pub trait CloseHandler: Send + Sync {
    fn on_close(
        &self,
        key: StreamKey,
        candle: Candle,
        window: Arc<Vec<Candle>>,
    ) -> BoxFuture<'_, ()>;
}

struct WindowState {
    candles: VecDeque<Candle>,
    /// open_time of the last committed candle; guards exactly-once commits.
    last_committed: Option<i64>,
}

struct CloseEvent {
    key: StreamKey,
    candle: Candle,
    window: Arc<Vec<Candle>>,
}

/// Snapshot of one key's window: length and tail open_time.
#[derive(Debug, Clone)]
pub struct WindowStats {
    pub key: StreamKey,
    pub len: usize,
    pub tail_open_time: i64,
}

#[derive(Debug, Clone)]
pub struct AggregatorStats {
    pub keys: usize,
    pub candles_in_memory: usize,
    pub commits: u64,
    pub stale_dropped: u64,
    pub intermediate_updates: u64,
    /// Per-key window snapshots, sorted by symbol then timeframe.
    pub windows: Vec<WindowStats>,
}

/// Owns all windows. One write path: `process_update`. Committed candles are
/// handed to the store's idempotent upsert and then to registered handlers.
pub struct CandleAggregator {
    window_size: usize,

    windows: Mutex<HashMap<StreamKey, WindowState>>,
    senders: Mutex<HashMap<StreamKey, mpsc::Sender<CloseEvent>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,

    handlers: Arc<parking_lot::RwLock<Vec<Arc<dyn CloseHandler>>>>,
    store: Arc<parking_lot::RwLock<Option<Arc<dyn SignalStore>>>>,

    accepting: AtomicBool,
    commits: AtomicU64,
    stale_dropped: AtomicU64,
    intermediate_updates: AtomicU64,
}

impl CandleAggregator {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size,
            windows: Mutex::new(HashMap::new()),
            senders: Mutex::new(HashMap::new()),
            workers: Mutex::new(Vec::new()),
            handlers: Arc::new(parking_lot::RwLock::new(Vec::new())),
            store: Arc::new(parking_lot::RwLock::new(None)),
            accepting: AtomicBool::new(true),
            commits: AtomicU64::new(0),
            stale_dropped: AtomicU64::new(0),
            intermediate_updates: AtomicU64::new(0),
        }
    }

    /// Attach the persistence hook for committed candles.
    pub fn set_store(&self, store: Arc<dyn SignalStore>) {
        *self.store.write() = Some(store);
    }

    /// Register a close callback.
    pub fn register(&self, handler: Arc<dyn CloseHandler>) {
        self.handlers.write().push(handler);
        info!(handlers = self.handlers.read().len(), "Close handler registered");
    }

    /// Seed a window with warm-start history (closed candles, oldest first).
    /// The tail is left uncommitted so the live stream can finalize it.
    pub fn preload(&self, key: StreamKey, mut candles: Vec<Candle>) {
        candles.sort_by_key(|c| c.open_time);
        candles.dedup_by_key(|c| c.open_time);
        if candles.len() > self.window_size {
            candles.drain(..candles.len() - self.window_size);
        }

        let count = candles.len();
        let state = WindowState {
            candles: VecDeque::from(candles),
            last_committed: None,
        };
        self.windows.lock().insert(key.clone(), state);
        info!(key = %key, candles = count, "Window preloaded");
    }

    /// Process one live kline update. Intermediate updates overwrite the
    /// in-progress tail without firing callbacks; a final flag flip or a
    /// newer open_time commits exactly one closed candle per open_time.
    pub async fn process_update(&self, update: KlineUpdate) {
        if !self.accepting.load(Ordering::SeqCst) {
            return;
        }

        let key = update.candle.key();
        let mut committed: Vec<(Candle, Arc<Vec<Candle>>)> = Vec::new();

        {
            let mut windows = self.windows.lock();
            let state = windows.entry(key.clone()).or_insert_with(|| WindowState {
                candles: VecDeque::new(),
                last_committed: None,
            });

            let tail_time = state.candles.back().map(|c| c.open_time);
            match tail_time {
                None => {
                    state.candles.push_back(update.candle.clone());
                    if update.is_final {
                        Self::commit(state, &mut committed);
                    }
                }
                Some(tail) if update.candle.open_time < tail => {
                    self.stale_dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        key = %key,
                        open_time = update.candle.open_time,
                        tail,
                        "Stale update dropped"
                    );
                }
                Some(tail) if update.candle.open_time == tail => {
                    *state.candles.back_mut().unwrap() = update.candle.clone();
                    if update.is_final && state.last_committed != Some(tail) {
                        Self::commit(state, &mut committed);
                    } else {
                        self.intermediate_updates.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Some(tail) => {
                    // Newer open_time: the previous bar closed upstream even
                    // if its final update was never seen
                    if state.last_committed != Some(tail) {
                        Self::commit(state, &mut committed);
                    }
                    state.candles.push_back(update.candle.clone());
                    if state.candles.len() > self.window_size {
                        state.candles.pop_front();
                    }
                    if update.is_final {
                        Self::commit(state, &mut committed);
                    }
                }
            }
        }

        for (candle, window) in committed {
            self.commits.fetch_add(1, Ordering::Relaxed);
            self.dispatch(key.clone(), candle, window).await;
        }
    }

    /// Mark the window tail committed and capture the snapshot. Caller holds
    /// the windows lock.
    fn commit(state: &mut WindowState, committed: &mut Vec<(Candle, Arc<Vec<Candle>>)>) {
        let tail = state.candles.back().cloned().expect("commit on empty window");
        state.last_committed = Some(tail.open_time);
        let snapshot: Arc<Vec<Candle>> = Arc::new(state.candles.iter().cloned().collect());
        committed.push((tail, snapshot));
    }

    async fn dispatch(&self, key: StreamKey, candle: Candle, window: Arc<Vec<Candle>>) {
        let sender = self.worker_sender(&key);
        if sender.send(CloseEvent { key, candle, window }).await.is_err() {
            warn!("Close worker channel closed, event dropped");
        }
    }

    /// Get (or lazily spawn) the per-key close worker.
    fn worker_sender(&self, key: &StreamKey) -> mpsc::Sender<CloseEvent> {
        if let Some(sender) = self.senders.lock().get(key) {
            return sender.clone();
        }

        let (tx, mut rx) = mpsc::channel::<CloseEvent>(64);
        let handlers = Arc::clone(&self.handlers);
        let store = Arc::clone(&self.store);

        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let store_ref = store.read().clone();
                if let Some(store) = store_ref {
                    persist_with_retry(store.as_ref(), &event.candle).await;
                }

                let snapshot: Vec<Arc<dyn CloseHandler>> = handlers.read().clone();
                for handler in snapshot {
                    handler
                        .on_close(event.key.clone(), event.candle.clone(), Arc::clone(&event.window))
                        .await;
                }
            }
        });

        self.workers.lock().push(handle);
        self.senders.lock().insert(key.clone(), tx.clone());
        tx
    }

    /// Read-only copy of one window, oldest first.
    pub fn window(&self, key: &StreamKey) -> Option<Vec<Candle>> {
        self.windows
            .lock()
            .get(key)
            .map(|state| state.candles.iter().cloned().collect())
    }

    pub fn stats(&self) -> AggregatorStats {
        let windows = self.windows.lock();
        let mut per_key: Vec<WindowStats> = windows
            .iter()
            .filter_map(|(key, state)| {
                state.candles.back().map(|tail| WindowStats {
                    key: key.clone(),
                    len: state.candles.len(),
                    tail_open_time: tail.open_time,
                })
            })
            .collect();
        per_key.sort_by(|a, b| {
            (&a.key.symbol, a.key.timeframe).cmp(&(&b.key.symbol, b.key.timeframe))
        });

        AggregatorStats {
            keys: windows.len(),
            candles_in_memory: windows.values().map(|w| w.candles.len()).sum(),
            commits: self.commits.load(Ordering::Relaxed),
            stale_dropped: self.stale_dropped.load(Ordering::Relaxed),
            intermediate_updates: self.intermediate_updates.load(Ordering::Relaxed),
            windows: per_key,
        }
    }

    /// Cooperative shutdown: stop accepting updates, then drain in-flight
    /// close events with a bounded wait.
    pub async fn shutdown(&self, drain_timeout: Duration) {
        self.accepting.store(false, Ordering::SeqCst);
        self.senders.lock().clear();

        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if tokio::time::timeout(drain_timeout, handle).await.is_err() {
                warn!("Close worker did not drain within {:?}", drain_timeout);
            }
        }
        info!("Aggregator shut down");
    }
}

/// Store writes retry with capped exponential backoff; duplicates are
/// handled as success inside the store.
async fn persist_with_retry(store: &dyn SignalStore, candle: &Candle) {
    let mut delay = Duration::from_millis(100);
    for attempt in 0..3 {
        match store.upsert_candle(candle).await {
            Ok(()) => return,
            Err(e) if attempt < 2 => {
                warn!(error = %e, attempt, "Candle upsert failed, retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_secs(5));
            }
            Err(e) => {
                warn!(error = %e, "Candle upsert failed, giving up");
            }
        }
    }
}
