// Wavehunt entrypoint
// Load + validate config, open the store, warm-start windows from history,
// then run the live stream until Ctrl-C or a fatal stream error

use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use wavehunt::core::{setup_logging, AppConfig, PipelineMetrics};
use wavehunt::ingest::{CandleAggregator, HistoryClient, KlineStreamClient};
use wavehunt::notify::{LogNotifier, SignalNotifier, WebhookNotifier};
use wavehunt::signals::SignalFuser;
use wavehunt::storage::{SignalStore, SqliteStore};

#[tokio::main]
async fn main() {
    let started_at = std::time::Instant::now();
    let config_path = std::env::args().nth(1);
    let config = match AppConfig::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            process::exit(1);
        }
    };
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {e}");
        process::exit(1);
    }

    setup_logging(
        Some(&config.monitoring.log_level),
        Some(config.monitoring.log_json),
    );

    let summary = config.summary();
    info!(
        symbols = summary.symbols,
        timeframes = summary.timeframes,
        streams = summary.streams,
        min_confidence = summary.min_confidence,
        database = %summary.database_path,
        webhook = summary.webhook_configured,
        "Starting wavehunt"
    );

    // Store unreachable at startup is fatal
    let store = match SqliteStore::open(
        &config.storage.database_path,
        config.storage.max_connections,
    )
    .await
    {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "Cannot open store");
            process::exit(1);
        }
    };

    let notifier: Arc<dyn SignalNotifier> = match &config.notifier.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(
            url.clone(),
            Duration::from_secs(config.notifier.send_timeout_secs),
        )),
        None => Arc::new(LogNotifier::new()),
    };

    let aggregator = Arc::new(CandleAggregator::new(config.signals.window_size));
    aggregator.set_store(store.clone());

    let fuser = Arc::new(SignalFuser::new(
        config.signals.clone(),
        store.clone(),
        notifier,
    ));
    aggregator.register(fuser.clone());

    let history = match HistoryClient::new(
        &config.binance.base_url,
        config.binance.rate_limit_per_minute,
        Duration::from_secs(config.binance.request_timeout_secs),
        config.binance.request_retries,
    ) {
        Ok(history) => history,
        Err(e) => {
            error!(error = %e, "Cannot build history client");
            process::exit(1);
        }
    };

    // Warm start every (symbol, timeframe) window; per-key failures leave
    // that window to fill from the live stream
    let keys = config.signals.stream_keys();
    info!(keys = keys.len(), candles_per_key = config.signals.startup_candles, "Warm-starting windows");
    for key in &keys {
        match history.fetch_history(key, config.signals.startup_candles).await {
            Ok(candles) if !candles.is_empty() => {
                if let Err(e) = store.bulk_upsert_candles(&candles).await {
                    warn!(key = %key, error = %e, "Warm-start persistence failed");
                }
                aggregator.preload(key.clone(), candles);
            }
            Ok(_) => warn!(key = %key, "No history returned"),
            Err(e) => error!(key = %key, error = %e, "History fetch failed"),
        }
    }

    let stream = Arc::new(KlineStreamClient::new(
        &config.binance.ws_url,
        keys,
        config.binance.max_streams_per_connection,
        Duration::from_secs(config.binance.reconnect_delay_secs),
        Duration::from_secs(config.binance.reconnect_cap_secs),
        aggregator.clone(),
    ));

    let mut fatal_rx = match stream.start() {
        Ok(rx) => rx,
        Err(e) => {
            error!(error = %e, "Cannot start stream client");
            process::exit(1);
        }
    };

    // Periodic metrics report
    {
        let stream = Arc::clone(&stream);
        let aggregator = Arc::clone(&aggregator);
        let fuser = Arc::clone(&fuser);
        let interval = config.monitoring.report_interval_secs.max(30);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                PipelineMetrics::from_parts(
                    Some(stream.stats()),
                    Some(aggregator.stats()),
                    Some(fuser.stats()),
                    started_at.elapsed(),
                )
                .print_report();
            }
        });
    }

    info!("Wavehunt is running; Ctrl-C to stop");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
        }
        Some(e) = fatal_rx.recv() => {
            error!(error = %e, "Fatal stream error, shutting down");
        }
    }

    // Cooperative shutdown: stop intake, drain in-flight close events,
    // then close the store
    stream.stop().await;
    aggregator.shutdown(Duration::from_secs(5)).await;
    store.close().await;
    info!("Shutdown complete");
}
