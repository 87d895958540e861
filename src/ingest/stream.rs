// Kline Stream Client - persistent WebSocket subscription to kline streams
// Reconnects with exponential backoff; transient errors retry forever, a
// rejected subscription is fatal and reported to the caller

use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as WsError;
use tracing::{debug, info, warn};

use crate::core::types::{ConnectionStatus, StreamKey};
use crate::ingest::aggregator::CandleAggregator;
use crate::ingest::parser::MessageParser;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("subscription rejected with HTTP {0}")]
    SubscriptionRejected(u16),
    #[error("no streams configured")]
    NoStreams,
}

#[derive(Debug, Clone)]
pub struct StreamClientStats {
    pub streams: usize,
    pub connections: usize,
    pub messages_received: u64,
    pub klines_received: u64,
    pub parse_errors: u64,
    pub connection_errors: u64,
    pub reconnects: u64,
    pub status: ConnectionStatus,
}

/// Subscribes to kline streams over one or more combined-stream connections
/// (the exchange caps streams per connection) and forwards parsed updates to
/// the aggregator.
pub struct KlineStreamClient {
    ws_url: String,
    keys: Vec<StreamKey>,
    max_streams_per_connection: usize,
    reconnect_delay: Duration,
    reconnect_cap: Duration,
    aggregator: Arc<CandleAggregator>,

    status: Arc<RwLock<ConnectionStatus>>,
    messages_received: Arc<AtomicU64>,
    klines_received: Arc<AtomicU64>,
    parse_errors: Arc<AtomicU64>,
    connection_errors: Arc<AtomicU64>,
    reconnects: Arc<AtomicU64>,

    shutdown_tx: watch::Sender<bool>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl KlineStreamClient {
    pub fn new(
        ws_url: &str,
        keys: Vec<StreamKey>,
        max_streams_per_connection: usize,
        reconnect_delay: Duration,
        reconnect_cap: Duration,
        aggregator: Arc<CandleAggregator>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            ws_url: ws_url.trim_end_matches('/').to_string(),
            keys,
            max_streams_per_connection: max_streams_per_connection.clamp(1, 200),
            reconnect_delay,
            reconnect_cap,
            aggregator,
            status: Arc::new(RwLock::new(ConnectionStatus::Disconnected)),
            messages_received: Arc::new(AtomicU64::new(0)),
            klines_received: Arc::new(AtomicU64::new(0)),
            parse_errors: Arc::new(AtomicU64::new(0)),
            connection_errors: Arc::new(AtomicU64::new(0)),
            reconnects: Arc::new(AtomicU64::new(0)),
            shutdown_tx,
            tasks: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Combined-stream URLs, one per connection chunk.
    pub fn connection_urls(&self) -> Vec<String> {
        self.keys
            .chunks(self.max_streams_per_connection)
            .map(|chunk| {
                let streams: Vec<String> = chunk.iter().map(|k| k.stream_name()).collect();
                format!("{}/stream?streams={}", self.ws_url, streams.join("/"))
            })
            .collect()
    }

    /// Start all connections. The returned receiver yields fatal errors
    /// (rejected subscription shape) so the process can terminate.
    pub fn start(&self) -> Result<mpsc::Receiver<StreamError>, StreamError> {
        if self.keys.is_empty() {
            return Err(StreamError::NoStreams);
        }

        let (fatal_tx, fatal_rx) = mpsc::channel(1);
        let urls = self.connection_urls();
        info!(
            streams = self.keys.len(),
            connections = urls.len(),
            "Starting kline stream client"
        );

        for url in urls {
            let task = ConnectionTask {
                url,
                reconnect_delay: self.reconnect_delay,
                reconnect_cap: self.reconnect_cap,
                aggregator: Arc::clone(&self.aggregator),
                status: Arc::clone(&self.status),
                messages_received: Arc::clone(&self.messages_received),
                klines_received: Arc::clone(&self.klines_received),
                parse_errors: Arc::clone(&self.parse_errors),
                connection_errors: Arc::clone(&self.connection_errors),
                reconnects: Arc::clone(&self.reconnects),
                shutdown_rx: self.shutdown_tx.subscribe(),
                fatal_tx: fatal_tx.clone(),
            };
            self.tasks.lock().push(tokio::spawn(task.run()));
        }

        Ok(fatal_rx)
    }

    /// Stop all connections and wait for the tasks to exit.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        *self.status.write() = ConnectionStatus::Disconnected;
        info!("Kline stream client stopped");
    }

    pub fn stats(&self) -> StreamClientStats {
        StreamClientStats {
            streams: self.keys.len(),
            connections: self.keys.len().div_ceil(self.max_streams_per_connection),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            klines_received: self.klines_received.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            status: *self.status.read(),
        }
    }
}

/// One supervised connection: connect, read, forward; reconnect on failure
/// with exponential backoff reset by the first successful message.
struct ConnectionTask {
    url: String,
    reconnect_delay: Duration,
    reconnect_cap: Duration,
    aggregator: Arc<CandleAggregator>,
    status: Arc<RwLock<ConnectionStatus>>,
    messages_received: Arc<AtomicU64>,
    klines_received: Arc<AtomicU64>,
    parse_errors: Arc<AtomicU64>,
    connection_errors: Arc<AtomicU64>,
    reconnects: Arc<AtomicU64>,
    shutdown_rx: watch::Receiver<bool>,
    fatal_tx: mpsc::Sender<StreamError>,
}

impl ConnectionTask {
    async fn run(self) {
        let mut parser = MessageParser::new();
        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut delay = self.reconnect_delay;
        let mut first_connect = true;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            *self.status.write() = if first_connect {
                ConnectionStatus::Connecting
            } else {
                ConnectionStatus::Reconnecting
            };

            match connect_async(&self.url).await {
                Ok((ws, _response)) => {
                    *self.status.write() = ConnectionStatus::Connected;
                    info!(url = %self.url, "Stream connected");
                    if !first_connect {
                        self.reconnects.fetch_add(1, Ordering::Relaxed);
                    }
                    first_connect = false;

                    delay = self
                        .read_until_closed(ws, &mut parser, &mut shutdown_rx, delay)
                        .await;
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                Err(e) => {
                    self.connection_errors.fetch_add(1, Ordering::Relaxed);
                    if let Some(status) = fatal_http_status(&e) {
                        *self.status.write() = ConnectionStatus::Failed;
                        warn!(status, "Stream subscription rejected, giving up");
                        let _ = self
                            .fatal_tx
                            .send(StreamError::SubscriptionRejected(status))
                            .await;
                        return;
                    }
                    warn!(error = %e, "Stream connect failed");
                }
            }

            // Exponential backoff before the next attempt
            debug!(delay_secs = delay.as_secs(), "Reconnecting after backoff");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.changed() => break,
            }
            delay = (delay * 2).min(self.reconnect_cap);
        }

        *self.status.write() = ConnectionStatus::Disconnected;
    }

    /// Read loop for one live connection. Returns the backoff delay to use
    /// for the next reconnect (reset once a message was received).
    async fn read_until_closed(
        &self,
        ws: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        parser: &mut MessageParser,
        shutdown_rx: &mut watch::Receiver<bool>,
        mut delay: Duration,
    ) -> Duration {
        let (mut write, mut read) = ws.split();
        let mut had_message = false;

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    return delay;
                }
                message = read.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        self.messages_received.fetch_add(1, Ordering::Relaxed);
                        if !had_message {
                            had_message = true;
                            delay = self.reconnect_delay;
                        }
                        match parser.parse(&text) {
                            Ok(Some(update)) => {
                                self.klines_received.fetch_add(1, Ordering::Relaxed);
                                self.aggregator.process_update(update).await;
                            }
                            Ok(None) => {}
                            Err(e) => {
                                self.parse_errors.fetch_add(1, Ordering::Relaxed);
                                warn!(error = %e, "Malformed stream message dropped");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = write.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        warn!(?frame, "Stream closed by server");
                        return delay;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        self.connection_errors.fetch_add(1, Ordering::Relaxed);
                        warn!(error = %e, "Stream read error");
                        return delay;
                    }
                    None => {
                        warn!("Stream ended");
                        return delay;
                    }
                }
            }
        }
    }
}

/// A client-error HTTP response during the handshake means the subscription
/// shape itself is wrong; retrying cannot help.
fn fatal_http_status(error: &WsError) -> Option<u16> {
    match error {
        WsError::Http(response) if response.status().is_client_error() => {
            Some(response.status().as_u16())
        }
        _ => None,
    }
}
