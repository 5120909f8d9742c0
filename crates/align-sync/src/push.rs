//! Auto-reconnecting push channel.
//!
//! The channel keeps at most one live connection. When it drops or fails to
//! open, a single reconnect is scheduled after a constant delay, forever, until
//! [`PushChannel::disconnect`] is called. Subscribers only ever see the most
//! recent event; anything missed while disconnected is reconciled by polling.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::event::PushEvent;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Text frames of one connection. The stream ends when the peer closes.
pub type FrameStream = BoxStream<'static, SyncResult<String>>;

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> SyncResult<FrameStream>;
}

pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> SyncResult<FrameStream> {
        let (stream, _) = connect_async(self.url.as_str()).await?;
        let frames = stream.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(bytes)) => String::from_utf8(bytes).ok().map(Ok),
                Ok(_) => None,
                Err(err) => Some(Err(SyncError::WebSocket(err))),
            }
        });
        Ok(frames.boxed())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelStatus {
    Idle,
    Connecting,
    Open,
    /// Waiting out the reconnect delay.
    Waiting,
    Closed,
}

pub struct PushChannel {
    connector: Arc<dyn Connector>,
    reconnect_delay: Duration,
    events: Arc<watch::Sender<Option<PushEvent>>>,
    status: Arc<watch::Sender<ChannelStatus>>,
    active: Mutex<Option<CancellationToken>>,
}

impl PushChannel {
    pub fn new(connector: Arc<dyn Connector>, reconnect_delay: Duration) -> Self {
        let (events, _) = watch::channel(None);
        let (status, _) = watch::channel(ChannelStatus::Idle);
        Self {
            connector,
            reconnect_delay,
            events: Arc::new(events),
            status: Arc::new(status),
            active: Mutex::new(None),
        }
    }

    pub fn websocket(url: impl Into<String>, reconnect_delay: Duration) -> Self {
        Self::new(Arc::new(WsConnector::new(url)), reconnect_delay)
    }

    /// Starts the connection loop. Does nothing while one is already running.
    pub fn connect(&self) -> Option<JoinHandle<()>> {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|token| !token.is_cancelled()) {
            debug!(target: "align_sync::push", "push channel already active");
            return None;
        }
        let token = CancellationToken::new();
        *active = Some(token.clone());
        let worker = ChannelWorker {
            connector: Arc::clone(&self.connector),
            reconnect_delay: self.reconnect_delay,
            events: Arc::clone(&self.events),
            status: Arc::clone(&self.status),
            token,
        };
        Some(tokio::spawn(worker.run()))
    }

    /// Cancels any pending reconnect and closes the socket.
    pub fn disconnect(&self) {
        if let Some(token) = self.active.lock().take() {
            token.cancel();
        }
        self.status.send_replace(ChannelStatus::Closed);
    }

    pub fn latest(&self) -> Option<PushEvent> {
        self.events.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<PushEvent>> {
        self.events.subscribe()
    }

    pub fn status(&self) -> watch::Receiver<ChannelStatus> {
        self.status.subscribe()
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        if let Some(token) = self.active.get_mut().take() {
            token.cancel();
        }
    }
}

struct ChannelWorker {
    connector: Arc<dyn Connector>,
    reconnect_delay: Duration,
    events: Arc<watch::Sender<Option<PushEvent>>>,
    status: Arc<watch::Sender<ChannelStatus>>,
    token: CancellationToken,
}

enum Step<T> {
    Cancelled,
    Ready(T),
}

impl ChannelWorker {
    async fn run(self) {
        let mut attempt: u64 = 0;
        let mut failed_in_row: u32 = 0;
        loop {
            attempt += 1;
            self.status.send_replace(ChannelStatus::Connecting);
            let connected = match self.until_cancelled(self.connector.connect()).await {
                Step::Cancelled => break,
                Step::Ready(result) => result,
            };

            match connected {
                Ok(frames) => {
                    failed_in_row = 0;
                    info!(target: "align_sync::push", attempt, "push channel connected");
                    self.status.send_replace(ChannelStatus::Open);
                    if !self.pump(frames).await {
                        break;
                    }
                }
                // Repeated transport failures while the backend is down only go to debug.
                Err(err) if err.is_transient() && failed_in_row > 0 => {
                    failed_in_row += 1;
                    debug!(target: "align_sync::push", attempt, failed_in_row, error = %err, "push channel still unreachable");
                }
                Err(err) => {
                    failed_in_row += 1;
                    warn!(target: "align_sync::push", attempt, error = %err, "push channel connect failed");
                }
            }

            self.status.send_replace(ChannelStatus::Waiting);
            debug!(
                target: "align_sync::push",
                delay_ms = self.reconnect_delay.as_millis() as u64,
                "scheduling reconnect"
            );
            if let Step::Cancelled = self.until_cancelled(sleep(self.reconnect_delay)).await {
                break;
            }
        }
        self.status.send_replace(ChannelStatus::Closed);
        debug!(target: "align_sync::push", "push channel stopped");
    }

    /// Reads frames until the connection ends. Returns false when cancelled.
    async fn pump(&self, mut frames: FrameStream) -> bool {
        loop {
            let frame = match self.until_cancelled(frames.next()).await {
                Step::Cancelled => return false,
                Step::Ready(frame) => frame,
            };
            match frame {
                Some(Ok(text)) => self.publish(&text).await,
                Some(Err(err)) => {
                    warn!(target: "align_sync::push", error = %err, "push channel dropped");
                    return true;
                }
                None => {
                    info!(target: "align_sync::push", "push channel closed by peer");
                    return true;
                }
            }
        }
    }

    async fn publish(&self, text: &str) {
        match PushEvent::decode(text) {
            Ok(event) => {
                self.events.send_replace(Some(event));
                // Let subscribers observe this event before the next frame replaces it.
                tokio::task::yield_now().await;
            }
            Err(err) => {
                warn!(
                    target: "align_sync::push",
                    error = %err,
                    payload_len = text.len(),
                    "dropping malformed push payload"
                );
            }
        }
    }

    async fn until_cancelled<F: std::future::Future>(&self, fut: F) -> Step<F::Output> {
        tokio::select! {
            _ = self.token.cancelled() => Step::Cancelled,
            output = fut => Step::Ready(output),
        }
    }
}
