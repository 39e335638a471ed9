use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use cameradar_core::ids::ConnectionId;

use crate::codec;
use crate::pipeline::DispatchPipeline;
use crate::registry::ConnectionRegistry;

/// Per-connection tuning.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    pub send_queue_capacity: usize,
    pub drain_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            send_queue_capacity: 64,
            drain_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            client_timeout: Duration::from_secs(90),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closing,
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Client Close frame, heartbeat timeout, write failure, or server shutdown.
    CloseRequested,
    ReadFailed,
    Drained,
    DrainTimedOut,
}

impl ConnectionState {
    /// Events that do not apply to the current state leave it unchanged.
    pub fn next(self, event: LifecycleEvent) -> Self {
        match (self, event) {
            (Self::Open, LifecycleEvent::CloseRequested | LifecycleEvent::ReadFailed) => {
                Self::Closing
            }
            (Self::Closing, LifecycleEvent::Drained | LifecycleEvent::DrainTimedOut) => {
                Self::Closed
            }
            (state, _) => state,
        }
    }
}

/// Outcome of offering one frame to a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    QueueFull,
    NotOpen,
}

/// Server-side half of one client connection.
///
/// The connection task owns the only strong reference; everything else
/// reaches it through the registry's weak one.
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<String>,
    state: Mutex<ConnectionState>,
    dropped: AtomicU64,
    last_seen: Mutex<Instant>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, capacity: usize) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Arc::new(Self {
            id,
            tx,
            state: Mutex::new(ConnectionState::Open),
            dropped: AtomicU64::new(0),
            last_seen: Mutex::new(Instant::now()),
        });
        (handle, rx)
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Apply a lifecycle event and return the resulting state.
    pub fn transition(&self, event: LifecycleEvent) -> ConnectionState {
        let mut state = self.state.lock();
        let next = state.next(event);
        if next != *state {
            tracing::debug!(connection_id = %self.id, from = ?*state, to = ?next, ?event, "connection state changed");
            *state = next;
        }
        next
    }

    /// Offer a frame without waiting.
    ///
    /// The state lock is held across the send so no frame is queued once the
    /// connection has started closing.
    pub fn enqueue(&self, frame: String) -> Delivery {
        let state = self.state.lock();
        if *state != ConnectionState::Open {
            return Delivery::NotOpen;
        }
        match self.tx.try_send(frame) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(frame)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    connection_id = %self.id,
                    msg_len = frame.len(),
                    dropped,
                    "send queue full, dropping message"
                );
                Delivery::QueueFull
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::NotOpen,
        }
    }

    /// Frames refused because the send queue was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn mark_alive(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }
}

/// What a connection task needs besides its socket.
#[derive(Clone)]
pub struct ConnectionContext {
    pub registry: Arc<ConnectionRegistry>,
    pub pipeline: DispatchPipeline,
    pub default_ports: Arc<[u16]>,
    pub config: ConnectionConfig,
    pub shutdown: CancellationToken,
}

/// Run one connection to completion.
///
/// The receive loop runs here; the send loop is spawned. Either side, or
/// server shutdown, can end the connection through the shared token.
pub async fn serve_connection(
    socket: WebSocket,
    handle: Arc<ConnectionHandle>,
    rx: mpsc::Receiver<String>,
    ctx: ConnectionContext,
) {
    let (ws_tx, mut ws_rx) = socket.split();
    let token = ctx.shutdown.child_token();

    let writer = tokio::spawn(send_loop(
        ws_tx,
        rx,
        Arc::clone(&handle),
        ctx.config.clone(),
        token.clone(),
    ));

    loop {
        tokio::select! {
            () = token.cancelled() => {
                let _ = handle.transition(LifecycleEvent::CloseRequested);
                break;
            }
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        handle.mark_alive();
                        on_frame(text.as_str().as_bytes(), &handle, &ctx);
                    }
                    Some(Ok(WsMessage::Binary(bytes))) => {
                        handle.mark_alive();
                        on_frame(&bytes, &handle, &ctx);
                    }
                    // axum answers pings itself
                    Some(Ok(WsMessage::Pong(_) | WsMessage::Ping(_))) => handle.mark_alive(),
                    Some(Ok(WsMessage::Close(_))) | None => {
                        let _ = handle.transition(LifecycleEvent::CloseRequested);
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::debug!(connection_id = %handle.id(), error = %e, "read failed");
                        let _ = handle.transition(LifecycleEvent::ReadFailed);
                        break;
                    }
                }
            }
        }
    }

    ctx.registry.unregister(handle.id());
    token.cancel();
    if let Err(e) = writer.await {
        tracing::warn!(connection_id = %handle.id(), error = %e, "send loop failed");
        let _ = handle.transition(LifecycleEvent::DrainTimedOut);
    }
}

fn on_frame(bytes: &[u8], handle: &ConnectionHandle, ctx: &ConnectionContext) {
    let reply = match codec::decode(bytes, handle.id().clone(), &ctx.default_ports) {
        Ok(request) => {
            tracing::debug!(
                connection_id = %handle.id(),
                target = %request.target,
                mode = request.mode.as_str(),
                "scan request received"
            );
            match ctx.pipeline.submit(request) {
                Ok(()) => return,
                Err(e) => codec::encode_error(&e.to_string()),
            }
        }
        Err(e) => {
            tracing::warn!(connection_id = %handle.id(), error = %e, "rejected client message");
            codec::encode_error(&e.to_string())
        }
    };
    let _ = handle.enqueue(reply);
}

async fn send_loop(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut rx: mpsc::Receiver<String>,
    handle: Arc<ConnectionHandle>,
    config: ConnectionConfig,
    token: CancellationToken,
) {
    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    heartbeat.tick().await; // consume first immediate tick
    let mut writable = true;

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            frame = rx.recv() => {
                let Some(text) = frame else { break };
                let message = WsMessage::Text(text.into());
                if let Err(e) = write_frame(&mut sink, message, config.client_timeout).await {
                    tracing::debug!(connection_id = %handle.id(), error = %e, "write failed");
                    writable = false;
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if handle.idle_for() >= config.client_timeout {
                    tracing::info!(connection_id = %handle.id(), "client timed out");
                    break;
                }
                let ping = WsMessage::Ping(Default::default());
                if let Err(e) = write_frame(&mut sink, ping, config.client_timeout).await {
                    tracing::debug!(connection_id = %handle.id(), error = %e, "ping failed");
                    writable = false;
                    break;
                }
                tracing::trace!(connection_id = %handle.id(), "sent ping");
            }
        }
    }

    // No frame can be queued past this point.
    let _ = handle.transition(LifecycleEvent::CloseRequested);
    token.cancel();

    let event = if writable {
        drain(&mut sink, &mut rx, config.drain_timeout).await
    } else {
        LifecycleEvent::DrainTimedOut
    };
    rx.close();
    let _ = handle.transition(event);

    if event == LifecycleEvent::Drained {
        let _ = write_frame(&mut sink, WsMessage::Close(None), config.drain_timeout).await;
    }
    let _ = tokio::time::timeout(config.drain_timeout, sink.close()).await;
}

/// Why a socket write did not complete.
#[derive(Debug, thiserror::Error)]
enum WriteError {
    #[error(transparent)]
    Socket(#[from] axum::Error),
    #[error("client stopped reading for {0:?}")]
    Stalled(Duration),
}

/// One socket write, abandoned once the client has not taken it for `limit`.
async fn write_frame(
    sink: &mut SplitSink<WebSocket, WsMessage>,
    message: WsMessage,
    limit: Duration,
) -> Result<(), WriteError> {
    match tokio::time::timeout(limit, sink.send(message)).await {
        Ok(result) => result.map_err(WriteError::from),
        Err(_) => Err(WriteError::Stalled(limit)),
    }
}

/// Flush what is already queued, giving up after `timeout`.
async fn drain(
    sink: &mut SplitSink<WebSocket, WsMessage>,
    rx: &mut mpsc::Receiver<String>,
    timeout: Duration,
) -> LifecycleEvent {
    let flush = async {
        while let Ok(text) = rx.try_recv() {
            sink.send(WsMessage::Text(text.into())).await?;
        }
        Ok::<(), axum::Error>(())
    };
    match tokio::time::timeout(timeout, flush).await {
        Ok(Ok(())) => LifecycleEvent::Drained,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "write failed while draining, discarding queue");
            LifecycleEvent::DrainTimedOut
        }
        Err(_) => {
            tracing::debug!("drain timed out, discarding queue");
            LifecycleEvent::DrainTimedOut
        }
    }
}
