//! WebSocket transport for the live inference session
//!
//! One bidirectional channel per call. Outbound traffic is the setup message
//! followed by realtime media chunks; inbound traffic is structured server
//! messages carrying synthesized audio and textual status. Events are
//! delivered FIFO over a single channel; the transport never retries — a
//! fault ends the call and retry is a fresh connect.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::codec::WireChunk;
use crate::{Error, Result};

/// Capacity of the bounded outbound queue; frames beyond it are dropped
/// rather than backlogged under network stall
pub const OUTBOUND_QUEUE: usize = 32;

/// Capacity of the inbound event channel
const EVENT_QUEUE: usize = 64;

/// Connection state machine: `Idle → Opening → Open → {Closed | Faulted}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransportState {
    /// Not yet connecting
    Idle = 0,
    /// Connection handshake in flight
    Opening = 1,
    /// Channel open; media may be sent
    Open = 2,
    /// Cleanly closed (locally or by the remote)
    Closed = 3,
    /// Connection-level failure
    Faulted = 4,
}

impl TransportState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Opening,
            2 => Self::Open,
            3 => Self::Closed,
            4 => Self::Faulted,
            _ => Self::Idle,
        }
    }
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Opening => "opening",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// Inbound transport event, delivered in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Channel reached `Open`; capture may begin forwarding
    Opened,
    /// Synthesized audio chunk from the remote session
    Audio(WireChunk),
    /// Textual status update from the remote session
    Status(String),
    /// Channel closed cleanly
    Closed,
    /// Connection-level failure with a message
    Faulted(String),
}

/// Session parameters sent as the first message after connecting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSetup {
    /// Model identifier for the live session
    pub model: String,

    /// Synthesized voice name
    pub voice: String,

    /// System instruction applied to the session
    pub system_instruction: String,
}

/// Outbound client message envelope
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum ClientMessage {
    Setup(SessionSetup),
    RealtimeInput(RealtimeInput),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput {
    media: WireChunk,
}

/// Inbound server message envelope; unknown fields are ignored
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    #[serde(default)]
    server_content: Option<ServerContent>,
    #[serde(default)]
    error: Option<ServerError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    #[serde(default)]
    model_turn: Option<ModelTurn>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    inline_data: Option<WireChunk>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServerError {
    message: String,
}

/// Bidirectional channel to the remote live session
pub struct SessionTransport {
    state: Arc<AtomicU8>,
    out_tx: mpsc::Sender<WireChunk>,
    close_tx: Option<oneshot::Sender<()>>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl SessionTransport {
    /// Connect to the live session endpoint and send the setup message
    ///
    /// On success the returned receiver yields [`TransportEvent::Opened`]
    /// first, then inbound events in arrival order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the connection or the setup message
    /// fails; no transport is constructed in that case.
    pub async fn connect(
        url: &str,
        setup: SessionSetup,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let state = Arc::new(AtomicU8::new(TransportState::Opening as u8));

        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| Error::Transport(format!("connect failed: {e}")))?;

        let (mut sink, mut stream) = ws.split();

        let setup_json = serde_json::to_string(&ClientMessage::Setup(setup))?;
        sink.send(Message::Text(setup_json.into()))
            .await
            .map_err(|e| Error::Transport(format!("setup send failed: {e}")))?;

        state.store(TransportState::Open as u8, Ordering::SeqCst);
        tracing::debug!(url, "live session open");

        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);
        let (out_tx, mut out_rx) = mpsc::channel::<WireChunk>(OUTBOUND_QUEUE);
        let (close_tx, mut close_rx) = oneshot::channel::<()>();

        // Opened is queued before the reader can deliver anything, so
        // consumers always observe it first.
        let _ = event_tx.try_send(TransportEvent::Opened);

        // The close signal bypasses the media queue: a graceful close frame
        // goes out even when the queue is saturated with pending media.
        let writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut close_rx => {
                        let _ = sink.close().await;
                        break;
                    }
                    chunk = out_rx.recv() => {
                        let Some(chunk) = chunk else {
                            let _ = sink.close().await;
                            break;
                        };
                        let msg = ClientMessage::RealtimeInput(RealtimeInput { media: chunk });
                        let Ok(json) = serde_json::to_string(&msg) else {
                            continue;
                        };
                        if let Err(e) = sink.send(Message::Text(json.into())).await {
                            tracing::debug!(error = %e, "outbound send failed, stopping writer");
                            break;
                        }
                    }
                }
            }
        });

        let reader_state = Arc::clone(&state);
        let reader = tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(Message::Text(text)) => {
                        if deliver_server_message(text.as_str(), &reader_state, &event_tx).await {
                            return;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        reader_state.store(TransportState::Faulted as u8, Ordering::SeqCst);
                        let _ = event_tx.send(TransportEvent::Faulted(e.to_string())).await;
                        return;
                    }
                }
            }

            // Remote closed or stream ended without a fault
            reader_state.store(TransportState::Closed as u8, Ordering::SeqCst);
            let _ = event_tx.send(TransportEvent::Closed).await;
        });

        Ok((
            Self {
                state,
                out_tx,
                close_tx: Some(close_tx),
                writer: Some(writer),
                reader: Some(reader),
            },
            event_rx,
        ))
    }

    /// Current connection state
    #[must_use]
    pub fn state(&self) -> TransportState {
        TransportState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Send a media chunk to the remote session
    ///
    /// Fails silently when the channel is not `Open` or the outbound queue
    /// is full: the frame is dropped, never queued, to avoid unbounded
    /// backlog under network stall.
    pub fn send(&self, chunk: WireChunk) {
        if self.state() != TransportState::Open {
            tracing::trace!(state = %self.state(), "dropping outbound chunk, channel not open");
            return;
        }

        if self.out_tx.try_send(chunk).is_err() {
            tracing::debug!("outbound queue full, dropping frame");
        }
    }

    /// Close the channel; idempotent
    pub fn close(&mut self) {
        let current = self.state();
        if matches!(current, TransportState::Closed | TransportState::Faulted) {
            return;
        }

        self.state
            .store(TransportState::Closed as u8, Ordering::SeqCst);
        if let Some(close_tx) = self.close_tx.take() {
            let _ = close_tx.send(());
        }
        tracing::debug!("live session closed");
    }
}

impl Drop for SessionTransport {
    fn drop(&mut self) {
        self.close();
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Parse one server message and forward its events; true when the reader
/// should stop (remote fault)
async fn deliver_server_message(
    text: &str,
    state: &Arc<AtomicU8>,
    event_tx: &mpsc::Sender<TransportEvent>,
) -> bool {
    let message: ServerMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(error = %e, "dropping unparseable server message");
            return false;
        }
    };

    if let Some(error) = message.error {
        state.store(TransportState::Faulted as u8, Ordering::SeqCst);
        let _ = event_tx
            .send(TransportEvent::Faulted(error.message))
            .await;
        return true;
    }

    let Some(turn) = message.server_content.and_then(|c| c.model_turn) else {
        return false;
    };

    for part in turn.parts {
        if let Some(media) = part.inline_data {
            if event_tx.send(TransportEvent::Audio(media)).await.is_err() {
                return true;
            }
        }
        if let Some(text) = part.text {
            if event_tx.send(TransportEvent::Status(text)).await.is_err() {
                return true;
            }
        }
    }

    false
}
