//! Call session orchestration
//!
//! [`CallController`] owns the lifecycle of capture, video, transport, and
//! playback, and is the only writer of the call state machine:
//! `Connecting → {Listening ⇄ Speaking} → Ended`, with `Error` reachable
//! from any point. Components report events; a single consumer task applies
//! them in order. Teardown releases every device handle exactly once, in a
//! fixed order, and is idempotent by design rather than by caller
//! discipline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::capture::CaptureManager;
use crate::codec::{self, WireChunk};
use crate::config::Config;
use crate::playback::{PlaybackEvent, PlaybackScheduler};
use crate::transport::{SessionTransport, TransportEvent};
use crate::video::VideoSampler;
use crate::{Error, Result};

/// Top-level call state, owned exclusively by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Session start in flight
    Connecting,
    /// Channel open, no synthesized audio playing
    Listening,
    /// Synthesized audio currently scheduled or playing
    Speaking,
    /// Permission failure or transport fault; the call is over
    Error,
    /// Call ended cleanly
    Ended,
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Listening => "listening",
            Self::Speaking => "speaking",
            Self::Error => "error",
            Self::Ended => "ended",
        };
        f.write_str(name)
    }
}

/// Observable call status: the state plus a human-readable detail line
#[derive(Debug, Clone)]
pub struct CallStatus {
    /// Current call state
    pub state: CallState,

    /// Human-readable status text for the host UI
    pub detail: String,
}

/// Device and session handles owned by an active call
///
/// Everything is an `Option` so teardown can release each handle exactly
/// once and stay safe when invoked concurrently with completion callbacks.
struct CallInner {
    capture: Option<CaptureManager>,
    video: Option<VideoSampler>,
    transport: Option<SessionTransport>,
    playback: Option<PlaybackScheduler>,
    video_tx: Option<mpsc::UnboundedSender<WireChunk>>,
    event_loop: Option<JoinHandle<()>>,
    active: bool,
}

impl CallInner {
    const fn empty() -> Self {
        Self {
            capture: None,
            video: None,
            transport: None,
            playback: None,
            video_tx: None,
            event_loop: None,
            active: false,
        }
    }

    /// Release all resources in a fixed order; true when teardown ran
    ///
    /// Order: capture, video, transport, playback flush, output device.
    /// A second invocation is a no-op.
    fn teardown(&mut self) -> bool {
        if !self.active {
            return false;
        }
        self.active = false;

        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        if let Some(mut video) = self.video.take() {
            video.stop();
        }
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        if let Some(mut playback) = self.playback.take() {
            playback.clear();
            playback.stop();
        }
        self.video_tx = None;

        tracing::debug!("call resources released");
        true
    }
}

/// Orchestrates one live call session against a remote inference backend
pub struct CallController {
    config: Config,
    muted: Arc<AtomicBool>,
    channel_open: Arc<AtomicBool>,
    status_tx: watch::Sender<CallStatus>,
    inner: Arc<Mutex<CallInner>>,
}

impl CallController {
    /// Create a controller; no devices are acquired until [`Self::start_call`]
    #[must_use]
    pub fn new(config: Config) -> Self {
        let (status_tx, _) = watch::channel(CallStatus {
            state: CallState::Connecting,
            detail: "Not connected".to_string(),
        });

        Self {
            config,
            muted: Arc::new(AtomicBool::new(false)),
            channel_open: Arc::new(AtomicBool::new(false)),
            status_tx,
            inner: Arc::new(Mutex::new(CallInner::empty())),
        }
    }

    /// Subscribe to the observable status stream
    #[must_use]
    pub fn status(&self) -> watch::Receiver<CallStatus> {
        self.status_tx.subscribe()
    }

    /// Current call state
    #[must_use]
    pub fn state(&self) -> CallState {
        self.status_tx.borrow().state
    }

    /// Whether the microphone is currently muted
    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    /// Start the call: acquire audio devices, open the session channel
    ///
    /// Acquisition order is output device, microphone, transport; capture
    /// begins forwarding only after the channel reports open. On any
    /// failure, partially-acquired resources are released, the status
    /// stream reports `Error`, and the error is returned. Retry is a fresh
    /// `start_call`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Permission`] when the microphone is denied or
    /// missing, [`Error::Audio`] when no output device is usable, and
    /// [`Error::Transport`] when the session connection fails.
    pub async fn start_call(&self) -> Result<()> {
        if self.inner.lock().unwrap_or_else(|e| e.into_inner()).active {
            return Err(Error::Call("call already in progress".to_string()));
        }

        self.set_status(CallState::Connecting, "Connecting...");
        self.channel_open.store(false, Ordering::SeqCst);
        self.muted.store(false, Ordering::SeqCst);

        let (playback_tx, playback_rx) = mpsc::unbounded_channel();
        let mut playback = PlaybackScheduler::new(self.config.playback.sample_rate);
        if let Err(e) = playback.start(playback_tx) {
            self.set_status(CallState::Error, &format!("Audio output failed: {e}"));
            return Err(e);
        }

        let (capture_tx, capture_rx) = mpsc::unbounded_channel();
        let mut capture = CaptureManager::new(
            self.config.capture.sample_rate,
            self.config.capture.window_samples,
            Arc::clone(&self.muted),
        );
        if let Err(e) = capture.start(Arc::clone(&self.channel_open), capture_tx) {
            playback.stop();
            self.set_status(CallState::Error, &format!("Microphone unavailable: {e}"));
            return Err(e);
        }

        let connected =
            SessionTransport::connect(&self.config.endpoint, self.config.session_setup()).await;
        let (transport, transport_rx) = match connected {
            Ok(pair) => pair,
            Err(e) => {
                capture.stop();
                playback.stop();
                self.set_status(CallState::Error, &format!("Connection failed: {e}"));
                return Err(e);
            }
        };

        let (video_tx, video_rx) = mpsc::unbounded_channel();

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.capture = Some(capture);
        inner.playback = Some(playback);
        inner.transport = Some(transport);
        inner.video_tx = Some(video_tx);
        inner.active = true;

        inner.event_loop = Some(tokio::spawn(run_event_loop(EventLoop {
            inner: Arc::clone(&self.inner),
            status_tx: self.status_tx.clone(),
            channel_open: Arc::clone(&self.channel_open),
            playback_rate: self.config.playback.sample_rate,
            transport_rx,
            playback_rx,
            capture_rx,
            video_rx,
        })));

        tracing::info!(endpoint = %self.config.endpoint, "call started");
        Ok(())
    }

    /// Flip the mute flag; returns the new muted state
    ///
    /// No other side effects: capture keeps running, muted windows are
    /// discarded at the frame gate.
    #[must_use]
    pub fn toggle_mute(&self) -> bool {
        let muted = !self.muted.fetch_xor(true, Ordering::SeqCst);
        tracing::debug!(muted, "mute toggled");
        muted
    }

    /// Start or stop the camera sampler; returns the new enabled state
    ///
    /// Independent of the audio call state: camera failure surfaces as an
    /// error here but never changes [`CallState`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Call`] when no call is active and
    /// [`Error::Permission`] when the camera cannot be opened.
    pub fn toggle_camera(&self) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !inner.active {
            return Err(Error::Call("no active call".to_string()));
        }

        if let Some(mut video) = inner.video.take() {
            video.stop();
            tracing::debug!("camera disabled");
            return Ok(false);
        }

        let tx = inner
            .video_tx
            .clone()
            .ok_or_else(|| Error::Call("no active call".to_string()))?;

        let mut sampler = VideoSampler::new(&self.config.video);
        match sampler.start(tx) {
            Ok(()) => {
                inner.video = Some(sampler);
                tracing::debug!("camera enabled");
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(error = %e, "camera unavailable, audio session continues");
                Err(e)
            }
        }
    }

    /// End the call: deterministic, ordered, idempotent teardown
    ///
    /// Runs fully on every exit path, including [`Drop`]. A second
    /// invocation after the first completes is a no-op.
    pub fn end_call(&self) {
        let (ran, event_loop) = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let ran = inner.teardown();
            (ran, inner.event_loop.take())
        };

        if let Some(handle) = event_loop {
            handle.abort();
        }

        if ran {
            self.set_status(CallState::Ended, "Call ended");
            tracing::info!("call ended");
        }
    }

    /// Resolve once the call reaches `Ended` or `Error`
    pub async fn ended(&self) {
        let mut status = self.status_tx.subscribe();
        loop {
            if matches!(status.borrow().state, CallState::Ended | CallState::Error) {
                return;
            }
            if status.changed().await.is_err() {
                return;
            }
        }
    }

    fn set_status(&self, state: CallState, detail: &str) {
        set_status(&self.status_tx, state, detail);
    }
}

impl Drop for CallController {
    fn drop(&mut self) {
        // Component-unmount path: same teardown as an explicit end
        self.end_call();
    }
}

fn set_status(status_tx: &watch::Sender<CallStatus>, state: CallState, detail: &str) {
    status_tx.send_replace(CallStatus {
        state,
        detail: detail.to_string(),
    });
    tracing::debug!(%state, detail, "call status");
}

/// Channels consumed by the single event-loop task
struct EventLoop {
    inner: Arc<Mutex<CallInner>>,
    status_tx: watch::Sender<CallStatus>,
    channel_open: Arc<AtomicBool>,
    playback_rate: u32,
    transport_rx: mpsc::Receiver<TransportEvent>,
    playback_rx: mpsc::UnboundedReceiver<PlaybackEvent>,
    capture_rx: mpsc::UnboundedReceiver<Vec<f32>>,
    video_rx: mpsc::UnboundedReceiver<WireChunk>,
}

/// Single consumer for all component events
///
/// Transport events are applied in arrival order; capture windows and video
/// frames are encoded here, off the device callbacks, and forwarded through
/// the transport (which drops them unless the channel is open).
async fn run_event_loop(mut ctx: EventLoop) {
    loop {
        tokio::select! {
            event = ctx.transport_rx.recv() => {
                let Some(event) = event else { break };
                if handle_transport_event(&ctx, event) {
                    break;
                }
            }
            event = ctx.playback_rx.recv() => {
                let Some(PlaybackEvent::Drained) = event else { break };
                // The drain notification can go stale: a new buffer may be
                // scheduled between the output callback emitting it and this
                // task consuming it. Current occupancy decides, not the event.
                let active = {
                    let inner = ctx.inner.lock().unwrap_or_else(|e| e.into_inner());
                    inner.playback.as_ref().map_or(0, PlaybackScheduler::active_sources)
                };
                if should_return_to_listening(ctx.status_tx.borrow().state, active) {
                    set_status(&ctx.status_tx, CallState::Listening, "Listening");
                }
            }
            window = ctx.capture_rx.recv() => {
                let Some(window) = window else { break };
                let chunk = codec::encode_pcm16(&window);
                send_chunk(&ctx.inner, chunk);
            }
            chunk = ctx.video_rx.recv() => {
                let Some(chunk) = chunk else { break };
                send_chunk(&ctx.inner, chunk);
            }
        }
    }
}

/// Apply one transport event; true when the loop should stop
fn handle_transport_event(ctx: &EventLoop, event: TransportEvent) -> bool {
    match event {
        TransportEvent::Opened => {
            ctx.channel_open.store(true, Ordering::SeqCst);
            set_status(&ctx.status_tx, CallState::Listening, "Listening");
            false
        }
        TransportEvent::Audio(chunk) => {
            match codec::decode(&chunk, ctx.playback_rate) {
                Ok(frame) if !frame.is_empty() => {
                    let outcome = {
                        let inner = ctx.inner.lock().unwrap_or_else(|e| e.into_inner());
                        inner.playback.as_ref().map(|p| p.schedule(frame))
                    };
                    if outcome.is_some_and(|o| o.became_active)
                        && ctx.status_tx.borrow().state != CallState::Speaking
                    {
                        set_status(&ctx.status_tx, CallState::Speaking, "Speaking");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    // Dropped at frame level; never fatal to the session
                    tracing::warn!(error = %e, "dropping undecodable audio chunk");
                }
            }
            false
        }
        TransportEvent::Status(text) => {
            ctx.status_tx.send_modify(|status| status.detail = text);
            false
        }
        TransportEvent::Closed => {
            let _ = ctx.inner.lock().unwrap_or_else(|e| e.into_inner()).teardown();
            set_status(&ctx.status_tx, CallState::Ended, "Disconnected");
            true
        }
        TransportEvent::Faulted(message) => {
            // Teardown completes before the error is reported
            let _ = ctx.inner.lock().unwrap_or_else(|e| e.into_inner()).teardown();
            set_status(&ctx.status_tx, CallState::Error, &message);
            true
        }
    }
}

/// Forward an outbound chunk through the transport, if one is open
fn send_chunk(inner: &Arc<Mutex<CallInner>>, chunk: WireChunk) {
    let inner = inner.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(transport) = inner.transport.as_ref() {
        transport.send(chunk);
    }
}

/// Whether a drain notification should return status to listening
///
/// Only an actually empty active set counts; the notification itself may
/// have raced ahead of a buffer scheduled after it was emitted.
const fn should_return_to_listening(state: CallState, active_sources: usize) -> bool {
    matches!(state, CallState::Speaking) && active_sources == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::ScheduleQueue;

    #[test]
    fn test_stale_drain_does_not_interrupt_new_audio() {
        let mut queue = ScheduleQueue::new();
        queue.schedule(vec![0.1; 8]);

        // The output callback empties the set and emits a drain notification
        assert!(queue.advance(8));

        // A new chunk lands before the notification is consumed; the stale
        // drain must not flip status away from speaking
        queue.schedule(vec![0.1; 8]);
        assert!(!should_return_to_listening(
            CallState::Speaking,
            queue.active_sources()
        ));

        // Once the set genuinely empties, the transition applies
        assert!(queue.advance(8));
        assert!(should_return_to_listening(
            CallState::Speaking,
            queue.active_sources()
        ));
    }

    #[test]
    fn test_drain_only_transitions_out_of_speaking() {
        assert!(!should_return_to_listening(CallState::Listening, 0));
        assert!(!should_return_to_listening(CallState::Connecting, 0));
        assert!(!should_return_to_listening(CallState::Ended, 0));
    }
}
