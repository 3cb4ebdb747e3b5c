//! Microphone capture with mute gating
//!
//! Capture runs continuously for the whole call: muting discards windows at
//! the gate instead of pausing the device, so un-muting has zero
//! re-acquisition latency. The cpal input callback only accumulates samples
//! and enqueues complete windows; encoding and transport happen downstream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::mpsc;

use crate::{Error, Result};

/// Per-window gate between the capture callback and the outbound pipeline
///
/// Lives inside the cpal input callback. `push` accumulates raw samples,
/// slices them into fixed windows, reads the mute flag once per window, and
/// enqueues unmuted windows without blocking. Windows produced before the
/// session channel opens are discarded.
pub struct FrameSink {
    muted: Arc<AtomicBool>,
    channel_open: Arc<AtomicBool>,
    window_samples: usize,
    pending: Vec<f32>,
    tx: mpsc::UnboundedSender<Vec<f32>>,
}

impl FrameSink {
    /// Create a sink emitting `window_samples`-sized windows into `tx`
    #[must_use]
    pub fn new(
        window_samples: usize,
        muted: Arc<AtomicBool>,
        channel_open: Arc<AtomicBool>,
        tx: mpsc::UnboundedSender<Vec<f32>>,
    ) -> Self {
        Self {
            muted,
            channel_open,
            window_samples,
            pending: Vec::with_capacity(window_samples * 2),
            tx,
        }
    }

    /// Accumulate captured samples and forward any complete windows
    pub fn push(&mut self, data: &[f32]) {
        self.pending.extend_from_slice(data);

        while self.pending.len() >= self.window_samples {
            let window: Vec<f32> = self.pending.drain(..self.window_samples).collect();

            // Muted windows are discarded, not queued; capture never pauses
            if self.muted.load(Ordering::Relaxed) {
                continue;
            }
            if !self.channel_open.load(Ordering::Relaxed) {
                continue;
            }

            let _ = self.tx.send(window);
        }
    }
}

/// Handle to the capture device thread
struct Worker {
    stop_tx: std_mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Owns the microphone and emits a steady cadence of sample windows
pub struct CaptureManager {
    sample_rate: u32,
    window_samples: usize,
    muted: Arc<AtomicBool>,
    worker: Option<Worker>,
}

impl CaptureManager {
    /// Create a capture manager reading the given mute flag
    #[must_use]
    pub fn new(sample_rate: u32, window_samples: usize, muted: Arc<AtomicBool>) -> Self {
        Self {
            sample_rate,
            window_samples,
            muted,
            worker: None,
        }
    }

    /// Acquire the default input device and start capturing
    ///
    /// Complete windows are sent on `tx` once `channel_open` is set.
    /// Calling `start` while already capturing is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Permission`] if no input device is present or the
    /// device cannot be opened.
    pub fn start(
        &mut self,
        channel_open: Arc<AtomicBool>,
        tx: mpsc::UnboundedSender<Vec<f32>>,
    ) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let sample_rate = self.sample_rate;
        let mut sink = FrameSink::new(
            self.window_samples,
            Arc::clone(&self.muted),
            channel_open,
            tx,
        );
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name("chime-capture".to_string())
            .spawn(move || {
                let stream = match build_input_stream(sample_rate, move |data| sink.push(data)) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(Error::Permission(e.to_string())));
                    return;
                }

                let _ = ready_tx.send(Ok(()));

                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| Error::Audio(format!("failed to spawn capture thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                tracing::debug!(
                    sample_rate,
                    window_samples = self.window_samples,
                    "audio capture started"
                );
                self.worker = Some(Worker { stop_tx, handle });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(Error::Permission("capture thread exited early".to_string()))
            }
        }
    }

    /// Release the device track; a second call is a no-op
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            let _ = worker.handle.join();
            tracing::debug!("audio capture stopped");
        }
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.worker.is_some()
    }

    /// Get the capture sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for CaptureManager {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Build the cpal input stream feeding captured samples to `on_data`
fn build_input_stream(
    sample_rate: u32,
    mut on_data: impl FnMut(&[f32]) + Send + 'static,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Permission("no input device available".to_string()))?;

    let supported_config = device
        .supported_input_configs()
        .map_err(|e| Error::Permission(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .ok_or_else(|| Error::Permission("no suitable input config found".to_string()))?;

    let config: StreamConfig = supported_config.with_sample_rate(SampleRate(sample_rate)).config();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels = config.channels,
        "audio capture initialized"
    );

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                on_data(data);
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Permission(e.to_string()))?;

    Ok(stream)
}
