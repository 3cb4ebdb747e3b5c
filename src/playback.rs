//! Gapless playback scheduling
//!
//! Inbound audio arrives in variably-sized, variably-timed chunks. The
//! scheduler serializes them onto a monotonic sample-clock cursor so that
//! successive buffers neither overlap nor leave a gap the network did not
//! force: each buffer starts at `max(next_start, now)` and advances
//! `next_start` by its length. The cursor is only ever advanced, never
//! rewound.
//!
//! The pure [`ScheduleQueue`] holds the cursor and the active-source set;
//! [`PlaybackScheduler`] feeds it to a cpal output stream on a dedicated
//! thread (cpal streams are not `Send`).

use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::mpsc;

use crate::codec::AudioFrame;
use crate::{Error, Result};

/// Event emitted by the output callback when the active-source set drains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// The last scheduled buffer finished; status should fall back to listening
    Drained,
}

/// Outcome of scheduling one buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleOutcome {
    /// Assigned start position, in samples since stream start
    pub start: u64,

    /// True when the active-source set was empty before this buffer,
    /// i.e. status transitions to speaking
    pub became_active: bool,
}

/// One scheduled buffer awaiting or undergoing playback
#[derive(Debug)]
struct Source {
    start: u64,
    samples: Vec<f32>,
    pos: usize,
}

/// Monotonic-cursor schedule over an active-source set
///
/// All positions are sample counts at the output rate. `next_start` is
/// non-decreasing over the lifetime of a session; `clear` drops sources but
/// never rewinds the cursor.
#[derive(Debug, Default)]
pub struct ScheduleQueue {
    next_start: u64,
    clock: u64,
    sources: Vec<Source>,
}

impl ScheduleQueue {
    /// Create an empty queue with the cursor at zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a start position to `samples` and add it to the active set
    ///
    /// Empty buffers are ignored: the cursor does not move and the active
    /// set is unchanged.
    pub fn schedule(&mut self, samples: Vec<f32>) -> ScheduleOutcome {
        let start = self.next_start.max(self.clock);
        if samples.is_empty() {
            return ScheduleOutcome {
                start,
                became_active: false,
            };
        }

        let became_active = self.sources.is_empty();
        self.next_start = start + samples.len() as u64;
        self.sources.push(Source {
            start,
            samples,
            pos: 0,
        });

        ScheduleOutcome {
            start,
            became_active,
        }
    }

    /// Advance the playback clock without producing audio
    ///
    /// Returns true when the active set transitioned to empty.
    pub fn advance(&mut self, frames: u64) -> bool {
        for _ in 0..frames {
            self.step();
        }
        self.reap()
    }

    /// Mix due sources into an interleaved output buffer, advancing the clock
    ///
    /// Returns true when the active set transitioned to empty.
    pub fn mix_into(&mut self, out: &mut [f32], channels: usize) -> bool {
        for frame in out.chunks_mut(channels.max(1)) {
            let sample = self.step();
            for slot in frame.iter_mut() {
                *slot = sample;
            }
        }
        self.reap()
    }

    /// Force-stop all scheduled buffers
    ///
    /// The cursor is left where it is; it is never rewound.
    pub fn clear(&mut self) {
        self.sources.clear();
    }

    /// Number of buffers in the active set
    #[must_use]
    pub fn active_sources(&self) -> usize {
        self.sources.len()
    }

    /// Current cursor position in samples
    #[must_use]
    pub const fn next_start(&self) -> u64 {
        self.next_start
    }

    /// Current playback clock in samples
    #[must_use]
    pub const fn clock(&self) -> u64 {
        self.clock
    }

    /// Produce one mixed sample and advance the clock by one frame
    fn step(&mut self) -> f32 {
        let mut acc = 0.0_f32;
        for src in &mut self.sources {
            if src.start <= self.clock && src.pos < src.samples.len() {
                acc += src.samples[src.pos];
                src.pos += 1;
            }
        }
        self.clock += 1;
        acc
    }

    /// Drop completed sources; true when the set just became empty
    fn reap(&mut self) -> bool {
        if self.sources.is_empty() {
            return false;
        }
        self.sources.retain(|s| s.pos < s.samples.len());
        self.sources.is_empty()
    }
}

/// Handle to the playback device thread
struct Worker {
    stop_tx: std_mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Schedules decoded audio frames onto the default output device
pub struct PlaybackScheduler {
    queue: Arc<Mutex<ScheduleQueue>>,
    sample_rate: u32,
    worker: Option<Worker>,
}

impl PlaybackScheduler {
    /// Create a scheduler for the given output sample rate
    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        Self {
            queue: Arc::new(Mutex::new(ScheduleQueue::new())),
            sample_rate,
            worker: None,
        }
    }

    /// Open the output device and begin running the schedule
    ///
    /// `events` receives [`PlaybackEvent::Drained`] each time the active set
    /// empties. Calling `start` while already running is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Audio`] if no suitable output device or stream
    /// configuration is available.
    pub fn start(&mut self, events: mpsc::UnboundedSender<PlaybackEvent>) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let sample_rate = self.sample_rate;
        let queue = Arc::clone(&self.queue);
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name("chime-playback".to_string())
            .spawn(move || {
                let stream = match build_output_stream(sample_rate, queue, events) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(Error::Audio(e.to_string())));
                    return;
                }

                let _ = ready_tx.send(Ok(()));

                // Parked until stop() or drop of the scheduler
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| Error::Audio(format!("failed to spawn playback thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                tracing::debug!(sample_rate, "playback scheduler started");
                self.worker = Some(Worker { stop_tx, handle });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(Error::Audio("playback thread exited early".to_string()))
            }
        }
    }

    /// Schedule a decoded frame for gapless playback
    #[must_use]
    pub fn schedule(&self, frame: AudioFrame) -> ScheduleOutcome {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        let outcome = queue.schedule(frame.samples);
        tracing::trace!(
            start = outcome.start,
            next_start = queue.next_start(),
            active = queue.active_sources(),
            "scheduled audio buffer"
        );
        outcome
    }

    /// Number of buffers currently in the active set
    #[must_use]
    pub fn active_sources(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .active_sources()
    }

    /// Force-stop all scheduled buffers
    pub fn clear(&self) {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Release the output device; safe to call multiple times
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            let _ = worker.handle.join();
            tracing::debug!("playback scheduler stopped");
        }
    }

    /// Whether the output device is currently open
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Build the cpal output stream that drains the schedule queue
fn build_output_stream(
    sample_rate: u32,
    queue: Arc<Mutex<ScheduleQueue>>,
    events: mpsc::UnboundedSender<PlaybackEvent>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let supported_config = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .or_else(|| {
            // Fallback: try stereo
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == 2
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
        })
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

    let config: StreamConfig = supported_config.with_sample_rate(SampleRate(sample_rate)).config();
    let channels = config.channels as usize;

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels,
        "audio output initialized"
    );

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let drained = queue
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .mix_into(data, channels);
                if drained {
                    let _ = events.send(PlaybackEvent::Drained);
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_buffer_does_not_move_cursor() {
        let mut queue = ScheduleQueue::new();
        let outcome = queue.schedule(Vec::new());
        assert_eq!(outcome.start, 0);
        assert!(!outcome.became_active);
        assert_eq!(queue.next_start(), 0);
        assert_eq!(queue.active_sources(), 0);
    }

    #[test]
    fn test_mix_produces_scheduled_samples() {
        let mut queue = ScheduleQueue::new();
        queue.schedule(vec![0.25; 4]);

        let mut out = vec![0.0_f32; 8];
        let drained = queue.mix_into(&mut out, 2);

        // 4 mono samples across 2 channels fill all 4 output frames
        assert!(out.iter().all(|&s| (s - 0.25).abs() < f32::EPSILON));
        assert!(drained);
    }

    #[test]
    fn test_clear_keeps_cursor() {
        let mut queue = ScheduleQueue::new();
        queue.schedule(vec![0.0; 100]);
        queue.clear();
        assert_eq!(queue.active_sources(), 0);
        assert_eq!(queue.next_start(), 100);
    }
}
