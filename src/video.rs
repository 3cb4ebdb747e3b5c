//! Low-frequency camera frame sampling
//!
//! Optional companion to the audio call: on a fixed interval the current
//! camera frame is JPEG-encoded at reduced quality and forwarded as an
//! `image/jpeg` chunk. Camera failures are non-fatal warnings; the audio
//! session continues unaffected.

use std::io::Cursor;
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use nokhwa::Camera;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use tokio::sync::mpsc;

use crate::codec::WireChunk;
use crate::config::VideoConfig;
use crate::{Error, Result};

/// Handle to the camera device thread
struct Worker {
    stop_tx: std_mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Samples still frames from the default camera at a fixed low frequency
pub struct VideoSampler {
    interval: Duration,
    jpeg_quality: u8,
    max_width: Option<u32>,
    worker: Option<Worker>,
}

impl VideoSampler {
    /// Create a sampler from the video configuration
    #[must_use]
    pub fn new(config: &VideoConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.interval_ms),
            jpeg_quality: config.jpeg_quality,
            max_width: config.max_width,
            worker: None,
        }
    }

    /// Acquire the default camera and start sampling frames into `tx`
    ///
    /// Calling `start` while already sampling is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Permission`] if the camera cannot be opened.
    pub fn start(&mut self, tx: mpsc::UnboundedSender<WireChunk>) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let interval = self.interval;
        let quality = self.jpeg_quality;
        let max_width = self.max_width;
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name("chime-video".to_string())
            .spawn(move || {
                let mut camera = match open_camera() {
                    Ok(camera) => camera,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let _ = ready_tx.send(Ok(()));

                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(std_mpsc::RecvTimeoutError::Timeout) => {
                            match sample_frame(&mut camera, quality, max_width) {
                                Ok(chunk) => {
                                    if tx.send(chunk).is_err() {
                                        break;
                                    }
                                }
                                Err(e) => {
                                    tracing::warn!(error = %e, "camera frame capture failed");
                                }
                            }
                        }
                        Ok(()) | Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
                    }
                }

                if let Err(e) = camera.stop_stream() {
                    tracing::debug!(error = %e, "camera stream stop failed");
                }
            })
            .map_err(|e| Error::Video(format!("failed to spawn video thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                tracing::debug!(
                    interval_ms = %interval.as_millis(),
                    quality,
                    "video sampler started"
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
                Err(Error::Permission("video thread exited early".to_string()))
            }
        }
    }

    /// Cancel the timer and release the device track; idempotent
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            let _ = worker.handle.join();
            tracing::debug!("video sampler stopped");
        }
    }

    /// Whether the camera is currently sampling
    #[must_use]
    pub const fn is_sampling(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for VideoSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Open the default camera with an RGB stream
fn open_camera() -> Result<Camera> {
    let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestResolution);

    let mut camera = Camera::new(CameraIndex::Index(0), requested)
        .map_err(|e| Error::Permission(format!("camera unavailable: {e}")))?;

    camera
        .open_stream()
        .map_err(|e| Error::Permission(format!("camera stream failed: {e}")))?;

    tracing::debug!(
        resolution = %camera.resolution(),
        "camera initialized"
    );

    Ok(camera)
}

/// Capture one frame, downscale if configured, and JPEG-encode it
fn sample_frame(camera: &mut Camera, quality: u8, max_width: Option<u32>) -> Result<WireChunk> {
    let buffer = camera
        .frame()
        .map_err(|e| Error::Video(e.to_string()))?;

    let mut image: RgbImage = buffer
        .decode_image::<RgbFormat>()
        .map_err(|e| Error::Video(e.to_string()))?;

    if let Some(max_width) = max_width {
        if image.width() > max_width {
            let scale = f64::from(max_width) / f64::from(image.width());
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let height = (f64::from(image.height()) * scale).round() as u32;
            image = image::imageops::resize(&image, max_width, height.max(1), FilterType::Triangle);
        }
    }

    let mut jpeg = Vec::new();
    let mut cursor = Cursor::new(&mut jpeg);
    let mut encoder = JpegEncoder::new_with_quality(&mut cursor, quality);
    encoder
        .encode_image(&image)
        .map_err(|e| Error::Video(e.to_string()))?;

    Ok(WireChunk::jpeg(BASE64.encode(jpeg)))
}
