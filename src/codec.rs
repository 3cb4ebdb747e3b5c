//! PCM16 wire codec
//!
//! Stateless conversion between f32 audio samples and the base64-framed
//! PCM16 chunks exchanged with the live session, plus the JPEG chunk
//! constructor used by the video sampler.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Sample rate for outbound microphone audio (16kHz for speech)
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of inbound synthesized audio from the remote session
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// MIME tag for outbound microphone audio
pub const AUDIO_INPUT_MIME: &str = "audio/pcm;rate=16000";

/// MIME tag for outbound camera frames
pub const IMAGE_JPEG_MIME: &str = "image/jpeg";

/// The minimal framed unit of audio or image data on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireChunk {
    /// MIME-like tag (`audio/pcm;rate=16000` or `image/jpeg`)
    pub mime_type: String,

    /// Base64-encoded payload
    pub data: String,
}

impl WireChunk {
    /// Wrap base64 PCM16 data as an outbound audio chunk
    #[must_use]
    pub fn audio(data: String) -> Self {
        Self {
            mime_type: AUDIO_INPUT_MIME.to_string(),
            data,
        }
    }

    /// Wrap base64 JPEG data as an outbound video chunk
    #[must_use]
    pub fn jpeg(data: String) -> Self {
        Self {
            mime_type: IMAGE_JPEG_MIME.to_string(),
            data,
        }
    }
}

/// A decoded buffer of normalized float samples
///
/// Immutable once produced; arrival order is the scheduling order.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Normalized samples in [-1, 1]
    pub samples: Vec<f32>,

    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioFrame {
    /// Number of samples in the frame
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the frame carries no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback duration of the frame
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }
}

/// Encode f32 samples in [-1, 1] as a base64 PCM16 audio chunk
///
/// Deterministic and stateless. Samples are scaled by 32768, rounded, and
/// clamped to the i16 range. Empty input yields an empty chunk.
#[must_use]
pub fn encode_pcm16(samples: &[f32]) -> WireChunk {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        #[allow(clippy::cast_possible_truncation)]
        let value = (sample * 32768.0).round().clamp(-32768.0, 32767.0) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    WireChunk::audio(BASE64.encode(bytes))
}

/// Decode an inbound PCM16 audio chunk into normalized float samples
///
/// # Errors
///
/// Returns [`Error::Decode`] on an unrecognized MIME tag, invalid base64, or
/// a payload whose length is not a multiple of 2 bytes. Callers drop the
/// frame and continue; decode failures are never fatal to the session.
pub fn decode(chunk: &WireChunk, target_sample_rate: u32) -> Result<AudioFrame> {
    if !chunk.mime_type.starts_with("audio/pcm") {
        return Err(Error::Decode(format!(
            "unrecognized chunk tag: {}",
            chunk.mime_type
        )));
    }

    let bytes = BASE64
        .decode(&chunk.data)
        .map_err(|e| Error::Decode(format!("invalid base64 payload: {e}")))?;

    if bytes.len() % 2 != 0 {
        return Err(Error::Decode(format!(
            "payload length {} is not a multiple of 2",
            bytes.len()
        )));
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect();

    Ok(AudioFrame {
        samples,
        sample_rate: target_sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_empty_input() {
        let chunk = encode_pcm16(&[]);
        assert_eq!(chunk.mime_type, AUDIO_INPUT_MIME);
        assert!(chunk.data.is_empty());
    }

    #[test]
    fn test_encode_scaling() {
        let chunk = encode_pcm16(&[0.0, 0.5, -0.5]);
        let bytes = BASE64.decode(&chunk.data).unwrap();
        let values: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|p| i16::from_le_bytes([p[0], p[1]]))
            .collect();
        assert_eq!(values, vec![0, 16384, -16384]);
    }

    #[test]
    fn test_encode_clamps_out_of_range() {
        let chunk = encode_pcm16(&[2.0, -2.0, 1.0, -1.0]);
        let bytes = BASE64.decode(&chunk.data).unwrap();
        let values: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|p| i16::from_le_bytes([p[0], p[1]]))
            .collect();
        assert_eq!(values, vec![32767, -32768, 32767, -32768]);
    }

    #[test]
    fn test_decode_rejects_unknown_tag() {
        let chunk = WireChunk::jpeg(BASE64.encode([0u8, 1]));
        assert!(matches!(
            decode(&chunk, PLAYBACK_SAMPLE_RATE),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn test_decode_rejects_odd_length() {
        let chunk = WireChunk::audio(BASE64.encode([0u8, 1, 2]));
        assert!(matches!(
            decode(&chunk, PLAYBACK_SAMPLE_RATE),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame {
            samples: vec![0.0; PLAYBACK_SAMPLE_RATE as usize / 2],
            sample_rate: PLAYBACK_SAMPLE_RATE,
        };
        assert_eq!(frame.duration(), Duration::from_millis(500));
    }
}
