//! Configuration for the call client
//!
//! Defaults cover a local live endpoint; an optional TOML file at
//! `~/.config/chime/config.toml` overlays them. All file fields are
//! optional — the file is a partial overlay, not a full schema.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::codec::{CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE};
use crate::transport::SessionSetup;
use crate::Result;

/// Default live session endpoint
const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:8790/live";

/// Default live model identifier
const DEFAULT_MODEL: &str = "native-audio-latest";

/// Default synthesized voice
const DEFAULT_VOICE: &str = "zephyr";

/// Default system instruction for the session
const DEFAULT_SYSTEM_INSTRUCTION: &str =
    "You are a live voice assistant. Be concise, helpful, and friendly.";

/// Capture window size in samples (4096 at 16kHz is roughly 256ms)
const DEFAULT_WINDOW_SAMPLES: usize = 4096;

/// Default video sampling interval
const DEFAULT_VIDEO_INTERVAL_MS: u64 = 1000;

/// Default JPEG quality for sampled frames (0-100)
const DEFAULT_JPEG_QUALITY: u8 = 50;

/// Resolved call client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// WebSocket endpoint of the live inference session
    pub endpoint: String,

    /// Session parameters sent on connect
    pub session: SessionConfig,

    /// Microphone capture settings
    pub capture: CaptureConfig,

    /// Audio output settings
    pub playback: PlaybackConfig,

    /// Camera sampling settings
    pub video: VideoConfig,
}

/// Live session parameters
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Model identifier
    pub model: String,

    /// Synthesized voice name
    pub voice: String,

    /// System instruction applied to the session
    pub system_instruction: String,
}

/// Microphone capture settings
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Capture sample rate in Hz
    pub sample_rate: u32,

    /// Fixed window size forwarded per frame, in samples
    pub window_samples: usize,
}

/// Audio output settings
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Playback sample rate in Hz (rate of inbound synthesized audio)
    pub sample_rate: u32,
}

/// Camera sampling settings
///
/// Interval and quality are tuning defaults carried over from the upstream
/// service contract; both are configurable rather than fixed.
#[derive(Debug, Clone)]
pub struct VideoConfig {
    /// Milliseconds between sampled frames
    pub interval_ms: u64,

    /// JPEG quality, 0-100
    pub jpeg_quality: u8,

    /// Downscale frames wider than this before encoding
    pub max_width: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            session: SessionConfig {
                model: DEFAULT_MODEL.to_string(),
                voice: DEFAULT_VOICE.to_string(),
                system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            },
            capture: CaptureConfig {
                sample_rate: CAPTURE_SAMPLE_RATE,
                window_samples: DEFAULT_WINDOW_SAMPLES,
            },
            playback: PlaybackConfig {
                sample_rate: PLAYBACK_SAMPLE_RATE,
            },
            video: VideoConfig {
                interval_ms: DEFAULT_VIDEO_INTERVAL_MS,
                jpeg_quality: DEFAULT_JPEG_QUALITY,
                max_width: None,
            },
        }
    }
}

impl Config {
    /// Load configuration, overlaying the TOML file when present
    ///
    /// `path` overrides the default location under the user config dir.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing config file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        let path = path.map_or_else(default_config_path, Path::to_path_buf);
        if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let file: ConfigFile = toml::from_str(&raw)?;
            tracing::debug!(path = %path.display(), "loaded config file");
            config.apply(file);
        }

        Ok(config)
    }

    /// Build the transport setup message from the session parameters
    #[must_use]
    pub fn session_setup(&self) -> SessionSetup {
        SessionSetup {
            model: self.session.model.clone(),
            voice: self.session.voice.clone(),
            system_instruction: self.session.system_instruction.clone(),
        }
    }

    /// Overlay file values onto the defaults
    fn apply(&mut self, file: ConfigFile) {
        if let Some(endpoint) = file.endpoint {
            self.endpoint = endpoint;
        }
        if let Some(model) = file.session.model {
            self.session.model = model;
        }
        if let Some(voice) = file.session.voice {
            self.session.voice = voice;
        }
        if let Some(instruction) = file.session.system_instruction {
            self.session.system_instruction = instruction;
        }
        if let Some(window_samples) = file.capture.window_samples {
            self.capture.window_samples = window_samples;
        }
        if let Some(interval_ms) = file.video.interval_ms {
            self.video.interval_ms = interval_ms;
        }
        if let Some(quality) = file.video.jpeg_quality {
            self.video.jpeg_quality = quality.min(100);
        }
        if let Some(max_width) = file.video.max_width {
            self.video.max_width = Some(max_width);
        }
    }
}

/// Default config file location (`~/.config/chime/config.toml` on Linux)
fn default_config_path() -> PathBuf {
    directories::ProjectDirs::from("dev", "omni", "chime").map_or_else(
        || PathBuf::from("chime.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    endpoint: Option<String>,

    #[serde(default)]
    session: SessionFileConfig,

    #[serde(default)]
    capture: CaptureFileConfig,

    #[serde(default)]
    video: VideoFileConfig,
}

/// `[session]` section
#[derive(Debug, Default, Deserialize)]
struct SessionFileConfig {
    model: Option<String>,
    voice: Option<String>,
    system_instruction: Option<String>,
}

/// `[capture]` section
#[derive(Debug, Default, Deserialize)]
struct CaptureFileConfig {
    window_samples: Option<usize>,
}

/// `[video]` section
#[derive(Debug, Default, Deserialize)]
struct VideoFileConfig {
    interval_ms: Option<u64>,
    jpeg_quality: Option<u8>,
    max_width: Option<u32>,
}
