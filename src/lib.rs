//! Chime - Real-time voice call client for conversational AI backends
//!
//! This library provides a bidirectional audio/video call session against a
//! live inference endpoint:
//! - Microphone capture with mute gating (PCM16 over WebSocket)
//! - Gapless scheduled playback of synthesized audio
//! - Optional low-frequency camera frame sampling
//! - A single controller owning session state and teardown
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 CallController                       │
//! │   state machine  │  event loop  │  teardown         │
//! └───┬──────────┬──────────┬──────────────┬────────────┘
//!     │          │          │              │
//! ┌───▼────┐ ┌───▼────┐ ┌───▼──────────┐ ┌─▼──────────┐
//! │Capture │ │ Video  │ │  Transport   │ │  Playback  │
//! │ (mic)  │ │(camera)│ │ (WebSocket)  │ │ (speaker)  │
//! └────────┘ └────────┘ └──────────────┘ └────────────┘
//! ```
//!
//! Capture windows and camera frames flow outbound through the transport;
//! inbound synthesized audio is decoded and scheduled for gapless playback.

pub mod call;
pub mod capture;
pub mod codec;
pub mod config;
pub mod error;
pub mod playback;
pub mod transport;
pub mod video;

pub use call::{CallController, CallState, CallStatus};
pub use capture::CaptureManager;
pub use codec::{AudioFrame, WireChunk};
pub use config::Config;
pub use error::{Error, Result};
pub use playback::PlaybackScheduler;
pub use transport::{SessionSetup, SessionTransport, TransportEvent, TransportState};
pub use video::VideoSampler;
