//! Error types for the chime call client

use thiserror::Error;

/// Result type alias for chime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the call client
#[derive(Debug, Error)]
pub enum Error {
    /// Device permission error (microphone or camera denied/missing)
    #[error("permission error: {0}")]
    Permission(String),

    /// Malformed inbound wire chunk; callers drop the frame and continue
    #[error("decode error: {0}")]
    Decode(String),

    /// Connection-level failure of the live session channel
    #[error("transport error: {0}")]
    Transport(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Camera/video error
    #[error("video error: {0}")]
    Video(String),

    /// Call lifecycle error
    #[error("call error: {0}")]
    Call(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
