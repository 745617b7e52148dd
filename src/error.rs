//! # Error Types
//!
//! Custom error types for Arm Arbiter using `thiserror`.

use thiserror::Error;

/// Main error type for Arm Arbiter
#[derive(Debug, Error)]
pub enum ArmError {
    /// A required configuration option is absent
    #[error("Configuration error: missing required option '{0}'")]
    MissingOption(String),

    /// A configuration option is present but out of range
    #[error("Configuration error: {0}")]
    InvalidOption(String),

    /// A required target name does not resolve to an actuator
    #[error("Configuration error: no actuator registered for target '{0}'")]
    UnresolvedTarget(String),

    /// Configuration file could not be parsed
    #[error("Configuration error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Command batch could not be decoded
    #[error("Command decoding error: {0}")]
    Json(#[from] serde_json::Error),

    /// A command names a channel that is not mapped to any input
    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    /// A message sink refused the message or is gone
    #[error("Sink unavailable: {0}")]
    SinkUnavailable(String),

    /// Gamepad errors
    #[error("Controller error: {0}")]
    Controller(String),

    /// No gamepad found on the system
    #[error("No gamepad found")]
    ControllerNotFound,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Arm Arbiter
pub type Result<T> = std::result::Result<T, ArmError>;
