//! Error types for the audio streaming application

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("No loopback capture source found: {0}")]
    LoopbackUnavailable(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("cpal error: {0}")]
    CpalError(String),
}

impl From<cpal::DefaultStreamConfigError> for AudioError {
    fn from(e: cpal::DefaultStreamConfigError) -> Self {
        AudioError::CpalError(e.to_string())
    }
}

impl From<cpal::BuildStreamError> for AudioError {
    fn from(e: cpal::BuildStreamError) -> Self {
        AudioError::StreamError(e.to_string())
    }
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed on port {port}: {reason}")]
    BindFailed { port: u16, reason: String },

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Transport is closed")]
    TransportClosed,
}

/// Logical misuse of the session commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("No role selected")]
    NoRole,

    #[error("A display name is required")]
    NameRequired,

    #[error("Only a sender can do this")]
    NotSender,

    #[error("Only a receiver can do this")]
    NotReceiver,

    #[error("Select at least one receiver")]
    NoPeersSelected,

    #[error("Not connected to a sender")]
    NotConnected,

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Unknown peer: {0}")]
    UnknownPeer(String),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
