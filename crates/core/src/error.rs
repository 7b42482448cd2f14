use thiserror::Error;

/// Every failure the voice pipeline can observe.
///
/// None of these are fatal to the process: the controller maps each one onto
/// a dropped chunk or a teardown back to `Disconnected`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VoiceError {
    #[error("Microphone access denied: {0}")]
    Permission(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Session is closed")]
    SessionClosed,

    #[error("Malformed audio: {0}")]
    MalformedAudio(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Audio device error: {0}")]
    Device(String),
}

pub type Result<T> = std::result::Result<T, VoiceError>;
