//! The narrow seam between the controller and a remote live-agent provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::frame::EncodedChunk;

pub const DEFAULT_LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";
pub const DEFAULT_VOICE: &str = "Fenrir";
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are \"Atlas\", a helpful voice support agent for a SaaS platform.
Keep answers brief (under 2 sentences) and conversational.
If the user sounds angry, apologize and offer to escalate.";

/// What the agent should answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseModality {
    Text,
    Audio,
}

/// Provider-agnostic configuration for opening a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub model: String,
    pub response_modality: ResponseModality,
    pub voice_name: String,
    pub system_instruction: String,
    /// Ask the provider to transcribe the user's speech.
    pub input_transcription: bool,
    /// Ask the provider to transcribe its own speech.
    pub output_transcription: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_LIVE_MODEL.to_string(),
            response_modality: ResponseModality::Audio,
            voice_name: DEFAULT_VOICE.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            input_transcription: true,
            output_transcription: true,
        }
    }
}

/// Events a live session emits, in arrival order.
///
/// A single provider message may produce several of these.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Recognized speech from the user.
    UserTranscript(String),
    /// Transcript of the agent's own speech.
    AgentTranscript(String),
    /// A chunk of the agent's voice.
    Audio(EncodedChunk),
    /// The remote side ended the session.
    Closed(Option<String>),
    /// The session failed asynchronously.
    Error(String),
}

/// Handle to an open duplex session.
pub trait LiveSession: Send + Sync {
    /// Queues a chunk for sending. Fails with `SessionClosed` once the
    /// session has been closed from either side.
    fn send(&self, chunk: EncodedChunk) -> Result<()>;

    /// Idempotent. Afterwards no further events are delivered.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// A freshly opened session and its inbound event stream.
pub struct OpenedSession {
    pub session: Box<dyn LiveSession>,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Opens live sessions against a specific provider.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Every failure here is reported as `VoiceError::Connection`.
    async fn open(&self, config: &SessionConfig) -> Result<OpenedSession>;
}
