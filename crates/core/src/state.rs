use serde::{Deserialize, Serialize};

/// Connection status reported to the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
    /// The agent's audio is currently playing.
    Speaking,
}

/// Who a transcript fragment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Agent,
}

/// A recognized-speech fragment, forwarded verbatim to the transcript callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    pub text: String,
    pub speaker: Speaker,
}

impl TranscriptEvent {
    pub fn is_user(&self) -> bool {
        self.speaker == Speaker::User
    }
}
