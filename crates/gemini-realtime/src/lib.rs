//! Gemini Live transport for the Atlas voice client.
//!
//! Implements [`atlas_core::transport::Transport`] over the
//! `BidiGenerateContent` WebSocket: a `setup` handshake, outbound
//! `realtimeInput` audio and inbound transcripts and audio.

pub mod session;
pub mod types;

pub use session::{DEFAULT_ENDPOINT, DEFAULT_HANDSHAKE_TIMEOUT, GeminiLiveSession, GeminiLiveTransport};
