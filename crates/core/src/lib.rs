//! Core of the Atlas voice client.
//!
//! Captures microphone audio, streams it to a live conversational agent and
//! plays the agent's voice back without gaps. Devices and the remote session
//! are reached through the [`device`] and [`transport`] seams, so everything
//! here runs the same against real hardware or test fakes.

pub mod capture;
pub mod codec;
pub mod controller;
pub mod device;
pub mod error;
pub mod frame;
pub mod playback;
pub mod state;
pub mod transport;

pub use controller::VoiceAgent;
pub use error::{Result, VoiceError};
pub use state::{ConnectionState, Speaker, TranscriptEvent};
pub use transport::SessionConfig;
