//! Host application for the Atlas voice client: configuration, prompt
//! loading and console output for the `atlas-voice` binary.

pub mod config;
pub mod console;
pub mod prompts;
