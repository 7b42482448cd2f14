use std::path::PathBuf;
use std::time::Duration;

use atlas_core::SessionConfig;
use atlas_core::transport::{DEFAULT_LIVE_MODEL, DEFAULT_VOICE};
use gemini_realtime::{DEFAULT_ENDPOINT, DEFAULT_HANDSHAKE_TIMEOUT};
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub gemini_api_key: String,
    pub live_model: String,
    pub voice: String,
    pub endpoint: String,
    pub handshake_timeout: Duration,
    pub log_level: Level,
    pub prompts_path: PathBuf,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let gemini_api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;

        let live_model =
            std::env::var("GEMINI_LIVE_MODEL").unwrap_or_else(|_| DEFAULT_LIVE_MODEL.to_string());
        let voice = std::env::var("GEMINI_VOICE").unwrap_or_else(|_| DEFAULT_VOICE.to_string());
        let endpoint =
            std::env::var("GEMINI_LIVE_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());

        let handshake_timeout = match std::env::var("HANDSHAKE_TIMEOUT_SECS") {
            Ok(value) => match value.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::InvalidValue(
                        "HANDSHAKE_TIMEOUT_SECS".to_string(),
                        format!("'{}' is not a positive number of seconds", value),
                    ));
                }
            },
            Err(_) => DEFAULT_HANDSHAKE_TIMEOUT,
        };

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let prompts_path = std::env::var("PROMPTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./prompts"));

        Ok(Self {
            gemini_api_key,
            live_model,
            voice,
            endpoint,
            handshake_timeout,
            log_level,
            prompts_path,
        })
    }

    /// Session settings for this configuration with the given instruction.
    pub fn session_config(&self, system_instruction: String) -> SessionConfig {
        SessionConfig {
            model: self.live_model.clone(),
            voice_name: self.voice.clone(),
            system_instruction,
            ..SessionConfig::default()
        }
    }
}
