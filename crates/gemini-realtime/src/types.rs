//! Wire types for the Gemini Live `BidiGenerateContent` WebSocket protocol.
//!
//! Only the fields this client sends or reads are modelled; everything else
//! in a server message is ignored.

use atlas_core::frame::{EncodedChunk, PLAYBACK_SAMPLE_RATE};
use atlas_core::transport::{ResponseModality, SessionConfig, TransportEvent};
use serde::{Deserialize, Serialize};

// --- Client → server ---

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(BidiGenerateContentSetup),
    RealtimeInput(BidiGenerateContentRealtimeInput),
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BidiGenerateContentSetup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<AudioTranscriptionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<AudioTranscriptionConfig>,
}

impl BidiGenerateContentSetup {
    pub fn from_config(config: &SessionConfig) -> Self {
        let model = if config.model.starts_with("models/") {
            config.model.clone()
        } else {
            format!("models/{}", config.model)
        };
        let speech_config = (config.response_modality == ResponseModality::Audio).then(|| {
            SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig {
                        voice_name: config.voice_name.clone(),
                    },
                },
            }
        });
        let system_instruction = (!config.system_instruction.trim().is_empty()).then(|| Content {
            parts: vec![Part {
                text: config.system_instruction.trim().to_string(),
            }],
        });

        Self {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec![config.response_modality],
                speech_config,
            },
            system_instruction,
            input_audio_transcription: config
                .input_transcription
                .then_some(AudioTranscriptionConfig {}),
            output_audio_transcription: config
                .output_transcription
                .then_some(AudioTranscriptionConfig {}),
        }
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<ResponseModality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

/// Enables transcription; the server takes no options, so it is sent as `{}`.
#[derive(Serialize, Debug)]
pub struct AudioTranscriptionConfig {}

#[derive(Serialize, Debug)]
pub struct Content {
    pub parts: Vec<Part>,
}

#[derive(Serialize, Debug)]
pub struct Part {
    pub text: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BidiGenerateContentRealtimeInput {
    pub audio: Blob,
}

impl From<EncodedChunk> for BidiGenerateContentRealtimeInput {
    fn from(chunk: EncodedChunk) -> Self {
        Self {
            audio: Blob {
                mime_type: chunk.mime_type,
                data: chunk.data,
            },
        }
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

// --- Server → client ---

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<LiveServerContent>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct LiveServerContent {
    pub model_turn: Option<ServerContentTurn>,
    pub input_transcription: Option<ServerTranscription>,
    pub output_transcription: Option<ServerTranscription>,
}

#[derive(Deserialize, Debug, Default)]
pub struct ServerContentTurn {
    #[serde(default)]
    pub parts: Vec<ServerPart>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ServerPart {
    pub text: Option<String>,
    pub inline_data: Option<ServerBlob>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ServerBlob {
    pub mime_type: Option<String>,
    pub data: String,
}

#[derive(Deserialize, Debug)]
pub struct ServerTranscription {
    pub text: Option<String>,
}

impl ServerMessage {
    /// Splits one server message into transport events.
    ///
    /// Fields are independent: user transcript, then agent transcript, then
    /// one audio event for every inline-data part, in that order.
    pub fn into_events(self) -> Vec<TransportEvent> {
        let Some(content) = self.server_content else {
            return Vec::new();
        };
        let mut events = Vec::new();

        if let Some(text) = content.input_transcription.and_then(|t| t.text) {
            if !text.is_empty() {
                events.push(TransportEvent::UserTranscript(text));
            }
        }
        if let Some(text) = content.output_transcription.and_then(|t| t.text) {
            if !text.is_empty() {
                events.push(TransportEvent::AgentTranscript(text));
            }
        }
        if let Some(turn) = content.model_turn {
            events.extend(
                turn.parts
                    .into_iter()
                    .filter_map(|part| part.inline_data)
                    .map(|blob| {
                        TransportEvent::Audio(match blob.mime_type {
                            Some(mime_type) => EncodedChunk {
                                mime_type,
                                data: blob.data,
                            },
                            None => EncodedChunk::from_wire(blob.data, PLAYBACK_SAMPLE_RATE),
                        })
                    }),
            );
        }
        events
    }
}
