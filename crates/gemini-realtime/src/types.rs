//! Wire types for the Gemini Live `BidiGenerateContent` WebSocket.
//!
//! Outbound messages are written in the snake_case form the service accepts;
//! inbound frames arrive camelCase. Inbound types are deliberately permissive
//! (every field optional) so unknown or partial frames still decode.

use serde::{Deserialize, Serialize};

pub const AUDIO_PCM_MIME: &str = "audio/pcm";
pub const IMAGE_JPEG_MIME: &str = "image/jpeg";

/// Session settings sent in the setup handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSetup {
    /// Name of a prebuilt synthesis voice, e.g. "Puck".
    pub voice: String,
    /// Sent as the sole part of the system instruction.
    pub system_prompt: String,
}

// --- Outbound ---

#[derive(Serialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum ClientMessage {
    Setup(BidiGenerateContentSetup),
    RealtimeInput(BidiGenerateContentRealtimeInput),
}

impl ClientMessage {
    /// Builds the handshake message for `model` (without the `models/` prefix).
    pub fn setup(model: &str, setup: &LiveSetup) -> Self {
        ClientMessage::Setup(BidiGenerateContentSetup {
            model: format!("models/{model}"),
            generation_config: GenerationConfig {
                response_modalities: vec![ResponseModality::Audio],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: setup.voice.clone(),
                        },
                    },
                },
            },
            tools: vec![
                Tool::GoogleSearch(serde_json::Map::new()),
                Tool::FunctionDeclarations(vec![]),
            ],
            system_instruction: Content {
                parts: vec![TextPart {
                    text: setup.system_prompt.clone(),
                }],
            },
        })
    }

    /// Wraps one base64 payload in a realtime-input media chunk.
    ///
    /// The payload is moved through untouched.
    pub fn media_chunk(mime_type: &str, data: &str) -> Self {
        ClientMessage::RealtimeInput(BidiGenerateContentRealtimeInput {
            media_chunks: vec![Blob {
                data: data.to_string(),
                mime_type: mime_type.to_string(),
            }],
        })
    }
}

#[derive(Serialize, Debug)]
pub struct BidiGenerateContentSetup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub tools: Vec<Tool>,
    pub system_instruction: Content,
}

#[derive(Serialize, Debug)]
pub struct GenerationConfig {
    pub response_modalities: Vec<ResponseModality>,
    pub speech_config: SpeechConfig,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseModality {
    Audio,
}

#[derive(Serialize, Debug)]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Serialize, Debug)]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize, Debug)]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Serialize, Debug)]
pub enum Tool {
    #[serde(rename = "googleSearch")]
    GoogleSearch(serde_json::Map<String, serde_json::Value>),
    #[serde(rename = "function_declarations")]
    FunctionDeclarations(Vec<serde_json::Value>),
}

#[derive(Serialize, Debug)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Serialize, Debug)]
pub struct TextPart {
    pub text: String,
}

#[derive(Serialize, Debug)]
pub struct BidiGenerateContentRealtimeInput {
    pub media_chunks: Vec<Blob>,
}

#[derive(Serialize, Debug)]
pub struct Blob {
    pub data: String,
    pub mime_type: String,
}

// --- Inbound ---

/// An inbound frame exactly as received, before any decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame(pub String);

impl RawFrame {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The acknowledgement returned by a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupAck {
    /// Whether the frame carried `setupComplete`.
    pub setup_complete: bool,
    pub raw: RawFrame,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<ServerContent>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<ServerTurn>,
    pub candidates: Option<Vec<Candidate>>,
    pub turn_complete: Option<bool>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct Candidate {
    pub content: Option<ServerTurn>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct ServerTurn {
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
    pub data: Option<String>,
}

impl ServerMessage {
    pub fn parse(frame: &RawFrame) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame.as_str())
    }

    /// Content parts of the current turn, read from `modelTurn` or else from
    /// the first candidate. Empty when neither is present.
    pub fn parts(&self) -> &[ServerPart] {
        let Some(content) = &self.server_content else {
            return &[];
        };
        if let Some(turn) = &content.model_turn {
            return &turn.parts;
        }
        content
            .candidates
            .as_ref()
            .and_then(|candidates| candidates.first())
            .and_then(|candidate| candidate.content.as_ref())
            .map(|turn| turn.parts.as_slice())
            .unwrap_or(&[])
    }

    /// Base64 payloads of every part carrying inline media data. Blobs
    /// without a payload are passed over.
    pub fn inline_data(&self) -> impl Iterator<Item = &str> {
        self.parts()
            .iter()
            .filter_map(|part| part.inline_data.as_ref())
            .filter_map(|blob| blob.data.as_deref())
    }

    pub fn is_turn_complete(&self) -> bool {
        self.server_content
            .as_ref()
            .and_then(|content| content.turn_complete)
            .unwrap_or(false)
    }
}
