//! Defines the WebSocket message protocol between the browser client and the relay.

use serde::{Deserialize, Serialize};

/// Session settings supplied by the client in its first message.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Identifier of the synthesis voice.
    pub voice: String,
    /// Instruction given to the model for the whole session.
    pub system_prompt: String,
}

impl From<SessionConfig> for gemini_realtime::LiveSetup {
    fn from(config: SessionConfig) -> Self {
        Self {
            voice: config.voice,
            system_prompt: config.system_prompt,
        }
    }
}

/// Messages sent from the client (browser) to the relay.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Session settings. Only valid as the first message.
    Config { config: SessionConfig },
    /// A chunk of microphone audio (base64 PCM).
    Audio { data: String },
    /// A camera or screen frame (base64 JPEG).
    Image { data: String },
    /// Cancels the output of the current turn.
    Interrupt,
    /// Any type tag this relay does not handle.
    #[serde(other)]
    Unknown,
}

/// Messages sent from the relay to the client (browser).
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A generated audio fragment (base64), forwarded as received.
    Audio { data: String },
    /// The current generation turn has finished. `data` is always `true`.
    TurnComplete { data: bool },
    /// Acknowledges an interrupt.
    Interrupt { message: String },
}

pub const INTERRUPT_ACK_MESSAGE: &str = "Generation canceled.";
