//! Client for the Gemini Live bidirectional streaming API.
//!
//! - `types`: the setup handshake, realtime-input media chunks and the
//!   permissive decoding of server frames.
//! - `connection`: one WebSocket connection with handshake, send, receive and
//!   idempotent close.

pub mod connection;
pub mod types;

pub use connection::{DEFAULT_ENDPOINT, DEFAULT_MODEL, LiveConnection, LiveEndpoint, LiveError};
pub use types::{LiveSetup, RawFrame, ServerMessage, SetupAck};
