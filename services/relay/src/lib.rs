//! Live Relay Library Crate
//!
//! Relays audio and image frames between browser WebSocket clients and the
//! Gemini Live streaming API. The `relay` binary is a thin wrapper around
//! this library.

pub mod config;
pub mod router;
pub mod state;
pub mod ws;
