//! WebSocket Relay
//!
//! Bridges each browser connection to its own Gemini Live connection:
//!
//! - `protocol`: the JSON envelopes exchanged with the browser.
//! - `client`: parsing and formatting of those envelopes over the client socket.
//! - `upstream`: the seam to the AI backend and its reconnect backoff.
//! - `interrupt`: the barge-in state machine.
//! - `registry`: the live sessions, keyed by client id.
//! - `session`: the per-connection lifecycle and the two relay pumps.

pub mod client;
pub mod error;
pub mod interrupt;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod upstream;

pub use error::{Outcome, RelayError};
pub use registry::SessionRegistry;
pub use session::{RelaySession, ws_handler};
