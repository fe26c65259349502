//! Error and outcome types shared by the relay pumps.

use gemini_realtime::LiveError;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("configuration must be set before connecting upstream")]
    ConfigMissing,
    #[error("configuration was already set for this session")]
    ConfigAlreadySet,
    #[error("upstream is not connected")]
    NotConnected,
    #[error("failed to connect upstream: {0}")]
    UpstreamConnect(String),
    #[error("upstream connection closed: {0}")]
    UpstreamClosed(String),
    #[error("failed to send upstream: {0}")]
    UpstreamSend(String),
    #[error("client connection closed")]
    ClientClosed,
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("gave up reconnecting upstream after {0} failed attempts")]
    ReconnectExhausted(u32),
}

impl RelayError {
    /// Closures of either transport are the normal way a session ends.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, RelayError::ClientClosed | RelayError::UpstreamClosed(_))
    }
}

impl From<LiveError> for RelayError {
    fn from(err: LiveError) -> Self {
        match err {
            LiveError::ConfigMissing => RelayError::ConfigMissing,
            LiveError::ConfigAlreadySet => RelayError::ConfigAlreadySet,
            LiveError::NotConnected => RelayError::NotConnected,
            LiveError::Connect(reason) | LiveError::Handshake(reason) => {
                RelayError::UpstreamConnect(reason)
            }
            LiveError::Closed => RelayError::UpstreamClosed("closed by server".to_string()),
            LiveError::Transport(reason) => RelayError::UpstreamClosed(reason),
            LiveError::Serialize(e) => RelayError::UpstreamSend(e.to_string()),
        }
    }
}

/// The result of reading one inbound client frame.
#[derive(Debug)]
pub enum Outcome<T> {
    Ok(T),
    /// The frame was unusable but the session continues.
    Skip(String),
    /// The session cannot continue.
    Fatal(RelayError),
}
