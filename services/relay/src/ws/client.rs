//! The client-facing side of a session: envelope parsing and formatting over
//! a duplex text transport.

use super::{
    error::{Outcome, RelayError},
    protocol::{ClientMessage, INTERRUPT_ACK_MESSAGE, ServerMessage, SessionConfig},
};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

/// One inbound frame from the client transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// A duplex, frame-oriented connection to the browser.
#[async_trait]
pub trait ClientTransport: Send + Sync {
    /// Waits for the next data frame. Fails with [`RelayError::ClientClosed`]
    /// once the peer has gone.
    async fn recv(&self) -> Result<ClientFrame, RelayError>;

    async fn send_text(&self, text: String) -> Result<(), RelayError>;
}

/// [`ClientTransport`] over an axum WebSocket.
pub struct AxumTransport {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    stream: Mutex<SplitStream<WebSocket>>,
}

impl AxumTransport {
    pub fn new(socket: WebSocket) -> Self {
        let (sink, stream) = socket.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }
    }
}

#[async_trait]
impl ClientTransport for AxumTransport {
    async fn recv(&self) -> Result<ClientFrame, RelayError> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(ClientFrame::Text(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(data))) => return Ok(ClientFrame::Binary(data.to_vec())),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Client sent close frame.");
                    return Err(RelayError::ClientClosed);
                }
                Some(Err(e)) => {
                    debug!("Error receiving from client WebSocket: {:?}", e);
                    return Err(RelayError::ClientClosed);
                }
                None => return Err(RelayError::ClientClosed),
            }
        }
    }

    async fn send_text(&self, text: String) -> Result<(), RelayError> {
        self.sink
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await
            .map_err(|_| RelayError::ClientClosed)
    }
}

/// Validates inbound envelopes and writes outbound ones.
pub struct ClientChannel<T> {
    transport: T,
    closed: AtomicBool,
}

impl<T: ClientTransport> ClientChannel<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn recv(&self) -> Result<ClientFrame, RelayError> {
        if self.is_closed() {
            return Err(RelayError::ClientClosed);
        }
        let frame = self.transport.recv().await;
        if frame.is_err() {
            self.closed.store(true, Ordering::Release);
        }
        frame
    }

    /// Reads the first message, which must be `config`.
    pub async fn accept_first_config(&self) -> Result<SessionConfig, RelayError> {
        let text = match self.recv().await? {
            ClientFrame::Text(text) => text,
            ClientFrame::Binary(_) => {
                return Err(RelayError::ProtocolViolation(
                    "first message must be a text `config` message".to_string(),
                ));
            }
        };
        let value: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| RelayError::MalformedPayload(e.to_string()))?;
        match value.get("type").and_then(|t| t.as_str()) {
            Some("config") => {}
            Some(other) => {
                return Err(RelayError::ProtocolViolation(format!(
                    "first message must be `config`, got `{other}`"
                )));
            }
            None => {
                return Err(RelayError::ProtocolViolation(
                    "first message must be `config`".to_string(),
                ));
            }
        }
        match serde_json::from_value(value) {
            Ok(ClientMessage::Config { config }) => Ok(config),
            Ok(_) => Err(RelayError::ProtocolViolation(
                "first message must be `config`".to_string(),
            )),
            Err(e) => Err(RelayError::MalformedPayload(e.to_string())),
        }
    }

    /// Reads the next message. Unparseable frames are skipped, not fatal;
    /// well-formed messages of an unhandled type come back as
    /// [`ClientMessage::Unknown`].
    pub async fn receive_next(&self) -> Outcome<ClientMessage> {
        let text = match self.recv().await {
            Ok(ClientFrame::Text(text)) => text,
            Ok(ClientFrame::Binary(data)) => {
                return Outcome::Skip(format!("unexpected binary frame ({} bytes)", data.len()));
            }
            Err(e) => return Outcome::Fatal(e),
        };
        match serde_json::from_str::<ClientMessage>(&text) {
            Ok(msg) => Outcome::Ok(msg),
            Err(e) => Outcome::Skip(format!("invalid message: {e}")),
        }
    }

    async fn send(&self, msg: ServerMessage) -> Result<(), RelayError> {
        if self.is_closed() {
            return Err(RelayError::ClientClosed);
        }
        let serialized = serde_json::to_string(&msg)
            .map_err(|e| RelayError::MalformedPayload(e.to_string()))?;
        let sent = self.transport.send_text(serialized).await;
        if sent.is_err() {
            self.closed.store(true, Ordering::Release);
        }
        sent
    }

    pub async fn send_audio(&self, data: &str) -> Result<(), RelayError> {
        self.send(ServerMessage::Audio {
            data: data.to_string(),
        })
        .await
    }

    pub async fn send_turn_complete(&self) -> Result<(), RelayError> {
        self.send(ServerMessage::TurnComplete { data: true }).await
    }

    pub async fn send_interrupt_ack(&self, message: &str) -> Result<(), RelayError> {
        self.send(ServerMessage::Interrupt {
            message: message.to_string(),
        })
        .await
    }

    pub async fn acknowledge_interrupt(&self) -> Result<(), RelayError> {
        self.send_interrupt_ack(INTERRUPT_ACK_MESSAGE).await
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{channel_transport, text};
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_accept_first_config() {
        let (transport, inbound, _outbound) = channel_transport();
        let channel = ClientChannel::new(transport);
        inbound
            .send(text(json!({
                "type": "config",
                "config": { "voice": "Puck", "systemPrompt": "Talk like a pirate." }
            })))
            .unwrap();

        let config = channel.accept_first_config().await.unwrap();
        assert_eq!(config.voice, "Puck");
        assert_eq!(config.system_prompt, "Talk like a pirate.");
    }

    #[tokio::test]
    async fn test_first_message_must_be_config() {
        for first in [
            json!({ "type": "audio", "data": "AAA=" }),
            json!({ "type": "image", "data": "/9j/4AAQ" }),
            json!({ "type": "interrupt" }),
        ] {
            let (transport, inbound, _outbound) = channel_transport();
            let channel = ClientChannel::new(transport);
            inbound.send(text(first.clone())).unwrap();

            assert!(
                matches!(
                    channel.accept_first_config().await,
                    Err(RelayError::ProtocolViolation(_))
                ),
                "{first} was accepted as the first message"
            );
        }
    }

    #[tokio::test]
    async fn test_config_without_required_fields_is_malformed() {
        let (transport, inbound, _outbound) = channel_transport();
        let channel = ClientChannel::new(transport);
        inbound.send(text(json!({ "type": "config", "config": { "voice": "Puck" } }))).unwrap();

        assert!(matches!(
            channel.accept_first_config().await,
            Err(RelayError::MalformedPayload(_))
        ));

        let (transport, inbound, _outbound) = channel_transport();
        let channel = ClientChannel::new(transport);
        inbound.send(ClientFrame::Text("{not json".to_string())).unwrap();
        assert!(matches!(
            channel.accept_first_config().await,
            Err(RelayError::MalformedPayload(_))
        ));
    }

    #[tokio::test]
    async fn test_receive_next_skips_bad_frames_and_fails_on_close() {
        let (transport, inbound, _outbound) = channel_transport();
        let channel = ClientChannel::new(transport);
        inbound.send(ClientFrame::Text("garbage".to_string())).unwrap();
        inbound.send(text(json!({ "type": "audio" }))).unwrap();
        inbound.send(text(json!({ "type": "dance" }))).unwrap();
        inbound.send(ClientFrame::Binary(vec![1, 2, 3])).unwrap();
        inbound.send(text(json!({ "type": "interrupt" }))).unwrap();
        drop(inbound);

        assert!(matches!(channel.receive_next().await, Outcome::Skip(_)));
        assert!(matches!(channel.receive_next().await, Outcome::Skip(_)));
        assert!(matches!(
            channel.receive_next().await,
            Outcome::Ok(ClientMessage::Unknown)
        ));
        assert!(matches!(channel.receive_next().await, Outcome::Skip(_)));
        assert!(matches!(
            channel.receive_next().await,
            Outcome::Ok(ClientMessage::Interrupt)
        ));
        assert!(matches!(
            channel.receive_next().await,
            Outcome::Fatal(RelayError::ClientClosed)
        ));
        assert!(channel.is_closed());
    }

    #[tokio::test]
    async fn test_outbound_envelopes() {
        let (transport, _inbound, mut outbound) = channel_transport();
        let channel = ClientChannel::new(transport);

        channel.send_audio("AAA=").await.unwrap();
        channel.send_turn_complete().await.unwrap();
        channel.acknowledge_interrupt().await.unwrap();

        let sent: Vec<serde_json::Value> = (0..3)
            .map(|_| serde_json::from_str(&outbound.try_recv().unwrap()).unwrap())
            .collect();
        assert_eq!(
            sent,
            vec![
                json!({ "type": "audio", "data": "AAA=" }),
                json!({ "type": "turn_complete", "data": true }),
                json!({ "type": "interrupt", "message": "Generation canceled." }),
            ]
        );
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (transport, _inbound, outbound) = channel_transport();
        let channel = ClientChannel::new(transport);
        drop(outbound);

        assert!(matches!(
            channel.send_audio("AAA=").await,
            Err(RelayError::ClientClosed)
        ));
        assert!(channel.is_closed());
        assert!(matches!(
            channel.send_turn_complete().await,
            Err(RelayError::ClientClosed)
        ));
    }
}
