//! A single Gemini Live WebSocket connection with lazy reconnect support.

use crate::types::{
    AUDIO_PCM_MIME, ClientMessage, IMAGE_JPEG_MIME, LiveSetup, RawFrame, ServerMessage, SetupAck,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::{
    fmt,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::{
    net::TcpStream,
    sync::{Mutex, mpsc, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message as WsMessage,
};
use tracing::{debug, info, warn};

pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-exp";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;

const FRAME_BUFFER: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    #[error("configuration must be set before connecting")]
    ConfigMissing,
    #[error("configuration was already set for this connection")]
    ConfigAlreadySet,
    #[error("failed to open upstream connection: {0}")]
    Connect(String),
    #[error("upstream closed before acknowledging setup: {0}")]
    Handshake(String),
    #[error("upstream is not connected")]
    NotConnected,
    #[error("upstream connection closed")]
    Closed,
    #[error("upstream transport error: {0}")]
    Transport(String),
    #[error("failed to encode message: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Where and as what model to connect.
#[derive(Clone)]
pub struct LiveEndpoint {
    pub url: String,
    pub api_key: String,
    pub model: String,
}

impl LiveEndpoint {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            url: DEFAULT_ENDPOINT.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    fn request_url(&self) -> String {
        format!("{}?key={}", self.url, self.api_key)
    }
}

impl fmt::Debug for LiveEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveEndpoint")
            .field("url", &self.url)
            .field("api_key", &"[redacted]")
            .field("model", &self.model)
            .finish()
    }
}

/// Owns at most one live WebSocket to the Gemini backend at a time.
///
/// Writes go straight to the socket sink. Reads are drained by a background
/// task into a queue that outlives individual sockets, so [`receive`] keeps
/// working across a reconnect. After [`close`], [`receive`] fails until the
/// next successful [`connect`].
///
/// [`receive`]: LiveConnection::receive
/// [`close`]: LiveConnection::close
/// [`connect`]: LiveConnection::connect
pub struct LiveConnection {
    endpoint: LiveEndpoint,
    setup: OnceLock<LiveSetup>,
    writer: Mutex<Option<WsSink>>,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
    connected: Arc<AtomicBool>,
    closed: watch::Sender<bool>,
    frames_tx: mpsc::Sender<Result<RawFrame, LiveError>>,
    frames_rx: Mutex<mpsc::Receiver<Result<RawFrame, LiveError>>>,
}

impl LiveConnection {
    pub fn new(endpoint: LiveEndpoint) -> Self {
        let (frames_tx, frames_rx) = mpsc::channel(FRAME_BUFFER);
        let (closed, _) = watch::channel(false);
        Self {
            endpoint,
            setup: OnceLock::new(),
            writer: Mutex::new(None),
            reader: std::sync::Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            closed,
            frames_tx,
            frames_rx: Mutex::new(frames_rx),
        }
    }

    /// Stores the session settings. Can only be done once.
    pub fn set_setup(&self, setup: LiveSetup) -> Result<(), LiveError> {
        self.setup.set(setup).map_err(|_| LiveError::ConfigAlreadySet)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Opens the socket, sends the setup handshake and waits for the first
    /// server frame, which acknowledges the setup.
    ///
    /// An existing connection is torn down first.
    pub async fn connect(&self) -> Result<SetupAck, LiveError> {
        let setup = self.setup.get().ok_or(LiveError::ConfigMissing)?;
        self.shutdown().await;

        let (ws_stream, _) = connect_async(self.endpoint.request_url())
            .await
            .map_err(|e| LiveError::Connect(e.to_string()))?;
        info!(model = %self.endpoint.model, "Connected to Gemini Live WebSocket.");
        let (mut sink, mut stream) = ws_stream.split();

        let setup_msg = ClientMessage::setup(&self.endpoint.model, setup);
        sink.send(WsMessage::Text(serde_json::to_string(&setup_msg)?.into()))
            .await
            .map_err(|e| LiveError::Connect(e.to_string()))?;

        let raw = await_setup_ack(&mut stream).await?;
        let setup_complete = ServerMessage::parse(&raw)
            .map(|msg| msg.setup_complete.is_some())
            .unwrap_or(false);
        if setup_complete {
            info!("Gemini session setup is complete.");
        } else {
            warn!(
                frame = %raw.as_str(),
                "First Gemini frame was not `setupComplete`; treating it as the acknowledgement."
            );
        }

        *self.writer.lock().await = Some(sink);
        self.connected.store(true, Ordering::Release);
        self.closed.send_replace(false);
        let handle = tokio::spawn(drain_frames(
            stream,
            self.frames_tx.clone(),
            self.connected.clone(),
        ));
        if let Some(old) = self.reader_slot().replace(handle) {
            old.abort();
        }

        Ok(SetupAck {
            setup_complete,
            raw,
        })
    }

    pub async fn send_audio(&self, data: &str) -> Result<(), LiveError> {
        self.send_media(AUDIO_PCM_MIME, data).await
    }

    pub async fn send_image(&self, data: &str) -> Result<(), LiveError> {
        self.send_media(IMAGE_JPEG_MIME, data).await
    }

    async fn send_media(&self, mime_type: &str, data: &str) -> Result<(), LiveError> {
        let payload = serde_json::to_string(&ClientMessage::media_chunk(mime_type, data))?;
        let mut writer = self.writer.lock().await;
        let sink = writer.as_mut().ok_or(LiveError::NotConnected)?;
        if let Err(e) = sink.send(WsMessage::Text(payload.into())).await {
            // The socket is unusable; the next audio send reconnects.
            writer.take();
            self.connected.store(false, Ordering::Release);
            return Err(LiveError::Transport(e.to_string()));
        }
        debug!(mime_type, bytes = data.len(), "Sent media chunk to Gemini.");
        Ok(())
    }

    /// Waits for the next inbound frame.
    ///
    /// Fails with [`LiveError::Closed`] (or the transport error) once the
    /// socket that produced the queued frames has gone away, and with
    /// [`LiveError::Closed`] while the connection is closed.
    pub async fn receive(&self) -> Result<RawFrame, LiveError> {
        let mut frames = self.frames_rx.lock().await;
        let mut closed = self.closed.subscribe();
        tokio::select! {
            biased;
            _ = wait_closed(&mut closed) => Err(LiveError::Closed),
            frame = frames.recv() => frame.unwrap_or(Err(LiveError::Closed)),
        }
    }

    /// Releases the socket and wakes any pending [`receive`]. Safe to call
    /// any number of times.
    ///
    /// [`receive`]: LiveConnection::receive
    pub async fn close(&self) {
        self.shutdown().await;
        self.closed.send_replace(true);
    }

    async fn shutdown(&self) {
        if let Some(handle) = self.reader_slot().take() {
            handle.abort();
        }
        let sink = self.writer.lock().await.take();
        self.connected.store(false, Ordering::Release);
        if let Some(mut sink) = sink {
            info!("Closing Gemini websocket connection.");
            let _ = sink.send(WsMessage::Close(None)).await;
            let _ = sink.close().await;
        }
    }

    fn reader_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.reader
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Drop for LiveConnection {
    fn drop(&mut self) {
        if let Some(handle) = self.reader_slot().take() {
            handle.abort();
        }
    }
}

async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    while !*closed.borrow_and_update() {
        if closed.changed().await.is_err() {
            return;
        }
    }
}

async fn await_setup_ack(stream: &mut SplitStream<WsStream>) -> Result<RawFrame, LiveError> {
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => return Ok(RawFrame(text.as_str().to_owned())),
            Ok(WsMessage::Binary(bytes)) => {
                return String::from_utf8(bytes.to_vec())
                    .map(RawFrame)
                    .map_err(|e| LiveError::Handshake(e.to_string()));
            }
            Ok(WsMessage::Close(frame)) => {
                return Err(LiveError::Handshake(format!("close frame: {frame:?}")));
            }
            Ok(_) => continue,
            Err(e) => return Err(LiveError::Handshake(e.to_string())),
        }
    }
    Err(LiveError::Handshake("stream ended".to_string()))
}

async fn drain_frames(
    mut stream: SplitStream<WsStream>,
    frames_tx: mpsc::Sender<Result<RawFrame, LiveError>>,
    connected: Arc<AtomicBool>,
) {
    let ending = loop {
        let frame = match stream.next().await {
            Some(Ok(WsMessage::Text(text))) => RawFrame(text.as_str().to_owned()),
            Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => RawFrame(text),
                Err(e) => {
                    warn!("Dropping non UTF-8 binary frame from Gemini: {}", e);
                    continue;
                }
            },
            Some(Ok(WsMessage::Close(close_frame))) => {
                info!(?close_frame, "Gemini WebSocket connection closed by server.");
                break LiveError::Closed;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                warn!("Error reading from Gemini WebSocket: {}", e);
                break LiveError::Transport(e.to_string());
            }
            None => break LiveError::Closed,
        };
        if frames_tx.send(Ok(frame)).await.is_err() {
            return;
        }
    };
    connected.store(false, Ordering::Release);
    let _ = frames_tx.send(Err(ending)).await;
}
