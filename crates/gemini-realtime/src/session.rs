//! Live sessions against the Gemini `BidiGenerateContent` WebSocket.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result as AnyResult, anyhow, bail};
use async_trait::async_trait;
use atlas_core::frame::EncodedChunk;
use atlas_core::transport::{
    LiveSession, OpenedSession, SessionConfig, Transport, TransportEvent,
};
use atlas_core::{Result, VoiceError};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message as WsMessage,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::types::{BidiGenerateContentSetup, ClientMessage, ServerMessage};

pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Inbound events buffered between the socket reader and the controller.
const EVENT_CHANNEL_CAPACITY: usize = 128;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens Gemini Live sessions with a fixed API key.
#[derive(Clone, Debug)]
pub struct GeminiLiveTransport {
    api_key: String,
    endpoint: String,
    handshake_timeout: Duration,
}

impl GeminiLiveTransport {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Overrides the WebSocket endpoint; the key is still appended as `?key=`.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Bounds the time from dialing to `setupComplete`.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    fn url(&self) -> String {
        format!("{}?key={}", self.endpoint, self.api_key)
    }

    /// Connects, sends `setup` and waits for `setupComplete`.
    async fn handshake(&self, config: &SessionConfig) -> AnyResult<WsStream> {
        let (mut ws, _) = connect_async(self.url())
            .await
            .context("Failed to connect to Gemini Live WebSocket")?;
        info!("Connected to Gemini Live WebSocket.");

        let setup = ClientMessage::Setup(BidiGenerateContentSetup::from_config(config));
        ws.send(WsMessage::Text(serde_json::to_string(&setup)?.into()))
            .await
            .context("Failed to send setup message")?;

        while let Some(frame) = ws.next().await {
            match frame.context("Error reading from Gemini WebSocket during setup")? {
                WsMessage::Close(close_frame) => {
                    bail!("Gemini closed the connection during setup: {:?}", close_frame)
                }
                other => match parse_server_message(&other) {
                    Some(Ok(message)) if message.setup_complete.is_some() => {
                        info!("Gemini session setup is complete. Ready for bidirectional streaming.");
                        return Ok(ws);
                    }
                    Some(Ok(message)) => {
                        warn!(?message, "Ignoring unexpected message during Gemini setup");
                    }
                    Some(Err(e)) => return Err(e.context("Unparseable message during setup")),
                    None => {}
                },
            }
        }
        Err(anyhow!("Gemini WebSocket ended before setup completed"))
    }
}

#[async_trait]
impl Transport for GeminiLiveTransport {
    async fn open(&self, config: &SessionConfig) -> Result<OpenedSession> {
        let ws = tokio::time::timeout(self.handshake_timeout, self.handshake(config))
            .await
            .map_err(|_| {
                VoiceError::Connection(format!(
                    "Gemini setup did not complete within {:?}",
                    self.handshake_timeout
                ))
            })?
            .map_err(|e| VoiceError::Connection(format!("{e:#}")))?;

        let (session, events) = GeminiLiveSession::spawn(ws);
        Ok(OpenedSession {
            session: Box::new(session),
            events,
        })
    }
}

/// Parses a text or binary frame as a server message. Control frames yield `None`.
fn parse_server_message(frame: &WsMessage) -> Option<AnyResult<ServerMessage>> {
    let parsed = match frame {
        WsMessage::Text(text) => serde_json::from_str::<ServerMessage>(text),
        WsMessage::Binary(bytes) => serde_json::from_slice::<ServerMessage>(bytes),
        _ => return None,
    };
    Some(parsed.map_err(anyhow::Error::from))
}

#[derive(Debug)]
enum Outbound {
    Audio(EncodedChunk),
    Close,
}

/// A running Gemini Live session: one writer task, one reader task.
pub struct GeminiLiveSession {
    outbound: mpsc::UnboundedSender<Outbound>,
    closed: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl GeminiLiveSession {
    fn spawn(ws: WsStream) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (mut sink, mut stream) = ws.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let closed = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        tokio::spawn(async move {
            while let Some(command) = outbound_rx.recv().await {
                match command {
                    Outbound::Audio(chunk) => {
                        let message = ClientMessage::RealtimeInput(chunk.into());
                        let payload = match serde_json::to_string(&message) {
                            Ok(payload) => payload,
                            Err(e) => {
                                error!(error = %e, "Failed to serialize realtime input");
                                continue;
                            }
                        };
                        if let Err(e) = sink.send(WsMessage::Text(payload.into())).await {
                            warn!(error = %e, "Failed to write to Gemini WebSocket");
                            break;
                        }
                    }
                    Outbound::Close => {
                        let _ = sink.send(WsMessage::Close(None)).await;
                        let _ = sink.close().await;
                        break;
                    }
                }
            }
            debug!("Gemini writer task finished");
        });

        let reader_closed = closed.clone();
        let reader_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    biased;
                    _ = reader_cancel.cancelled() => break,
                    frame = stream.next() => frame,
                };
                let (events, finished) = match frame {
                    Some(Ok(WsMessage::Close(close_frame))) => {
                        info!(?close_frame, "Gemini WebSocket connection closed by server.");
                        let reason = close_frame.map(|f| f.reason.to_string());
                        (vec![TransportEvent::Closed(reason)], true)
                    }
                    Some(Ok(other)) => match parse_server_message(&other) {
                        Some(Ok(message)) => (message.into_events(), false),
                        Some(Err(e)) => {
                            warn!(error = %e, "Skipping unparseable Gemini message");
                            (Vec::new(), false)
                        }
                        None => (Vec::new(), false),
                    },
                    Some(Err(e)) => {
                        error!(error = %e, "Error reading from Gemini WebSocket");
                        (vec![TransportEvent::Error(e.to_string())], true)
                    }
                    None => (vec![TransportEvent::Closed(None)], true),
                };

                for event in events {
                    tokio::select! {
                        biased;
                        _ = reader_cancel.cancelled() => return,
                        sent = events_tx.send(event) => {
                            if sent.is_err() {
                                return;
                            }
                        }
                    }
                }
                if finished {
                    reader_closed.store(true, Ordering::SeqCst);
                    break;
                }
            }
            debug!("Gemini reader task finished");
        });

        (
            Self {
                outbound: outbound_tx,
                closed,
                cancel,
            },
            events_rx,
        )
    }
}

impl LiveSession for GeminiLiveSession {
    fn send(&self, chunk: EncodedChunk) -> Result<()> {
        if self.is_closed() {
            return Err(VoiceError::SessionClosed);
        }
        self.outbound
            .send(Outbound::Audio(chunk))
            .map_err(|_| VoiceError::SessionClosed)
    }

    fn close(&self) {
        let was_closed = self.closed.swap(true, Ordering::SeqCst);
        self.cancel.cancel();
        if !was_closed {
            info!("Closing Gemini Live session");
            let _ = self.outbound.send(Outbound::Close);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for GeminiLiveSession {
    fn drop(&mut self) {
        self.close();
    }
}
