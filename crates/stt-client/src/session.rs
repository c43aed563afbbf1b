//! WebSocket session with the transcription server.
//!
//! The socket has exactly one receive path: after the `ready` handshake, a
//! reader task owns the stream half and forwards every decoded
//! [`ServerMessage`] into one channel. Whoever is interested (the daemon's
//! event loop, the one-shot flow) consumes that channel; nothing else ever
//! reads the socket, so a server error during recording and the `final`
//! reply after `end` cannot race each other.

use std::time::Duration;

use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};

use stt_core::protocol::{encode_pcm_frame, MAX_FRAME_BYTES};
use stt_core::{AudioSettings, ClientMessage, ServerMessage};

use crate::error::ClientError;

/// Per-attempt connection timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Wait for `ready` after the socket opens.
pub const READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Wait for `final` after `end`.
pub const FINAL_TIMEOUT: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// An established session: the write half plus the reader task.
pub struct ServerConnection {
    sink: SplitSink<WsStream, Message>,
    reader: JoinHandle<()>,
    session_id: String,
}

impl ServerConnection {
    /// Connect, await `ready`, and spawn the reader task. Every subsequent
    /// server message is delivered through `events`.
    pub async fn connect(
        url: &str,
        events: mpsc::UnboundedSender<ServerMessage>,
    ) -> Result<Self, ClientError> {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(MAX_FRAME_BYTES);

        let (ws, _response) = tokio::time::timeout(
            CONNECT_TIMEOUT,
            connect_async_with_config(url, Some(config), false),
        )
        .await
        .map_err(|_| ClientError::Timeout("connection"))?
        .map_err(|e| ClientError::Connect(e.to_string()))?;

        let (sink, mut stream) = ws.split();

        // Handshake: the first frame must be `ready`.
        let session_id = tokio::time::timeout(READY_TIMEOUT, read_ready(&mut stream))
            .await
            .map_err(|_| ClientError::Timeout("ready handshake"))??;

        tracing::info!(session = %session_id, "Connected to server");

        // Single receive path from here on.
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                match ServerMessage::from_json(&text) {
                    Ok(msg) => {
                        if events.send(msg).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "Ignoring undecodable server frame");
                    }
                }
            }
            tracing::debug!("Server reader task finished");
        });

        Ok(Self {
            sink,
            reader,
            session_id,
        })
    }

    /// The id the server assigned at admission.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Send the session `config` message.
    pub async fn send_config(&mut self, audio: &AudioSettings) -> Result<(), ClientError> {
        let msg = ClientMessage::Config {
            sample_rate: audio.sample_rate,
            language: "en".to_string(),
        };
        self.send_control(&msg).await
    }

    /// Stream one utterance in capture-sized chunks, then signal `end`.
    pub async fn send_utterance(
        &mut self,
        samples: &[i16],
        chunk_samples: usize,
    ) -> Result<(), ClientError> {
        self.send_audio(samples, chunk_samples).await?;
        self.send_end().await
    }

    /// Stream audio in capture-sized binary frames.
    pub async fn send_audio(
        &mut self,
        samples: &[i16],
        chunk_samples: usize,
    ) -> Result<(), ClientError> {
        for chunk in samples.chunks(chunk_samples.max(1)) {
            self.sink
                .send(Message::Binary(encode_pcm_frame(chunk)))
                .await
                .map_err(|e| ClientError::Socket(e.to_string()))?;
        }
        Ok(())
    }

    /// Signal end of utterance.
    pub async fn send_end(&mut self) -> Result<(), ClientError> {
        self.send_control(&ClientMessage::End).await
    }

    /// Send a keepalive no-op.
    pub async fn send_keepalive(&mut self) -> Result<(), ClientError> {
        self.send_control(&ClientMessage::Keepalive).await
    }

    /// Close the socket and stop the reader.
    pub async fn close(mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
        let _ = self.sink.close().await;
        self.reader.abort();
    }

    async fn send_control(&mut self, msg: &ClientMessage) -> Result<(), ClientError> {
        let json = msg.to_json()?;
        self.sink
            .send(Message::Text(json))
            .await
            .map_err(|e| ClientError::Socket(e.to_string()))
    }
}

impl Drop for ServerConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_ready(stream: &mut futures_util::stream::SplitStream<WsStream>) -> Result<String, ClientError> {
    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => {
                return Err(ClientError::Connect("server closed during handshake".into()));
            }
            Ok(_) => continue,
            Err(e) => return Err(ClientError::Socket(e.to_string())),
        };
        return match ServerMessage::from_json(&text)? {
            ServerMessage::Ready { session_id } => Ok(session_id),
            ServerMessage::Error { code, message } => Err(ClientError::Server { code, message }),
            other => Err(ClientError::UnexpectedMessage(format!("{other:?}"))),
        };
    }
    Err(ClientError::Connect("connection closed before ready".into()))
}

/// Wait on the shared message channel for this utterance's reply.
///
/// Returns the transcribed text, or the in-band error. Non-reply messages
/// are logged and skipped.
pub async fn await_final(
    events: &mut mpsc::UnboundedReceiver<ServerMessage>,
) -> Result<(String, f32), ClientError> {
    let deadline = tokio::time::Instant::now() + FINAL_TIMEOUT;
    loop {
        let msg = tokio::time::timeout_at(deadline, events.recv())
            .await
            .map_err(|_| ClientError::Timeout("transcription"))?
            .ok_or_else(|| ClientError::Socket("connection closed".into()))?;
        match msg {
            ServerMessage::Final { text, confidence } => return Ok((text, confidence)),
            ServerMessage::Error { code, message } => {
                return Err(ClientError::Server { code, message });
            }
            other => tracing::debug!(?other, "Skipping message while waiting for final"),
        }
    }
}
