//! WebSocket runtime: listener, admission, and the per-session frame loop.
//!
//! Sessions are admitted under a counted semaphore. When `reject_when_full`
//! is set, a connection beyond capacity receives `error/SERVER_FULL` and is
//! closed without ever seeing `ready`; otherwise the handler queues on the
//! semaphore while the listener keeps accepting.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Router;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use stt_core::protocol::{decode_pcm_frame, MAX_FRAME_BYTES};
use stt_core::{ClientMessage, ErrorCode, ServerMessage, ServerSettings, Settings};

use crate::error::ServerError;
use crate::session::Session;
use crate::worker::TranscriberWorker;

// ── Shared state ───────────────────────────────────────────────────

/// State shared by every connection handler.
#[derive(Clone)]
pub struct AppState {
    settings: ServerSettings,
    worker: TranscriberWorker,
    permits: Arc<Semaphore>,
    sessions: Arc<Mutex<HashSet<String>>>,
    shutdown: CancellationToken,
}

impl AppState {
    /// Build the shared state around an already-spawned worker.
    #[must_use]
    pub fn new(settings: ServerSettings, worker: TranscriberWorker) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_connections));
        Self {
            settings,
            worker,
            permits,
            sessions: Arc::new(Mutex::new(HashSet::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Token cancelled when the server is shutting down; session loops
    /// watch it so graceful shutdown does not wait on idle clients.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn active_sessions(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    fn register(&self, id: &str) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(id.to_string());
        }
    }

    fn deregister(&self, id: &str) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(id);
        }
    }
}

/// Build the router: a single WebSocket endpoint at `/`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", axum::routing::get(ws_upgrade))
        .with_state(state)
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_connection(socket, state))
}

// ── Admission ──────────────────────────────────────────────────────

async fn handle_connection(mut socket: WebSocket, state: AppState) {
    let permit = if state.settings.reject_when_full {
        match Arc::clone(&state.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::warn!(
                    active = state.active_sessions(),
                    "Rejecting connection: server full"
                );
                let reply = ServerMessage::Error {
                    code: ErrorCode::ServerFull,
                    message: format!(
                        "Server at capacity ({} connections). Try again later.",
                        state.settings.max_connections
                    ),
                };
                let _ = send_msg(&mut socket, &reply).await;
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
        }
    } else {
        match Arc::clone(&state.permits).acquire_owned().await {
            Ok(permit) => permit,
            // Semaphore closed only during shutdown.
            Err(_) => return,
        }
    };

    let session_id = new_session_id();
    state.register(&session_id);
    tracing::info!(
        session = %session_id,
        active = state.active_sessions(),
        "New connection"
    );

    let mut session = Session::new(session_id.clone());
    if let Err(e) = drive_session(&mut socket, &state, &mut session).await {
        tracing::error!(session = %session_id, error = %e, "Session error");
        let reply = ServerMessage::Error {
            code: ErrorCode::Internal,
            message: e.to_string(),
        };
        let _ = send_msg(&mut socket, &reply).await;
    }

    state.deregister(&session_id);
    drop(permit);
    tracing::info!(
        session = %session_id,
        active = state.active_sessions(),
        "Connection closed"
    );
}

// ── Session loop ───────────────────────────────────────────────────

async fn drive_session(
    socket: &mut WebSocket,
    state: &AppState,
    session: &mut Session,
) -> Result<(), axum::Error> {
    send_msg(
        socket,
        &ServerMessage::Ready {
            session_id: session.id().to_string(),
        },
    )
    .await?;

    loop {
        let incoming = tokio::select! {
            () = state.shutdown.cancelled() => break,
            incoming = socket.recv() => incoming,
        };

        // None: peer went away. Err: protocol violation; nothing to salvage.
        let Some(frame) = incoming.transpose().unwrap_or(None) else {
            break;
        };

        match frame {
            Message::Binary(data) => handle_binary(socket, session, &data).await?,
            Message::Text(text) => handle_text(socket, state, session, &text).await?,
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    Ok(())
}

async fn handle_binary(
    socket: &mut WebSocket,
    session: &mut Session,
    data: &[u8],
) -> Result<(), axum::Error> {
    if !session.is_configured() {
        let reply = ServerMessage::Error {
            code: ErrorCode::NotConfigured,
            message: "Send config message before audio".to_string(),
        };
        return send_msg(socket, &reply).await;
    }

    let samples = match decode_pcm_frame(data) {
        Ok(samples) => samples,
        Err(e) => {
            let reply = ServerMessage::Error {
                code: ErrorCode::ParseError,
                message: e.to_string(),
            };
            return send_msg(socket, &reply).await;
        }
    };

    if session.push_samples(&samples).is_err() {
        let reply = ServerMessage::Error {
            code: ErrorCode::BufferFull,
            message: "Audio buffer full (max 30s). Send 'end' to transcribe.".to_string(),
        };
        return send_msg(socket, &reply).await;
    }

    Ok(())
}

async fn handle_text(
    socket: &mut WebSocket,
    state: &AppState,
    session: &mut Session,
    text: &str,
) -> Result<(), axum::Error> {
    let msg = match ClientMessage::from_json(text) {
        Ok(msg) => msg,
        Err(e) => {
            let reply = ServerMessage::Error {
                code: ErrorCode::ParseError,
                message: e.to_string(),
            };
            return send_msg(socket, &reply).await;
        }
    };

    match msg {
        ClientMessage::Config {
            sample_rate,
            language,
        } => {
            session.configure(sample_rate);
            tracing::debug!(
                session = %session.id(),
                sample_rate,
                %language,
                "Session configured"
            );
            Ok(())
        }
        ClientMessage::End => process_utterance(socket, state, session).await,
        ClientMessage::Keepalive => Ok(()),
    }
}

/// Transcribe the buffered utterance and send exactly one reply.
async fn process_utterance(
    socket: &mut WebSocket,
    state: &AppState,
    session: &mut Session,
) -> Result<(), axum::Error> {
    let t_start = Instant::now();
    let audio = session.take_audio();

    if audio.is_empty() {
        let reply = ServerMessage::Final {
            text: String::new(),
            confidence: 0.0,
        };
        return send_msg(socket, &reply).await;
    }

    let audio_secs = audio.len() as f32 / session.sample_rate() as f32;
    let t_prep = t_start.elapsed();

    match state.worker.transcribe(audio, session.sample_rate()).await {
        Ok(text) => {
            let t_transcribe = t_start.elapsed();
            send_msg(
                socket,
                &ServerMessage::Final {
                    text: text.clone(),
                    confidence: 1.0,
                },
            )
            .await?;
            let t_sent = t_start.elapsed();

            tracing::info!(
                session = %session.id(),
                prep_ms = t_prep.as_millis() as u64,
                transcribe_ms = (t_transcribe - t_prep).as_millis() as u64,
                send_ms = (t_sent - t_transcribe).as_millis() as u64,
                audio_secs = %format!("{audio_secs:.1}"),
                "Utterance processed"
            );
            tracing::debug!(
                session = %session.id(),
                text = %text.chars().take(50).collect::<String>(),
                "Transcribed"
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!(session = %session.id(), error = %e, "Transcription error");
            let reply = ServerMessage::Error {
                code: ErrorCode::TranscriptionError,
                message: e.to_string(),
            };
            send_msg(socket, &reply).await
        }
    }
}

async fn send_msg(socket: &mut WebSocket, msg: &ServerMessage) -> Result<(), axum::Error> {
    match msg.to_json() {
        Ok(json) => socket.send(Message::Text(json)).await,
        Err(e) => {
            // Serializing our own enum cannot realistically fail.
            tracing::error!(error = %e, "Failed to encode server message");
            Ok(())
        }
    }
}

fn new_session_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

// ── Listener & shutdown ────────────────────────────────────────────

/// Which signal ended the server, for the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// SIGINT (Ctrl-C): exit 130 by convention.
    Interrupt,
    /// SIGTERM: graceful exit 0.
    Terminate,
}

/// Bind the listener and serve until SIGINT or SIGTERM.
pub async fn serve(settings: &Settings, worker: TranscriberWorker) -> Result<Shutdown, ServerError> {
    let state = AppState::new(settings.server.clone(), worker);
    let shutdown = state.shutdown_token();
    let app = router(state);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        addr = %format!("ws://{addr}"),
        max_connections = settings.server.max_connections,
        "STT server listening"
    );

    let mut term = signal(SignalKind::terminate())?;
    let (sig_tx, sig_rx) = tokio::sync::oneshot::channel();
    let shutdown_fut = async move {
        let which = tokio::select! {
            _ = tokio::signal::ctrl_c() => Shutdown::Interrupt,
            _ = term.recv() => Shutdown::Terminate,
        };
        tracing::info!(signal = ?which, "Shutting down");
        // Unblock session loops so draining does not wait on idle clients.
        shutdown.cancel();
        let _ = sig_tx.send(which);
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_fut)
        .await?;

    tracing::info!("STT server stopped");
    Ok(sig_rx.await.unwrap_or(Shutdown::Terminate))
}
