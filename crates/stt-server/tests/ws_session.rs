//! Integration tests for the WebSocket session manager.
//!
//! Each test starts the real router on an ephemeral port with a stub
//! transcription backend, then drives it over an actual WebSocket client.
//! No GPU, model files, or audio hardware involved.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use stt_core::protocol::encode_pcm_frame;
use stt_core::{ClientMessage, ErrorCode, ServerMessage, ServerSettings};
use stt_server::runtime::{router, AppState};
use stt_server::transcriber::{TranscribeError, Transcriber};
use stt_server::worker::TranscriberWorker;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ── Stub backends ──────────────────────────────────────────────────

/// Returns a fixed transcript regardless of input.
struct Canned(&'static str);

impl Transcriber for Canned {
    fn transcribe(&mut self, _audio: &[f32], _rate: u32) -> Result<String, TranscribeError> {
        Ok(self.0.to_string())
    }
}

/// Reports how many samples reached the model, as the transcript.
struct Counting;

impl Transcriber for Counting {
    fn transcribe(&mut self, audio: &[f32], _rate: u32) -> Result<String, TranscribeError> {
        Ok(format!("samples:{}", audio.len()))
    }
}

// ── Harness ────────────────────────────────────────────────────────

async fn start_server(settings: ServerSettings, backend: Box<dyn Transcriber>) -> String {
    let worker = TranscriberWorker::spawn(backend, settings.max_connections).unwrap();
    let state = AppState::new(settings, worker);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("ws://{addr}")
}

async fn connect(url: &str) -> Client {
    let (ws, _) = connect_async(url).await.expect("connect failed");
    ws
}

/// Receive the next control message, failing the test on close or timeout.
async fn next_msg(ws: &mut Client) -> ServerMessage {
    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for server message")
        .expect("connection closed")
        .expect("websocket error");
    match frame {
        Message::Text(text) => ServerMessage::from_json(&text).expect("bad server message"),
        other => panic!("expected text frame, got {other:?}"),
    }
}

async fn send(ws: &mut Client, msg: &ClientMessage) {
    ws.send(Message::Text(msg.to_json().unwrap())).await.unwrap();
}

async fn send_audio(ws: &mut Client, samples: &[i16]) {
    ws.send(Message::Binary(encode_pcm_frame(samples)))
        .await
        .unwrap();
}

async fn expect_ready(ws: &mut Client) -> String {
    match next_msg(ws).await {
        ServerMessage::Ready { session_id } => session_id,
        other => panic!("expected ready, got {other:?}"),
    }
}

fn config() -> ClientMessage {
    ClientMessage::Config {
        sample_rate: 16_000,
        language: "en".to_string(),
    }
}

// ── Scenarios ──────────────────────────────────────────────────────

#[tokio::test]
async fn silence_round_trip() {
    let url = start_server(ServerSettings::default(), Box::new(Canned("unused"))).await;
    let mut ws = connect(&url).await;

    let session_id = expect_ready(&mut ws).await;
    assert_eq!(session_id.len(), 8);

    send(&mut ws, &config()).await;
    send(&mut ws, &ClientMessage::End).await;

    assert_eq!(
        next_msg(&mut ws).await,
        ServerMessage::Final {
            text: String::new(),
            confidence: 0.0,
        }
    );
}

#[tokio::test]
async fn happy_path_transcribes_and_clears_the_buffer() {
    let url = start_server(
        ServerSettings::default(),
        Box::new(Canned("the quick brown fox")),
    )
    .await;
    let mut ws = connect(&url).await;
    expect_ready(&mut ws).await;

    send(&mut ws, &config()).await;
    let tone: Vec<i16> = (0..16_000)
        .map(|i| ((std::f32::consts::TAU * 440.0 * i as f32 / 16_000.0).sin() * 8000.0) as i16)
        .collect();
    send_audio(&mut ws, &tone).await;
    send(&mut ws, &ClientMessage::End).await;

    match next_msg(&mut ws).await {
        ServerMessage::Final { text, confidence } => {
            assert_eq!(text, "the quick brown fox");
            assert!((confidence - 1.0).abs() < f32::EPSILON);
        }
        other => panic!("expected final, got {other:?}"),
    }

    // The buffer was cleared by the first end.
    send(&mut ws, &ClientMessage::End).await;
    assert_eq!(
        next_msg(&mut ws).await,
        ServerMessage::Final {
            text: String::new(),
            confidence: 0.0,
        }
    );
}

#[tokio::test]
async fn buffer_cap_drops_the_overflow_frame_and_keeps_the_session() {
    let url = start_server(ServerSettings::default(), Box::new(Counting)).await;
    let mut ws = connect(&url).await;
    expect_ready(&mut ws).await;

    send(&mut ws, &config()).await;
    let chunk = vec![100i16; 1600];
    for _ in 0..301 {
        send_audio(&mut ws, &chunk).await;
    }

    // Frame 301 exceeds 30 s and is rejected.
    match next_msg(&mut ws).await {
        ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::BufferFull),
        other => panic!("expected buffer-full error, got {other:?}"),
    }

    // The first 30 s are still transcribable.
    send(&mut ws, &ClientMessage::End).await;
    match next_msg(&mut ws).await {
        ServerMessage::Final { text, .. } => assert_eq!(text, "samples:480000"),
        other => panic!("expected final, got {other:?}"),
    }
}

#[tokio::test]
async fn admission_rejects_connections_beyond_capacity() {
    let settings = ServerSettings {
        max_connections: 2,
        reject_when_full: true,
        ..ServerSettings::default()
    };
    let url = start_server(settings, Box::new(Canned("x"))).await;

    let mut first = connect(&url).await;
    expect_ready(&mut first).await;
    let mut second = connect(&url).await;
    expect_ready(&mut second).await;

    // Third connection: SERVER_FULL, closed, and never a ready.
    let mut third = connect(&url).await;
    match next_msg(&mut third).await {
        ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::ServerFull),
        other => panic!("expected server-full error, got {other:?}"),
    }
    match tokio::time::timeout(Duration::from_secs(5), third.next()).await {
        Ok(None | Some(Ok(Message::Close(_))) | Some(Err(_))) => {}
        other => panic!("expected close after rejection, got {other:?}"),
    }

    // Releasing a slot admits new connections again.
    drop(first);
    let mut retry = None;
    for _ in 0..100 {
        let mut ws = connect(&url).await;
        match tokio::time::timeout(Duration::from_millis(200), ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                if let Ok(ServerMessage::Ready { .. }) = ServerMessage::from_json(&text) {
                    retry = Some(ws);
                    break;
                }
            }
            _ => {}
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(retry.is_some(), "freed slot was never re-admitted");
}

#[tokio::test]
async fn audio_before_config_is_rejected_without_buffering() {
    let url = start_server(ServerSettings::default(), Box::new(Counting)).await;
    let mut ws = connect(&url).await;
    expect_ready(&mut ws).await;

    send_audio(&mut ws, &[1i16; 1600]).await;
    match next_msg(&mut ws).await {
        ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::NotConfigured),
        other => panic!("expected not-configured error, got {other:?}"),
    }

    // Configure and confirm the rejected frame was not buffered.
    send(&mut ws, &config()).await;
    send_audio(&mut ws, &[1i16; 1600]).await;
    send(&mut ws, &ClientMessage::End).await;
    match next_msg(&mut ws).await {
        ServerMessage::Final { text, .. } => assert_eq!(text, "samples:1600"),
        other => panic!("expected final, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_text_is_a_parse_error_and_the_session_survives() {
    let url = start_server(ServerSettings::default(), Box::new(Canned("ok"))).await;
    let mut ws = connect(&url).await;
    expect_ready(&mut ws).await;

    ws.send(Message::Text("not json".to_string())).await.unwrap();
    match next_msg(&mut ws).await {
        ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::ParseError),
        other => panic!("expected parse error, got {other:?}"),
    }

    ws.send(Message::Text(r#"{"type":"bogus"}"#.to_string()))
        .await
        .unwrap();
    match next_msg(&mut ws).await {
        ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::ParseError),
        other => panic!("expected parse error, got {other:?}"),
    }

    send(&mut ws, &config()).await;
    send(&mut ws, &ClientMessage::End).await;
    assert!(matches!(
        next_msg(&mut ws).await,
        ServerMessage::Final { .. }
    ));
}

#[tokio::test]
async fn odd_length_audio_frame_is_a_parse_error() {
    let url = start_server(ServerSettings::default(), Box::new(Canned("ok"))).await;
    let mut ws = connect(&url).await;
    expect_ready(&mut ws).await;

    send(&mut ws, &config()).await;
    ws.send(Message::Binary(vec![0u8, 1, 2])).await.unwrap();
    match next_msg(&mut ws).await {
        ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::ParseError),
        other => panic!("expected parse error, got {other:?}"),
    }
}

#[tokio::test]
async fn keepalive_is_a_no_op() {
    let url = start_server(ServerSettings::default(), Box::new(Counting)).await;
    let mut ws = connect(&url).await;
    expect_ready(&mut ws).await;

    send(&mut ws, &config()).await;
    send_audio(&mut ws, &[1i16; 160]).await;
    send(&mut ws, &ClientMessage::Keepalive).await;
    send(&mut ws, &ClientMessage::End).await;

    // No reply for the keepalive itself; session state is untouched.
    match next_msg(&mut ws).await {
        ServerMessage::Final { text, .. } => assert_eq!(text, "samples:160"),
        other => panic!("expected final, got {other:?}"),
    }
}

#[tokio::test]
async fn repeated_config_updates_the_sample_rate() {
    let url = start_server(ServerSettings::default(), Box::new(Counting)).await;
    let mut ws = connect(&url).await;
    expect_ready(&mut ws).await;

    send(&mut ws, &config()).await;
    send(
        &mut ws,
        &ClientMessage::Config {
            sample_rate: 8_000,
            language: "en".to_string(),
        },
    )
    .await;

    // The cap now reflects the lower rate: 8 kHz × 30 s = 240 000 samples.
    let chunk = vec![1i16; 1600];
    for _ in 0..150 {
        send_audio(&mut ws, &chunk).await;
    }
    send_audio(&mut ws, &chunk).await;
    match next_msg(&mut ws).await {
        ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::BufferFull),
        other => panic!("expected buffer-full error, got {other:?}"),
    }
}
