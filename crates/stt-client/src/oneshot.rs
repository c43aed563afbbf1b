//! One-shot mode: record a single utterance, transcribe, output, exit.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::Instant;

use stt_audio::AudioThreadHandle;
use stt_core::{OutputMode, ServerMessage, Settings};

use crate::error::ClientError;
use crate::output;
use crate::session::{self, ServerConnection};

/// Options resolved from the CLI.
#[derive(Debug, Clone)]
pub struct OneshotOptions {
    pub server_url: String,
    pub output_mode: OutputMode,
    /// Verify the connection and exit without recording.
    pub test_only: bool,
}

/// Record until Enter, transcribe once, dispatch the text.
///
/// An empty transcription is not an error; there was simply nothing to say.
pub async fn run_once(settings: &Settings, opts: &OneshotOptions) -> Result<(), ClientError> {
    let (server_tx, mut server_rx) = mpsc::unbounded_channel();
    let mut conn = connect_with_retry(settings, &opts.server_url, server_tx).await?;

    if opts.test_only {
        println!("Test mode: connection successful");
        conn.close().await;
        return Ok(());
    }

    let audio = AudioThreadHandle::spawn(settings.audio.clone())?;
    conn.send_config(&settings.audio).await?;
    audio.start_capture()?;
    println!("Recording... (press Enter to stop)");

    // Watch for a server-side error while recording so a dead model aborts
    // the take immediately instead of after the user commits to it.
    let mut stdin_lines = BufReader::new(tokio::io::stdin()).lines();
    let mut server_error: Option<ClientError> = None;
    loop {
        tokio::select! {
            _ = stdin_lines.next_line() => break,
            Some(msg) = server_rx.recv() => match msg {
                ServerMessage::Error { code, message } => {
                    server_error = Some(ClientError::Server { code, message });
                    break;
                }
                other => tracing::debug!(?other, "Message during recording"),
            },
        }
    }

    let t_enter = Instant::now();
    let samples = audio.stop_capture()?;

    if let Some(err) = server_error {
        tracing::error!(error = %err, "Recording aborted");
        conn.close().await;
        return Err(err);
    }

    conn.send_audio(&samples, settings.audio.chunk_samples()).await?;
    let t_flushed = Instant::now();
    conn.send_end().await?;
    let t_end_sent = Instant::now();

    let result = session::await_final(&mut server_rx).await;
    let t_response = Instant::now();
    conn.close().await;
    let (text, _confidence) = result?;

    let ms = |a: Instant, b: Instant| (b - a).as_secs_f64() * 1000.0;
    println!("\n[timing] Latency breakdown (ms):");
    println!("   Stream flush:    {:7.1} ms", ms(t_enter, t_flushed));
    println!("   Send 'end':      {:7.1} ms", ms(t_flushed, t_end_sent));
    println!("   Server process:  {:7.1} ms", ms(t_end_sent, t_response));
    println!("   -------------------------");
    println!("   Total:           {:7.1} ms\n", ms(t_enter, t_response));

    if text.is_empty() {
        tracing::info!("Empty transcription (silence)");
    } else {
        output::dispatch(&text, opts.output_mode).await;
    }
    Ok(())
}

/// Bounded connect retry with exponential backoff.
async fn connect_with_retry(
    settings: &Settings,
    url: &str,
    events: mpsc::UnboundedSender<ServerMessage>,
) -> Result<ServerConnection, ClientError> {
    let attempts = settings.client.reconnect_attempts.max(1);
    let mut delay = settings.client.reconnect_delay;

    let mut last_err = None;
    for attempt in 1..=attempts {
        match ServerConnection::connect(url, events.clone()).await {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                tracing::warn!(attempt, error = %e, "Connection attempt failed, retrying");
                last_err = Some(e);
            }
        }
        if attempt < attempts {
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }
    Err(last_err.unwrap_or_else(|| ClientError::Connect("no attempts made".into())))
}
