//! Feedback tone playback.
//!
//! Prefers a `rodio` sink on the default output device. When no output
//! stream can be opened (headless PulseAudio setups, containers), falls
//! back to piping raw s16le into a `paplay` subprocess. Playback is
//! strictly best-effort: failures are logged at debug and never surface
//! to the caller.

use std::io::Write as _;
use std::process::{Command, Stdio};

use rodio::{OutputStream, OutputStreamHandle};

use crate::tone::{Tone, TONE_SAMPLE_RATE};

enum Backend {
    Rodio {
        // Must stay alive for the handle to work.
        _stream: OutputStream,
        handle: OutputStreamHandle,
    },
    Paplay,
}

/// Fire-and-forget tone player.
pub struct FeedbackPlayer {
    backend: Backend,
}

impl FeedbackPlayer {
    /// Open the default output device, falling back to `paplay` if that
    /// fails. Construction itself never fails: a broken audio output must
    /// not take push-to-talk down with it.
    #[must_use]
    pub fn new() -> Self {
        match OutputStream::try_default() {
            Ok((stream, handle)) => {
                tracing::debug!("Feedback tones on default output device");
                Self {
                    backend: Backend::Rodio {
                        _stream: stream,
                        handle,
                    },
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "No output stream, falling back to paplay");
                Self {
                    backend: Backend::Paplay,
                }
            }
        }
    }

    /// Play a tone without waiting for it to finish.
    pub fn play(&self, tone: &Tone) {
        match &self.backend {
            Backend::Rodio { handle, .. } => match rodio::Sink::try_new(handle) {
                Ok(sink) => {
                    let source =
                        rodio::buffer::SamplesBuffer::new(1, TONE_SAMPLE_RATE, tone.samples.clone());
                    sink.append(source);
                    sink.detach();
                }
                Err(e) => tracing::debug!(error = %e, "Could not play feedback tone"),
            },
            Backend::Paplay => play_via_paplay(tone),
        }
    }
}

impl Default for FeedbackPlayer {
    fn default() -> Self {
        Self::new()
    }
}

fn play_via_paplay(tone: &Tone) {
    let spawned = Command::new("paplay")
        .args([
            "--raw",
            "--format=s16le",
            &format!("--rate={TONE_SAMPLE_RATE}"),
            "--channels=1",
        ])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();

    match spawned {
        Ok(mut child) => {
            if let Some(mut stdin) = child.stdin.take() {
                if let Err(e) = stdin.write_all(&tone.to_s16le()) {
                    tracing::debug!(error = %e, "paplay stdin write failed");
                }
            }
            // Reap in the background; a tone is ~100 ms.
            std::thread::spawn(move || {
                let _ = child.wait();
            });
        }
        Err(e) => tracing::debug!(error = %e, "Could not spawn paplay"),
    }
}
