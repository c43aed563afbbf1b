//! Dedicated audio I/O thread that isolates `!Send` audio resources from the
//! async runtime.
//!
//! `cpal::Stream` (capture) and `rodio::OutputStream` (tone playback) are
//! `!Send` on some platforms. Both are confined to a single OS thread; the
//! public [`AudioThreadHandle`] is the `Send + Sync` proxy the client holds,
//! routing every call through an [`AudioCommand`] on an mpsc channel.

use std::sync::mpsc;
use std::thread;

use stt_core::AudioSettings;

use crate::capture::AudioCapture;
use crate::error::AudioError;
use crate::playback::FeedbackPlayer;
use crate::tone::Tone;

// ── Commands ───────────────────────────────────────────────────────

/// A command sent from the client to the audio thread.
enum AudioCommand {
    /// Begin recording from the microphone.
    StartCapture {
        reply: mpsc::Sender<Result<(), AudioError>>,
    },

    /// Stop recording and return the captured 16 kHz mono i16 samples.
    StopCapture {
        reply: mpsc::Sender<Result<Vec<i16>, AudioError>>,
    },

    /// Query whether the microphone is currently recording.
    IsRecording { reply: mpsc::Sender<bool> },

    /// Play a feedback tone (fire-and-forget).
    PlayTone { tone: Tone },

    /// Shut down the audio thread, releasing all resources.
    Shutdown,
}

// ── Handle (Send + Sync proxy) ─────────────────────────────────────

/// `Send + Sync` handle to the dedicated audio I/O thread.
///
/// Request–reply methods block the caller until the audio thread responds;
/// the latency is local channel I/O plus the audio operation itself.
pub struct AudioThreadHandle {
    cmd_tx: mpsc::Sender<AudioCommand>,
    thread: Option<thread::JoinHandle<()>>,
}

impl AudioThreadHandle {
    /// Spawn the audio thread, initialise capture + playback, and return
    /// the handle. Capture-device errors are propagated back through a
    /// one-shot init channel.
    pub fn spawn(settings: AudioSettings) -> Result<Self, AudioError> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<AudioCommand>();
        let (init_tx, init_rx) = mpsc::channel::<Result<(), AudioError>>();

        let thread = thread::Builder::new()
            .name("stt-audio".into())
            .spawn(move || {
                Self::run(&settings, &cmd_rx, &init_tx);
            })
            .map_err(|e| AudioError::InputStream(format!("failed to spawn audio thread: {e}")))?;

        init_rx.recv().map_err(|_| AudioError::ThreadDied)??;

        Ok(Self {
            cmd_tx,
            thread: Some(thread),
        })
    }

    /// Begin recording from the microphone.
    pub fn start_capture(&self) -> Result<(), AudioError> {
        self.send_and_recv(|reply| AudioCommand::StartCapture { reply })
    }

    /// Stop recording and return captured 16 kHz mono i16 samples.
    pub fn stop_capture(&self) -> Result<Vec<i16>, AudioError> {
        self.send_and_recv(|reply| AudioCommand::StopCapture { reply })
    }

    /// Check whether the microphone is currently recording.
    pub fn is_recording(&self) -> bool {
        let (tx, rx) = mpsc::channel();
        if self
            .cmd_tx
            .send(AudioCommand::IsRecording { reply: tx })
            .is_err()
        {
            return false;
        }
        rx.recv().unwrap_or(false)
    }

    /// Play a feedback tone without waiting for completion.
    pub fn play_tone(&self, tone: Tone) {
        let _ = self.cmd_tx.send(AudioCommand::PlayTone { tone });
    }

    /// Send a command that expects a reply, mapping channel failures to
    /// [`AudioError::ThreadDied`].
    fn send_and_recv<T>(
        &self,
        build: impl FnOnce(mpsc::Sender<Result<T, AudioError>>) -> AudioCommand,
    ) -> Result<T, AudioError> {
        let (tx, rx) = mpsc::channel();
        self.cmd_tx
            .send(build(tx))
            .map_err(|_| AudioError::ThreadDied)?;
        rx.recv().map_err(|_| AudioError::ThreadDied)?
    }

    /// The body of the dedicated audio thread. Owns `AudioCapture` and
    /// `FeedbackPlayer` for their entire lifetime; they never cross
    /// thread boundaries.
    fn run(
        settings: &AudioSettings,
        cmd_rx: &mpsc::Receiver<AudioCommand>,
        init_tx: &mpsc::Sender<Result<(), AudioError>>,
    ) {
        let capture = match AudioCapture::new(settings) {
            Ok(c) => c,
            Err(e) => {
                let _ = init_tx.send(Err(e));
                return;
            }
        };

        // Tone playback is best-effort and has its own fallback.
        let player = FeedbackPlayer::new();

        if init_tx.send(Ok(())).is_err() {
            return;
        }

        let mut capture = capture;

        while let Ok(cmd) = cmd_rx.recv() {
            match cmd {
                AudioCommand::StartCapture { reply } => {
                    let _ = reply.send(capture.start_recording());
                }

                AudioCommand::StopCapture { reply } => {
                    let _ = reply.send(capture.stop_recording());
                }

                AudioCommand::IsRecording { reply } => {
                    let _ = reply.send(capture.is_recording());
                }

                AudioCommand::PlayTone { tone } => {
                    player.play(&tone);
                }

                AudioCommand::Shutdown => break,
            }
        }

        tracing::debug!("Audio thread shutting down");
    }
}

impl Drop for AudioThreadHandle {
    fn drop(&mut self) {
        // Best-effort shutdown; the thread may already be dead.
        let _ = self.cmd_tx.send(AudioCommand::Shutdown);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}
