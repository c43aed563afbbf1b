//! Push-to-talk controller.
//!
//! A three-state machine driving the recording lifecycle:
//!
//! ```text
//!   Idle ── hotkey press ──▶ Recording ── release / 30 s limit ──▶ Processing
//!    ▲                                                                 │
//!    └───────────── transcription complete / 60 s watchdog ────────────┘
//! ```
//!
//! A press is ignored unless idle; a release is ignored unless recording.
//! Hitting the duration limit submits automatically, and the genuine release
//! that follows is consumed so nothing is submitted twice. A background
//! watchdog recovers from a stuck processing state (dropped server, lost
//! reply).

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use stt_audio::{AudioThreadHandle, Tone};
use stt_core::PttSettings;

/// Watchdog poll cadence.
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(5);

/// Controller states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PttState {
    /// Waiting for the hotkey.
    Idle,
    /// Hotkey held, audio being captured.
    Recording,
    /// Utterance submitted, waiting for the transcription result.
    Processing,
}

/// Events emitted to the host (the client daemon).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PttEvent {
    /// Open the capture stream and start a session utterance.
    StartRecording,
    /// Close the capture stream and submit the utterance.
    StopRecording,
}

struct Inner {
    state: PttState,
    auto_submitted: bool,
    recording_start: Option<Instant>,
    processing_start: Option<Instant>,
    auto_submit_task: Option<JoinHandle<()>>,
}

struct Tones {
    click: Tone,
    unclick: Tone,
}

/// Push-to-talk controller. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct PttController {
    inner: Arc<Mutex<Inner>>,
    events: mpsc::UnboundedSender<PttEvent>,
    audio: Option<Arc<AudioThreadHandle>>,
    tones: Option<Arc<Tones>>,
    max_duration: Duration,
    runtime: tokio::runtime::Handle,
}

impl PttController {
    /// Build the controller and its event stream. Tones are pre-generated
    /// here so activation never waits on synthesis.
    ///
    /// Must be called from within a tokio runtime; the controller spawns its
    /// own timer tasks (hotkey callbacks arrive from plain threads).
    #[must_use]
    pub fn new(
        settings: &PttSettings,
        audio: Option<Arc<AudioThreadHandle>>,
    ) -> (Self, mpsc::UnboundedReceiver<PttEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Mutex::new(Inner {
            state: PttState::Idle,
            auto_submitted: false,
            recording_start: None,
            processing_start: None,
            auto_submit_task: None,
        }));

        let tones = settings.click_sound.then(|| {
            Arc::new(Tones {
                click: Tone::click(),
                unclick: Tone::unclick(),
            })
        });

        let runtime = tokio::runtime::Handle::current();
        spawn_watchdog(&runtime, &inner, settings.processing_timeout);

        let controller = Self {
            inner,
            events: event_tx,
            audio,
            tones,
            max_duration: settings.max_duration,
            runtime,
        };
        (controller, event_rx)
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> PttState {
        self.inner.lock().map_or(PttState::Idle, |inner| inner.state)
    }

    /// Hotkey pressed: start recording if idle.
    pub fn handle_activate(&self) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if inner.state != PttState::Idle {
            tracing::debug!(state = ?inner.state, "Ignoring hotkey activate");
            return;
        }

        inner.state = PttState::Recording;
        inner.auto_submitted = false;
        inner.recording_start = Some(Instant::now());

        self.play(|t| &t.click);
        tracing::info!("PTT: recording started");
        self.emit(PttEvent::StartRecording);

        // Auto-submit when the duration limit is reached mid-hold.
        let controller = self.clone();
        let max_duration = self.max_duration;
        if let Some(old) = inner.auto_submit_task.replace(self.runtime.spawn(async move {
            tokio::time::sleep(max_duration).await;
            controller.auto_submit();
        })) {
            old.abort();
        }
    }

    /// Hotkey released: submit the recording, unless the limit already did.
    pub fn handle_deactivate(&self) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if inner.state != PttState::Recording {
            if inner.auto_submitted {
                tracing::debug!("Ignoring release, recording was auto-submitted");
                inner.auto_submitted = false;
            } else {
                tracing::debug!(state = ?inner.state, "Ignoring hotkey deactivate");
            }
            return;
        }

        submit(&mut inner, self);
    }

    /// The host finished (or gave up on) transcription.
    pub fn on_processing_complete(&self) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if inner.state == PttState::Processing {
            inner.state = PttState::Idle;
            inner.processing_start = None;
            tracing::debug!("PTT: processing complete, ready for next recording");
        }
    }

    /// Abandon an in-flight recording without submitting (connect failure).
    pub fn abort_recording(&self) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if inner.state == PttState::Recording {
            if let Some(task) = inner.auto_submit_task.take() {
                task.abort();
            }
            inner.state = PttState::Idle;
            inner.recording_start = None;
            tracing::debug!("PTT: recording aborted");
        }
    }

    fn auto_submit(&self) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if inner.state != PttState::Recording {
            return;
        }
        tracing::info!(
            limit_secs = self.max_duration.as_secs(),
            "PTT: max duration reached, auto-submitting"
        );
        inner.auto_submitted = true;
        submit(&mut inner, self);
    }

    fn emit(&self, event: PttEvent) {
        if self.events.send(event).is_err() {
            tracing::warn!("PTT event receiver dropped");
        }
    }

    fn play(&self, pick: impl FnOnce(&Tones) -> &Tone) {
        if let (Some(audio), Some(tones)) = (&self.audio, &self.tones) {
            audio.play_tone(pick(tones).clone());
        }
    }
}

/// The shared RECORDING → PROCESSING transition (release and auto-submit).
fn submit(inner: &mut Inner, controller: &PttController) {
    if let Some(task) = inner.auto_submit_task.take() {
        task.abort();
    }

    let duration = inner
        .recording_start
        .map_or(Duration::ZERO, |t| t.elapsed());
    inner.state = PttState::Processing;
    inner.processing_start = Some(Instant::now());

    controller.play(|t| &t.unclick);
    tracing::info!(
        duration_secs = %format!("{:.1}", duration.as_secs_f32()),
        "PTT: recording stopped, processing"
    );
    controller.emit(PttEvent::StopRecording);
}

/// Background task forcing PROCESSING → IDLE when the host never reports
/// completion. Holds only a weak reference so a dropped controller ends it.
fn spawn_watchdog(
    runtime: &tokio::runtime::Handle,
    inner: &Arc<Mutex<Inner>>,
    processing_timeout: Duration,
) {
    let weak: Weak<Mutex<Inner>> = Arc::downgrade(inner);
    runtime.spawn(async move {
        let mut ticker = tokio::time::interval(WATCHDOG_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            let Ok(mut inner) = inner.lock() else {
                break;
            };
            let stuck = inner.state == PttState::Processing
                && inner
                    .processing_start
                    .is_some_and(|t| t.elapsed() > processing_timeout);
            if stuck {
                tracing::warn!(
                    timeout_secs = processing_timeout.as_secs(),
                    "PTT watchdog: processing timed out, resetting to idle"
                );
                inner.state = PttState::Idle;
                inner.processing_start = None;
                inner.recording_start = None;
                inner.auto_submitted = false;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> (PttController, mpsc::UnboundedReceiver<PttEvent>) {
        PttController::new(&PttSettings::default(), None)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<PttEvent>) -> Vec<PttEvent> {
        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn full_cycle_idle_recording_processing_idle() {
        let (ptt, mut rx) = controller();
        assert_eq!(ptt.state(), PttState::Idle);

        ptt.handle_activate();
        assert_eq!(ptt.state(), PttState::Recording);
        assert_eq!(drain(&mut rx), vec![PttEvent::StartRecording]);

        ptt.handle_deactivate();
        assert_eq!(ptt.state(), PttState::Processing);
        assert_eq!(drain(&mut rx), vec![PttEvent::StopRecording]);

        ptt.on_processing_complete();
        assert_eq!(ptt.state(), PttState::Idle);
        assert_eq!(drain(&mut rx), vec![]);
    }

    #[tokio::test(start_paused = true)]
    async fn press_is_ignored_unless_idle() {
        let (ptt, mut rx) = controller();
        ptt.handle_activate();
        drain(&mut rx);

        ptt.handle_activate();
        assert_eq!(drain(&mut rx), vec![]);
        assert_eq!(ptt.state(), PttState::Recording);

        ptt.handle_deactivate();
        drain(&mut rx);
        ptt.handle_activate();
        assert_eq!(ptt.state(), PttState::Processing);
        assert_eq!(drain(&mut rx), vec![]);
    }

    #[tokio::test(start_paused = true)]
    async fn release_is_ignored_unless_recording() {
        let (ptt, mut rx) = controller();
        ptt.handle_deactivate();
        assert_eq!(ptt.state(), PttState::Idle);
        assert_eq!(drain(&mut rx), vec![]);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_submit_fires_once_at_the_limit() {
        let (ptt, mut rx) = controller();
        ptt.handle_activate();
        assert_eq!(drain(&mut rx), vec![PttEvent::StartRecording]);

        // Cross the 30 s limit; paused time advances through the sleep.
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(ptt.state(), PttState::Processing);
        assert_eq!(drain(&mut rx), vec![PttEvent::StopRecording]);

        // The genuine release that follows is consumed.
        ptt.handle_deactivate();
        assert_eq!(ptt.state(), PttState::Processing);
        assert_eq!(drain(&mut rx), vec![]);

        ptt.on_processing_complete();
        assert_eq!(ptt.state(), PttState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn release_before_the_limit_cancels_auto_submit() {
        let (ptt, mut rx) = controller();
        ptt.handle_activate();
        tokio::time::sleep(Duration::from_secs(5)).await;
        ptt.handle_deactivate();
        drain(&mut rx);

        // Past where the limit would have fired: no second submission.
        tokio::time::sleep(Duration::from_secs(40)).await;
        assert_eq!(drain(&mut rx), vec![]);
        assert_eq!(ptt.state(), PttState::Processing);
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_recovers_a_stuck_processing_state() {
        let (ptt, mut rx) = controller();
        ptt.handle_activate();
        ptt.handle_deactivate();
        drain(&mut rx);
        assert_eq!(ptt.state(), PttState::Processing);

        // Past the 60 s processing timeout plus a watchdog tick.
        tokio::time::sleep(Duration::from_secs(70)).await;
        assert_eq!(ptt.state(), PttState::Idle);

        // And the machine is usable again.
        ptt.handle_activate();
        assert_eq!(ptt.state(), PttState::Recording);
        assert_eq!(drain(&mut rx), vec![PttEvent::StartRecording]);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_recording_returns_to_idle_without_an_event() {
        let (ptt, mut rx) = controller();
        ptt.handle_activate();
        drain(&mut rx);

        ptt.abort_recording();
        assert_eq!(ptt.state(), PttState::Idle);
        assert_eq!(drain(&mut rx), vec![]);

        // The cancelled limit task must not fire later.
        tokio::time::sleep(Duration::from_secs(40)).await;
        assert_eq!(drain(&mut rx), vec![]);
        assert_eq!(ptt.state(), PttState::Idle);
    }
}
