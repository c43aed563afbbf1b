//! Continuous push-to-talk mode.
//!
//! Owns the wiring between the hotkey listener, the PTT controller, the
//! audio thread, the server session, and the tray. One event loop consumes
//! PTT events and server messages; recording setup and submission run as
//! spawned tasks so a hotkey release during a slow connect is never lost
//! (the stop path awaits the start task before touching capture).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use stt_audio::AudioThreadHandle;
use stt_core::{OutputMode, ServerMessage, Settings};

use crate::error::ClientError;
use crate::hotkey::{
    EvdevHotkeyListener, HotkeyCallbacks, HotkeySource, TerminalHotkeyListener,
};
use crate::output;
use crate::ptt::{PttController, PttEvent, PttState};
use crate::session::{ServerConnection, FINAL_TIMEOUT};
use crate::takeover;
use crate::tray::{TrayIndicator, TrayState};

/// Fixed retry delay in daemon mode.
const DAEMON_RETRY_DELAY: Duration = Duration::from_secs(5);

/// How the run ended, for the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Listener quit (`q`/ESC), tray Quit, or SIGTERM.
    Completed,
    /// SIGINT: exit 130.
    Interrupted,
}

/// Options resolved from the CLI.
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub server_url: String,
    pub output_mode: OutputMode,
    /// Retry the server forever, suppress timing output.
    pub daemon_mode: bool,
    pub tray_enabled: bool,
}

/// One utterance in flight: `end` sent, `final` not yet received.
struct AwaitingFinal {
    deadline: Instant,
    sent_at: Instant,
    audio_secs: f32,
}

struct DaemonCtx {
    settings: Settings,
    opts: DaemonOptions,
    audio: Arc<AudioThreadHandle>,
    controller: PttController,
    tray: Arc<Option<TrayIndicator>>,
    conn: tokio::sync::Mutex<Option<ServerConnection>>,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    awaiting: Mutex<Option<AwaitingFinal>>,
    terminal_mode: bool,
}

impl DaemonCtx {
    fn set_tray(&self, state: TrayState) {
        if let Some(tray) = self.tray.as_ref() {
            tray.set_state(state);
        }
    }

    /// User-facing status line; daemon mode stays silent.
    fn print(&self, line: &str) {
        if self.opts.daemon_mode {
            return;
        }
        if self.terminal_mode {
            crate::hotkey::terminal::print_normal(line);
        } else {
            println!("{line}");
        }
    }

    fn final_deadline(&self) -> Option<Instant> {
        self.awaiting
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|a| a.deadline))
    }

    fn take_awaiting(&self) -> Option<AwaitingFinal> {
        self.awaiting.lock().ok().and_then(|mut guard| guard.take())
    }

    async fn drop_connection(&self) {
        if let Some(conn) = self.conn.lock().await.take() {
            conn.close().await;
        }
    }
}

/// Run continuous PTT until quit or a signal.
pub async fn run_ptt_mode(
    settings: Settings,
    opts: DaemonOptions,
) -> Result<RunOutcome, ClientError> {
    takeover::takeover_old_instances("stt-client").await;

    let audio = Arc::new(AudioThreadHandle::spawn(settings.audio.clone())?);
    let (controller, mut ptt_rx) = PttController::new(&settings.ptt, Some(Arc::clone(&audio)));

    // Tray quit feeds the same shutdown path as signals.
    let (quit_tx, mut quit_rx) = mpsc::unbounded_channel::<()>();
    let tray: Arc<Option<TrayIndicator>> = Arc::new(opts.tray_enabled.then(|| {
        let quit_tx = quit_tx.clone();
        TrayIndicator::spawn(Arc::new(move || {
            let _ = quit_tx.send(());
        }))
    }));

    let callbacks = {
        let on_activate = {
            let controller = controller.clone();
            Arc::new(move || controller.handle_activate()) as Arc<dyn Fn() + Send + Sync>
        };
        let on_deactivate = {
            let controller = controller.clone();
            Arc::new(move || controller.handle_deactivate()) as Arc<dyn Fn() + Send + Sync>
        };
        let on_device_count_changed = {
            let tray = Arc::clone(&tray);
            Some(Arc::new(move |count: usize| {
                let Some(tray) = tray.as_ref() else { return };
                if count == 0 && tray.state() == TrayState::Ready {
                    tray.set_state(TrayState::Degraded);
                } else if count > 0 && tray.state() == TrayState::Degraded {
                    tray.set_state(TrayState::Ready);
                }
            }) as Arc<dyn Fn(usize) + Send + Sync>)
        };
        HotkeyCallbacks {
            on_activate,
            on_deactivate,
            on_device_count_changed,
        }
    };

    let mut listener = build_listener(&settings, callbacks)?;
    let stop_handle = listener.stop_handle();
    let hotkey_label = listener.hotkey_label();
    let terminal_mode = listener.is_terminal();

    let (server_tx, mut server_rx) = mpsc::unbounded_channel();
    let ctx = Arc::new(DaemonCtx {
        settings,
        opts,
        audio,
        controller,
        tray: Arc::clone(&tray),
        conn: tokio::sync::Mutex::new(None),
        server_tx,
        awaiting: Mutex::new(None),
        terminal_mode,
    });

    if ctx.opts.daemon_mode {
        tracing::info!(
            hotkey = %hotkey_label,
            output = %ctx.opts.output_mode,
            server = %ctx.opts.server_url,
            "PTT daemon started"
        );
    } else {
        println!("\n[PTT] Mode active. Hold [{hotkey_label}] to record, release to transcribe.");
        println!("   Output: {}", ctx.opts.output_mode);
        println!("   Server: {}", ctx.opts.server_url);
        if terminal_mode {
            println!("   Press 'q', ESC, or Ctrl+C to exit.\n");
        } else {
            println!("   Press Ctrl+C to exit.\n");
        }
    }

    let mut listener_task = tokio::spawn(async move { listener.run().await });
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut recording_task: Option<JoinHandle<()>> = None;
    let mut outcome = RunOutcome::Completed;

    loop {
        let deadline = ctx.final_deadline();
        tokio::select! {
            Some(event) = ptt_rx.recv() => match event {
                PttEvent::StartRecording => {
                    let ctx = Arc::clone(&ctx);
                    recording_task =
                        Some(tokio::spawn(async move { start_recording(&ctx).await }));
                }
                PttEvent::StopRecording => {
                    // Wait-then-stop: capture-close must not overtake a
                    // still-running capture-open.
                    let prior = recording_task.take();
                    let ctx = Arc::clone(&ctx);
                    tokio::spawn(async move {
                        if let Some(task) = prior {
                            let _ = task.await;
                        }
                        finish_recording(&ctx).await;
                    });
                }
            },

            Some(msg) = server_rx.recv() => route_server_message(&ctx, msg).await,

            () = async { tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)).await },
                if deadline.is_some() =>
            {
                handle_final_timeout(&ctx);
            }

            Some(()) = quit_rx.recv() => break,

            _ = tokio::signal::ctrl_c() => {
                outcome = RunOutcome::Interrupted;
                break;
            }

            _ = sigterm.recv() => break,

            result = &mut listener_task => {
                cleanup(&ctx, &tray).await;
                // The listener restored the terminal; plain println is safe.
                if !ctx.opts.daemon_mode {
                    println!("\nPTT mode stopped.");
                }
                return match result {
                    Ok(Ok(())) => {
                        tracing::info!("Hotkey listener finished");
                        Ok(RunOutcome::Completed)
                    }
                    Ok(Err(e)) => {
                        tracing::error!(error = %e, "Hotkey listener failed");
                        Err(e.into())
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Hotkey listener task panicked");
                        Ok(RunOutcome::Completed)
                    }
                };
            }
        }
    }

    stop_handle.stop();
    let _ = tokio::time::timeout(Duration::from_secs(1), &mut listener_task).await;
    cleanup(&ctx, &tray).await;
    if !ctx.opts.daemon_mode {
        println!("\n\nPTT mode stopped.");
    }
    tracing::info!("PTT mode stopped");
    Ok(outcome)
}

fn build_listener(
    settings: &Settings,
    callbacks: HotkeyCallbacks,
) -> Result<HotkeySource, ClientError> {
    if EvdevHotkeyListener::input_devices_accessible() {
        let listener = EvdevHotkeyListener::new(
            &settings.ptt.hotkey,
            settings.ptt.device_scan_interval,
            callbacks,
        )?;
        tracing::info!(hotkey = %listener.hotkey_label(), "Using evdev hotkey listener");
        Ok(HotkeySource::Evdev(listener))
    } else {
        tracing::info!("No accessible input devices, using terminal mode");
        Ok(HotkeySource::Terminal(TerminalHotkeyListener::new(
            settings.ptt.terminal_hotkey,
            settings.ptt.terminal_hotkey_name.clone(),
            callbacks,
        )))
    }
}

async fn cleanup(ctx: &Arc<DaemonCtx>, tray: &Arc<Option<TrayIndicator>>) {
    if let Some(tray) = tray.as_ref() {
        tray.stop();
    }
    ctx.drop_connection().await;
}

// ── Recording lifecycle ────────────────────────────────────────────

async fn start_recording(ctx: &Arc<DaemonCtx>) {
    ctx.set_tray(TrayState::Recording);

    if !ensure_connected(ctx).await {
        ctx.print("[error] Failed to connect to server");
        ctx.controller.abort_recording();
        return;
    }

    {
        let mut conn_slot = ctx.conn.lock().await;
        let send_result = match conn_slot.as_mut() {
            Some(conn) => conn.send_config(&ctx.settings.audio).await,
            None => {
                ctx.controller.abort_recording();
                return;
            }
        };
        if let Err(e) = send_result {
            tracing::error!(error = %e, "Failed to send config");
            if let Some(conn) = conn_slot.take() {
                conn.close().await;
            }
            ctx.controller.abort_recording();
            ctx.set_tray(TrayState::Disconnected);
            return;
        }
    }

    if let Err(e) = ctx.audio.start_capture() {
        tracing::error!(error = %e, "Audio capture failed");
        ctx.print(&format!("[error] Audio capture failed: {e}"));
        ctx.controller.abort_recording();
        ctx.set_tray(TrayState::Ready);
    }
}

async fn finish_recording(ctx: &Arc<DaemonCtx>) {
    let samples = match ctx.audio.stop_capture() {
        Ok(samples) => samples,
        Err(e) => {
            tracing::error!(error = %e, "Failed to stop capture");
            ctx.controller.on_processing_complete();
            ctx.set_tray(TrayState::Ready);
            return;
        }
    };

    ctx.set_tray(TrayState::Ready);

    if ctx.conn.lock().await.is_none() {
        ctx.controller.on_processing_complete();
        return;
    }

    if samples.is_empty() {
        ctx.print("[0.0s → 0ms] (no audio)");
        ctx.controller.on_processing_complete();
        return;
    }

    let audio_secs = samples.len() as f32 / ctx.settings.audio.sample_rate as f32;
    let chunk_samples = ctx.settings.audio.chunk_samples();
    let sent_at = Instant::now();

    {
        let mut conn_slot = ctx.conn.lock().await;
        let send_result = match conn_slot.as_mut() {
            Some(conn) => conn.send_utterance(&samples, chunk_samples).await,
            None => {
                ctx.controller.on_processing_complete();
                return;
            }
        };
        if let Err(e) = send_result {
            tracing::error!(error = %e, "Failed to stream utterance");
            ctx.print(&format!("[error] Transcription failed: {e}"));
            if let Some(conn) = conn_slot.take() {
                conn.close().await;
            }
            ctx.controller.on_processing_complete();
            ctx.set_tray(TrayState::Disconnected);
            return;
        }
    }

    // Arm the reply wait; the event loop routes the final (or times out).
    if let Ok(mut awaiting) = ctx.awaiting.lock() {
        *awaiting = Some(AwaitingFinal {
            deadline: sent_at + FINAL_TIMEOUT,
            sent_at,
            audio_secs,
        });
    }
}

/// Ensure a live connection. Daemon mode retries forever (5 s apart) while
/// the hotkey is still held; normal mode uses bounded exponential backoff.
async fn ensure_connected(ctx: &Arc<DaemonCtx>) -> bool {
    if ctx.conn.lock().await.is_some() {
        return true;
    }
    ctx.set_tray(TrayState::Disconnected);

    let url = &ctx.opts.server_url;
    if ctx.opts.daemon_mode {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match ServerConnection::connect(url, ctx.server_tx.clone()).await {
                Ok(conn) => {
                    *ctx.conn.lock().await = Some(conn);
                    ctx.set_tray(TrayState::Ready);
                    return true;
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Connection failed, retrying in 5s");
                }
            }
            tokio::time::sleep(DAEMON_RETRY_DELAY).await;
            // The user may have released long ago; the watchdog has reset
            // the state machine and this recording attempt is moot.
            if ctx.controller.state() != PttState::Recording {
                return false;
            }
        }
    } else {
        let attempts = ctx.settings.client.reconnect_attempts.max(1);
        let mut delay = ctx.settings.client.reconnect_delay;
        for attempt in 1..=attempts {
            match ServerConnection::connect(url, ctx.server_tx.clone()).await {
                Ok(conn) => {
                    *ctx.conn.lock().await = Some(conn);
                    ctx.set_tray(TrayState::Ready);
                    return true;
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Connection attempt failed");
                }
            }
            if attempt < attempts {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
        tracing::error!("Failed to connect to server");
        false
    }
}

// ── Server message routing ─────────────────────────────────────────

async fn route_server_message(ctx: &Arc<DaemonCtx>, msg: ServerMessage) {
    match msg {
        ServerMessage::Final { text, confidence } => {
            let Some(awaiting) = ctx.take_awaiting() else {
                tracing::debug!("Unsolicited final, ignoring");
                return;
            };
            tracing::debug!(
                confidence = f64::from(confidence),
                chars = text.len(),
                "Received final"
            );
            deliver(ctx, &text, &awaiting).await;
            ctx.controller.on_processing_complete();
            ctx.set_tray(TrayState::Ready);
        }

        ServerMessage::Error { code, message } => {
            if ctx.take_awaiting().is_some() {
                tracing::error!(?code, %message, "Server error");
                ctx.print(&format!("[error] Server: {message}"));
                ctx.controller.on_processing_complete();
                ctx.set_tray(TrayState::Ready);
            } else if ctx.controller.state() == PttState::Recording {
                // Mid-recording failure: abort capture promptly instead of
                // discovering the corpse at `end`.
                tracing::error!(?code, %message, "Server error during recording");
                ctx.print(&format!("[error] Server: {message}"));
                let _ = ctx.audio.stop_capture();
                ctx.controller.abort_recording();
                ctx.set_tray(TrayState::Ready);
            } else {
                tracing::warn!(?code, %message, "Server error outside any utterance");
            }
        }

        ServerMessage::Ready { session_id } => {
            tracing::debug!(%session_id, "Unexpected ready, ignoring");
        }
    }
}

async fn deliver(ctx: &Arc<DaemonCtx>, text: &str, awaiting: &AwaitingFinal) {
    let latency_ms = awaiting.sent_at.elapsed().as_millis();
    let audio_secs = awaiting.audio_secs;

    if ctx.opts.daemon_mode {
        if !text.is_empty() {
            output::dispatch(text, ctx.opts.output_mode).await;
        }
        return;
    }

    if ctx.opts.output_mode == OutputMode::Stdout {
        if text.is_empty() {
            ctx.print(&format!("[{audio_secs:.1}s → {latency_ms}ms] (silence)"));
        } else {
            ctx.print(&format!("[{audio_secs:.1}s → {latency_ms}ms] {text}"));
        }
    } else {
        ctx.print(&format!("[{audio_secs:.1}s → {latency_ms}ms]"));
        if !text.is_empty() {
            output::dispatch(text, ctx.opts.output_mode).await;
        }
    }
}

fn handle_final_timeout(ctx: &Arc<DaemonCtx>) {
    if ctx.take_awaiting().is_none() {
        return;
    }
    tracing::error!("Timeout waiting for transcription");
    ctx.print("[error] Timeout waiting for transcription");
    ctx.controller.on_processing_complete();
    ctx.set_tray(TrayState::Ready);
}
