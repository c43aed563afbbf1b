//! Raw-terminal hotkey listener.
//!
//! Fallback for environments without `/dev/input` access (SSH, containers).
//! The terminal cannot report key releases, so release is inferred from the
//! auto-repeat stream: after activation we wait up to 600 ms for the first
//! repeat, then expect further repeats within 150 ms windows. A window that
//! passes without a repeat means the key was let go.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal;

use super::HotkeyCallbacks;
use crate::error::HotkeyError;

/// Wait for the first auto-repeat after the initial press.
const FIRST_REPEAT_WINDOW: Duration = Duration::from_millis(600);

/// Window between subsequent repeats once they are flowing.
const REPEAT_WINDOW: Duration = Duration::from_millis(150);

/// Idle poll granularity; bounds stop() latency.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

// ── Release detection ──────────────────────────────────────────────

/// What a detector step tells the listener to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeyAction {
    Activate,
    Release,
}

/// Two-phase auto-repeat release detector.
///
/// Pure state machine over explicit timestamps, so the windows are testable
/// without a terminal.
pub(crate) struct ReleaseDetector {
    state: DetectorState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DetectorState {
    Idle,
    /// Pressed; no repeat seen yet.
    AwaitingFirstRepeat { deadline: Instant },
    /// Repeats flowing; each one renews the short window.
    Repeating { deadline: Instant },
}

impl ReleaseDetector {
    pub(crate) const fn new() -> Self {
        Self {
            state: DetectorState::Idle,
        }
    }

    /// The hotkey character arrived (initial press or auto-repeat).
    pub(crate) fn on_key(&mut self, now: Instant) -> Option<KeyAction> {
        match self.state {
            DetectorState::Idle => {
                self.state = DetectorState::AwaitingFirstRepeat {
                    deadline: now + FIRST_REPEAT_WINDOW,
                };
                Some(KeyAction::Activate)
            }
            DetectorState::AwaitingFirstRepeat { .. } | DetectorState::Repeating { .. } => {
                self.state = DetectorState::Repeating {
                    deadline: now + REPEAT_WINDOW,
                };
                None
            }
        }
    }

    /// Check the current window. Past the deadline means the key was
    /// released.
    pub(crate) fn check(&mut self, now: Instant) -> Option<KeyAction> {
        let deadline = match self.state {
            DetectorState::Idle => return None,
            DetectorState::AwaitingFirstRepeat { deadline }
            | DetectorState::Repeating { deadline } => deadline,
        };
        if now >= deadline {
            self.state = DetectorState::Idle;
            Some(KeyAction::Release)
        } else {
            None
        }
    }

    /// Force back to idle (listener exit mid-hold).
    pub(crate) fn reset(&mut self) -> bool {
        let was_held = self.state != DetectorState::Idle;
        self.state = DetectorState::Idle;
        was_held
    }

    /// How long the poll may sleep before the next deadline check.
    pub(crate) fn poll_timeout(&self, now: Instant) -> Duration {
        match self.state {
            DetectorState::Idle => POLL_INTERVAL,
            DetectorState::AwaitingFirstRepeat { deadline }
            | DetectorState::Repeating { deadline } => deadline
                .saturating_duration_since(now)
                .min(POLL_INTERVAL),
        }
    }
}

// ── Raw mode guard ─────────────────────────────────────────────────

/// Restores cooked mode on every exit path, panics included.
struct RawModeGuard;

impl RawModeGuard {
    fn enter() -> Result<Self, HotkeyError> {
        terminal::enable_raw_mode().map_err(|e| HotkeyError::Terminal(e.to_string()))?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

// ── Listener ───────────────────────────────────────────────────────

/// Terminal hotkey listener (raw stdin, repeat-timeout release detection).
pub struct TerminalHotkeyListener {
    callbacks: HotkeyCallbacks,
    hotkey: char,
    hotkey_name: String,
    stop: Arc<AtomicBool>,
}

impl TerminalHotkeyListener {
    #[must_use]
    pub fn new(hotkey: char, hotkey_name: impl Into<String>, callbacks: HotkeyCallbacks) -> Self {
        Self {
            callbacks,
            hotkey,
            hotkey_name: hotkey_name.into(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run until `q`, ESC, Ctrl-C, or [`stop`](Self::stop).
    ///
    /// The blocking read loop runs on the blocking pool; the terminal is
    /// restored on every exit path.
    pub async fn run(&mut self) -> Result<(), HotkeyError> {
        let hotkey = self.hotkey;
        let callbacks = self.callbacks.clone();
        let stop = Arc::clone(&self.stop);

        tokio::task::spawn_blocking(move || run_blocking(hotkey, &callbacks, &stop))
            .await
            .map_err(|e| HotkeyError::Terminal(format!("listener task failed: {e}")))?
    }

    /// Stop the listener. Idempotent, safe from any task; the blocking loop
    /// notices within one poll interval.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// A stop handle usable after the listener moved into its task.
    #[must_use]
    pub fn stop_handle(&self) -> super::StopHandle {
        super::StopHandle::Flag(Arc::clone(&self.stop))
    }

    /// Print a line with proper newline handling while stdin is raw.
    pub fn print_normal(&self, line: &str) {
        print_normal(line);
    }

    #[must_use]
    pub fn hotkey_label(&self) -> String {
        self.hotkey_name.clone()
    }
}

/// Temporarily leave raw mode so a status line renders with a real CRLF.
pub fn print_normal(line: &str) {
    let _ = terminal::disable_raw_mode();
    println!("{line}");
    let _ = terminal::enable_raw_mode();
}

fn run_blocking(
    hotkey: char,
    callbacks: &HotkeyCallbacks,
    stop: &AtomicBool,
) -> Result<(), HotkeyError> {
    let _guard = RawModeGuard::enter()?;
    let mut detector = ReleaseDetector::new();

    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }

        let now = Instant::now();
        if let Some(KeyAction::Release) = detector.check(now) {
            (callbacks.on_deactivate)();
        }

        let timeout = detector.poll_timeout(Instant::now());
        let ready = event::poll(timeout).map_err(|e| HotkeyError::Terminal(e.to_string()))?;
        if !ready {
            continue;
        }

        let Event::Key(key) = event::read().map_err(|e| HotkeyError::Terminal(e.to_string()))?
        else {
            continue;
        };
        if key.kind == KeyEventKind::Release {
            continue;
        }

        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => break,
            KeyCode::Char('q') | KeyCode::Esc => break,
            KeyCode::Char(c) if c == hotkey => {
                if let Some(KeyAction::Activate) = detector.on_key(Instant::now()) {
                    (callbacks.on_activate)();
                }
            }
            _ => {}
        }
    }

    // Exiting mid-hold still produces a release.
    if detector.reset() {
        (callbacks.on_deactivate)();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_key_activates() {
        let mut d = ReleaseDetector::new();
        let t0 = Instant::now();
        assert_eq!(d.on_key(t0), Some(KeyAction::Activate));
        assert_eq!(d.on_key(t0 + Duration::from_millis(30)), None);
    }

    #[test]
    fn no_repeat_within_600ms_means_release() {
        let mut d = ReleaseDetector::new();
        let t0 = Instant::now();
        d.on_key(t0);

        assert_eq!(d.check(t0 + Duration::from_millis(599)), None);
        assert_eq!(
            d.check(t0 + Duration::from_millis(600)),
            Some(KeyAction::Release)
        );
        // Released; further checks are quiet.
        assert_eq!(d.check(t0 + Duration::from_secs(10)), None);
    }

    #[test]
    fn window_tightens_to_150ms_after_the_first_repeat() {
        let mut d = ReleaseDetector::new();
        let t0 = Instant::now();
        d.on_key(t0);
        d.on_key(t0 + Duration::from_millis(400)); // first auto-repeat

        let t1 = t0 + Duration::from_millis(400);
        assert_eq!(d.check(t1 + Duration::from_millis(149)), None);
        assert_eq!(
            d.check(t1 + Duration::from_millis(150)),
            Some(KeyAction::Release)
        );
    }

    #[test]
    fn steady_repeats_keep_it_held() {
        let mut d = ReleaseDetector::new();
        let mut t = Instant::now();
        assert_eq!(d.on_key(t), Some(KeyAction::Activate));
        for _ in 0..20 {
            t += Duration::from_millis(100);
            assert_eq!(d.on_key(t), None);
            assert_eq!(d.check(t + Duration::from_millis(50)), None);
        }
        assert_eq!(
            d.check(t + Duration::from_millis(150)),
            Some(KeyAction::Release)
        );
    }

    #[test]
    fn reset_reports_whether_a_key_was_held() {
        let mut d = ReleaseDetector::new();
        assert!(!d.reset());
        d.on_key(Instant::now());
        assert!(d.reset());
        assert!(!d.reset());
    }

    #[test]
    fn poll_timeout_never_exceeds_the_poll_interval() {
        let mut d = ReleaseDetector::new();
        let t0 = Instant::now();
        assert_eq!(d.poll_timeout(t0), POLL_INTERVAL);

        d.on_key(t0);
        assert!(d.poll_timeout(t0) <= POLL_INTERVAL);

        d.on_key(t0 + Duration::from_millis(400));
        let near_deadline = t0 + Duration::from_millis(540);
        assert!(d.poll_timeout(near_deadline) <= Duration::from_millis(10));
    }
}
