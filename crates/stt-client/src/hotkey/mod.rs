//! Hotkey sources for push-to-talk.
//!
//! Two implementations satisfy one small contract:
//!
//! - [`EvdevHotkeyListener`] reads kernel input devices and works globally,
//!   with hot-plug tracking for KVM-switch setups.
//! - [`TerminalHotkeyListener`] reads raw stdin, for SSH and containers
//!   where `/dev/input` is not accessible.
//!
//! Both fire `on_activate` exactly once when the configured combination
//! becomes fully held and `on_deactivate` exactly once when it stops being
//! held. `stop()` is idempotent and safe to call from another task. A
//! panicky callback is the host's bug; listeners only ever call the
//! callbacks at edge transitions, so spurious repeats are suppressed here.

pub mod evdev;
pub mod terminal;

use std::sync::Arc;

pub use self::evdev::EvdevHotkeyListener;
pub use self::terminal::TerminalHotkeyListener;

use crate::error::HotkeyError;

/// Edge-triggered notification callback.
pub type Callback = Arc<dyn Fn() + Send + Sync>;

/// Device-count change notification (evdev only).
pub type DeviceCountCallback = Arc<dyn Fn(usize) + Send + Sync>;

/// Callbacks shared by both listener implementations.
#[derive(Clone)]
pub struct HotkeyCallbacks {
    /// All configured keys became held.
    pub on_activate: Callback,
    /// Any configured key was released (or its device vanished).
    pub on_deactivate: Callback,
    /// The set of readable keyboards changed size.
    pub on_device_count_changed: Option<DeviceCountCallback>,
}

/// Stops a running listener from outside its task. Idempotent.
#[derive(Clone)]
pub enum StopHandle {
    Token(tokio_util::sync::CancellationToken),
    Flag(Arc<std::sync::atomic::AtomicBool>),
}

impl StopHandle {
    pub fn stop(&self) {
        match self {
            Self::Token(token) => token.cancel(),
            Self::Flag(flag) => flag.store(true, std::sync::atomic::Ordering::SeqCst),
        }
    }
}

/// The two interchangeable hotkey sources.
pub enum HotkeySource {
    Evdev(EvdevHotkeyListener),
    Terminal(TerminalHotkeyListener),
}

impl HotkeySource {
    /// Run until [`stop`](Self::stop) is called (or, in terminal mode, the
    /// user quits with `q`/ESC).
    pub async fn run(&mut self) -> Result<(), HotkeyError> {
        match self {
            Self::Evdev(listener) => listener.run().await,
            Self::Terminal(listener) => listener.run().await,
        }
    }

    /// Stop the listener. Idempotent, callable from any task.
    pub fn stop(&self) {
        match self {
            Self::Evdev(listener) => listener.stop(),
            Self::Terminal(listener) => listener.stop(),
        }
    }

    /// A handle that can stop the listener after it moved into its task.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        match self {
            Self::Evdev(listener) => listener.stop_handle(),
            Self::Terminal(listener) => listener.stop_handle(),
        }
    }

    /// Print a status line correctly even while the terminal is raw.
    pub fn print_normal(&self, line: &str) {
        match self {
            Self::Evdev(_) => println!("{line}"),
            Self::Terminal(listener) => listener.print_normal(line),
        }
    }

    /// Human-readable description of the configured hotkey.
    #[must_use]
    pub fn hotkey_label(&self) -> String {
        match self {
            Self::Evdev(listener) => listener.hotkey_label(),
            Self::Terminal(listener) => listener.hotkey_label(),
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }
}
