//! Push-to-talk desktop client.
//!
//! Captures microphone audio while a global hotkey is held, streams it to the
//! transcription server over a framed WebSocket, and dispatches the returned
//! text to an output sink. Two hotkey sources satisfy one contract: a global
//! evdev listener with hot-plug device tracking, and a raw-terminal fallback
//! with repeat-timeout release detection.

pub mod daemon;
pub mod error;
pub mod hotkey;
pub mod logging;
pub mod oneshot;
pub mod output;
pub mod ptt;
pub mod session;
pub mod takeover;
pub mod tray;

pub use error::{ClientError, HotkeyError};
pub use ptt::{PttController, PttEvent, PttState};
pub use session::ServerConnection;
pub use tray::{TrayIndicator, TrayState};
