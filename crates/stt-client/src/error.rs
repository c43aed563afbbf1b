//! Client error types.

use stt_core::ErrorCode;

/// Errors in the hotkey listeners.
#[derive(Debug, thiserror::Error)]
pub enum HotkeyError {
    /// A configured key name did not resolve to an evdev key code.
    /// Fatal to PTT mode.
    #[error("Unknown key name: {0} (tried KEY_{0})")]
    UnknownKey(String),

    /// Terminal raw mode could not be entered or restored.
    #[error("Terminal error: {0}")]
    Terminal(String),

    /// The listener task failed.
    #[error("Listener I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors in the client daemon and streaming session.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Connection or handshake failure (retried per policy).
    #[error("Failed to connect: {0}")]
    Connect(String),

    /// A bounded wait expired.
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// The socket failed mid-session.
    #[error("WebSocket error: {0}")]
    Socket(String),

    /// The server sent something other than the expected message.
    #[error("Unexpected server response: {0}")]
    UnexpectedMessage(String),

    /// The server reported an error in-band.
    #[error("Server error [{code:?}]: {message}")]
    Server { code: ErrorCode, message: String },

    /// Audio subsystem failure.
    #[error(transparent)]
    Audio(#[from] stt_audio::AudioError),

    /// Hotkey subsystem failure.
    #[error(transparent)]
    Hotkey(#[from] HotkeyError),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] stt_core::ConfigError),

    /// Protocol encode/decode failure.
    #[error(transparent)]
    Protocol(#[from] stt_core::ProtocolError),

    /// Filesystem or stdin failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
