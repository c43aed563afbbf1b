//! Shared foundation for the STT service: typed configuration read from the
//! environment, and the WebSocket wire protocol spoken between `stt-client`
//! and `stt-server`.
//!
//! This crate is deliberately free of I/O; the binaries own sockets, audio
//! devices, and signal handling.

pub mod config;
pub mod error;
pub mod protocol;

pub use config::{
    AudioSettings, ClientSettings, ModelSettings, OutputMode, Provider, PttSettings,
    ServerSettings, Settings,
};
pub use error::{ConfigError, ProtocolError};
pub use protocol::{ClientMessage, ErrorCode, ServerMessage, MAX_FRAME_BYTES};

/// Hard ceiling on utterance length, enforced independently at the audio
/// source, the session buffer, and the transcriber.
pub const MAX_UTTERANCE_SECS: u32 = 30;
