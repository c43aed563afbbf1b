//! WebSocket transcription server.
//!
//! Accepts framed sessions (JSON control messages + binary PCM frames),
//! buffers each utterance up to the 30-second ceiling, and offloads the
//! GPU-bound transcription to a dedicated worker thread so the reactor keeps
//! serving other sessions.

pub mod error;
pub mod runtime;
pub mod session;
#[cfg(feature = "sherpa")]
pub mod sherpa;
pub mod transcriber;
pub mod worker;

pub use error::ServerError;
pub use runtime::{router, serve, AppState, Shutdown};
pub use session::Session;
#[cfg(feature = "sherpa")]
pub use sherpa::SherpaTranscriber;
pub use transcriber::{prepare_audio, TranscribeError, Transcriber};
pub use worker::TranscriberWorker;
