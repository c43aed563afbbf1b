//! Audio I/O for the STT client: microphone capture (16 kHz mono i16) and
//! the output primitive used for push-to-talk feedback tones.
//!
//! `cpal::Stream` and `rodio::OutputStream` are `!Send` on some platforms,
//! so both live on a dedicated OS thread behind [`AudioThreadHandle`]; the
//! rest of the client talks to them through channels.

pub mod capture;
pub mod error;
pub mod playback;
pub mod thread;
pub mod tone;

pub use error::AudioError;
pub use thread::AudioThreadHandle;
pub use tone::{Tone, TONE_SAMPLE_RATE};
