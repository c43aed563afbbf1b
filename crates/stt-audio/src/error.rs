//! Audio subsystem error types.

/// Errors that can occur while capturing or playing audio.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    /// No audio input device found.
    #[error("No audio input device found")]
    NoInputDevice,

    /// Failed to open or run the audio input stream.
    #[error("Failed to open audio input stream: {0}")]
    InputStream(String),

    /// Failed to open the audio output stream.
    #[error("Failed to open audio output stream: {0}")]
    OutputStream(String),

    /// Audio resampling error.
    #[error("Audio resampling failed: {0}")]
    Resample(String),

    /// The dedicated audio thread is no longer running.
    #[error("Audio thread died")]
    ThreadDied,
}
