//! Server error types.

/// Fatal startup errors. Session-level failures never use this type; they
/// are reported to the client in-band and the session continues or closes
/// on its own.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The acoustic model failed to initialize (missing files, or the GPU
    /// execution provider is unavailable).
    #[error("Failed to initialize model: {0}")]
    ModelInit(String),

    /// A required model file is missing.
    #[error("Model file not found: {0}")]
    ModelFileMissing(std::path::PathBuf),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] stt_core::ConfigError),

    /// Listener socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
