//! Error types shared by the configuration and protocol layers.

/// Errors produced while reading settings from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable was set but could not be parsed.
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Errors produced while encoding or decoding wire messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A text frame did not decode into a known control message.
    #[error("malformed control message: {0}")]
    Parse(#[from] serde_json::Error),

    /// A binary frame had an odd byte length (samples are 2 bytes each).
    #[error("binary audio frame has odd length {0}")]
    OddFrameLength(usize),

    /// A binary frame was empty.
    #[error("binary audio frame is empty")]
    EmptyFrame,
}
