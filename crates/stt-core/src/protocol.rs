//! WebSocket control messages for STT sessions.
//!
//! A session multiplexes two frame kinds on one socket: text frames carry the
//! JSON control messages defined here (discriminated by a `type` field), and
//! binary frames carry raw little-endian 16-bit mono PCM at the sample rate
//! the session was configured with.
//!
//! Unknown fields in a control message are ignored for forward compatibility;
//! an unknown `type` is a parse error.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Maximum size of a single WebSocket frame, either kind.
pub const MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

// ── Client → server ────────────────────────────────────────────────

/// Control messages sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Session configuration. Must precede any audio frame; repeats update
    /// the sample rate and are otherwise idempotent.
    Config {
        #[serde(default = "default_sample_rate")]
        sample_rate: u32,
        #[serde(default = "default_language")]
        language: String,
    },

    /// End of utterance: transcribe the buffered audio and reply.
    End,

    /// No-op that keeps the connection alive.
    Keepalive,
}

fn default_sample_rate() -> u32 {
    16_000
}

fn default_language() -> String {
    "en".to_string()
}

// ── Server → client ────────────────────────────────────────────────

/// Control messages sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Sent exactly once, immediately after the connection is admitted.
    Ready { session_id: String },

    /// Final transcription for one utterance. Empty text is valid (silence).
    Final { text: String, confidence: f32 },

    /// Error report. Whether the session survives depends on the code.
    Error { code: ErrorCode, message: String },
}

/// Machine-readable error discriminator carried in [`ServerMessage::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// All admission permits are in use; the connection is closed.
    ServerFull,
    /// A binary frame arrived before the `config` message.
    NotConfigured,
    /// The 30-second session buffer would overflow; the frame was dropped.
    BufferFull,
    /// A text frame did not decode into a known control message.
    ParseError,
    /// The model failed while transcribing the utterance.
    TranscriptionError,
    /// Unexpected failure in the session handler.
    Internal,
}

impl ClientMessage {
    /// Decode a text frame.
    pub fn from_json(data: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(data)?)
    }

    /// Encode for transmission as a text frame.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl ServerMessage {
    /// Decode a text frame.
    pub fn from_json(data: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(data)?)
    }

    /// Encode for transmission as a text frame.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Validate a binary audio frame and decode it into samples.
///
/// Accepts any non-empty frame with an even byte length; the chunk size the
/// capture side happens to use is not the server's concern.
pub fn decode_pcm_frame(data: &[u8]) -> Result<Vec<i16>, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::EmptyFrame);
    }
    if data.len() % 2 != 0 {
        return Err(ProtocolError::OddFrameLength(data.len()));
    }
    Ok(data
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Encode samples as a little-endian binary audio frame.
pub fn encode_pcm_frame(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_round_trip() {
        let messages = [
            ClientMessage::Config {
                sample_rate: 16_000,
                language: "en".to_string(),
            },
            ClientMessage::End,
            ClientMessage::Keepalive,
        ];
        for msg in messages {
            let json = msg.to_json().unwrap();
            assert_eq!(ClientMessage::from_json(&json).unwrap(), msg);
        }
    }

    #[test]
    fn server_messages_round_trip() {
        let messages = [
            ServerMessage::Ready {
                session_id: "ab12cd34".to_string(),
            },
            ServerMessage::Final {
                text: "hello world".to_string(),
                confidence: 1.0,
            },
            ServerMessage::Error {
                code: ErrorCode::BufferFull,
                message: "Audio buffer full".to_string(),
            },
        ];
        for msg in messages {
            let json = msg.to_json().unwrap();
            assert_eq!(ServerMessage::from_json(&json).unwrap(), msg);
        }
    }

    #[test]
    fn wire_format_matches_protocol() {
        let json = ClientMessage::End.to_json().unwrap();
        assert_eq!(json, r#"{"type":"end"}"#);

        let json = ServerMessage::Error {
            code: ErrorCode::ServerFull,
            message: "full".to_string(),
        }
        .to_json()
        .unwrap();
        assert!(json.contains(r#""code":"SERVER_FULL""#));
    }

    #[test]
    fn unknown_type_is_a_parse_error() {
        assert!(ClientMessage::from_json(r#"{"type":"bogus"}"#).is_err());
        assert!(ClientMessage::from_json("not json at all").is_err());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let msg =
            ClientMessage::from_json(r#"{"type":"end","future_field":42}"#).unwrap();
        assert_eq!(msg, ClientMessage::End);
    }

    #[test]
    fn config_defaults_apply() {
        let msg = ClientMessage::from_json(r#"{"type":"config"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Config {
                sample_rate: 16_000,
                language: "en".to_string(),
            }
        );
    }

    #[test]
    fn pcm_frames_round_trip() {
        let samples = vec![0i16, 1, -1, i16::MAX, i16::MIN];
        let bytes = encode_pcm_frame(&samples);
        assert_eq!(decode_pcm_frame(&bytes).unwrap(), samples);
    }

    #[test]
    fn odd_length_frame_is_rejected() {
        let err = decode_pcm_frame(&[0u8, 1, 2]).unwrap_err();
        assert!(matches!(err, ProtocolError::OddFrameLength(3)));
    }

    #[test]
    fn empty_frame_is_rejected() {
        assert!(matches!(
            decode_pcm_frame(&[]).unwrap_err(),
            ProtocolError::EmptyFrame
        ));
    }
}
