//! Per-connection session state.

use stt_core::MAX_UTTERANCE_SECS;

/// The buffer cap was hit; the offending frame was not appended.
#[derive(Debug, thiserror::Error)]
#[error("session buffer full ({max_samples} samples)")]
pub struct BufferFull {
    pub max_samples: usize,
}

/// State for a single client connection.
///
/// Owned exclusively by the connection handler. The buffer holds one
/// utterance at a time and never exceeds [`MAX_UTTERANCE_SECS`] of audio at
/// the declared sample rate.
#[derive(Debug)]
pub struct Session {
    id: String,
    sample_rate: u32,
    configured: bool,
    buffer: Vec<i16>,
}

impl Session {
    /// Create an unconfigured session. Audio is rejected until the client
    /// sends its `config` message.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sample_rate: 16_000,
            configured: false,
            buffer: Vec::new(),
        }
    }

    /// The session's opaque identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The declared sample rate.
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Whether a `config` message has been received.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.configured
    }

    /// Apply a `config` message. Idempotent; repeats update the rate.
    pub fn configure(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
        self.configured = true;
    }

    /// The buffer cap in samples: 30 seconds at the declared rate.
    #[must_use]
    pub const fn max_samples(&self) -> usize {
        self.sample_rate as usize * MAX_UTTERANCE_SECS as usize
    }

    /// Samples currently buffered.
    #[must_use]
    pub fn buffered_samples(&self) -> usize {
        self.buffer.len()
    }

    /// Append one decoded audio frame.
    ///
    /// A frame that would push the buffer past the cap is dropped whole;
    /// the session stays usable and the buffered audio is kept.
    pub fn push_samples(&mut self, samples: &[i16]) -> Result<(), BufferFull> {
        if self.buffer.len() + samples.len() > self.max_samples() {
            return Err(BufferFull {
                max_samples: self.max_samples(),
            });
        }
        self.buffer.extend_from_slice(samples);
        Ok(())
    }

    /// Take the buffered utterance, leaving the buffer empty.
    pub fn take_audio(&mut self) -> Vec<i16> {
        std::mem::take(&mut self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unconfigured_at_the_default_rate() {
        let s = Session::new("abcd1234");
        assert!(!s.is_configured());
        assert_eq!(s.sample_rate(), 16_000);
        assert_eq!(s.max_samples(), 480_000);
    }

    #[test]
    fn configure_is_idempotent_and_updates_rate() {
        let mut s = Session::new("abcd1234");
        s.configure(16_000);
        assert!(s.is_configured());
        s.configure(8_000);
        assert!(s.is_configured());
        assert_eq!(s.sample_rate(), 8_000);
        assert_eq!(s.max_samples(), 240_000);
    }

    #[test]
    fn buffer_cap_rejects_the_overflowing_frame() {
        let mut s = Session::new("abcd1234");
        s.configure(16_000);

        let chunk = vec![0i16; 1600];
        for _ in 0..300 {
            s.push_samples(&chunk).unwrap();
        }
        assert_eq!(s.buffered_samples(), 480_000);

        // Frame 301 exceeds the cap and is dropped whole.
        assert!(s.push_samples(&chunk).is_err());
        assert_eq!(s.buffered_samples(), 480_000);

        // The session remains usable.
        let audio = s.take_audio();
        assert_eq!(audio.len(), 480_000);
        assert_eq!(s.buffered_samples(), 0);
        s.push_samples(&chunk).unwrap();
    }

    #[test]
    fn take_audio_clears_the_buffer() {
        let mut s = Session::new("abcd1234");
        s.configure(16_000);
        s.push_samples(&[1, 2, 3]).unwrap();
        assert_eq!(s.take_audio(), vec![1, 2, 3]);
        assert!(s.take_audio().is_empty());
    }
}
