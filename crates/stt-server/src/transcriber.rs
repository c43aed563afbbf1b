//! The seam between the session manager and the acoustic model.
//!
//! The model is an external collaborator: everything behind [`Transcriber`]
//! is allowed to be slow, GPU-bound, and synchronous. The adapter here owns
//! input normalization and the duration guard, so no backend ever sees more
//! than 30 seconds of audio.

use stt_core::MAX_UTTERANCE_SECS;

/// Errors surfaced by a transcription attempt.
#[derive(Debug, thiserror::Error)]
pub enum TranscribeError {
    /// The utterance exceeds the model's 30-second ceiling. A parallel
    /// safeguard to the session buffer cap.
    #[error("Audio too long: {actual_secs:.1}s exceeds max {max_secs}s")]
    TooLong { actual_secs: f32, max_secs: u32 },

    /// The model failed during inference.
    #[error("Inference failed: {0}")]
    Inference(String),

    /// The worker thread is gone (shutdown or crash).
    #[error("Transcription worker unavailable")]
    WorkerGone,
}

/// Synchronous transcription backend.
///
/// Implementations run on the dedicated worker thread and may block for the
/// duration of inference. Input is normalized mono f32 in `[-1, 1]`.
pub trait Transcriber: Send + 'static {
    fn transcribe(&mut self, audio: &[f32], sample_rate: u32) -> Result<String, TranscribeError>;
}

/// Normalize raw session audio for the model: i16 → f32 in `[-1, 1]`, and
/// interleaved multichannel collapsed to mono by averaging.
#[must_use]
pub fn prepare_audio(samples: &[i16], channels: u16) -> Vec<f32> {
    let normalized = samples.iter().map(|&s| f32::from(s) / 32_767.0);
    if channels <= 1 {
        return normalized.collect();
    }
    let channels = usize::from(channels);
    normalized
        .collect::<Vec<f32>>()
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Reject utterances longer than the model ceiling.
pub fn validate_duration(sample_count: usize, sample_rate: u32) -> Result<(), TranscribeError> {
    let actual_secs = sample_count as f32 / sample_rate as f32;
    if actual_secs > MAX_UTTERANCE_SECS as f32 {
        return Err(TranscribeError::TooLong {
            actual_secs,
            max_secs: MAX_UTTERANCE_SECS,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_normalizes_full_scale() {
        let out = prepare_audio(&[0, i16::MAX, -i16::MAX], 1);
        assert_eq!(out[0], 0.0);
        assert!((out[1] - 1.0).abs() < 1e-6);
        assert!((out[2] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn prepare_averages_stereo_to_mono() {
        let out = prepare_audio(&[16_384, 0, -16_384, 16_384], 2);
        assert_eq!(out.len(), 2);
        assert!((out[0] - 0.25).abs() < 1e-3);
        assert!(out[1].abs() < 1e-3);
    }

    #[test]
    fn duration_guard_allows_exactly_thirty_seconds() {
        assert!(validate_duration(480_000, 16_000).is_ok());
        assert!(validate_duration(480_001, 16_000).is_err());
    }

    #[test]
    fn duration_guard_scales_with_rate() {
        assert!(validate_duration(240_000, 8_000).is_ok());
        assert!(validate_duration(240_001, 8_000).is_err());
    }
}
