//! Feedback tone synthesis for push-to-talk.
//!
//! Two short sinusoidal cues: a higher "on air" click when recording starts
//! and a lower "off air" unclick when the utterance is submitted. Tones are
//! generated once at controller construction and replayed from memory.

/// Sample rate the tones are synthesized at.
pub const TONE_SAMPLE_RATE: u32 = 44_100;

/// Audible portion of each tone.
const TONE_SECS: f32 = 0.08;

/// Cosine fade applied to each end of the audible portion.
const FADE_SECS: f32 = 0.005;

/// Trailing silence so output-subsystem latency cannot clip the decay.
const PAD_SECS: f32 = 0.02;

/// Peak amplitude, kept subtle.
const AMPLITUDE: f32 = 0.25;

/// A pre-rendered feedback tone (mono f32 at [`TONE_SAMPLE_RATE`]).
#[derive(Debug, Clone)]
pub struct Tone {
    pub samples: Vec<f32>,
}

impl Tone {
    /// The rising "on air" cue played when recording starts (880 Hz).
    #[must_use]
    pub fn click() -> Self {
        Self::render(880.0, 15.0)
    }

    /// The falling "off air" cue played when the recording is submitted (440 Hz).
    #[must_use]
    pub fn unclick() -> Self {
        Self::render(440.0, 20.0)
    }

    /// Total duration in seconds, padding included.
    #[must_use]
    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / TONE_SAMPLE_RATE as f32
    }

    /// The tone as little-endian 16-bit PCM, for the `paplay` fallback sink.
    #[must_use]
    pub fn to_s16le(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.samples.len() * 2);
        for s in &self.samples {
            let q = (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
            out.extend_from_slice(&q.to_le_bytes());
        }
        out
    }

    fn render(freq: f32, decay: f32) -> Self {
        let tone_len = (TONE_SECS * TONE_SAMPLE_RATE as f32) as usize;
        let fade_len = (FADE_SECS * TONE_SAMPLE_RATE as f32) as usize;
        let pad_len = (PAD_SECS * TONE_SAMPLE_RATE as f32) as usize;

        let mut samples = Vec::with_capacity(tone_len + pad_len);
        for i in 0..tone_len {
            let t = i as f32 / TONE_SAMPLE_RATE as f32;
            // Quick attack, exponential decay.
            let envelope = (-t * decay).exp() * (1.0 - (-t * 100.0).exp());
            let mut s = (std::f32::consts::TAU * freq * t).sin() * envelope * AMPLITUDE;

            // Cosine fades keep the edges click-free.
            if i < fade_len {
                let x = i as f32 / fade_len as f32;
                s *= 0.5 * (1.0 - (std::f32::consts::PI * x).cos());
            }
            let from_end = tone_len - 1 - i;
            if from_end < fade_len {
                let x = from_end as f32 / fade_len as f32;
                s *= 0.5 * (1.0 - (std::f32::consts::PI * x).cos());
            }

            samples.push(s);
        }
        samples.extend(std::iter::repeat_n(0.0, pad_len));

        Self { samples }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tones_have_the_documented_duration() {
        for tone in [Tone::click(), Tone::unclick()] {
            let expected = ((TONE_SECS + PAD_SECS) * TONE_SAMPLE_RATE as f32) as usize;
            assert_eq!(tone.samples.len(), expected);
        }
    }

    #[test]
    fn tones_stay_within_amplitude_bounds() {
        for tone in [Tone::click(), Tone::unclick()] {
            let peak = tone.samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
            assert!(peak > 0.01, "tone should be audible, peak {peak}");
            assert!(peak <= AMPLITUDE, "peak {peak} exceeds amplitude cap");
        }
    }

    #[test]
    fn tone_edges_are_faded_and_tail_is_silent() {
        let tone = Tone::click();
        assert_eq!(tone.samples[0], 0.0);

        let pad_len = (PAD_SECS * TONE_SAMPLE_RATE as f32) as usize;
        let tail = &tone.samples[tone.samples.len() - pad_len..];
        assert!(tail.iter().all(|s| *s == 0.0));

        // The last audible sample sits at the end of the fade-out.
        let last_audible = tone.samples[tone.samples.len() - pad_len - 1];
        assert!(last_audible.abs() < 0.01);
    }

    #[test]
    fn s16le_rendering_is_two_bytes_per_sample() {
        let tone = Tone::unclick();
        assert_eq!(tone.to_s16le().len(), tone.samples.len() * 2);
    }
}
