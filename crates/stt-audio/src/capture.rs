//! Microphone capture via `cpal`.
//!
//! Records from the default input device at whatever rate and channel count
//! the device offers, then downmixes and resamples to the session format
//! (16 kHz mono by default) when the recording stops. Output samples are
//! 16-bit signed PCM, ready for the wire.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use rubato::{FftFixedIn, Resampler as _};

use stt_core::AudioSettings;

use crate::error::AudioError;

/// Accumulation bound, expressed in capture chunks (~100 s at the default
/// chunk size). Overflow drops the newest audio and logs a warning.
pub const MAX_BUFFERED_CHUNKS: usize = 1000;

/// Audio capture handle.
///
/// Wraps a `cpal` input stream and accumulates PCM samples while recording.
pub struct AudioCapture {
    /// The active cpal input stream (None when not recording).
    _stream: Option<Stream>,

    /// Raw samples at the device rate, interleaved.
    buffer: Arc<Mutex<Vec<f32>>>,

    /// Whether we are currently recording.
    is_recording: Arc<AtomicBool>,

    /// Set once per recording when the accumulation bound is hit.
    overflow_warned: Arc<AtomicBool>,

    /// Target output format.
    target_rate: u32,
    chunk_samples: usize,

    /// Device format, captured at construction.
    device_sample_rate: u32,
    device_channels: u16,
}

impl AudioCapture {
    /// Create a capture instance bound to the default input device.
    pub fn new(settings: &AudioSettings) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(AudioError::NoInputDevice)?;

        let config = device
            .default_input_config()
            .map_err(|e| AudioError::InputStream(e.to_string()))?;

        let device_sample_rate = config.sample_rate().0;
        let device_channels = config.channels();

        tracing::info!(
            device = %device.name().unwrap_or_default(),
            sample_rate = device_sample_rate,
            channels = device_channels,
            "Audio capture initialized"
        );

        Ok(Self {
            _stream: None,
            buffer: Arc::new(Mutex::new(Vec::new())),
            is_recording: Arc::new(AtomicBool::new(false)),
            overflow_warned: Arc::new(AtomicBool::new(false)),
            target_rate: settings.sample_rate,
            chunk_samples: settings.chunk_samples(),
            device_sample_rate,
            device_channels,
        })
    }

    /// Start recording from the microphone.
    ///
    /// Audio accumulates in an internal buffer until [`stop_recording`]
    /// retrieves it. Starting while already recording is a no-op.
    ///
    /// [`stop_recording`]: Self::stop_recording
    pub fn start_recording(&mut self) -> Result<(), AudioError> {
        if self.is_recording.load(Ordering::SeqCst) {
            return Ok(());
        }

        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }
        self.overflow_warned.store(false, Ordering::SeqCst);

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(AudioError::NoInputDevice)?;

        let config = device
            .default_input_config()
            .map_err(|e| AudioError::InputStream(e.to_string()))?;

        let stream = self.build_input_stream(&device, &config)?;
        stream
            .play()
            .map_err(|e| AudioError::InputStream(e.to_string()))?;

        self._stream = Some(stream);
        self.is_recording.store(true, Ordering::SeqCst);
        tracing::debug!("Audio recording started");

        Ok(())
    }

    /// Stop recording and return the captured audio as 16 kHz mono i16 PCM.
    pub fn stop_recording(&mut self) -> Result<Vec<i16>, AudioError> {
        self.is_recording.store(false, Ordering::SeqCst);

        // Drop the stream to stop capturing.
        self._stream = None;

        let raw_samples = {
            let mut buf = self
                .buffer
                .lock()
                .map_err(|e| AudioError::InputStream(e.to_string()))?;
            std::mem::take(&mut *buf)
        };

        tracing::debug!(
            raw_samples = raw_samples.len(),
            device_rate = self.device_sample_rate,
            target_rate = self.target_rate,
            "Audio recording stopped"
        );

        let mono = if self.device_channels > 1 {
            downmix_to_mono(&raw_samples, self.device_channels)
        } else {
            raw_samples
        };

        let at_rate = if self.device_sample_rate == self.target_rate {
            mono
        } else {
            resample(&mono, self.device_sample_rate, self.target_rate)?
        };

        Ok(quantize(&at_rate))
    }

    /// Check if currently recording.
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.is_recording.load(Ordering::SeqCst)
    }

    /// The maximum number of device-rate samples the buffer will hold, the
    /// device-side equivalent of [`MAX_BUFFERED_CHUNKS`] capture chunks.
    fn max_raw_samples(&self) -> usize {
        let chunks_per_sec = self.target_rate as usize / self.chunk_samples.max(1);
        let bound_secs = MAX_BUFFERED_CHUNKS / chunks_per_sec.max(1);
        self.device_sample_rate as usize * usize::from(self.device_channels) * bound_secs
    }

    /// Build a cpal input stream that appends samples to the shared buffer.
    fn build_input_stream(
        &self,
        device: &Device,
        config: &cpal::SupportedStreamConfig,
    ) -> Result<Stream, AudioError> {
        let buffer = Arc::clone(&self.buffer);
        let is_recording = Arc::clone(&self.is_recording);
        let overflow_warned = Arc::clone(&self.overflow_warned);
        let max_samples = self.max_raw_samples();

        let stream_config: StreamConfig = config.clone().into();
        let sample_format = config.sample_format();

        let err_fn = |err: cpal::StreamError| {
            tracing::error!(%err, "Audio input stream error");
        };

        macro_rules! input_stream {
            ($ty:ty, $convert:expr) => {
                device.build_input_stream(
                    &stream_config,
                    move |data: &[$ty], _: &cpal::InputCallbackInfo| {
                        if !is_recording.load(Ordering::Relaxed) {
                            return;
                        }
                        if let Ok(mut buf) = buffer.lock() {
                            if buf.len() + data.len() > max_samples {
                                if !overflow_warned.swap(true, Ordering::Relaxed) {
                                    tracing::warn!(
                                        buffered = buf.len(),
                                        "Capture buffer full, dropping newest audio"
                                    );
                                }
                                return;
                            }
                            buf.extend(data.iter().map($convert));
                        }
                    },
                    err_fn,
                    None,
                )
            };
        }

        let stream = match sample_format {
            SampleFormat::F32 => input_stream!(f32, |&s| s),
            SampleFormat::I16 => input_stream!(i16, |&s| f32::from(s) / 32_768.0),
            #[allow(clippy::cast_precision_loss)]
            SampleFormat::I32 => input_stream!(i32, |&s| s as f32 / 2_147_483_648.0),
            _ => {
                return Err(AudioError::InputStream(format!(
                    "Unsupported sample format: {sample_format:?}"
                )));
            }
        };

        stream.map_err(|e| AudioError::InputStream(e.to_string()))
    }
}

/// Convert interleaved multi-channel audio to mono by averaging channels.
fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    let channels = channels as usize;
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Quantize normalized f32 samples to 16-bit signed PCM.
fn quantize(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|s| (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16)
        .collect()
}

/// Resample audio from one sample rate to another using FFT-based resampling.
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, AudioError> {
    if samples.is_empty() {
        return Ok(Vec::new());
    }

    let chunk_size = 1024;

    let mut resampler = FftFixedIn::<f32>::new(
        from_rate as usize,
        to_rate as usize,
        chunk_size,
        2, // sub-chunks for quality
        1, // mono
    )
    .map_err(|e| AudioError::Resample(e.to_string()))?;

    let mut output = Vec::new();

    let mut pos = 0;
    while pos + chunk_size <= samples.len() {
        let chunk = &samples[pos..pos + chunk_size];
        let result = resampler
            .process(&[chunk], None)
            .map_err(|e| AudioError::Resample(e.to_string()))?;
        if let Some(channel) = result.first() {
            output.extend_from_slice(channel);
        }
        pos += chunk_size;
    }

    // Pad the final partial chunk with zeros, keep the proportional output.
    if pos < samples.len() {
        let remaining = &samples[pos..];
        let mut padded = vec![0.0f32; chunk_size];
        padded[..remaining.len()].copy_from_slice(remaining);

        let result = resampler
            .process(&[&padded], None)
            .map_err(|e| AudioError::Resample(e.to_string()))?;
        if let Some(channel) = result.first() {
            #[allow(clippy::cast_precision_loss)]
            let output_len =
                (remaining.len() as f64 * f64::from(to_rate) / f64::from(from_rate)).ceil() as usize;
            let take = output_len.min(channel.len());
            output.extend_from_slice(&channel[..take]);
        }
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_channels() {
        let stereo = [1.0, 0.0, 0.5, 0.5, -1.0, 1.0];
        assert_eq!(downmix_to_mono(&stereo, 2), vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn quantize_clamps_and_scales() {
        let q = quantize(&[0.0, 1.0, -1.0, 2.0, -2.0]);
        assert_eq!(q[0], 0);
        assert_eq!(q[1], i16::MAX);
        assert_eq!(q[3], i16::MAX);
        assert_eq!(q[4], -i16::MAX);
    }

    #[test]
    fn resample_halves_sample_count() {
        let input: Vec<f32> = (0..32_000)
            .map(|i| (std::f32::consts::TAU * 440.0 * i as f32 / 32_000.0).sin())
            .collect();
        let out = resample(&input, 32_000, 16_000).unwrap();
        // FFT resampling trims edges slightly; allow a small tolerance.
        let expected = input.len() / 2;
        assert!(
            out.len().abs_diff(expected) < 256,
            "expected ~{expected}, got {}",
            out.len()
        );
    }

    #[test]
    fn resample_empty_is_empty() {
        assert!(resample(&[], 48_000, 16_000).unwrap().is_empty());
    }
}
