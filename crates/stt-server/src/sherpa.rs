//! Sherpa-ONNX transducer backend, implements [`Transcriber`] via `sherpa-rs`.
//!
//! Loads a Parakeet-family TDT export: a model directory containing
//! `encoder.onnx`, `decoder.onnx`, `joiner.onnx`, and `tokens.txt`. If an
//! int8-quantised encoder is present (`encoder.int8.onnx`) it is preferred.
//!
//! GPU only. The execution provider comes from [`ModelSettings::provider`];
//! when the provider cannot be initialised, recognizer construction fails and
//! the server exits non-zero rather than silently degrading to CPU.

use std::path::{Path, PathBuf};

use sherpa_rs::zipformer::{ZipFormer, ZipFormerConfig};

use stt_core::{ModelSettings, Provider};

use crate::error::ServerError;
use crate::transcriber::{TranscribeError, Transcriber};

/// Offline transducer recognizer wrapped behind the [`Transcriber`] seam.
pub struct SherpaTranscriber {
    recognizer: ZipFormer,
}

impl SherpaTranscriber {
    /// Load the model named by `settings` from its models directory.
    pub fn load(settings: &ModelSettings) -> Result<Self, ServerError> {
        let model_dir = settings.models_dir.join(&settings.name);
        if !model_dir.is_dir() {
            return Err(ServerError::ModelFileMissing(model_dir));
        }

        let encoder = prefer_int8(&model_dir, "encoder")?;
        let decoder = prefer_int8(&model_dir, "decoder")?;
        let joiner = prefer_int8(&model_dir, "joiner")?;
        let tokens = require_file(model_dir.join("tokens.txt"))?;

        tracing::info!(
            dir = %model_dir.display(),
            provider = %settings.provider,
            device_id = settings.device_id,
            "Loading transducer model"
        );

        let config = ZipFormerConfig {
            encoder: path_to_string(&encoder)?,
            decoder: path_to_string(&decoder)?,
            joiner: path_to_string(&joiner)?,
            tokens: path_to_string(&tokens)?,
            provider: Some(provider_name(settings.provider).to_string()),
            num_threads: Some(2),
            ..Default::default()
        };

        let recognizer = ZipFormer::new(config).map_err(|e| {
            ServerError::ModelInit(format!(
                "recognizer construction failed (is the {} provider available?): {e}",
                settings.provider
            ))
        })?;

        tracing::info!("Model loaded on GPU");

        Ok(Self { recognizer })
    }
}

impl Transcriber for SherpaTranscriber {
    fn transcribe(&mut self, audio: &[f32], sample_rate: u32) -> Result<String, TranscribeError> {
        if audio.is_empty() {
            return Ok(String::new());
        }
        let text = self.recognizer.decode(sample_rate, audio.to_vec());
        Ok(text.trim().to_string())
    }
}

/// sherpa-onnx provider names for our GPU-only settings.
const fn provider_name(provider: Provider) -> &'static str {
    match provider {
        Provider::Cuda => "cuda",
        Provider::Tensorrt => "trt",
    }
}

/// Pick `<stem>.int8.onnx` when present, else `<stem>.onnx`.
fn prefer_int8(dir: &Path, stem: &str) -> Result<PathBuf, ServerError> {
    let int8 = dir.join(format!("{stem}.int8.onnx"));
    if int8.exists() {
        return Ok(int8);
    }
    require_file(dir.join(format!("{stem}.onnx")))
}

fn require_file(path: PathBuf) -> Result<PathBuf, ServerError> {
    if path.exists() {
        Ok(path)
    } else {
        Err(ServerError::ModelFileMissing(path))
    }
}

fn path_to_string(path: &Path) -> Result<String, ServerError> {
    path.to_str()
        .map(ToString::to_string)
        .ok_or_else(|| ServerError::ModelInit(format!("Invalid path: {}", path.display())))
}
