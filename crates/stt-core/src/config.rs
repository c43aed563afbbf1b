//! Typed, hierarchical settings read from the environment.
//!
//! Every value can be overridden with a variable named `STT_<SECTION>_<KEY>`
//! (`STT_SERVER_PORT`, `STT_PTT_HOTKEY`, ...). Unset variables fall back to
//! the defaults below; a variable that is set but unparseable is an error
//! rather than a silent fallback.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

// ── Sections ───────────────────────────────────────────────────────

/// Audio capture and framing settings.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSettings {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count (mono).
    pub channels: u16,
    /// Bits per sample.
    pub bit_depth: u16,
    /// Capture chunk duration in milliseconds.
    pub chunk_ms: u32,
}

impl AudioSettings {
    /// Samples per capture chunk.
    #[must_use]
    pub const fn chunk_samples(&self) -> usize {
        (self.sample_rate as usize * self.chunk_ms as usize) / 1000
    }

    /// Bytes per capture chunk.
    #[must_use]
    pub const fn chunk_bytes(&self) -> usize {
        self.chunk_samples() * (self.bit_depth as usize / 8) * self.channels as usize
    }
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 1,
            bit_depth: 16,
            chunk_ms: 100,
        }
    }
}

/// WebSocket server settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Maximum concurrent sessions.
    pub max_connections: usize,
    /// When at capacity: reject immediately (`true`) or queue the handler
    /// until a slot frees up (`false`).
    pub reject_when_full: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9876,
            max_connections: 10,
            reject_when_full: true,
        }
    }
}

/// ONNX execution provider. GPU only, no CPU fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Cuda,
    Tensorrt,
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cuda" => Ok(Self::Cuda),
            "tensorrt" => Ok(Self::Tensorrt),
            other => Err(format!("unknown provider {other:?} (cuda, tensorrt)")),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cuda => f.write_str("cuda"),
            Self::Tensorrt => f.write_str("tensorrt"),
        }
    }
}

/// Acoustic model settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    /// Model name (directory under `models_dir`).
    pub name: String,
    /// Directory holding exported ONNX models.
    pub models_dir: PathBuf,
    /// Execution provider.
    pub provider: Provider,
    /// GPU device ordinal.
    pub device_id: u32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            name: "parakeet-tdt-0.6b-v2".to_string(),
            models_dir: PathBuf::from("models"),
            provider: Provider::Cuda,
            device_id: 0,
        }
    }
}

/// Push-to-talk settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PttSettings {
    /// Global hotkey as evdev `KEY_*` names without the prefix; all must be
    /// held together.
    pub hotkey: Vec<String>,
    /// Terminal-mode hotkey character.
    pub terminal_hotkey: char,
    /// Human-readable name for the terminal hotkey.
    pub terminal_hotkey_name: String,
    /// Play feedback tones on activate/submit.
    pub click_sound: bool,
    /// Recording length that triggers auto-submit.
    pub max_duration: Duration,
    /// Time in the processing state before the watchdog resets to idle.
    pub processing_timeout: Duration,
    /// Interval between input-device scans for hot-plug detection.
    pub device_scan_interval: Duration,
}

impl Default for PttSettings {
    fn default() -> Self {
        Self {
            hotkey: vec!["LEFTCTRL".to_string(), "LEFTMETA".to_string()],
            terminal_hotkey: ' ',
            terminal_hotkey_name: "SPACE".to_string(),
            click_sound: true,
            max_duration: Duration::from_secs(30),
            processing_timeout: Duration::from_secs(60),
            device_scan_interval: Duration::from_secs(2),
        }
    }
}

/// Where transcribed text is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Print to standard output.
    #[default]
    Stdout,
    /// Type into the focused window (`wtype` / `xdotool`).
    Type,
    /// Copy to the clipboard (`wl-copy` / `xclip`).
    Clipboard,
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdout" => Ok(Self::Stdout),
            "type" => Ok(Self::Type),
            "clipboard" => Ok(Self::Clipboard),
            other => Err(format!(
                "unknown output mode {other:?} (stdout, type, clipboard)"
            )),
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Type => f.write_str("type"),
            Self::Clipboard => f.write_str("clipboard"),
        }
    }
}

/// Client connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    /// WebSocket server URL.
    pub server_url: String,
    /// Default output sink.
    pub output_mode: OutputMode,
    /// Connection attempts before giving up (non-daemon mode).
    pub reconnect_attempts: u32,
    /// Initial reconnect delay; doubles per attempt.
    pub reconnect_delay: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:9876".to_string(),
            output_mode: OutputMode::Stdout,
            reconnect_attempts: 3,
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

// ── Combined settings ──────────────────────────────────────────────

/// Combined settings for both processes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Settings {
    pub audio: AudioSettings,
    pub server: ServerSettings,
    pub model: ModelSettings,
    pub ptt: PttSettings,
    pub client: ClientSettings,
}

impl Settings {
    /// Load settings, applying `STT_*` environment overrides on top of the
    /// defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    /// Load settings from an arbitrary key lookup. The environment-backed
    /// [`from_env`](Self::from_env) is the production path; tests supply a
    /// map instead of mutating process state.
    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(lookup);
        let mut s = Self::default();

        env.read("STT_AUDIO_SAMPLE_RATE", &mut s.audio.sample_rate)?;
        env.read("STT_AUDIO_CHANNELS", &mut s.audio.channels)?;
        env.read("STT_AUDIO_BIT_DEPTH", &mut s.audio.bit_depth)?;
        env.read("STT_AUDIO_CHUNK_MS", &mut s.audio.chunk_ms)?;

        env.read("STT_SERVER_HOST", &mut s.server.host)?;
        env.read("STT_SERVER_PORT", &mut s.server.port)?;
        env.read("STT_SERVER_MAX_CONNECTIONS", &mut s.server.max_connections)?;
        env.read("STT_SERVER_REJECT_WHEN_FULL", &mut s.server.reject_when_full)?;

        env.read("STT_MODEL_NAME", &mut s.model.name)?;
        env.read("STT_MODEL_MODELS_DIR", &mut s.model.models_dir)?;
        env.read_with("STT_MODEL_PROVIDER", &mut s.model.provider, str::parse)?;
        env.read("STT_MODEL_DEVICE_ID", &mut s.model.device_id)?;

        env.read_hotkey("STT_PTT_HOTKEY", &mut s.ptt.hotkey)?;
        env.read_char("STT_PTT_TERMINAL_HOTKEY", &mut s.ptt.terminal_hotkey)?;
        env.read(
            "STT_PTT_TERMINAL_HOTKEY_NAME",
            &mut s.ptt.terminal_hotkey_name,
        )?;
        env.read("STT_PTT_CLICK_SOUND", &mut s.ptt.click_sound)?;
        env.read_secs("STT_PTT_MAX_DURATION_SECONDS", &mut s.ptt.max_duration)?;
        env.read_secs(
            "STT_PTT_PROCESSING_TIMEOUT_SECONDS",
            &mut s.ptt.processing_timeout,
        )?;
        env.read_secs(
            "STT_PTT_DEVICE_SCAN_INTERVAL",
            &mut s.ptt.device_scan_interval,
        )?;

        env.read("STT_CLIENT_SERVER_URL", &mut s.client.server_url)?;
        env.read_with(
            "STT_CLIENT_OUTPUT_MODE",
            &mut s.client.output_mode,
            str::parse,
        )?;
        env.read(
            "STT_CLIENT_RECONNECT_ATTEMPTS",
            &mut s.client.reconnect_attempts,
        )?;
        env.read_secs("STT_CLIENT_RECONNECT_DELAY", &mut s.client.reconnect_delay)?;

        Ok(s)
    }
}

// ── Lookup helpers ─────────────────────────────────────────────────

struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    fn raw(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.is_empty())
    }

    fn read<T>(&self, key: &'static str, slot: &mut T) -> Result<(), ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.read_with(key, slot, |v| v.parse().map_err(|e: T::Err| e.to_string()))
    }

    fn read_with<T>(
        &self,
        key: &'static str,
        slot: &mut T,
        parse: impl Fn(&str) -> Result<T, String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = self.raw(key) {
            *slot = parse(&value).map_err(|reason| ConfigError::InvalidValue {
                key,
                value,
                reason,
            })?;
        }
        Ok(())
    }

    fn read_secs(&self, key: &'static str, slot: &mut Duration) -> Result<(), ConfigError> {
        self.read_with(key, slot, |v| {
            let secs: f64 = v.parse().map_err(|e: std::num::ParseFloatError| e.to_string())?;
            if !secs.is_finite() || secs < 0.0 {
                return Err("must be a non-negative number of seconds".to_string());
            }
            Ok(Duration::from_secs_f64(secs))
        })
    }

    fn read_char(&self, key: &'static str, slot: &mut char) -> Result<(), ConfigError> {
        if let Some(value) = self.raw(key) {
            let mut chars = value.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => *slot = c,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key,
                        value,
                        reason: "must be a single character".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn read_hotkey(&self, key: &'static str, slot: &mut Vec<String>) -> Result<(), ConfigError> {
        self.read_with(key, slot, |v| {
            let keys: Vec<String> = v
                .split(',')
                .map(|k| k.trim().to_uppercase())
                .filter(|k| !k.is_empty())
                .collect();
            if keys.is_empty() {
                return Err("must name at least one key".to_string());
            }
            Ok(keys)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Settings::from_lookup(&|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_match_the_documented_profile() {
        let s = Settings::default();
        assert_eq!(s.audio.sample_rate, 16_000);
        assert_eq!(s.audio.chunk_samples(), 1600);
        assert_eq!(s.audio.chunk_bytes(), 3200);
        assert_eq!(s.server.port, 9876);
        assert_eq!(s.server.max_connections, 10);
        assert!(s.server.reject_when_full);
        assert_eq!(s.ptt.hotkey, vec!["LEFTCTRL", "LEFTMETA"]);
        assert_eq!(s.ptt.max_duration, Duration::from_secs(30));
        assert_eq!(s.ptt.processing_timeout, Duration::from_secs(60));
        assert_eq!(s.client.reconnect_attempts, 3);
        assert_eq!(s.client.output_mode, OutputMode::Stdout);
    }

    #[test]
    fn overrides_apply() {
        let s = load(&[
            ("STT_SERVER_PORT", "7001"),
            ("STT_PTT_HOTKEY", "rightctrl, RIGHTALT"),
            ("STT_CLIENT_RECONNECT_DELAY", "0.5"),
            ("STT_CLIENT_OUTPUT_MODE", "clipboard"),
        ])
        .unwrap();
        assert_eq!(s.server.port, 7001);
        assert_eq!(s.ptt.hotkey, vec!["RIGHTCTRL", "RIGHTALT"]);
        assert_eq!(s.client.reconnect_delay, Duration::from_millis(500));
        assert_eq!(s.client.output_mode, OutputMode::Clipboard);
    }

    #[test]
    fn unset_and_empty_variables_keep_defaults() {
        let s = load(&[("STT_SERVER_HOST", "")]).unwrap();
        assert_eq!(s, Settings::default());
    }

    #[test]
    fn bad_values_are_errors_not_fallbacks() {
        assert!(load(&[("STT_SERVER_PORT", "not-a-port")]).is_err());
        assert!(load(&[("STT_MODEL_PROVIDER", "cpu")]).is_err());
        assert!(load(&[("STT_PTT_MAX_DURATION_SECONDS", "-1")]).is_err());
        assert!(load(&[("STT_PTT_TERMINAL_HOTKEY", "ab")]).is_err());
    }

    #[test]
    fn terminal_hotkey_accepts_a_space() {
        let s = load(&[("STT_PTT_TERMINAL_HOTKEY", " ")]).unwrap();
        assert_eq!(s.ptt.terminal_hotkey, ' ');
    }

    #[test]
    fn output_mode_parses_all_variants() {
        assert_eq!("stdout".parse::<OutputMode>().unwrap(), OutputMode::Stdout);
        assert_eq!("type".parse::<OutputMode>().unwrap(), OutputMode::Type);
        assert_eq!(
            "clipboard".parse::<OutputMode>().unwrap(),
            OutputMode::Clipboard
        );
        assert!("voice".parse::<OutputMode>().is_err());
    }

    #[test]
    fn provider_parses_gpu_backends_only() {
        assert_eq!("cuda".parse::<Provider>().unwrap(), Provider::Cuda);
        assert_eq!("tensorrt".parse::<Provider>().unwrap(), Provider::Tensorrt);
        assert!("cpu".parse::<Provider>().is_err());
    }
}
