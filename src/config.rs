use crate::defaults;
use crate::error::{Result, VoiceCallError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub live: LiveConfig,
    pub lifecycle: LifecycleConfig,
    pub characters: CharactersConfig,
}

/// Audio capture and playback configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub capture_buffer_size: usize,
    pub output_gain: f32,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
}

/// Live speech session configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LiveConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub language_code: String,
}

/// Timing of the session lifecycle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LifecycleConfig {
    pub settle_delay_ms: u64,
    pub cleanup_grace_ms: u64,
    pub cleanup_retries: u32,
}

/// Where character definitions come from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct CharactersConfig {
    pub path: Option<PathBuf>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            input_sample_rate: defaults::INPUT_SAMPLE_RATE,
            output_sample_rate: defaults::OUTPUT_SAMPLE_RATE,
            capture_buffer_size: defaults::CAPTURE_BUFFER_SIZE,
            output_gain: defaults::OUTPUT_GAIN,
            echo_cancellation: true,
            noise_suppression: true,
        }
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint: defaults::LIVE_ENDPOINT.to_string(),
            model: defaults::LIVE_MODEL.to_string(),
            api_key: None,
            language_code: defaults::LANGUAGE_CODE.to_string(),
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: defaults::SETTLE_DELAY_MS,
            cleanup_grace_ms: defaults::CLEANUP_GRACE_MS,
            cleanup_retries: defaults::CLEANUP_RETRIES,
        }
    }
}

impl LifecycleConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_millis(self.cleanup_grace_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file is missing or contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(VoiceCallError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            Err(e) => Err(VoiceCallError::ConfigParse {
                message: format!("{}: {}", path.display(), e),
            }),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - GEMINI_API_KEY → live.api_key
    /// - VOICECALL_API_KEY → live.api_key (takes precedence)
    /// - VOICECALL_MODEL → live.model
    /// - VOICECALL_LANGUAGE → live.language_code
    /// - VOICECALL_INPUT_DEVICE → audio.input_device
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var(defaults::API_KEY_ENV)
            && !key.is_empty()
        {
            self.live.api_key = Some(key);
        }

        if let Ok(key) = std::env::var("VOICECALL_API_KEY")
            && !key.is_empty()
        {
            self.live.api_key = Some(key);
        }

        if let Ok(model) = std::env::var("VOICECALL_MODEL")
            && !model.is_empty()
        {
            self.live.model = model;
        }

        if let Ok(language) = std::env::var("VOICECALL_LANGUAGE")
            && !language.is_empty()
        {
            self.live.language_code = language;
        }

        if let Ok(device) = std::env::var("VOICECALL_INPUT_DEVICE")
            && !device.is_empty()
        {
            self.audio.input_device = Some(device);
        }

        self
    }

    /// Reject values that would make audio or timing nonsensical.
    pub fn validate(&self) -> Result<()> {
        let invalid = |key: &str, message: &str| VoiceCallError::ConfigInvalidValue {
            key: key.to_string(),
            message: message.to_string(),
        };

        if self.audio.input_sample_rate == 0 {
            return Err(invalid("audio.input_sample_rate", "must be positive"));
        }
        if self.audio.output_sample_rate == 0 {
            return Err(invalid("audio.output_sample_rate", "must be positive"));
        }
        if self.audio.capture_buffer_size == 0 {
            return Err(invalid("audio.capture_buffer_size", "must be positive"));
        }
        if !self.audio.output_gain.is_finite() || self.audio.output_gain < 0.0 {
            return Err(invalid("audio.output_gain", "must be a non-negative number"));
        }
        if self.live.endpoint.is_empty() {
            return Err(invalid("live.endpoint", "must not be empty"));
        }
        if self.live.model.is_empty() {
            return Err(invalid("live.model", "must not be empty"));
        }
        if self.lifecycle.cleanup_grace_ms == 0 {
            return Err(invalid("lifecycle.cleanup_grace_ms", "must be positive"));
        }
        Ok(())
    }

    /// Render the configuration as TOML, with the API key masked.
    pub fn to_display_toml(&self) -> Result<String> {
        let mut shown = self.clone();
        if shown.live.api_key.is_some() {
            shown.live.api_key = Some("********".to_string());
        }
        toml::to_string_pretty(&shown).map_err(|e| VoiceCallError::ConfigParse {
            message: e.to_string(),
        })
    }

    /// A commented config file with every default spelled out.
    pub fn dump_template() -> String {
        format!(
            r#"# voicecall configuration

[audio]
# input_device = "pipewire"
# output_device = "pipewire"
input_sample_rate = {input_rate}
output_sample_rate = {output_rate}
capture_buffer_size = {buffer}
output_gain = {gain:.1}
echo_cancellation = true
noise_suppression = true

[live]
endpoint = "{endpoint}"
model = "{model}"
# api_key = "..."  (or set {env})
language_code = "{language}"

[lifecycle]
settle_delay_ms = {settle}
cleanup_grace_ms = {grace}
cleanup_retries = {retries}

[characters]
# path = "~/.config/voicecall/characters.toml"
"#,
            input_rate = defaults::INPUT_SAMPLE_RATE,
            output_rate = defaults::OUTPUT_SAMPLE_RATE,
            buffer = defaults::CAPTURE_BUFFER_SIZE,
            gain = defaults::OUTPUT_GAIN,
            endpoint = defaults::LIVE_ENDPOINT,
            model = defaults::LIVE_MODEL,
            env = defaults::API_KEY_ENV,
            language = defaults::LANGUAGE_CODE,
            settle = defaults::SETTLE_DELAY_MS,
            grace = defaults::CLEANUP_GRACE_MS,
            retries = defaults::CLEANUP_RETRIES,
        )
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/voicecall/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("voicecall")
            .join("config.toml")
    }
}
