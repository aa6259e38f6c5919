use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ParleyError, Result};

/// Top-level configuration for Parley.
///
/// Loaded from `~/.parley/config.toml` by default. Every section falls back
/// to its defaults when missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParleyConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
}

impl ParleyConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ParleyConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration, falling back to defaults if the file is missing
    /// or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the configuration as TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ParleyError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Clamp voice and memory settings into their supported ranges.
    pub fn sanitized(mut self) -> Self {
        self.voice.speech_rate = clamp_logged(
            "voice.speech_rate",
            self.voice.speech_rate,
            SPEECH_RATE_RANGE,
        );
        self.voice.listen_timeout_secs = clamp_logged(
            "voice.listen_timeout_secs",
            self.voice.listen_timeout_secs,
            LISTEN_TIMEOUT_RANGE,
        );
        self.voice.phrase_time_limit_secs = clamp_logged(
            "voice.phrase_time_limit_secs",
            self.voice.phrase_time_limit_secs,
            PHRASE_LIMIT_RANGE,
        );
        if self.memory.context_window == 0 {
            warn!("memory.context_window must be at least 1; using 1");
            self.memory.context_window = 1;
        }
        self
    }

    /// Absolute path of the session store file.
    pub fn store_path(&self) -> PathBuf {
        expand_home(&self.general.data_dir).join(&self.memory.store_file)
    }
}

/// Allowed speech rates, in words per minute.
pub const SPEECH_RATE_RANGE: (u32, u32) = (100, 250);
/// Allowed listen timeouts, in seconds.
pub const LISTEN_TIMEOUT_RANGE: (u32, u32) = (3, 10);
/// Allowed phrase time limits, in seconds.
pub const PHRASE_LIMIT_RANGE: (u32, u32) = (5, 15);

fn clamp_logged(field: &str, value: u32, (min, max): (u32, u32)) -> u32 {
    let clamped = value.clamp(min, max);
    if clamped != value {
        warn!(field, value, clamped, "Config value out of range; clamped");
    }
    clamped
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(rest)
    } else {
        PathBuf::from(path)
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding the session store.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.parley/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Session memory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Send prior turns to the model and persist sessions.
    pub enabled: bool,
    /// Save after every completed assistant turn (only while enabled).
    pub auto_save: bool,
    /// Number of most recent turns sent to the model.
    pub context_window: usize,
    /// File name of the session store inside `general.data_dir`.
    pub store_file: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_save: true,
            context_window: 10,
            store_file: "conversation_memory.json".to_string(),
        }
    }
}

/// Language model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model identifier, e.g. "llama3", "llama2", "mistral".
    pub name: String,
    /// Base URL of the Ollama-compatible server.
    pub endpoint: String,
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "llama3".to_string(),
            endpoint: "http://localhost:11434".to_string(),
            request_timeout_secs: 120,
        }
    }
}

/// Speech input and output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Speech rate in words per minute.
    pub speech_rate: u32,
    /// Seconds to wait for speech to begin.
    pub listen_timeout_secs: u32,
    /// Maximum seconds of a single phrase.
    pub phrase_time_limit_secs: u32,
    /// External TTS program (e.g. "espeak"). Replies are printed when unset.
    pub speech_command: Option<String>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            speech_rate: 175,
            listen_timeout_secs: 5,
            phrase_time_limit_secs: 10,
            speech_command: None,
        }
    }
}

/// Fixed phrases and exit keywords of the conversation loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Utterances that end the conversation (compared trimmed, lowercase).
    pub exit_keywords: Vec<String>,
    pub greeting: String,
    pub farewell: String,
    /// Reply used when the model call fails.
    pub fallback_reply: String,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            exit_keywords: vec!["exit".to_string(), "stop".to_string(), "quit".to_string()],
            greeting: "Hello, I am ready. You can start speaking.".to_string(),
            farewell: "Goodbye! Have a great day!".to_string(),
            fallback_reply: "Sorry, something went wrong while thinking.".to_string(),
        }
    }
}
