// ABOUTME: Configuration loading for parley.
// ABOUTME: Reads the TOML config file (default under the user config dir), falling back to defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::dialogue::{DEFAULT_APOLOGY, DialogueSettings};
use crate::persistence::QueueSettings;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub dialogue: DialogueConfig,
    pub conversation: ConversationConfig,
    pub tools: ToolsConfig,
    pub persistence: PersistenceConfig,
    pub audio: AudioConfig,
    pub logging: LoggingConfig,
}

/// Turn behaviour.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DialogueConfig {
    pub apology: String,
    pub stream_buffer: usize,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            apology: DEFAULT_APOLOGY.to_string(),
            stream_buffer: 32,
        }
    }
}

/// Conversation log sizing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Messages kept in each log; 0 keeps everything.
    pub max_messages: usize,
    /// Stored messages loaded when a session's log is created.
    pub history_limit: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_messages: 16,
            history_limit: 16,
        }
    }
}

/// Tool calling.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub enabled: bool,
    pub max_rounds: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_rounds: 4,
        }
    }
}

/// Background persistence.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// JSONL store; defaults to `messages.jsonl` under the data dir.
    pub path: Option<PathBuf>,
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            path: None,
            workers: 2,
            queue_capacity: 64,
        }
    }
}

/// Where per-message audio files live.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub dir: Option<PathBuf>,
}

/// Log output.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` takes precedence.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Load config from `path`, or the default location, falling back to defaults
    /// when the file does not exist.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::config_path);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Path to the config file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("parley")
            .join("config.toml")
    }

    /// Directory for stored messages and audio.
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("parley")
    }

    pub fn messages_path(&self) -> PathBuf {
        self.persistence
            .path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("messages.jsonl"))
    }

    pub fn audio_dir(&self) -> PathBuf {
        self.audio
            .dir
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("audio"))
    }

    pub fn dialogue_settings(&self) -> DialogueSettings {
        DialogueSettings {
            apology: self.dialogue.apology.clone(),
            max_tool_rounds: self.tools.max_rounds,
            max_messages: Some(self.conversation.max_messages).filter(|&n| n > 0),
            history_limit: self.conversation.history_limit,
            stream_buffer: self.dialogue.stream_buffer,
        }
    }

    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            workers: self.persistence.workers,
            capacity: self.persistence.queue_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = Config::default();
        assert_eq!(config.dialogue.apology, DEFAULT_APOLOGY);
        assert_eq!(config.conversation.max_messages, 16);
        assert!(config.tools.enabled);
        assert_eq!(config.tools.max_rounds, 4);
        assert_eq!(config.persistence.workers, 2);
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn parse_config_toml() {
        let toml_str = r#"
[dialogue]
apology = "Oops, try again."

[conversation]
max_messages = 0
history_limit = 4

[tools]
enabled = false
max_rounds = 1

[persistence]
path = "/tmp/parley/messages.jsonl"
workers = 4
queue_capacity = 8

[audio]
dir = "/tmp/parley/audio"

[logging]
filter = "parley=debug"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.dialogue.apology, "Oops, try again.");
        assert!(!config.tools.enabled);
        assert_eq!(
            config.messages_path(),
            PathBuf::from("/tmp/parley/messages.jsonl")
        );
        assert_eq!(config.audio_dir(), PathBuf::from("/tmp/parley/audio"));
        assert_eq!(config.queue_settings().workers, 4);

        let settings = config.dialogue_settings();
        assert!(settings.max_messages.is_none());
        assert_eq!(settings.history_limit, 4);
        assert_eq!(settings.max_tool_rounds, 1);
    }

    #[test]
    fn parse_partial_config_uses_defaults() {
        let toml_str = r#"
[conversation]
max_messages = 8
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.conversation.max_messages, 8);
        assert_eq!(config.conversation.history_limit, 16);
        assert_eq!(config.dialogue_settings().max_messages, Some(8));
        assert_eq!(config.persistence.queue_capacity, 64);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&tmp.path().join("absent.toml"))).unwrap();
        assert_eq!(config.tools.max_rounds, 4);
    }

    #[test]
    fn load_reads_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[tools]\nmax_rounds = 2\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.tools.max_rounds, 2);
    }
}
