//! TOML configuration file loading
//!
//! Supports `~/.config/parley/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ParleyConfigFile {
    /// Directory for the database and temporary files
    #[serde(default)]
    pub data_dir: Option<String>,

    /// LLM configuration
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Conversation/history configuration
    #[serde(default)]
    pub conversation: ConversationFileConfig,

    /// Tool configuration
    #[serde(default)]
    pub tools: ToolsFileConfig,
}

/// LLM-related configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// OpenAI-compatible base URL (e.g. "http://localhost:11434/v1")
    pub base_url: Option<String>,

    /// API key, if the endpoint needs one
    pub api_key: Option<String>,

    /// Main conversation model
    pub model: Option<String>,

    /// Small model for intent classification and extraction
    pub classifier_model: Option<String>,

    /// Vision-capable model for screen queries
    pub vision_model: Option<String>,

    /// Sampling temperature for the final response
    pub temperature: Option<f32>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Base URL for the speech endpoints, defaults to the LLM base URL
    pub base_url: Option<String>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "alloy")
    pub tts_voice: Option<String>,

    /// TTS speed multiplier
    pub tts_speed: Option<f32>,

    /// Speech probability threshold (0-1)
    pub vad_threshold: Option<f32>,

    /// Seconds of silence before auto-stop
    pub silence_duration: Option<f32>,

    /// Seconds without speech before giving up
    pub listening_timeout: Option<f32>,

    /// Start listening again after a spoken response
    pub auto_listen: Option<bool>,

    /// Keep speaking when switching to chat mode
    pub keep_speaking_on_mode_switch: Option<bool>,

    /// Speak responses in chat mode too
    pub speak_chat_responses: Option<bool>,
}

/// Conversation configuration
#[derive(Debug, Default, Deserialize)]
pub struct ConversationFileConfig {
    /// Assistant display name
    pub assistant_name: Option<String>,

    /// What the assistant calls the user
    pub user_name: Option<String>,

    /// Replacement base system prompt
    pub system_prompt: Option<String>,

    /// Keep at most this many non-system messages (0 = unlimited)
    pub max_history_messages: Option<usize>,

    /// Summarize overflow instead of dropping it
    pub summarize_overflow: Option<bool>,

    /// Extract and inject facts about the user
    pub memory_enabled: Option<bool>,
}

/// Tool configuration
#[derive(Debug, Default, Deserialize)]
pub struct ToolsFileConfig {
    /// Allow the `execute_shell` tool
    pub shell_enabled: Option<bool>,

    /// Brave Search API key
    pub brave_api_key: Option<String>,

    /// Serper API key
    pub serper_api_key: Option<String>,

    /// OpenWeatherMap API key
    pub openweathermap_api_key: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ParleyConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ParleyConfigFile {
    let Some(path) = config_file_path() else {
        return ParleyConfigFile::default();
    };

    if !path.exists() {
        return ParleyConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => parse_config(&content).unwrap_or_else(|e| {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to parse config file, using defaults"
            );
            ParleyConfigFile::default()
        }),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ParleyConfigFile::default()
        }
    }
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the TOML is malformed
pub fn parse_config(content: &str) -> crate::Result<ParleyConfigFile> {
    let config = toml::from_str(content)?;
    Ok(config)
}

/// Return the config file path: `~/.config/parley/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("parley").join("config.toml"))
}
