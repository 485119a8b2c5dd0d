//! Configuration management for Parley
//!
//! Values resolve as env > TOML file > default.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use crate::Result;

/// Default OpenAI-compatible endpoint (a local Ollama server)
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434/v1";

/// Base personality prompt used when none is configured
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly, concise voice assistant running \
locally on the user's machine. Your replies are read aloud by a speech synthesizer, so keep \
them short, use plain sentences and contractions, never use markdown, lists, or emojis, and \
write numbers as words. When you are given tool data, answer directly from it without \
mentioning tools or search results.";

/// Parley configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to data directory (database, temporary files)
    pub data_dir: PathBuf,

    /// Language model configuration
    pub llm: LlmConfig,

    /// Voice processing configuration
    pub voice: VoiceConfig,

    /// Conversation configuration
    pub conversation: ConversationConfig,

    /// Tool configuration
    pub tools: ToolsConfig,
}

/// Language model configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// OpenAI-compatible base URL
    pub base_url: String,

    /// API key (optional for local servers)
    pub api_key: Option<String>,

    /// Main conversation model
    pub model: String,

    /// Small fast model for classification and argument extraction
    pub classifier_model: String,

    /// Vision-capable model
    pub vision_model: String,

    /// Temperature for the final response
    pub temperature: f32,
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Base URL for `/audio/transcriptions` and `/audio/speech`
    pub base_url: String,

    /// STT model
    pub stt_model: String,

    /// TTS model
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f32,

    /// Endpointing parameters
    pub endpoint: EndpointConfig,

    /// Start listening again after a spoken response
    pub auto_listen: bool,

    /// Keep speaking when switching from voice to chat mode
    pub keep_speaking_on_mode_switch: bool,

    /// Speak responses in chat mode
    pub speak_chat_responses: bool,
}

/// Voice activity endpointing parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EndpointConfig {
    /// Capture sample rate in Hz
    pub sample_rate: u32,

    /// Speech probability at or above which a window counts as voice
    pub vad_threshold: f32,

    /// Silence after speech that ends the utterance
    pub silence_duration: Duration,

    /// Give up if no speech starts within this time
    pub listening_timeout: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            sample_rate: crate::voice::SAMPLE_RATE,
            vad_threshold: 0.5,
            silence_duration: Duration::from_secs(2),
            listening_timeout: Duration::from_secs(5),
        }
    }
}

/// Conversation configuration
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    /// Assistant display name
    pub assistant_name: String,

    /// What the assistant calls the user
    pub user_name: Option<String>,

    /// Base system prompt
    pub system_prompt: String,

    /// Keep at most this many non-system messages (0 = unlimited)
    pub max_history_messages: usize,

    /// Summarize overflow instead of dropping it
    pub summarize_overflow: bool,

    /// Extract and inject facts about the user
    pub memory_enabled: bool,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            assistant_name: "Parley".to_string(),
            user_name: None,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_history_messages: 20,
            summarize_overflow: true,
            memory_enabled: true,
        }
    }
}

/// Tool configuration
#[derive(Debug, Clone, Default)]
pub struct ToolsConfig {
    /// Allow the `execute_shell` tool
    pub shell_enabled: bool,

    /// Brave Search API key
    pub brave_api_key: Option<String>,

    /// Serper API key
    pub serper_api_key: Option<String>,

    /// OpenWeatherMap API key
    pub openweathermap_api_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self::resolve(file::ParleyConfigFile::default(), |_| None)
    }
}

impl Config {
    /// Load configuration from the environment and the TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the data directory cannot be created
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        let config = Self::resolve(fc, |key| std::env::var(key).ok());

        std::fs::create_dir_all(&config.data_dir)?;
        tracing::debug!(data_dir = %config.data_dir.display(), "configuration loaded");

        Ok(config)
    }

    /// Resolve configuration from a parsed file and an env lookup
    #[must_use]
    pub fn resolve(fc: file::ParleyConfigFile, env: impl Fn(&str) -> Option<String>) -> Self {
        let env_f32 = |key: &str| env(key).and_then(|v| v.parse::<f32>().ok());
        let env_bool = |key: &str| env(key).map(|v| !matches!(v.as_str(), "false" | "0" | "no"));

        // Determine data directory (~/.local/share/parley on Linux)
        let data_dir = env("PARLEY_DATA_DIR")
            .or(fc.data_dir)
            .map_or_else(default_data_dir, PathBuf::from);

        let base_url = env("PARLEY_LLM_BASE_URL")
            .or(fc.llm.base_url)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let model = env("PARLEY_MODEL")
            .or(fc.llm.model)
            .unwrap_or_else(|| "llama3.1:8b".to_string());

        let llm = LlmConfig {
            api_key: env("PARLEY_LLM_API_KEY")
                .or_else(|| env("OPENAI_API_KEY"))
                .or(fc.llm.api_key),
            classifier_model: env("PARLEY_CLASSIFIER_MODEL")
                .or(fc.llm.classifier_model)
                .unwrap_or_else(|| "llama3.2:3b".to_string()),
            vision_model: env("PARLEY_VISION_MODEL")
                .or(fc.llm.vision_model)
                .unwrap_or_else(|| "moondream".to_string()),
            temperature: env_f32("PARLEY_TEMPERATURE")
                .or(fc.llm.temperature)
                .unwrap_or(0.7),
            base_url: base_url.clone(),
            model,
        };

        let defaults = EndpointConfig::default();
        let endpoint = EndpointConfig {
            sample_rate: defaults.sample_rate,
            vad_threshold: env_f32("PARLEY_VAD_THRESHOLD")
                .or(fc.voice.vad_threshold)
                .unwrap_or(defaults.vad_threshold)
                .clamp(0.0, 1.0),
            silence_duration: env_f32("PARLEY_SILENCE_DURATION")
                .or(fc.voice.silence_duration)
                .map_or(defaults.silence_duration, secs),
            listening_timeout: env_f32("PARLEY_LISTENING_TIMEOUT")
                .or(fc.voice.listening_timeout)
                .map_or(defaults.listening_timeout, secs),
        };

        let voice = VoiceConfig {
            base_url: env("PARLEY_VOICE_BASE_URL")
                .or(fc.voice.base_url)
                .unwrap_or(base_url),
            stt_model: env("PARLEY_STT_MODEL")
                .or(fc.voice.stt_model)
                .unwrap_or_else(|| "whisper-1".to_string()),
            tts_model: env("PARLEY_TTS_MODEL")
                .or(fc.voice.tts_model)
                .unwrap_or_else(|| "tts-1".to_string()),
            tts_voice: fc.voice.tts_voice.unwrap_or_else(|| "alloy".to_string()),
            tts_speed: fc.voice.tts_speed.unwrap_or(1.0).clamp(0.25, 4.0),
            endpoint,
            auto_listen: env_bool("PARLEY_AUTO_LISTEN")
                .or(fc.voice.auto_listen)
                .unwrap_or(true),
            keep_speaking_on_mode_switch: fc.voice.keep_speaking_on_mode_switch.unwrap_or(false),
            speak_chat_responses: fc.voice.speak_chat_responses.unwrap_or(false),
        };

        let conversation_defaults = ConversationConfig::default();
        let conversation = ConversationConfig {
            assistant_name: fc
                .conversation
                .assistant_name
                .unwrap_or(conversation_defaults.assistant_name),
            user_name: env("PARLEY_USER_NAME")
                .or(fc.conversation.user_name)
                .filter(|n| !n.trim().is_empty()),
            system_prompt: fc
                .conversation
                .system_prompt
                .unwrap_or(conversation_defaults.system_prompt),
            max_history_messages: fc
                .conversation
                .max_history_messages
                .unwrap_or(conversation_defaults.max_history_messages),
            summarize_overflow: fc
                .conversation
                .summarize_overflow
                .unwrap_or(conversation_defaults.summarize_overflow),
            memory_enabled: env_bool("PARLEY_MEMORY")
                .or(fc.conversation.memory_enabled)
                .unwrap_or(conversation_defaults.memory_enabled),
        };

        let tools = ToolsConfig {
            shell_enabled: env_bool("PARLEY_SHELL_TOOL")
                .or(fc.tools.shell_enabled)
                .unwrap_or(false),
            brave_api_key: env("BRAVE_API_KEY").or(fc.tools.brave_api_key),
            serper_api_key: env("SERPER_API_KEY").or(fc.tools.serper_api_key),
            openweathermap_api_key: env("OPENWEATHERMAP_API_KEY")
                .or(fc.tools.openweathermap_api_key),
        };

        Self {
            data_dir,
            llm,
            voice,
            conversation,
            tools,
        }
    }

    /// Path of the SQLite database
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("parley.db")
    }
}

fn secs(value: f32) -> Duration {
    Duration::from_secs_f32(value.max(0.0))
}

fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map_or_else(|| PathBuf::from(".parley"), |d| d.data_dir().join("parley"))
}
