//! Configuration loading, validation, and management for codeloop.
//!
//! Loads configuration from `~/.codeloop/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default nudge sent when the model stops without declaring completion.
pub const DEFAULT_LOOP_MESSAGE: &str = "Proceed. You CAN run code on my machine. If the entire task I asked for is done, say exactly 'The task is done.' If you need some specific information (like username or password) say EXACTLY 'Please provide more information.' If it's impossible, say 'The task is impossible.' (If I haven't provided a task, say exactly 'Let me know what you'd like to do next.') Otherwise keep going.";

/// Default persona. `{{username}}`, `{{os}}` and `{{cwd}}` are rendered per turn.
pub const DEFAULT_SYSTEM_MESSAGE: &str = "You are codeloop, a world-class programmer that can complete any goal by executing code.
First, write a plan. **Always recap the plan between each code block** (you have extreme short-term memory loss, so you need to recap the plan between each message block to retain it).
When you execute code, it will be executed **on the user's machine**. The user has given you **full and complete permission** to execute any code necessary to complete the task.
If you want to send data between programming languages, save the data to a txt or json file.
You can install new packages.
When a user refers to a filename, they're likely referring to an existing file in the directory you're currently executing code in.
Write messages to the user in Markdown.
In general, try to **make plans** with as few steps as possible. It's critical not to try to do everything in one code block. Run small blocks, print the result, and iterate.

User's Name: {{username}}
User's OS: {{os}}
Working directory: {{cwd}}";

/// The root configuration structure.
///
/// Maps directly to `~/.codeloop/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model and provider settings
    #[serde(default)]
    pub llm: LlmConfig,

    /// Conversation loop settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Execution sandbox settings
    #[serde(default)]
    pub computer: ComputerConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Model name sent to the endpoint
    #[serde(default = "default_model")]
    pub model: String,

    /// OpenAI-compatible base URL
    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<u32>,

    #[serde(default)]
    pub supports_vision: bool,

    /// Offer an `execute` function instead of parsing fenced blocks
    #[serde(default = "default_true")]
    pub supports_functions: bool,

    /// Maximum session spend in USD
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_budget: Option<f64>,

    /// Hosted model offered when the configured one is unavailable
    #[serde(default = "default_fallback_model")]
    pub fallback_model: String,
}

fn default_model() -> String {
    "gpt-4o".into()
}
fn default_api_base() -> String {
    "https://api.openai.com/v1".into()
}
fn default_temperature() -> f32 {
    0.0
}
fn default_fallback_model() -> String {
    "gpt-4o-mini".into()
}
fn default_true() -> bool {
    true
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .field("api_key", &redact(&self.api_key))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("context_window", &self.context_window)
            .field("supports_vision", &self.supports_vision)
            .field("supports_functions", &self.supports_functions)
            .field("max_budget", &self.max_budget)
            .field("fallback_model", &self.fallback_model)
            .finish()
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_base: default_api_base(),
            api_key: None,
            temperature: default_temperature(),
            max_tokens: None,
            context_window: None,
            supports_vision: false,
            supports_functions: true,
            max_budget: None,
            fallback_model: default_fallback_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Base persona
    #[serde(default = "default_system_message")]
    pub system_message: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub custom_instructions: String,

    /// Nudge the model when it stops without a completion phrase
    #[serde(default, rename = "loop")]
    pub loop_enabled: bool,

    #[serde(default = "default_loop_message")]
    pub loop_message: String,

    /// Phrases that mark the task as finished
    #[serde(default = "default_loop_breakers")]
    pub loop_breakers: Vec<String>,

    /// Screen mode: ask for a screenshot check before finishing
    #[serde(default)]
    pub os: bool,

    /// Approve every code block without asking
    #[serde(default)]
    pub auto_run: bool,

    /// Local model: skip hosted-provider recovery paths
    #[serde(default)]
    pub offline: bool,

    #[serde(default)]
    pub verbose: bool,

    #[serde(default)]
    pub debug: bool,

    #[serde(default = "default_max_output")]
    pub max_output: usize,

    /// Mirror the computer snapshot into the scripting runtime around runs
    #[serde(default)]
    pub sync_computer: bool,
}

fn default_system_message() -> String {
    DEFAULT_SYSTEM_MESSAGE.into()
}
fn default_loop_message() -> String {
    DEFAULT_LOOP_MESSAGE.into()
}
fn default_loop_breakers() -> Vec<String> {
    vec![
        "The task is done.".into(),
        "The task is impossible.".into(),
        "Let me know what you'd like to do next.".into(),
        "Please provide more information.".into(),
    ]
}
fn default_max_output() -> usize {
    2800
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            system_message: default_system_message(),
            custom_instructions: String::new(),
            loop_enabled: false,
            loop_message: default_loop_message(),
            loop_breakers: default_loop_breakers(),
            os: false,
            auto_run: false,
            offline: false,
            verbose: false,
            debug: false,
            max_output: default_max_output(),
            sync_computer: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputerConfig {
    /// Hand executed scripting code a ready-made `computer` object
    #[serde(default)]
    pub import_computer_api: bool,

    /// Per-run timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Registered language runtimes
    #[serde(default = "default_languages")]
    pub languages: Vec<LanguageConfig>,
}

fn default_timeout_secs() -> u64 {
    120
}

/// A language runtime: an interpreter that reads a code block on stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,

    /// Interpreter executable
    pub command: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Notes appended to the system message when this language is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,
}

fn default_languages() -> Vec<LanguageConfig> {
    vec![
        LanguageConfig {
            name: "python".into(),
            aliases: vec!["py".into()],
            command: "python3".into(),
            args: vec!["-u".into(), "-".into()],
            system_message: None,
        },
        LanguageConfig {
            name: "shell".into(),
            aliases: vec!["bash".into(), "sh".into(), "zsh".into()],
            command: "sh".into(),
            args: vec!["-s".into()],
            system_message: None,
        },
        LanguageConfig {
            name: "javascript".into(),
            aliases: vec!["js".into(), "node".into()],
            command: "node".into(),
            args: vec![],
            system_message: None,
        },
    ]
}

impl Default for ComputerConfig {
    fn default() -> Self {
        Self {
            import_computer_api: false,
            timeout_secs: default_timeout_secs(),
            languages: default_languages(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.codeloop/config.toml).
    ///
    /// Also checks environment variables:
    /// - `CODELOOP_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `CODELOOP_MODEL`
    /// - `CODELOOP_API_BASE`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if self.llm.api_key.is_none() {
            self.llm.api_key = std::env::var("CODELOOP_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(model) = std::env::var("CODELOOP_MODEL") {
            self.llm.model = model;
        }

        if let Ok(base) = std::env::var("CODELOOP_API_BASE") {
            self.llm.api_base = base;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".codeloop")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::ValidationError(
                "llm.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.session.max_output == 0 {
            return Err(ConfigError::ValidationError(
                "session.max_output must be > 0".into(),
            ));
        }

        if self.computer.languages.is_empty() {
            return Err(ConfigError::ValidationError(
                "computer.languages must list at least one runtime".into(),
            ));
        }

        if self.session.sync_computer && !self.computer.import_computer_api {
            return Err(ConfigError::ValidationError(
                "session.sync_computer requires computer.import_computer_api".into(),
            ));
        }

        if let Some(budget) = self.llm.max_budget {
            if budget <= 0.0 {
                return Err(ConfigError::ValidationError(
                    "llm.max_budget must be positive".into(),
                ));
            }
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.llm.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
