use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Persona given to the model with every request
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are Lumina, a highly intelligent, helpful, and sophisticated AI assistant. You provide concise yet deep insights. Your tone is professional, warm, and articulate. Use Markdown for formatting.";

const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Main application configuration, read from `~/.lumina/config.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which model API family to talk to
    pub provider: ProviderKind,

    /// Model name; the provider's default when unset
    pub model: Option<String>,

    /// API key; falls back to environment variables when unset
    pub api_key: Option<String>,

    /// Override for the provider's API base URL
    pub base_url: Option<String>,

    pub temperature: Option<f32>,

    pub max_tokens: Option<u32>,

    /// Connect timeout and longest allowed silence while a reply streams
    pub request_timeout_secs: u64,

    /// System instruction sent with every request
    pub system_instruction: String,

    /// Where threads and logs are written
    pub data_dir: PathBuf,

    /// UI preferences
    pub ui: UiConfig,
}

/// Supported model API families
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    EnumIter,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ProviderKind {
    /// Google Gemini
    #[default]
    Google,
    OpenAi,
    OpenRouter,
    Xai,
    Mistral,
    Anthropic,
}

/// Wire dialect spoken by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiDialect {
    Gemini,
    OpenAiCompatible,
    Anthropic,
}

impl ProviderKind {
    pub fn dialect(self) -> ApiDialect {
        match self {
            ProviderKind::Google => ApiDialect::Gemini,
            ProviderKind::Anthropic => ApiDialect::Anthropic,
            ProviderKind::OpenAi
            | ProviderKind::OpenRouter
            | ProviderKind::Xai
            | ProviderKind::Mistral => ApiDialect::OpenAiCompatible,
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            ProviderKind::Google => "https://generativelanguage.googleapis.com/v1beta",
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::OpenRouter => "https://openrouter.ai/api/v1",
            ProviderKind::Xai => "https://api.x.ai/v1",
            ProviderKind::Mistral => "https://api.mistral.ai/v1",
            ProviderKind::Anthropic => "https://api.anthropic.com/v1",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            ProviderKind::Google => "gemini-3-pro-preview",
            ProviderKind::OpenAi => "gpt-4o-mini",
            ProviderKind::OpenRouter => "openai/gpt-4o-mini",
            ProviderKind::Xai => "grok-2-latest",
            ProviderKind::Mistral => "mistral-small-latest",
            ProviderKind::Anthropic => "claude-3-5-haiku-latest",
        }
    }

    /// Environment variables consulted for the API key, in order
    pub fn api_key_envs(self) -> &'static [&'static str] {
        match self {
            ProviderKind::Google => &["GEMINI_API_KEY", "API_KEY"],
            ProviderKind::OpenAi => &["OPENAI_API_KEY"],
            ProviderKind::OpenRouter => &["OPENROUTER_API_KEY"],
            ProviderKind::Xai => &["XAI_API_KEY"],
            ProviderKind::Mistral => &["MISTRAL_API_KEY"],
            ProviderKind::Anthropic => &["ANTHROPIC_API_KEY"],
        }
    }
}

/// UI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub show_sidebar: bool,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self { show_sidebar: true }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            provider: ProviderKind::default(),
            model: None,
            api_key: None,
            base_url: None,
            temperature: None,
            max_tokens: None,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            data_dir: lumina_home().join("data"),
            ui: UiConfig::default(),
        }
    }
}

impl Config {
    /// Default location of the configuration file
    pub fn default_path() -> PathBuf {
        lumina_home().join("config.toml")
    }

    /// Load configuration from `path` (or the default location); defaults when absent
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);

        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Save configuration to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
            .trim_end_matches('/')
    }

    /// Get API key from config or environment
    pub fn api_key(&self) -> Option<String> {
        self.resolve_api_key(|name| std::env::var(name).ok())
    }

    /// Resolve the API key using `lookup` for environment variables
    pub fn resolve_api_key(&self, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| lookup("LUMINA_API_KEY"))
            .or_else(|| {
                self.provider
                    .api_key_envs()
                    .iter()
                    .find_map(|&name| lookup(name))
            })
            .filter(|key| !key.trim().is_empty())
    }

    /// API key reduced to its last four characters, for display
    pub fn masked_api_key(&self) -> String {
        match self.api_key() {
            Some(key) => {
                let tail: String = key
                    .chars()
                    .rev()
                    .take(4)
                    .collect::<Vec<_>>()
                    .into_iter()
                    .rev()
                    .collect();
                format!("****{}", tail)
            }
            None => "(not set)".to_string(),
        }
    }

    /// [`request_timeout_secs`](Self::request_timeout_secs) as a duration, at least one second
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("lumina.log")
    }
}

fn lumina_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".lumina")
}
