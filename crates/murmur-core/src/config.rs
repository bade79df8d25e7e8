use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Result, anyhow};

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";
pub const DEFAULT_VOICE_MODEL: &str = "eleven_multilingual_v2";

pub const COMPLETION_KEY_ENV: &str = "OPENROUTER_API_KEY";
pub const SPEECH_KEY_ENV: &str = "ELEVENLABS_API_KEY";

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Config {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub completion_api_key: Option<String>,
    pub speech_api_key: Option<String>,
    pub voice_model: Option<String>,
    pub data_dir: Option<PathBuf>,
}

/// Explicit value first, then the environment. Blank values count as absent.
pub fn resolve_credential(explicit: Option<&str>, env_var: &str) -> Option<String> {
    fn non_blank(key: &str) -> Option<String> {
        let key = key.trim();
        (!key.is_empty()).then(|| key.to_string())
    }

    explicit
        .and_then(non_blank)
        .or_else(|| std::env::var(env_var).ok().as_deref().and_then(non_blank))
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(config_path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    pub fn base_url(&self) -> String {
        self.base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string()
    }

    pub fn model(&self) -> String {
        self.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    pub fn voice_model(&self) -> String {
        self.voice_model
            .clone()
            .unwrap_or_else(|| DEFAULT_VOICE_MODEL.to_string())
    }

    pub fn completion_api_key(&self) -> Option<String> {
        resolve_credential(self.completion_api_key.as_deref(), COMPLETION_KEY_ENV)
    }

    pub fn speech_api_key(&self) -> Option<String> {
        resolve_credential(self.speech_api_key.as_deref(), SPEECH_KEY_ENV)
    }

    /// Where the conversation and log file live.
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow!("Could not determine data directory"))?;
        Ok(data_dir.join("murmur"))
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("murmur").join("config.json"))
    }
}
