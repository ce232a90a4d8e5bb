use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::context::Limits;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// External tool locations
    pub tools: ToolsConfig,

    /// Hosted-API backend settings
    pub hosted: HostedApiConfig,

    /// Resource limits applied per run
    pub limits: LimitsConfig,

    /// Application settings
    pub app: AppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// yt-dlp binary used for video-platform downloads
    pub yt_dlp_path: String,

    /// whisper binary used for local transcription
    pub whisper_path: String,

    /// espeak-ng binary used for local speech synthesis
    pub espeak_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostedApiConfig {
    /// Master switch for hosted backends; also requires the API key env var
    pub enabled: bool,

    /// Base URL of an OpenAI-compatible API
    pub api_base: String,

    /// Environment variable holding the API key (never stored in the file)
    pub api_key_env: String,

    /// Chat model for summaries and blog posts
    pub model: String,

    /// Speech model and voice for hosted podcast synthesis
    pub speech_model: String,
    pub speech_voice: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum summary length in words
    pub summary_max_words: usize,

    /// Speech-recognition model size (tiny, base, small, medium, large)
    pub model_size: String,

    /// Upper bound on a single stage attempt, in seconds
    pub stage_timeout_secs: u64,

    /// Voice for local speech synthesis
    pub tts_voice: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Default root directory for persisted artifacts
    pub output_root: PathBuf,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            yt_dlp_path: "yt-dlp".to_string(),
            whisper_path: "whisper".to_string(),
            espeak_path: "espeak-ng".to_string(),
        }
    }
}

impl Default for HostedApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_base: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            model: "gpt-4o-mini".to_string(),
            speech_model: "tts-1".to_string(),
            speech_voice: "alloy".to_string(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            summary_max_words: 150,
            model_size: "base".to_string(),
            stage_timeout_secs: 600,
            tts_voice: "en".to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("./output"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tools: ToolsConfig::default(),
            hosted: HostedApiConfig::default(),
            limits: LimitsConfig::default(),
            app: AppConfig::default(),
        }
    }
}

const MODEL_SIZES: &[&str] = &["tiny", "base", "small", "medium", "large"];

impl Config {
    /// Load configuration from file or create a default one.
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content = fs_err::read_to_string(&config_path)
                .context("Failed to read config file")?;

            let config: Config = serde_yaml::from_str(&content)
                .context("Failed to parse config file")?;

            config.validate()?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save().await?;
            Ok(config)
        }
    }

    /// Save configuration to file.
    pub async fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)
            .context("Failed to serialize config")?;

        fs_err::write(&config_path, content)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path.
    fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?;

        Ok(config_dir.join("vidsmith").join("config.yaml"))
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.limits.stage_timeout_secs == 0 {
            anyhow::bail!("stage_timeout_secs must be greater than zero");
        }

        if !MODEL_SIZES.contains(&self.limits.model_size.as_str()) {
            anyhow::bail!(
                "unknown model size '{}' (expected one of: {})",
                self.limits.model_size,
                MODEL_SIZES.join(", ")
            );
        }

        if self.limits.summary_max_words == 0 {
            anyhow::bail!("summary_max_words must be greater than zero");
        }

        Ok(())
    }

    /// Resolve the hosted API key from the environment, if present.
    pub fn hosted_api_key(&self) -> Option<String> {
        std::env::var(&self.hosted.api_key_env)
            .ok()
            .filter(|key| !key.is_empty())
    }

    /// Whether hosted backends are usable right now. Resolved once at
    /// startup into `RunContext.hosted_api_enabled`.
    pub fn hosted_available(&self) -> bool {
        self.hosted.enabled && self.hosted_api_key().is_some()
    }

    /// Build the per-run limits from the configured defaults.
    pub fn limits(&self) -> Limits {
        Limits {
            summary_max_words: self.limits.summary_max_words,
            model_size: self.limits.model_size.clone(),
            stage_timeout: Duration::from_secs(self.limits.stage_timeout_secs),
            tts_voice: self.limits.tts_voice.clone(),
        }
    }

    /// Display current configuration.
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Output Root: {}", self.app.output_root.display());
        println!("  yt-dlp: {}", self.tools.yt_dlp_path);
        println!("  whisper: {} (model: {})", self.tools.whisper_path, self.limits.model_size);
        println!("  espeak-ng: {} (voice: {})", self.tools.espeak_path, self.limits.tts_voice);
        println!("  Summary Max Words: {}", self.limits.summary_max_words);
        println!("  Stage Timeout: {}s", self.limits.stage_timeout_secs);
        println!("  Hosted API: {}", if self.hosted.enabled { "enabled" } else { "disabled" });
        if self.hosted.enabled {
            println!("    Base URL: {}", self.hosted.api_base);
            println!("    Model: {}", self.hosted.model);
            println!("    Key Env: {} ({})",
                self.hosted.api_key_env,
                if self.hosted_api_key().is_some() { "set" } else { "not set" });
        }
    }
}
