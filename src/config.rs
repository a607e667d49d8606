//! Configuration management for wiki-podcast.
//!
//! Loads config from YAML files in standard locations. Every section falls
//! back to its defaults, so an empty or missing file is a valid config.
//! API keys never live in the file; each section names the environment
//! variable that holds its key.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WikipediaConfig {
    pub base_url: String,
    pub user_agent: String,
}

impl Default for WikipediaConfig {
    fn default() -> Self {
        Self {
            base_url: "https://en.wikipedia.org".into(),
            user_agent: concat!("wiki-podcast/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewriterBackend {
    OpenAi,
    Ollama,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RewriterConfig {
    pub backend: RewriterBackend,
    pub model: String,
    pub host: String,
    pub api_key_env: String,
    pub temperature: f32,
    pub input_cost_per_million: f64,
    pub output_cost_per_million: f64,
}

impl Default for RewriterConfig {
    fn default() -> Self {
        Self {
            backend: RewriterBackend::OpenAi,
            model: "gpt-4o-mini".into(),
            host: "https://api.openai.com/v1".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            temperature: 0.3,
            input_cost_per_million: 0.15,
            output_cost_per_million: 0.60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub voice_id: String,
    pub model_id: String,
    pub base_url: String,
    pub api_key_env: String,
    pub sample_rate: u32,
    pub cost_per_character: f64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            voice_id: "21m00Tcm4TlvDq8ikWAM".into(),
            model_id: "eleven_monolingual_v1".into(),
            base_url: "https://api.elevenlabs.io".into(),
            api_key_env: "ELEVENLABS_API_KEY".into(),
            sample_rate: 24000,
            cost_per_character: 0.000167,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Max characters per synthesis request.
    pub chunk_size: usize,
    /// Characters of normalized text used for the preview clip.
    pub preview_char_count: usize,
    pub output_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub usage_log: PathBuf,
    /// Extension of the default output file. Anything but `wav` goes through ffmpeg.
    pub audio_format: String,
    pub request_timeout_secs: u64,
    /// Clip played before every episode. Missing files are skipped with a warning.
    pub intro_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 5000,
            preview_char_count: 500,
            output_dir: PathBuf::from("output"),
            cache_dir: PathBuf::from("cache"),
            usage_log: PathBuf::from("logs/usage.jsonl"),
            audio_format: "wav".into(),
            request_timeout_secs: 60,
            intro_path: None,
        }
    }
}

impl PipelineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub wikipedia: WikipediaConfig,
    pub rewriter: RewriterConfig,
    pub speech: SpeechConfig,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./podcast.yaml
    /// 2. ~/.config/wiki-podcast/config.yaml
    /// 3. /etc/wiki-podcast/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("podcast.yaml")),
                dirs::home_dir().map(|h| h.join(".config/wiki-podcast/config.yaml")),
                Some(PathBuf::from("/etc/wiki-podcast/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match Self::from_yaml(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yml::from_str(contents).map_err(|e| Error::Config(e.to_string()))
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.pipeline.chunk_size == 0, "pipeline.chunk_size must be positive"),
            (
                self.pipeline.preview_char_count == 0,
                "pipeline.preview_char_count must be positive",
            ),
            (
                self.pipeline.request_timeout_secs == 0,
                "pipeline.request_timeout_secs must be positive",
            ),
            (self.speech.sample_rate == 0, "speech.sample_rate must be positive"),
            (self.speech.voice_id.trim().is_empty(), "speech.voice_id is empty"),
        ];
        match checks.into_iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(Error::Config(message.into())),
            None => Ok(()),
        }
    }
}

/// Read an API key from the named environment variable.
pub fn api_key(var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
        _ => Err(Error::Config(format!("environment variable {var} is not set"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_gives_defaults() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.pipeline.chunk_size, 5000);
        assert_eq!(config.pipeline.preview_char_count, 500);
        assert_eq!(config.rewriter.backend, RewriterBackend::OpenAi);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let yaml = "speech:\n  voice_id: custom\npipeline:\n  chunk_size: 1200\nrewriter:\n  backend: ollama\n";
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.speech.voice_id, "custom");
        assert_eq!(config.speech.sample_rate, 24000);
        assert_eq!(config.pipeline.chunk_size, 1200);
        assert_eq!(config.pipeline.preview_char_count, 500);
        assert_eq!(config.rewriter.backend, RewriterBackend::Ollama);
        assert_eq!(config.pipeline.intro_path, None);
    }

    #[test]
    fn intro_path_is_optional() {
        let config = Config::from_yaml("pipeline:\n  intro_path: assets/intro.wav\n").unwrap();
        assert_eq!(config.pipeline.intro_path, Some(PathBuf::from("assets/intro.wav")));
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let config = Config::from_yaml("pipeline:\n  chunk_size: 0\n").unwrap();
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), "ConfigError");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join("absent.yaml")));
        assert_eq!(config.pipeline.chunk_size, 5000);
    }

    #[test]
    fn unset_api_key_is_a_config_error() {
        let err = api_key("WIKI_PODCAST_TEST_KEY_THAT_IS_NEVER_SET").unwrap_err();
        assert_eq!(err.kind(), "ConfigError");
    }
}
