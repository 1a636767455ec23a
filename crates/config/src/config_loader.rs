use ctxstream_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub generation: GenerationConfig,
    #[serde(default)]
    pub template: TemplateConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Base URL of the llama.cpp server doing the actual generation
    pub backend_url: String,
    /// System prompt placed ahead of every request
    pub system_prompt: String,
    pub default_max_length: usize,
    pub max_length_limit: usize,
    pub temperature: f32,
    pub top_p: f32,
    /// Longest silence tolerated between reads from the backend stream
    pub request_timeout_secs: u64,
    /// Fragment channel depth; unbounded when absent
    #[serde(default)]
    pub channel_capacity: Option<usize>,
}

/// Chat template wrapped around the system prompt and the request text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    pub system_prefix: String,
    pub system_suffix: String,
    pub user_prefix: String,
    pub user_suffix: String,
    pub assistant_prefix: String,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            system_prefix: "<|start_header_id|>system<|end_header_id|>\n\n".to_string(),
            system_suffix: "<|eot_id|>".to_string(),
            user_prefix: "<|start_header_id|>user<|end_header_id|>\n\n".to_string(),
            user_suffix: "<|eot_id|>".to_string(),
            assistant_prefix: "<|start_header_id|>assistant<|end_header_id|>\n\n".to_string(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:8080".to_string(),
            system_prompt: "You are a helpful assistant. Summarise the provided content concisely.".to_string(),
            default_max_length: 512,
            max_length_limit: 4096,
            temperature: 0.6,
            top_p: 0.9,
            request_timeout_secs: 300,
            channel_capacity: None,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
            },
            generation: GenerationConfig::default(),
            template: TemplateConfig::default(),
        }
    }
}

impl AppConfig {
    /// Reject inconsistent settings before the server starts
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(Error::ConfigError("server.port must be non-zero".into()));
        }
        let generation = &self.generation;
        if generation.max_length_limit == 0 {
            return Err(Error::ConfigError("generation.max_length_limit must be non-zero".into()));
        }
        if generation.default_max_length == 0 || generation.default_max_length > generation.max_length_limit {
            return Err(Error::ConfigError(format!(
                "generation.default_max_length must be between 1 and {}",
                generation.max_length_limit
            )));
        }
        if generation.channel_capacity == Some(0) {
            return Err(Error::ConfigError("generation.channel_capacity must be non-zero".into()));
        }
        if generation.backend_url.is_empty() {
            return Err(Error::ConfigError("generation.backend_url cannot be empty".into()));
        }
        Ok(())
    }
}

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<AppConfig> {
        if let Some(path) = path {
            if path.exists() {
                return Self::read(path);
            }
            return Err(Error::ConfigError(format!(
                "config file {} does not exist",
                path.display()
            )));
        }

        // Check default locations
        let default_paths = vec![
            PathBuf::from("ctxstream.json"),
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("ctxstream/config.json"),
        ];

        for path in default_paths {
            if path.exists() {
                return Self::read(&path);
            }
        }

        // Use defaults
        info!("No configuration file found, using defaults");
        Ok(AppConfig::default())
    }

    fn read(path: &PathBuf) -> Result<AppConfig> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(config: &AppConfig, path: &PathBuf) -> Result<()> {
        let content = serde_json::to_string_pretty(config)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
