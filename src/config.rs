//! TOML configuration for the gateway, the OpenAI client and the CLI.
//!
//! Every section is optional; missing values fall back to the defaults
//! below, so an empty file is a valid configuration.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub openai: OpenAIConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OpenAIConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_instructions")]
    pub instructions: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Vector store that uploads are attached to. Looked up by name and
    /// created on first upload.
    #[serde(default = "default_vector_store_name")]
    pub vector_store_name: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            instructions: default_instructions(),
            temperature: default_temperature(),
            vector_store_name: default_vector_store_name(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_model() -> String {
    "gpt-4.1-nano".to_string()
}
fn default_instructions() -> String {
    "You are a friendly and helpful assistant. If relevant, use the information from the provided files to answer the user's query.".to_string()
}
fn default_temperature() -> f64 {
    0.7
}
fn default_vector_store_name() -> String {
    "scraped_chat_files_store".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    /// Base URL of a running `kbchat serve` gateway.
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            gateway_url: default_gateway_url(),
        }
    }
}

fn default_gateway_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory holding the local blobs (one `<key>.json` file per key).
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
        }
    }
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_files: default_max_files(),
            max_size_bytes: default_max_size_bytes(),
        }
    }
}

fn default_max_files() -> usize {
    6
}
fn default_max_size_bytes() -> u64 {
    5 * 1024 * 1024
}

impl Config {
    /// A fully defaulted configuration, used when no config file exists.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Reads the OpenAI API key from the configured environment variable.
    pub fn api_key(&self) -> Result<String> {
        std::env::var(&self.openai.api_key_env)
            .with_context(|| format!("{} environment variable not set", self.openai.api_key_env))
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Loads `path` if it exists, otherwise returns [`Config::minimal`].
/// A file that exists but fails to parse or validate is still an error.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        Ok(Config::minimal())
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.openai.model.trim().is_empty() {
        anyhow::bail!("openai.model must not be empty");
    }
    if config.openai.vector_store_name.trim().is_empty() {
        anyhow::bail!("openai.vector_store_name must not be empty");
    }
    if !(0.0..=2.0).contains(&config.openai.temperature) {
        anyhow::bail!("openai.temperature must be in [0.0, 2.0]");
    }
    if config.openai.timeout_secs == 0 {
        anyhow::bail!("openai.timeout_secs must be > 0");
    }
    if config.server.bind.trim().is_empty() {
        anyhow::bail!("server.bind must not be empty");
    }
    if config.client.gateway_url.trim().is_empty() {
        anyhow::bail!("client.gateway_url must not be empty");
    }
    if config.upload.max_files == 0 {
        anyhow::bail!("upload.max_files must be >= 1");
    }
    if config.upload.max_size_bytes == 0 {
        anyhow::bail!("upload.max_size_bytes must be >= 1");
    }
    Ok(())
}
