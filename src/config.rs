use anyhow::{Context, Result};
use serde::Deserialize;

use crate::client::ClientConfig;
use crate::session::SessionConfig;

/// Prefix of environment overrides, e.g. `REFLECTIONS__SERVICE__HTTP__PORT=9000`
pub const ENV_PREFIX: &str = "REFLECTIONS";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub session: SessionConfig,
    pub engines: EngineConfig,
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "reflections-voice".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8765,
        }
    }
}

/// Locations of the external engines. Unset URLs fall back to stubs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub stt_base_url: Option<String>,
    pub ollama_base_url: Option<String>,
    pub ollama_model: String,
    pub tts_base_url: Option<String>,
    pub tts_voice: Option<String>,
    pub connect_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stt_base_url: None,
            ollama_base_url: None,
            ollama_model: "llama3.1:8b".to_string(),
            tts_base_url: None,
            tts_voice: None,
            connect_timeout_ms: 3000,
        }
    }
}

impl Config {
    /// Load defaults, then the optional config file at `path`, then environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path))?;

        settings
            .try_deserialize()
            .context("Failed to parse configuration")
    }
}
