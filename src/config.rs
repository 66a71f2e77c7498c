use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{QabotError, Result};
use crate::llm::{DEFAULT_MODEL, DEFAULT_TEMPERATURE};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    /// Only `openai` is supported; anything else fails in `OpenAIClient::from_config`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            temperature: default_temperature(),
            api_key: None,
            base_url: None,
            organization: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "openai".into()
}

fn default_model() -> String {
    DEFAULT_MODEL.into()
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSettings {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default)]
    pub return_intermediate_steps: bool,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default = "default_handle_parsing_errors")]
    pub handle_parsing_errors: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            return_intermediate_steps: false,
            verbose: false,
            handle_parsing_errors: default_handle_parsing_errors(),
        }
    }
}

fn default_max_iterations() -> usize {
    15
}

fn default_handle_parsing_errors() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DatabaseConfig {
    /// DuckDB file. `None` opens an in-memory database.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

fn default_log_filter() -> String {
    "qabot=info".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw)
            .map_err(|err| QabotError::Config(format!("Failed to parse configuration: {err}")))
    }

    /// Loads the file when it exists, then applies `QABOT_*` overrides.
    pub fn from_env_or_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut cfg = if path.exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };
        cfg.apply_env();
        Ok(cfg)
    }

    pub fn apply_env(&mut self) {
        if let Ok(model) = env::var("QABOT_MODEL") {
            self.model.model = model;
        }
        if let Ok(temperature) = env::var("QABOT_TEMPERATURE") {
            if let Ok(parsed) = temperature.parse::<f32>() {
                self.model.temperature = parsed.clamp(0.0, 2.0);
            }
        }
        if let Ok(key) = env::var("OPENAI_API_KEY") {
            self.model.api_key = Some(key);
        }
        if let Ok(key) = env::var("QABOT_API_KEY") {
            self.model.api_key = Some(key);
        }
        if let Ok(base_url) = env::var("QABOT_BASE_URL") {
            self.model.base_url = Some(base_url);
        }
        if let Ok(org) = env::var("QABOT_ORG") {
            self.model.organization = Some(org);
        }
        if let Ok(path) = env::var("QABOT_DATABASE") {
            self.database.path = Some(path);
        }
        if let Ok(read_only) = env::var("QABOT_READ_ONLY") {
            if let Ok(parsed) = read_only.parse::<bool>() {
                self.database.read_only = parsed;
            }
        }
        if let Ok(max) = env::var("QABOT_MAX_ITERATIONS") {
            if let Ok(parsed) = max.parse::<usize>() {
                self.agent.max_iterations = parsed.max(1);
            }
        }
        if let Ok(verbose) = env::var("QABOT_VERBOSE") {
            if let Ok(parsed) = verbose.parse::<bool>() {
                self.agent.verbose = parsed;
            }
        }
        if let Ok(filter) = env::var("QABOT_LOG") {
            self.telemetry.filter = filter;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_target_gpt_35_turbo() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.model.model, "gpt-3.5-turbo");
        assert_eq!(cfg.model.temperature, 0.0);
        assert_eq!(cfg.agent.max_iterations, 15);
        assert!(cfg.agent.handle_parsing_errors);
        assert!(cfg.database.path.is_none());
    }

    #[test]
    fn loads_and_overrides() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[model]\nmodel='gpt-4o-mini'\n[agent]\nverbose=true\n[database]\npath='sales.duckdb'"
        )
        .unwrap();

        env::set_var("QABOT_MAX_ITERATIONS", "4");
        let cfg = AppConfig::from_env_or_file(file.path()).unwrap();
        env::remove_var("QABOT_MAX_ITERATIONS");

        assert_eq!(cfg.model.model, "gpt-4o-mini");
        assert_eq!(cfg.model.temperature, 0.0);
        assert!(cfg.agent.verbose);
        assert_eq!(cfg.agent.max_iterations, 4);
        assert_eq!(cfg.database.path.as_deref(), Some("sales.duckdb"));
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = AppConfig::from_toml("[model\nmodel=").unwrap_err();
        assert!(matches!(err, QabotError::Config(_)));
    }
}
