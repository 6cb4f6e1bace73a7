//! [`Config`] — the recognized options, loaded from YAML and deep-merged over
//! compiled-in defaults via [`crate::config::loader`].

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::loader::{deep_merge, load_yaml_file};
use crate::error::OrchestratorError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleConfig {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    pub registry_url: String,
    #[serde(default = "default_mcp_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_mcp_timeout")]
    pub call_timeout_seconds: u64,
}

fn default_mcp_concurrency() -> usize {
    8
}

fn default_mcp_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
}

fn default_max_iterations() -> u32 {
    3
}

fn default_max_steps() -> u32 {
    30
}

impl Default for IterationConfig {
    fn default() -> Self {
        Self { max_iterations: default_max_iterations(), max_steps: default_max_steps() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub use_llm_check: bool,
    #[serde(default)]
    pub disable_sql_blocking: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default)]
    pub disable_databases: bool,
    #[serde(default)]
    pub disable_prompt_stage: bool,
    #[serde(default)]
    pub disable_response_stage: bool,
    #[serde(default)]
    pub return_mcp_response_to_llm: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

/// The merged, deserialized configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: HashMap<String, RoleConfig>,
    pub mcp: McpConfig,
    #[serde(default)]
    pub iteration: IterationConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load `path` over the compiled-in defaults, resolving `$include` and `${ENV_VAR:default}`
    ///. Falls back to defaults entirely if `path` does not exist.
    pub fn load(path: &Path) -> Result<Self, OrchestratorError> {
        let mut merged = Self::default_yaml();
        if path.exists() {
            let file_value = load_yaml_file(path)?;
            deep_merge(&mut merged, &file_value);
        }
        let json = serde_yaml_to_json(&merged)?;
        let config: Config = serde_json::from_value(json)
            .map_err(|e| OrchestratorError::General(format!("invalid configuration: {e}")))?;
        Ok(config)
    }

    fn default_yaml() -> serde_yaml::Value {
        serde_yaml::from_str(DEFAULT_CONFIG_YAML).expect("built-in default config is valid YAML")
    }
}

fn serde_yaml_to_json(value: &serde_yaml::Value) -> Result<serde_json::Value, OrchestratorError> {
    serde_json::to_value(value)
        .map_err(|e| OrchestratorError::General(format!("failed to convert config to JSON: {e}")))
}

const DEFAULT_CONFIG_YAML: &str = r#"
mcp:
  registry_url: "http://localhost:8500"
  concurrency: 8
  call_timeout_seconds: 60
iteration:
  max_iterations: 3
  max_steps: 30
security:
  use_llm_check: false
  disable_sql_blocking: false
features:
  disable_databases: false
  disable_prompt_stage: false
  disable_response_stage: false
  return_mcp_response_to_llm: false
logging:
  level: "info"
  format: "compact"
llm: {}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_loads_without_a_file() {
        let config = Config::load(Path::new("/nonexistent/orchestrator.yaml")).unwrap();
        assert_eq!(config.mcp.registry_url, "http://localhost:8500");
        assert_eq!(config.iteration.max_iterations, 3);
        assert!(!config.features.disable_databases);
    }

    #[test]
    fn overrides_merge_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orchestrator.yaml");
        std::fs::write(
            &path,
            r#"
mcp:
  registry_url: "http://registry.internal:9000"
iteration:
  max_iterations: 5
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.mcp.registry_url, "http://registry.internal:9000");
        assert_eq!(config.mcp.call_timeout_seconds, 60);
        assert_eq!(config.iteration.max_iterations, 5);
        assert_eq!(config.iteration.max_steps, 30);
    }
}
