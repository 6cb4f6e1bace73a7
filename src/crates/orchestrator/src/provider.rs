//! Turns `agent_config::Config`'s `llm.*` table into a wired-up [`LlmClient`].
//!
//! One `ChatModel` per declared role, selected by `provider` name. Local providers take their
//! `endpoint` as a base URL; remote providers resolve an API key from `api_key` if given,
//! otherwise from the provider's conventional environment variable.

use std::sync::Arc;

use llm::config::{LocalLlmConfig, RemoteLlmConfig};
use llm::local::{LlamaCppClient, LmStudioClient, OllamaClient};
use llm::remote::{ClaudeClient, DeepseekClient, GeminiClient, GrokClient, OpenAiClient, OpenRouterClient};
use llm::{ChatModel, LlmClient, Role};

use crate::agent_config::{Config, RoleConfig};
use crate::error::OrchestratorError;
use crate::security::LlmSqlCheck;

/// The recognized `llm.<role>` keys, mapped onto [`Role`].
fn role_for_key(key: &str) -> Option<Role> {
    match key {
        "analyzer" => Some(Role::Analyzer),
        "synthesizer" => Some(Role::Synthesizer),
        "answerer" => Some(Role::Answerer),
        "security" => Some(Role::Security),
        "sql" => Some(Role::Sql),
        _ => None,
    }
}

/// Whether the named provider returns JSON reliably enough to honor a structured-output
/// schema request. Conservative: only the providers known to support response-format
/// constraints are marked `true`.
fn supports_structured_output(provider: &str) -> bool {
    matches!(provider, "openai" | "openrouter" | "gemini")
}

fn build_model(role_config: &RoleConfig) -> Result<Arc<dyn ChatModel>, OrchestratorError> {
    let model: Arc<dyn ChatModel> = match role_config.provider.as_str() {
        "ollama" => {
            let endpoint = role_config.endpoint.clone().unwrap_or_else(|| "http://localhost:11434".to_string());
            Arc::new(OllamaClient::new(LocalLlmConfig::new(endpoint, role_config.model.clone())))
        }
        "llama_cpp" => {
            let endpoint = role_config.endpoint.clone().unwrap_or_else(|| "http://localhost:8080".to_string());
            Arc::new(LlamaCppClient::new(LocalLlmConfig::new(endpoint, role_config.model.clone())))
        }
        "lmstudio" => {
            let endpoint = role_config.endpoint.clone().unwrap_or_else(|| "http://localhost:1234/v1".to_string());
            Arc::new(LmStudioClient::new(LocalLlmConfig::new(endpoint, role_config.model.clone())))
        }
        "openai" => Arc::new(OpenAiClient::new(remote_config(
            role_config,
            "OPENAI_API_KEY",
            "https://api.openai.com/v1",
        )?)),
        "claude" | "anthropic" => Arc::new(ClaudeClient::new(remote_config(
            role_config,
            "ANTHROPIC_API_KEY",
            "https://api.anthropic.com",
        )?)),
        "gemini" => Arc::new(GeminiClient::new(remote_config(
            role_config,
            "GOOGLE_API_KEY",
            "https://generativelanguage.googleapis.com/v1beta",
        )?)),
        "grok" => Arc::new(GrokClient::new(remote_config(
            role_config,
            "XAI_API_KEY",
            "https://api.x.ai/v1",
        )?)),
        "deepseek" => Arc::new(DeepseekClient::new(remote_config(
            role_config,
            "DEEPSEEK_API_KEY",
            "https://api.deepseek.com",
        )?)),
        "openrouter" => Arc::new(OpenRouterClient::new(remote_config(
            role_config,
            "OPENROUTER_API_KEY",
            "https://openrouter.ai/api/v1",
        )?)),
        other => {
            return Err(OrchestratorError::General(format!("unknown llm provider: {other}")));
        }
    };
    Ok(model)
}

fn remote_config(
    role_config: &RoleConfig,
    env_var: &str,
    default_base_url: &str,
) -> Result<RemoteLlmConfig, OrchestratorError> {
    let base_url = role_config.endpoint.clone().unwrap_or_else(|| default_base_url.to_string());
    let config = match &role_config.api_key {
        Some(api_key) => RemoteLlmConfig::new(api_key.clone(), base_url, role_config.model.clone()),
        None => RemoteLlmConfig::from_env(env_var, base_url, role_config.model.clone())
            .map_err(|e| OrchestratorError::General(format!("{e}")))?,
    };
    Ok(config)
}

/// Builds the role-routed client the node set calls through `NodeContext::llm`.
pub fn build_llm_client(config: &Config) -> Result<LlmClient, OrchestratorError> {
    let mut client = LlmClient::new();
    for (key, role_config) in &config.llm {
        let Some(role) = role_for_key(key) else {
            tracing::warn!(key = %key, "ignoring unrecognized llm role in configuration");
            continue;
        };
        let model = build_model(role_config)?;
        let structured = supports_structured_output(&role_config.provider);
        client = client.with_role(role, model, structured);
    }
    Ok(client)
}

/// Routes the SQL safety validator's LLM override through the `security` role of
/// the same client the rest of the node set uses.
pub struct ClientBackedSqlCheck {
    client: Arc<LlmClient>,
    timeout: std::time::Duration,
}

impl ClientBackedSqlCheck {
    pub fn new(client: Arc<LlmClient>, timeout: std::time::Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait::async_trait]
impl LlmSqlCheck for ClientBackedSqlCheck {
    async fn is_safe_read(&self, query: &str, schema_hint: &str) -> bool {
        let system = "You review a SQL query a prior rule-based check flagged as containing a \
possibly forbidden keyword. Given the query and the target schema, answer whether the query is \
in fact a safe, read-only SELECT with no side effects. Respond with a single JSON object: \
{\"safe\": bool}.";
        let user = format!("Query: {query}\n\nSchema: {schema_hint}");
        let schema = serde_json::json!({"type": "object", "properties": {"safe": {"type": "boolean"}}});

        let response = match self.client.complete(Role::Security, system, &user, Some(schema), self.timeout).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(error = %err, "llm sql safety check failed, defaulting to unsafe");
                return false;
            }
        };

        response
            .structured
            .and_then(|v| v.get("safe").and_then(|b| b.as_bool()))
            .unwrap_or(false)
    }
}
