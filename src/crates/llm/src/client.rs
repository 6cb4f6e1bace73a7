//! A single-turn, role-routed chat completion client.
//!
//! Wraps one or more `ChatModel` implementations behind the narrow `Complete` operation the
//! orchestration core actually needs: one system/user turn, an optional structured-output
//! schema, a timeout, and an opt-in SSH keep-alive heartbeat for long-running calls.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use langgraph_core::llm::{ChatModel, ChatRequest, UsageMetadata};
use langgraph_core::Message;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::{LlmError, Result};

/// The per-role routing keys recognized by configuration (`llm.*.{provider,model,...}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Analyzer,
    Synthesizer,
    Answerer,
    Security,
    Sql,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Analyzer => "analyzer",
            Role::Synthesizer => "synthesizer",
            Role::Answerer => "answerer",
            Role::Security => "security",
            Role::Sql => "sql",
        };
        write!(f, "{s}")
    }
}

/// Controls the null-byte heartbeat emitted during long completions to keep an SSH session
/// alive. Opt-in; when disabled, `complete` behaves identically but without the side I/O.
#[derive(Debug, Clone, Copy)]
pub struct KeepAliveConfig {
    pub enabled: bool,
    pub interval: Duration,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self { enabled: false, interval: Duration::from_secs(45) }
    }
}

/// The outcome of a `Complete` call.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// The raw assistant text. Always populated, even when `structured` is present.
    pub text: String,
    /// Parsed structured output, present only if a schema was requested, honored by the
    /// provider, and the response parsed as JSON.
    pub structured: Option<serde_json::Value>,
    pub usage: Option<UsageMetadata>,
}

struct RoleEntry {
    model: Arc<dyn ChatModel>,
    supports_structured_output: bool,
}

/// Routes `Complete` calls to a per-role `ChatModel`, per the configuration in `llm.*`.
pub struct LlmClient {
    roles: HashMap<Role, RoleEntry>,
    keep_alive: KeepAliveConfig,
}

impl LlmClient {
    pub fn new() -> Self {
        Self { roles: HashMap::new(), keep_alive: KeepAliveConfig::default() }
    }

    pub fn with_keep_alive(mut self, keep_alive: KeepAliveConfig) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Register the model backing a role. `supports_structured_output` mirrors the provider's
    /// declared capability: when `false`, any `schema` passed to `complete` for this
    /// role is silently ignored and the raw string is returned.
    pub fn with_role(
        mut self,
        role: Role,
        model: Arc<dyn ChatModel>,
        supports_structured_output: bool,
    ) -> Self {
        self.roles.insert(role, RoleEntry { model, supports_structured_output });
        self
    }

    /// Issue one chat-completion turn for `role`.
    ///
    /// `schema`, when the provider supports structured output, is attached to the request and
    /// the response body is additionally parsed as JSON into `LlmResponse::structured`. Parse
    /// failure is not an error: `structured` is simply `None` and callers fall back to `text`.
    #[tracing::instrument(skip(self, system, user, schema), fields(role = %role))]
    pub async fn complete(
        &self,
        role: Role,
        system: &str,
        user: &str,
        schema: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<LlmResponse> {
        let entry = self
            .roles
            .get(&role)
            .ok_or_else(|| LlmError::ConfigError(format!("no model configured for role {role}")))?;

        let mut request = ChatRequest::new(vec![Message::system(system), Message::human(user)]);
        let effective_schema = schema.filter(|_| entry.supports_structured_output);
        if let Some(schema) = effective_schema.clone() {
            request = request.with_response_schema(schema);
        }

        let call = entry.model.chat(request);
        let response = if self.keep_alive.enabled {
            with_keep_alive(self.keep_alive.interval, tokio::time::timeout(timeout, call)).await
        } else {
            tokio::time::timeout(timeout, call).await
        }
        .map_err(|_| LlmError::Timeout(format!("llm call for role {role} exceeded {timeout:?}")))?
        .map_err(|e| LlmError::ProviderError(e.to_string()))?;

        let text = response.message.text().unwrap_or_default().to_string();
        let structured = if effective_schema.is_some() {
            serde_json::from_str(&text).ok()
        } else {
            None
        };

        Ok(LlmResponse { text, structured, usage: response.usage })
    }
}

impl Default for LlmClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs `fut` to completion while writing a null byte to stdout every `interval`, so a
/// terminal-attached SSH session doesn't get killed for being idle during a long completion.
/// The heartbeat never touches `fut`'s output; it is purely a side channel.
async fn with_keep_alive<F: std::future::Future>(interval: Duration, fut: F) -> F::Output {
    tokio::pin!(fut);
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // first tick fires immediately; consume it so the cadence starts at `interval`.
    loop {
        tokio::select! {
            output = &mut fut => return output,
            _ = ticker.tick() => {
                let mut stdout = tokio::io::stdout();
                let _ = stdout.write_all(&[0u8]).await;
                let _ = stdout.flush().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use langgraph_core::error::Result as GraphResult;
    use langgraph_core::llm::{ChatResponse, ChatStreamResponse};
    use langgraph_core::{MessageContent, MessageRole};

    #[derive(Clone)]
    struct EchoModel {
        reply: String,
    }

    #[async_trait]
    impl ChatModel for EchoModel {
        async fn chat(&self, _request: ChatRequest) -> GraphResult<ChatResponse> {
            Ok(ChatResponse {
                message: Message {
                    id: None,
                    role: MessageRole::Assistant,
                    content: MessageContent::Text(self.reply.clone()),
                    name: None,
                    tool_calls: None,
                    tool_call_id: None,
                    metadata: None,
                },
                usage: None,
                reasoning: None,
                metadata: HashMap::new(),
            })
        }

        async fn stream(&self, _request: ChatRequest) -> GraphResult<ChatStreamResponse> {
            unimplemented!("not exercised in these tests")
        }

        fn clone_box(&self) -> Box<dyn ChatModel> {
            Box::new(self.clone())
        }
    }

    #[tokio::test]
    async fn complete_routes_to_the_configured_role() {
        let client = LlmClient::new().with_role(
            Role::Answerer,
            Arc::new(EchoModel { reply: "hi there".into() }),
            false,
        );

        let response = client
            .complete(Role::Answerer, "sys", "user", None, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(response.text, "hi there");
        assert!(response.structured.is_none());
    }

    #[tokio::test]
    async fn unconfigured_role_is_a_config_error() {
        let client = LlmClient::new();
        let err = client
            .complete(Role::Sql, "sys", "user", None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::ConfigError(_)));
    }

    #[tokio::test]
    async fn schema_ignored_when_provider_does_not_support_structured_output() {
        let client = LlmClient::new().with_role(
            Role::Security,
            Arc::new(EchoModel { reply: "not json at all".into() }),
            false,
        );

        let response = client
            .complete(
                Role::Security,
                "sys",
                "user",
                Some(serde_json::json!({"type": "object"})),
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        assert_eq!(response.text, "not json at all");
        assert!(response.structured.is_none());
    }

    #[tokio::test]
    async fn structured_output_parses_when_provider_supports_it() {
        let client = LlmClient::new().with_role(
            Role::Analyzer,
            Arc::new(EchoModel { reply: r#"{"ok":true}"#.into() }),
            true,
        );

        let response = client
            .complete(
                Role::Analyzer,
                "sys",
                "user",
                Some(serde_json::json!({"type": "object"})),
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        assert_eq!(response.structured, Some(serde_json::json!({"ok": true})));
    }
}
