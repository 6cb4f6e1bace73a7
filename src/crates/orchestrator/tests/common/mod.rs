//! Shared test doubles for the scenario suite: a scripted `ChatModel` and a scripted
//! `McpTransport`, both driven by simple closures so each scenario can stay a few lines.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use langgraph_core::error::Result as GraphResult;
use langgraph_core::llm::{ChatModel, ChatRequest, ChatResponse, ChatStreamResponse};
use langgraph_core::{Message, MessageContent, MessageRole};
use tooling::mcp::{McpError, McpTransport, Result as McpResult, ServiceDescriptor};

/// A `ChatModel` whose reply is computed from the last human turn's text. Lets one role's
/// scenario wiring branch on which node is calling (e.g. by matching the prompt's wording)
/// without a real model in the loop.
#[derive(Clone)]
pub struct ScriptedModel {
    responder: Arc<dyn Fn(&str) -> String + Send + Sync>,
}

impl ScriptedModel {
    pub fn new(responder: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        Self { responder: Arc::new(responder) }
    }

    pub fn constant(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(move |_| text.clone())
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn chat(&self, request: ChatRequest) -> GraphResult<ChatResponse> {
        let user_text = request
            .messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, MessageRole::Human))
            .and_then(|m| m.text().map(str::to_string))
            .unwrap_or_default();
        let reply = (self.responder)(&user_text);
        Ok(ChatResponse {
            message: Message {
                id: None,
                role: MessageRole::Assistant,
                content: MessageContent::Text(reply),
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

/// A fixed registry plus a per-`(service_id, action)` canned response, standing in for the
/// HTTP wire transport during scenario tests.
pub struct ScriptedTransport {
    pub services: Vec<ServiceDescriptor>,
    pub responses: Mutex<HashMap<(String, String), McpResult<serde_json::Value>>>,
    pub invocations: Mutex<Vec<(String, String)>>,
}

impl ScriptedTransport {
    pub fn new(services: Vec<ServiceDescriptor>) -> Self {
        Self { services, responses: Mutex::new(HashMap::new()), invocations: Mutex::new(Vec::new()) }
    }

    pub fn with_response(self, service_id: &str, action: &str, response: serde_json::Value) -> Self {
        self.responses.lock().unwrap().insert((service_id.to_string(), action.to_string()), Ok(response));
        self
    }

    pub fn with_error(self, service_id: &str, action: &str, error: McpError) -> Self {
        self.responses.lock().unwrap().insert((service_id.to_string(), action.to_string()), Err(error));
        self
    }
}

#[async_trait]
impl McpTransport for ScriptedTransport {
    async fn discover(&self, _registry_url: &str) -> McpResult<Vec<ServiceDescriptor>> {
        Ok(self.services.clone())
    }

    async fn invoke(
        &self,
        service: &ServiceDescriptor,
        action: &str,
        _parameters: &serde_json::Value,
    ) -> McpResult<serde_json::Value> {
        self.invocations.lock().unwrap().push((service.id.clone(), action.to_string()));
        match self.responses.lock().unwrap().get(&(service.id.clone(), action.to_string())) {
            Some(Ok(body)) => Ok(body.clone()),
            Some(Err(err)) => Err(err.clone()),
            None => Ok(serde_json::json!({})),
        }
    }
}

pub fn sql_service(id: &str) -> ServiceDescriptor {
    ServiceDescriptor {
        id: id.to_string(),
        host: "localhost".to_string(),
        port: 9100,
        kind: tooling::mcp::ServiceKind::Sql,
        tool_schema: serde_json::json!({"tables": ["contacts"]}),
    }
}

pub fn rag_service(id: &str) -> ServiceDescriptor {
    ServiceDescriptor {
        id: id.to_string(),
        host: "localhost".to_string(),
        port: 9101,
        kind: tooling::mcp::ServiceKind::Rag,
        tool_schema: serde_json::json!({}),
    }
}

pub fn search_service(id: &str) -> ServiceDescriptor {
    ServiceDescriptor {
        id: id.to_string(),
        host: "localhost".to_string(),
        port: 9102,
        kind: tooling::mcp::ServiceKind::Search,
        tool_schema: serde_json::json!({}),
    }
}

pub fn minimal_config() -> orchestrator::agent_config::Config {
    orchestrator::agent_config::Config::load(std::path::Path::new("/nonexistent/orchestrator.yaml"))
        .expect("built-in defaults always load")
}
