//! The transport backing `McpClient` today: plain HTTP, `GET /services` for discovery and
//! `POST <service>/invoke` for tool calls. Kept behind [`super::McpTransport`] so the
//! in-flight JSON-RPC 2.0 migration (see the design notes on the open question) can land as
//! a sibling implementation.

use async_trait::async_trait;
use serde::Deserialize;

use super::{McpError, McpTransport, Result, ServiceDescriptor};

#[derive(Debug, Deserialize)]
struct ServicesResponse {
    services: Vec<ServiceDescriptor>,
}

#[derive(Debug, Deserialize)]
struct InvokeErrorBody {
    error: String,
}

/// A reqwest-backed [`McpTransport`]. Holds one connection-pooled client for the request
/// lifetime, shared across every service it talks to.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn discover(&self, registry_url: &str) -> Result<Vec<ServiceDescriptor>> {
        let url = format!("{}/services", registry_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| McpError::RegistryUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(McpError::RegistryUnavailable(format!(
                "registry returned status {}",
                response.status()
            )));
        }

        let parsed: ServicesResponse = response
            .json()
            .await
            .map_err(|e| McpError::RegistryUnavailable(format!("malformed registry response: {e}")))?;

        Ok(parsed.services)
    }

    async fn invoke(
        &self,
        service: &ServiceDescriptor,
        action: &str,
        parameters: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let url = format!("{}/invoke", service.base_url());
        let body = serde_json::json!({ "action": action, "parameters": parameters });

        let response = self.client.post(&url).json(&body).send().await.map_err(|e| {
            McpError::ServiceUnavailable { service_id: service.id.clone(), reason: e.to_string() }
        })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(McpError::ServiceUnavailable {
                service_id: service.id.clone(),
                reason: format!("{status}"),
            });
        }

        let text = response.text().await.map_err(|e| McpError::ProtocolError {
            service_id: service.id.clone(),
            reason: e.to_string(),
        })?;

        if status.is_client_error() {
            let message = serde_json::from_str::<InvokeErrorBody>(&text)
                .map(|b| b.error)
                .unwrap_or(text);
            return Err(McpError::ToolError { service_id: service.id.clone(), message });
        }

        serde_json::from_str(&text).map_err(|e| McpError::ProtocolError {
            service_id: service.id.clone(),
            reason: format!("invalid JSON body: {e}"),
        })
    }
}
