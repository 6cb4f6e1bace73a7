//! A client for the MCP (Model Context Protocol) tool-service family.
//!
//! Speaks the current ad-hoc HTTP wire format (`POST <service>/invoke`) behind a small
//! [`McpTransport`] trait so the in-flight JSON-RPC 2.0 migration can land as an alternate
//! implementation without touching call sites. Discovery, single-call invocation, and the
//! concurrent `invoke_many` fan-out used by `execute_tool_calls` all live here; the raw
//! per-service-kind response shapes are the caller's problem (see the orchestrator crate's
//! result normalizer) — this module only guarantees positional ordering and the failure
//! taxonomy below.

mod transport;

pub use transport::HttpTransport;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::async_utils::retry::RetryPolicy;

/// The kind of MCP service a descriptor advertises, used by planning nodes to match a
/// requested capability (e.g. "I need SQL") to a concrete `service_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Search,
    Rag,
    Sql,
    Dns,
    Download,
    Other,
}

/// A service advertised by the registry's `/services` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub kind: ServiceKind,
    #[serde(default)]
    pub tool_schema: serde_json::Value,
}

impl ServiceDescriptor {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// A `(service_id, action, parameters)` triple addressed to a specific MCP service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub service_id: String,
    pub action: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// The unparsed JSON body returned by a successful `/invoke` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawResult {
    pub service_id: String,
    pub kind: ServiceKind,
    pub body: serde_json::Value,
}

/// The MCP client's failure taxonomy. Every variant is returned, never panicked.
#[derive(Debug, Clone, Error)]
pub enum McpError {
    #[error("service registry unreachable: {0}")]
    RegistryUnavailable(String),
    #[error("service '{service_id}' unavailable: {reason}")]
    ServiceUnavailable { service_id: String, reason: String },
    #[error("malformed response from '{service_id}': {reason}")]
    ProtocolError { service_id: String, reason: String },
    #[error("service '{service_id}' returned an error: {message}")]
    ToolError { service_id: String, message: String },
}

impl McpError {
    /// Whether this failure is a transport-level blip worth retrying. Per the taxonomy,
    /// only `RegistryUnavailable`/`ServiceUnavailable`/`ProtocolError` are transient; a
    /// `ToolError` is a well-formed answer from the service and must not be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            McpError::RegistryUnavailable(_)
                | McpError::ServiceUnavailable { .. }
                | McpError::ProtocolError { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, McpError>;

/// One call's outcome within an `invoke_many` batch — individual failures never abort the
/// batch, so the element type carries the error rather than the call propagating it.
pub type BatchOutcome = std::result::Result<RawResult, McpError>;

/// The wire-level operations an `McpClient` needs from a transport. `HttpTransport` is the
/// one implementation wired in today; a JSON-RPC 2.0 transport can be substituted without
/// touching `McpClient` or any node code.
#[async_trait]
pub trait McpTransport: Send + Sync {
    async fn discover(&self, registry_url: &str) -> Result<Vec<ServiceDescriptor>>;
    async fn invoke(
        &self,
        service: &ServiceDescriptor,
        action: &str,
        parameters: &serde_json::Value,
    ) -> Result<serde_json::Value>;
}

/// Discovers MCP services and invokes tools on them, with bounded-concurrency fan-out and
/// per-call retry on transient network failure.
pub struct McpClient {
    transport: Arc<dyn McpTransport>,
    registry_url: String,
    concurrency: usize,
    retry_policy: RetryPolicy,
}

impl McpClient {
    pub fn new(transport: Arc<dyn McpTransport>, registry_url: impl Into<String>) -> Self {
        Self {
            transport,
            registry_url: registry_url.into(),
            concurrency: 8,
            retry_policy: RetryPolicy::new(3).with_initial_interval(0.25),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Query the registry for the currently advertised services. Callers cache the result
    /// for the request lifetime (`AgentState::discovered_services` is set exactly once).
    #[tracing::instrument(skip(self))]
    pub async fn discover(&self) -> Result<HashMap<String, ServiceDescriptor>> {
        let services = self.transport.discover(&self.registry_url).await?;
        Ok(services.into_iter().map(|s| (s.id.clone(), s)).collect())
    }

    /// Invoke a single tool call with a per-call timeout, retrying transient network failures
    /// up to the configured policy. A well-formed error response from the service (as opposed
    /// to a transport failure) is surfaced as `McpError::ToolError` and is not retried — the
    /// service already answered.
    #[tracing::instrument(skip(self, service, parameters))]
    pub async fn invoke(
        &self,
        service: &ServiceDescriptor,
        action: &str,
        parameters: &serde_json::Value,
        timeout: Duration,
    ) -> Result<RawResult> {
        let mut last_error = None;
        for attempt in 0..self.retry_policy.max_attempts {
            let call = self.transport.invoke(service, action, parameters);
            let outcome = match tokio::time::timeout(timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(McpError::ServiceUnavailable {
                    service_id: service.id.clone(),
                    reason: format!("timed out after {timeout:?}"),
                }),
            };

            match outcome {
                Ok(body) => {
                    return Ok(RawResult { service_id: service.id.clone(), kind: service.kind, body })
                }
                Err(err) => {
                    if !err.is_transient() || !self.retry_policy.should_retry(attempt + 1) {
                        return Err(err);
                    }
                    tracing::debug!(service_id = %service.id, attempt, error = %err, "retrying transient MCP error");
                    let delay = self.retry_policy.calculate_delay(attempt);
                    last_error = Some(err);
                    tokio::time::sleep(delay).await;
                }
            }
        }
        Err(last_error.expect("loop body runs at least once when max_attempts > 0"))
    }

    /// Fan out `calls` concurrently (bounded by `self.concurrency`), collecting results in
    /// the original order regardless of completion order. Each element's failure is isolated:
    /// one dead service never aborts the batch.
    #[tracing::instrument(skip(self, calls, services))]
    pub async fn invoke_many(
        &self,
        calls: &[ToolCall],
        services: &HashMap<String, ServiceDescriptor>,
        per_call_timeout: Duration,
        overall_deadline: Duration,
    ) -> Vec<BatchOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let batch = async {
            let futures = calls.iter().map(|call| {
                let semaphore = Arc::clone(&semaphore);
                async move {
                    let _permit = semaphore.acquire().await.expect("semaphore not closed");
                    match services.get(&call.service_id) {
                        Some(service) => {
                            self.invoke(service, &call.action, &call.parameters, per_call_timeout)
                                .await
                        }
                        None => Err(McpError::ServiceUnavailable {
                            service_id: call.service_id.clone(),
                            reason: "not present in discovered_services".to_string(),
                        }),
                    }
                }
            });
            futures::future::join_all(futures).await
        };

        match tokio::time::timeout(overall_deadline, batch).await {
            Ok(results) => results,
            Err(_) => calls
                .iter()
                .map(|call| {
                    Err(McpError::ServiceUnavailable {
                        service_id: call.service_id.clone(),
                        reason: format!("batch exceeded overall deadline {overall_deadline:?}"),
                    })
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubTransport {
        fail_service: Option<String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl McpTransport for StubTransport {
        async fn discover(&self, _registry_url: &str) -> Result<Vec<ServiceDescriptor>> {
            Ok(vec![
                ServiceDescriptor {
                    id: "rag-server".into(),
                    host: "localhost".into(),
                    port: 9001,
                    kind: ServiceKind::Rag,
                    tool_schema: serde_json::json!({}),
                },
                ServiceDescriptor {
                    id: "search-server".into(),
                    host: "localhost".into(),
                    port: 9002,
                    kind: ServiceKind::Search,
                    tool_schema: serde_json::json!({}),
                },
            ])
        }

        async fn invoke(
            &self,
            service: &ServiceDescriptor,
            _action: &str,
            _parameters: &serde_json::Value,
        ) -> Result<serde_json::Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if Some(&service.id) == self.fail_service.as_ref() {
                return Err(McpError::ToolError {
                    service_id: service.id.clone(),
                    message: "simulated failure".into(),
                });
            }
            Ok(serde_json::json!({ "ok": true, "service": service.id }))
        }
    }

    #[tokio::test]
    async fn discover_maps_by_service_id() {
        let client = McpClient::new(Arc::new(StubTransport { fail_service: None, calls: AtomicUsize::new(0) }), "http://registry");
        let services = client.discover().await.unwrap();
        assert_eq!(services.len(), 2);
        assert!(services.contains_key("rag-server"));
    }

    #[tokio::test]
    async fn invoke_many_preserves_order_and_isolates_failures() {
        let client = McpClient::new(
            Arc::new(StubTransport { fail_service: Some("search-server".into()), calls: AtomicUsize::new(0) }),
            "http://registry",
        );
        let services = client.discover().await.unwrap();
        let calls = vec![
            ToolCall { service_id: "rag-server".into(), action: "query".into(), parameters: serde_json::json!({}) },
            ToolCall { service_id: "search-server".into(), action: "query".into(), parameters: serde_json::json!({}) },
        ];

        let results = client
            .invoke_many(&calls, &services, Duration::from_secs(5), Duration::from_secs(30))
            .await;

        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(McpError::ToolError { .. })));
    }

    #[tokio::test]
    async fn invoke_many_reports_unknown_service_without_panicking() {
        let client = McpClient::new(Arc::new(StubTransport { fail_service: None, calls: AtomicUsize::new(0) }), "http://registry");
        let services = HashMap::new();
        let calls = vec![ToolCall { service_id: "ghost".into(), action: "x".into(), parameters: serde_json::json!({}) }];

        let results = client
            .invoke_many(&calls, &services, Duration::from_secs(5), Duration::from_secs(30))
            .await;

        assert!(matches!(results[0], Err(McpError::ServiceUnavailable { .. })));
    }

    struct ToolErrorTransport {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl McpTransport for ToolErrorTransport {
        async fn discover(&self, _registry_url: &str) -> Result<Vec<ServiceDescriptor>> {
            Ok(vec![])
        }

        async fn invoke(
            &self,
            service: &ServiceDescriptor,
            _action: &str,
            _parameters: &serde_json::Value,
        ) -> Result<serde_json::Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(McpError::ToolError { service_id: service.id.clone(), message: "undefined table".into() })
        }
    }

    #[tokio::test]
    async fn tool_error_is_surfaced_immediately_without_retrying() {
        let transport = Arc::new(ToolErrorTransport { calls: AtomicUsize::new(0) });
        let client = McpClient::new(transport.clone(), "http://registry")
            .with_retry_policy(RetryPolicy::new(3).with_initial_interval(0.001));
        let service = ServiceDescriptor {
            id: "sql-server".into(),
            host: "localhost".into(),
            port: 9100,
            kind: ServiceKind::Sql,
            tool_schema: serde_json::json!({}),
        };

        let result = client.invoke(&service, "query", &serde_json::json!({}), Duration::from_secs(5)).await;

        assert!(matches!(result, Err(McpError::ToolError { .. })));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1, "a well-formed tool error must not be retried");
    }
}
