//! [`OrchestratorError`] — node-level and graph-assembly errors, `#[from]`-wrapping the
//! lower-crate error enums.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The assembled graph failed validation or a run returned a driver-level error.
    #[error("graph run failed: {0}")]
    Graph(#[from] langgraph_core::agent_graph::DriverError),

    /// An LLM call failed in a way the node could not recover from.
    #[error("llm error: {0}")]
    Llm(#[from] llm::LlmError),

    /// An MCP transport, discovery, or tooling error escaped node handling.
    #[error("tooling error: {0}")]
    Tooling(#[from] tooling::ToolingError),

    /// Configuration loading or validation failed.
    #[error("configuration error: {0}")]
    General(String),

    /// Registry unreachable and tools required; no recovery path exists.
    #[error("fatal: {0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
