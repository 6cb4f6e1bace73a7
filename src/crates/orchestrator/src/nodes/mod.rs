//! The node set — one handler per node, each a `Fn(AgentState) -> Future<NodeOutcome>`
//! registered into the [`crate::graph`] driver. Every node reads a state snapshot and returns a
//! patch; side effects (LLM calls, MCP calls) happen inside the handler body, never across node
//! boundaries.

mod analyze_request;
mod capability_check;
mod discover_services;
mod execute_tool_calls;
mod generate_answer;
mod generate_failure;
mod initialize;
mod plan_refined_queries;
mod sql;
mod synthesize;

pub use analyze_request::analyze_request;
pub use capability_check::capability_check;
pub use discover_services::discover_services;
pub use execute_tool_calls::execute_tool_calls;
pub use generate_answer::generate_answer;
pub use generate_failure::generate_failure;
pub use initialize::initialize;
pub use plan_refined_queries::plan_refined_queries;
pub use sql::{execute_sql, generate_sql, refine_sql, validate_sql, wider_search};
pub use synthesize::synthesize;

use std::sync::Arc;
use std::time::Duration;

use llm::LlmClient;
use tooling::mcp::McpClient;

use crate::security::LlmSqlCheck;

/// The collaborators every node handler closes over. Built once per `Run` call and cheaply
/// cloned into each registered closure (everything inside is an `Arc`).
#[derive(Clone)]
pub struct NodeContext {
    pub mcp: Arc<McpClient>,
    pub llm: Arc<LlmClient>,
    pub llm_sql_check: Option<Arc<dyn LlmSqlCheck>>,
    pub mcp_call_timeout: Duration,
    pub llm_call_timeout: Duration,
    pub use_llm_sql_check: bool,
    pub max_sql_retries: u32,
}

/// Pulls the first top-level JSON object out of `text`, tolerating code-fence wrapping or
/// leading/trailing prose a model might emit around the object a schema was requested for.
pub fn extract_json_object(text: &str) -> Option<serde_json::Value> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(text.trim()) {
        return Some(value);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}
