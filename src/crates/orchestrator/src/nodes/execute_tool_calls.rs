//! Fans `planned_tool_calls` out via `McpClient::invoke_many`, normalizes every
//! result, and appends to `tool_results`. A per-call failure becomes a normalized tool-error
//! document, even a `tool_error`; it never aborts the batch or the node.

use std::time::Duration;

use langgraph_core::agent_graph::{NodeError, NodeOutcome};

use crate::normalize::Normalizer;
use crate::state::{AgentPatch, AgentState};

use super::NodeContext;

const OVERALL_DEADLINE: Duration = Duration::from_secs(300);

pub async fn execute_tool_calls(
    ctx: NodeContext,
    state: AgentState,
) -> Result<NodeOutcome<AgentPatch>, NodeError> {
    let outcomes = ctx
        .mcp
        .invoke_many(
            &state.planned_tool_calls,
            &state.discovered_services,
            ctx.mcp_call_timeout,
            OVERALL_DEADLINE,
        )
        .await;

    let mut documents = Vec::new();
    for (call, outcome) in state.planned_tool_calls.iter().zip(outcomes) {
        match outcome {
            Ok(raw) => documents.extend(Normalizer::normalize(&raw)),
            Err(err) => {
                tracing::warn!(service_id = %call.service_id, error = %err, "tool call failed");
                documents.push(Normalizer::normalize_tool_error(&call.service_id, &err.to_string()));
            }
        }
    }

    let mut patch = AgentPatch::new();
    patch.append_tool_results = documents;
    Ok(NodeOutcome::goto(patch, "synthesize"))
}
