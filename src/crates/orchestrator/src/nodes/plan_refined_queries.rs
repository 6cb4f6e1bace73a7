//! Proposes a fresh `planned_tool_calls` informed by what has already been tried.
//! Always routes into the fan-out (`execute_tool_calls`), or into the SQL subgraph when the
//! new plan targets a `kind = sql` service, mirroring `analyze_request`'s routing.

use langgraph_core::agent_graph::{NodeError, NodeOutcome};
use llm::Role;

use crate::state::{AgentPatch, AgentState};

use super::analyze_request::route;
use super::{extract_json_object, NodeContext};

const SYSTEM_PROMPT: &str = "The previous attempt's retrieved context was insufficient. Given the \
user's request, the tool calls already tried, and the context gathered so far, propose a refined \
set of tool calls that are more likely to answer the request. Respond with a single JSON object: \
{\"tool_calls\": [{\"service_id\": string, \"action\": string, \"parameters\": object}]}.";

pub async fn plan_refined_queries(
    ctx: NodeContext,
    state: AgentState,
) -> Result<NodeOutcome<AgentPatch>, NodeError> {
    let previously_tried = state
        .planned_tool_calls
        .iter()
        .map(|c| format!("- {} / {}", c.service_id, c.action))
        .collect::<Vec<_>>()
        .join("\n");

    let user_prompt = format!(
        "User request: {}\n\nPreviously tried:\n{}\n\nContext gathered so far:\n{}",
        state.user_request, previously_tried, state.synthesized_context
    );

    let schema = serde_json::json!({
        "type": "object",
        "properties": {
            "tool_calls": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "service_id": {"type": "string"},
                        "action": {"type": "string"},
                        "parameters": {"type": "object"}
                    }
                }
            }
        }
    });

    let response = ctx
        .llm
        .complete(Role::Analyzer, SYSTEM_PROMPT, &user_prompt, Some(schema), ctx.llm_call_timeout)
        .await
        .map_err(|e| NodeError::Transient(e.to_string()))?;

    let parsed = response.structured.or_else(|| extract_json_object(&response.text));
    let tool_calls = parsed
        .as_ref()
        .and_then(|v| v.get("tool_calls"))
        .and_then(|v| v.as_array())
        .map(|calls| {
            calls
                .iter()
                .filter_map(|c| {
                    let service_id = c.get("service_id")?.as_str()?.to_string();
                    if !state.discovered_services.contains_key(&service_id) {
                        return None;
                    }
                    let action = c.get("action").and_then(|a| a.as_str()).unwrap_or("query").to_string();
                    let parameters = c.get("parameters").cloned().unwrap_or_else(|| serde_json::json!({}));
                    Some(crate::state::ToolCall { service_id, action, parameters })
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let mut patch = AgentPatch::new();
    patch.planned_tool_calls = Some(tool_calls.clone());

    let next = if tool_calls.is_empty() { "generate_answer" } else { route(&tool_calls, false, &state) };
    Ok(NodeOutcome::goto(patch, next))
}
