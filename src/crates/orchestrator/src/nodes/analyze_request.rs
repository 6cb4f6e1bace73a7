//! One LLM call that grounds candidate tool invocations in `discovered_services` and
//! decides whether the request is directly answerable without them.

use langgraph_core::agent_graph::{NodeError, NodeOutcome};
use llm::Role;
use tooling::mcp::ServiceKind;

use crate::state::{AgentPatch, AgentState, ToolCall};

use super::{extract_json_object, NodeContext};

const SYSTEM_PROMPT: &str = "You are the planning stage of a retrieval-augmented assistant. \
Given a user request and the list of available tool services, decide whether the request can be \
answered directly from general knowledge, or whether one or more tool calls are needed first. \
Respond with a single JSON object: \
{\"is_final_answer_possible_without_tools\": bool, \"tool_calls\": [{\"service_id\": string, \"action\": string, \"parameters\": object}]}. \
Only reference service_id values that appear in the provided service list. If no tools are needed, \
tool_calls must be an empty array.";

pub async fn analyze_request(
    ctx: NodeContext,
    state: AgentState,
) -> Result<NodeOutcome<AgentPatch>, NodeError> {
    if state.disable_prompt_stage {
        return Ok(skip_planning_call(&state));
    }

    let services_description = describe_services(&state);
    let user_prompt = format!(
        "User request: {}\n\nAvailable services:\n{}",
        state.user_request, services_description
    );

    let schema = serde_json::json!({
        "type": "object",
        "properties": {
            "is_final_answer_possible_without_tools": {"type": "boolean"},
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

    let (can_answer_directly, tool_calls) = match parsed {
        Some(value) => {
            let can_answer_directly = value
                .get("is_final_answer_possible_without_tools")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let tool_calls = parse_tool_calls(&value, &state);
            (can_answer_directly, tool_calls)
        }
        None => (true, Vec::new()),
    };

    let mut patch = AgentPatch::new();
    patch.is_final_answer_possible_without_tools = Some(can_answer_directly && tool_calls.is_empty());
    patch.planned_tool_calls = Some(tool_calls.clone());

    let next = route(&tool_calls, can_answer_directly, &state);
    Ok(NodeOutcome::goto(patch, next))
}

/// `disable_prompt_stage`'s skip path: no LLM call, so there is no judgment to ground a
/// `tool_calls` selection in. Plan one call per discovered service, passing the raw request
/// through as the query, and let `route` send the run into the fan-out (or straight to
/// `generate_answer` when nothing was discovered).
fn skip_planning_call(state: &AgentState) -> NodeOutcome<AgentPatch> {
    let tool_calls: Vec<ToolCall> = state
        .discovered_services
        .keys()
        .map(|service_id| ToolCall {
            service_id: service_id.clone(),
            action: "query".to_string(),
            parameters: serde_json::json!({ "query": state.user_request }),
        })
        .collect();
    let can_answer_directly = tool_calls.is_empty();

    let mut patch = AgentPatch::new();
    patch.is_final_answer_possible_without_tools = Some(can_answer_directly);
    patch.planned_tool_calls = Some(tool_calls.clone());

    let next = route(&tool_calls, can_answer_directly, state);
    NodeOutcome::goto(patch, next)
}

/// Shared by `analyze_request` and `plan_refined_queries`: picks the successor among
/// `execute_tool_calls`, `generate_sql`, `generate_answer`, and `generate_failure`. A planned
/// call targeting a `kind = sql` service routes into the SQL subgraph
/// instead of the generic fan-out, unless databases are disabled for this request.
pub fn route(tool_calls: &[ToolCall], can_answer_directly: bool, state: &AgentState) -> &'static str {
    if tool_calls.is_empty() {
        return if can_answer_directly { "generate_answer" } else { "generate_failure" };
    }
    if !state.disable_databases && targets_sql(tool_calls, state) {
        "generate_sql"
    } else {
        "execute_tool_calls"
    }
}

fn targets_sql(tool_calls: &[ToolCall], state: &AgentState) -> bool {
    tool_calls.iter().any(|call| {
        state
            .discovered_services
            .get(&call.service_id)
            .map(|svc| svc.kind == ServiceKind::Sql)
            .unwrap_or(false)
    })
}

fn parse_tool_calls(value: &serde_json::Value, state: &AgentState) -> Vec<ToolCall> {
    value
        .get("tool_calls")
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
                    Some(ToolCall { service_id, action, parameters })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn describe_services(state: &AgentState) -> String {
    if state.discovered_services.is_empty() {
        return "(none available)".to_string();
    }
    state
        .discovered_services
        .values()
        .map(|svc| format!("- {} (kind={:?})", svc.id, svc.kind))
        .collect::<Vec<_>>()
        .join("\n")
}
