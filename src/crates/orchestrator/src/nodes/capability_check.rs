//! One LLM call deciding whether `synthesized_context` is sufficient to answer
//! `user_request`. Routes via `next_hint`: the iteration-budget check that decides between
//! `plan_refined_queries` and `generate_failure` reads state the node already has (no increment
//! happens unless this node is about to take the refinement branch), so the decision and the
//! bookkeeping are made together rather than split across a conditional edge.

use langgraph_core::agent_graph::{NodeError, NodeOutcome};
use llm::Role;

use crate::state::{AgentPatch, AgentState, CanAnswer};

use super::{extract_json_object, NodeContext};

const SYSTEM_PROMPT: &str = "Given the user's request and the retrieved context, decide whether \
the context is sufficient to produce a complete, accurate answer. Respond with a single JSON \
object: {\"can_answer\": bool}.";

pub async fn capability_check(
    ctx: NodeContext,
    state: AgentState,
) -> Result<NodeOutcome<AgentPatch>, NodeError> {
    let user_prompt = format!(
        "User request: {}\n\nRetrieved context:\n{}",
        state.user_request, state.synthesized_context
    );

    let schema = serde_json::json!({
        "type": "object",
        "properties": {"can_answer": {"type": "boolean"}}
    });

    let response = ctx
        .llm
        .complete(Role::Answerer, SYSTEM_PROMPT, &user_prompt, Some(schema), ctx.llm_call_timeout)
        .await
        .map_err(|e| NodeError::Transient(e.to_string()))?;

    let can_answer_yes = response
        .structured
        .or_else(|| extract_json_object(&response.text))
        .and_then(|v| v.get("can_answer").and_then(|b| b.as_bool()))
        .unwrap_or(!state.tool_results.is_empty());

    let mut patch = AgentPatch::new();
    if can_answer_yes {
        patch.can_answer = Some(CanAnswer::Yes);
        return Ok(NodeOutcome::goto(patch, "generate_answer"));
    }

    patch.can_answer = Some(CanAnswer::No);
    if !state.budget_exhausted() {
        patch.increment_iteration = true;
        Ok(NodeOutcome::goto(patch, "plan_refined_queries"))
    } else {
        Ok(NodeOutcome::goto(patch, "generate_failure"))
    }
}
