//! The terminal success path: one LLM call turning `synthesized_context` plus
//! `user_request` into `final_answer`.

use langgraph_core::agent_graph::{NodeError, NodeOutcome, END};

use crate::state::{AgentPatch, AgentState};

use super::NodeContext;

const SYSTEM_PROMPT: &str = "Answer the user's request using the provided context. If the \
context is empty, answer from general knowledge and say so plainly. Be direct and concise.";

pub async fn generate_answer(
    ctx: NodeContext,
    state: AgentState,
) -> Result<NodeOutcome<AgentPatch>, NodeError> {
    let user_prompt = if state.synthesized_context.is_empty() {
        state.user_request.clone()
    } else {
        format!("User request: {}\n\nContext:\n{}", state.user_request, state.synthesized_context)
    };

    let response = ctx
        .llm
        .complete(llm::Role::Answerer, SYSTEM_PROMPT, &user_prompt, None, ctx.llm_call_timeout)
        .await
        .map_err(|e| NodeError::Transient(e.to_string()))?;

    let mut patch = AgentPatch::new();
    patch.final_answer = Some(response.text);
    Ok(NodeOutcome::goto(patch, END))
}
