//! Turns accumulated `tool_results` into `synthesized_context`. Pure concatenation by
//! default (stable, citable, free); an LLM summarization pass when the response stage is
//! enabled, or unconditionally when `return_mcp_response_to_llm` is set.

use langgraph_core::agent_graph::{NodeError, NodeOutcome};
use llm::Role;

use crate::state::{AgentPatch, AgentState, NormalizedDocument};

use super::NodeContext;

const SYSTEM_PROMPT: &str = "Summarize the following retrieved documents into a concise context \
useful for answering the user's request. Preserve citations to each document by number.";

pub async fn synthesize(
    ctx: NodeContext,
    state: AgentState,
) -> Result<NodeOutcome<AgentPatch>, NodeError> {
    let cited = cite_documents(&state.tool_results);

    let context = if state.disable_response_stage && !state.return_mcp_response_to_llm {
        cited
    } else {
        let user_prompt = format!(
            "User request: {}\n\nRetrieved documents:\n{}",
            state.user_request, cited
        );
        let response = ctx
            .llm
            .complete(Role::Synthesizer, SYSTEM_PROMPT, &user_prompt, None, ctx.llm_call_timeout)
            .await
            .map_err(|e| NodeError::Transient(e.to_string()))?;
        response.text
    };

    let mut patch = AgentPatch::new();
    patch.synthesized_context = Some(context);
    Ok(NodeOutcome::goto(patch, "capability_check"))
}

/// `"Document N (<source>): <content>"`, one per line, in `tool_results` order.
fn cite_documents(documents: &[NormalizedDocument]) -> String {
    documents
        .iter()
        .enumerate()
        .map(|(i, doc)| format!("Document {} ({}): {}", i + 1, doc.source, doc.content))
        .collect::<Vec<_>>()
        .join("\n")
}
