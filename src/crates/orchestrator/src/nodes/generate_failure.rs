//! Deterministic, no LLM call: a terse textual failure message referencing exhausted
//! iterations and any recorded error.

use langgraph_core::agent_graph::{NodeError, NodeOutcome, END};

use crate::state::{AgentPatch, AgentState};

pub async fn generate_failure(state: AgentState) -> Result<NodeOutcome<AgentPatch>, NodeError> {
    let error_detail = state
        .fatal_error
        .clone()
        .or_else(|| state.sql_errors.as_ref().map(|e| format!("{e:?}")))
        .unwrap_or_else(|| "no further information available".to_string());

    let message = format!(
        "Unable to produce a complete answer after {} of {} iteration(s). Last recorded issue: {error_detail}.",
        state.iteration_count, state.max_iterations
    );

    let mut patch = AgentPatch::new();
    patch.final_answer = Some(message);
    Ok(NodeOutcome::goto(patch, END))
}
