//! Seeds the run. The fields it clears are already zeroed by `AgentState::new`; this
//! node exists as an explicit graph entry point so the node set's state machine summary has a
//! single, always-present starting node, independent of how the caller constructed `AgentState`.

use langgraph_core::agent_graph::{NodeError, NodeOutcome};

use crate::state::{AgentPatch, AgentState};

pub async fn initialize(_state: AgentState) -> Result<NodeOutcome<AgentPatch>, NodeError> {
    Ok(NodeOutcome::new(AgentPatch::new()))
}
