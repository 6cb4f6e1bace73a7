//! Queries the MCP registry exactly once per run. A dead registry does not fail the
//! node; it routes straight to `generate_answer` with a degraded-mode explanation, since no
//! tool-backed path is reachable regardless of what `analyze_request` would have planned.

use std::collections::HashMap;

use langgraph_core::agent_graph::{NodeError, NodeOutcome};

use crate::state::{AgentPatch, AgentState};

use super::NodeContext;

#[tracing::instrument(skip(ctx, _state))]
pub async fn discover_services(
    ctx: NodeContext,
    _state: AgentState,
) -> Result<NodeOutcome<AgentPatch>, NodeError> {
    match ctx.mcp.discover().await {
        Ok(services) => {
            let mut patch = AgentPatch::new();
            patch.discovered_services = Some(services);
            Ok(NodeOutcome::goto(patch, "analyze_request"))
        }
        Err(err) => {
            tracing::warn!(error = %err, "service registry unreachable, degrading to direct answer");
            let mut patch = AgentPatch::new();
            patch.discovered_services = Some(HashMap::new());
            patch.synthesized_context = Some(format!(
                "Tool services are currently unavailable ({err}). Answer using general knowledge only, and say so."
            ));
            Ok(NodeOutcome::goto(patch, "generate_answer"))
        }
    }
}
