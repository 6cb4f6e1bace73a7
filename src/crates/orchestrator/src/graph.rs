//! Assembles the node set into a [`langgraph_core::agent_graph::Graph`] and exposes the
//! single inbound entry point, `Run`.

use std::sync::Arc;
use std::time::Duration;

use langgraph_core::agent_graph::{Graph, END};
use llm::LlmClient;
use tooling::mcp::McpClient;

use crate::agent_config::Config;
use crate::error::OrchestratorError;
use crate::nodes::{self, NodeContext};
use crate::security::LlmSqlCheck;
use crate::state::{AgentState, FinalResult, RequestFlags};

/// Builds the graph wired exactly per the node set's state machine summary, including the SQL
/// subgraph's node-driven branches.
fn build_graph(ctx: NodeContext) -> Graph<AgentState> {
    let mut graph: Graph<AgentState> = Graph::new().with_default_node_timeout(Duration::from_secs(600));

    graph.register_node("initialize", |state| nodes::initialize(state));

    let c = ctx.clone();
    graph.register_node("discover_services", move |state| {
        let c = c.clone();
        async move { nodes::discover_services(c, state).await }
    });

    let c = ctx.clone();
    graph.register_node("analyze_request", move |state| {
        let c = c.clone();
        async move { nodes::analyze_request(c, state).await }
    });

    let c = ctx.clone();
    graph.register_node("execute_tool_calls", move |state| {
        let c = c.clone();
        async move { nodes::execute_tool_calls(c, state).await }
    });

    let c = ctx.clone();
    graph.register_node("synthesize", move |state| {
        let c = c.clone();
        async move { nodes::synthesize(c, state).await }
    });

    let c = ctx.clone();
    graph.register_node("capability_check", move |state| {
        let c = c.clone();
        async move { nodes::capability_check(c, state).await }
    });

    let c = ctx.clone();
    graph.register_node("plan_refined_queries", move |state| {
        let c = c.clone();
        async move { nodes::plan_refined_queries(c, state).await }
    });

    let c = ctx.clone();
    graph.register_node("generate_sql", move |state| {
        let c = c.clone();
        async move { nodes::generate_sql(c, state).await }
    });

    let c = ctx.clone();
    graph.register_node("validate_sql", move |state| {
        let c = c.clone();
        async move { nodes::validate_sql(c, state).await }
    });

    let c = ctx.clone();
    graph.register_node("execute_sql", move |state| {
        let c = c.clone();
        async move { nodes::execute_sql(c, state).await }
    });

    let c = ctx.clone();
    graph.register_node("refine_sql", move |state| {
        let c = c.clone();
        async move { nodes::refine_sql(c, state).await }
    });

    let c = ctx.clone();
    graph.register_node("wider_search", move |state| {
        let c = c.clone();
        async move { nodes::wider_search(c, state).await }
    });

    let c = ctx.clone();
    graph.register_node("generate_answer", move |state| {
        let c = c.clone();
        async move { nodes::generate_answer(c, state).await }
    });

    graph.register_node("generate_failure", |state| nodes::generate_failure(state));

    // `initialize` always proceeds to discovery; every other edge is resolved by the node's own
    // `next_hint` since the SQL subgraph and the main flow's routing both
    // depend on this call's own outcome rather than a state field set by a prior node.
    graph.add_edge("initialize", "discover_services");
    graph.set_entry("initialize");
    graph.set_terminal(END);

    graph
}

/// Constructs the per-run collaborators (the MCP/LLM clients are owned
/// for the request lifetime, not globally).
pub fn build_node_context(
    config: &Config,
    mcp_transport: Arc<dyn tooling::mcp::McpTransport>,
    llm_client: Arc<LlmClient>,
    llm_sql_check: Option<Arc<dyn LlmSqlCheck>>,
) -> NodeContext {
    let mcp = Arc::new(
        McpClient::new(mcp_transport, config.mcp.registry_url.clone())
            .with_concurrency(config.mcp.concurrency),
    );

    NodeContext {
        mcp,
        llm: llm_client,
        llm_sql_check,
        mcp_call_timeout: Duration::from_secs(config.mcp.call_timeout_seconds),
        llm_call_timeout: Duration::from_secs(600),
        use_llm_sql_check: config.security.use_llm_check,
        max_sql_retries: 3,
    }
}

/// The core's single inbound entry point: `Run(user_request, flags, config) →
/// FinalResult`.
pub async fn run(
    user_request: impl Into<String>,
    flags: RequestFlags,
    config: &Config,
    mcp_transport: Arc<dyn tooling::mcp::McpTransport>,
    llm_client: Arc<LlmClient>,
    llm_sql_check: Option<Arc<dyn LlmSqlCheck>>,
) -> Result<FinalResult, OrchestratorError> {
    let mut flags = flags;
    if flags.max_iterations.is_none() {
        flags.max_iterations = Some(config.iteration.max_iterations);
    }
    if flags.max_steps.is_none() {
        flags.max_steps = Some(config.iteration.max_steps);
    }
    if !flags.disable_databases {
        flags.disable_databases = config.features.disable_databases;
    }
    if !flags.disable_prompt_stage {
        flags.disable_prompt_stage = config.features.disable_prompt_stage;
    }
    if !flags.disable_response_stage {
        flags.disable_response_stage = config.features.disable_response_stage;
    }
    if !flags.disable_sql_blocking {
        flags.disable_sql_blocking = config.security.disable_sql_blocking;
    }
    if !flags.return_mcp_response_to_llm {
        flags.return_mcp_response_to_llm = config.features.return_mcp_response_to_llm;
    }

    let ctx = build_node_context(config, mcp_transport, llm_client, llm_sql_check);
    let graph = build_graph(ctx);

    let state = AgentState::new(user_request, flags);
    let final_state = graph.run(state).await?;
    Ok(FinalResult::from(final_state))
}
