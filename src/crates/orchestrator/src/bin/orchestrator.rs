//! Command-line entry point for the orchestration core.
//!
//! Loads configuration, wires the MCP and LLM clients, runs one request through the graph, and
//! prints the resulting answer. Logging is the only thing that talks to stdout/stderr besides
//! the final answer itself; everything else goes through `tracing`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use orchestrator::agent_config::Config;
use orchestrator::provider::{build_llm_client, ClientBackedSqlCheck};
use orchestrator::security::LlmSqlCheck;
use orchestrator::state::RequestFlags;
use tooling::mcp::HttpTransport;
use tracing::info;

/// Runs a single request through the RAG agent orchestration core.
#[derive(Parser, Debug)]
#[command(name = "orchestrator")]
#[command(about = "Runs a user request through the agent orchestration graph", long_about = None)]
struct Args {
    /// The user request to answer.
    #[arg(value_name = "REQUEST")]
    request: String,

    /// Path to a YAML configuration file, deep-merged over compiled-in defaults.
    #[arg(short, long, default_value = "orchestrator.yaml", env = "ORCHESTRATOR_CONFIG")]
    config: PathBuf,

    /// Skip the SQL safety rule ladder entirely. Dangerous; for trusted environments only.
    #[arg(long, env = "ORCHESTRATOR_DISABLE_SQL_BLOCKING")]
    disable_sql_blocking: bool,

    /// Never route into the SQL subgraph, regardless of discovered services.
    #[arg(long, env = "ORCHESTRATOR_DISABLE_DATABASES")]
    disable_databases: bool,

    /// Skip the `analyze_request` planning call.
    #[arg(long, env = "ORCHESTRATOR_DISABLE_PROMPT_STAGE")]
    disable_prompt_stage: bool,

    /// Skip the `synthesize` LLM summarization pass; concatenate retrieved documents instead.
    #[arg(long, env = "ORCHESTRATOR_DISABLE_RESPONSE_STAGE")]
    disable_response_stage: bool,

    /// Always feed raw MCP responses to the LLM even when the response stage is disabled.
    #[arg(long, env = "ORCHESTRATOR_RETURN_MCP_RESPONSE_TO_LLM")]
    return_mcp_response_to_llm: bool,

    /// Override `iteration.max_iterations` from configuration.
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Override `iteration.max_steps` from configuration.
    #[arg(long)]
    max_steps: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)?;

    init_tracing(&config.logging);

    info!(request = %args.request, config = %args.config.display(), "starting run");

    let flags = RequestFlags {
        disable_sql_blocking: args.disable_sql_blocking,
        disable_databases: args.disable_databases,
        disable_prompt_stage: args.disable_prompt_stage,
        disable_response_stage: args.disable_response_stage,
        return_mcp_response_to_llm: args.return_mcp_response_to_llm,
        max_iterations: args.max_iterations,
        max_steps: args.max_steps,
    };

    let mcp_transport = Arc::new(HttpTransport::new());
    let llm_client = Arc::new(build_llm_client(&config)?);
    let llm_sql_check: Option<Arc<dyn LlmSqlCheck>> = if config.security.use_llm_check {
        Some(Arc::new(ClientBackedSqlCheck::new(llm_client.clone(), Duration::from_secs(60))))
    } else {
        None
    };

    let result =
        orchestrator::graph::run(args.request, flags, &config, mcp_transport, llm_client, llm_sql_check)
            .await?;

    for visit in &result.visited_nodes {
        info!(node = %visit.node_id, duration_ms = visit.duration.as_millis(), "visited");
    }
    if let Some(error) = &result.error {
        info!(error = %error, "run completed with a recorded error");
    }

    println!("{}", result.final_answer);
    Ok(())
}

fn init_tracing(logging: &orchestrator::agent_config::LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(logging.level.clone()));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.compact().init();
    }
}
