//! The SQL subgraph. Only entered when a planned call targets a `kind = sql` service
//! and databases are enabled (`analyze_request`/`plan_refined_queries` route here directly).
//! Every branch here is decided by node logic (`next_hint`), not a conditional edge, since the
//! branching depends on the outcome of this node's own LLM/MCP call rather than a pure function
//! of a state field set by a prior node.

use langgraph_core::agent_graph::{NodeError, NodeOutcome};
use llm::Role;
use tooling::mcp::ServiceDescriptor;

use crate::security::SecurityValidator;
use crate::state::{AgentPatch, AgentState, QueryType, SqlError, UnsafeReason};

use super::{extract_json_object, NodeContext};

fn sql_service(state: &AgentState) -> Option<&ServiceDescriptor> {
    state
        .planned_tool_calls
        .iter()
        .find_map(|call| state.discovered_services.get(&call.service_id))
        .filter(|svc| svc.kind == tooling::mcp::ServiceKind::Sql)
        .or_else(|| state.discovered_services.values().find(|svc| svc.kind == tooling::mcp::ServiceKind::Sql))
}

/// `generate_sql` — produce an initial SQL query from the request and the target
/// service's advertised schema.
pub async fn generate_sql(
    ctx: NodeContext,
    state: AgentState,
) -> Result<NodeOutcome<AgentPatch>, NodeError> {
    let Some(service) = sql_service(&state) else {
        let mut patch = AgentPatch::new();
        patch.sql_errors = Some(Some(SqlError::Generation("no SQL service discovered".to_string())));
        return Ok(NodeOutcome::goto(patch, "generate_failure"));
    };

    let system = "Write a single read-only SQL SELECT query answering the user's request, given \
the target database's schema. Respond with a single JSON object: {\"sql\": string}.";
    let user = format!(
        "User request: {}\n\nSchema:\n{}",
        state.user_request,
        serde_json::to_string_pretty(&service.tool_schema).unwrap_or_default()
    );

    let schema = serde_json::json!({"type": "object", "properties": {"sql": {"type": "string"}}});
    let response = ctx
        .llm
        .complete(Role::Sql, system, &user, Some(schema), ctx.llm_call_timeout)
        .await
        .map_err(|e| NodeError::Transient(e.to_string()))?;

    let query = extract_sql(&response);
    let mut patch = AgentPatch::new();
    patch.sql_query = Some(query);
    Ok(NodeOutcome::goto(patch, "validate_sql"))
}

/// `validate_sql` — applies the SQL safety rule ladder. Unsafe routes to `refine_sql`; safe routes to
/// `execute_sql`. The safety gate invariant holds because `execute_sql` is reachable
/// only from this branch.
pub async fn validate_sql(
    ctx: NodeContext,
    state: AgentState,
) -> Result<NodeOutcome<AgentPatch>, NodeError> {
    let schema_hint = sql_service(&state)
        .map(|svc| svc.tool_schema.to_string())
        .unwrap_or_default();

    let llm_check = ctx.llm_sql_check.as_deref();
    let verdict = SecurityValidator::validate_with_llm_check(
        &state.sql_query,
        state.disable_sql_blocking,
        ctx.use_llm_sql_check,
        &schema_hint,
        llm_check,
    )
    .await;

    let mut patch = AgentPatch::new();
    match verdict {
        crate::state::SqlSafety::Safe => {
            patch.sql_errors = Some(None);
            Ok(NodeOutcome::goto(patch, "execute_sql"))
        }
        crate::state::SqlSafety::Unsafe(reason) => {
            patch.sql_errors = Some(Some(SqlError::Validation(reason)));
            Ok(NodeOutcome::goto(patch, "refine_sql"))
        }
    }
}

/// `execute_sql` — submits the validated query. `UndefinedTable`-class errors are
/// recoverable (routes to `refine_sql`); an empty result set routes to `wider_search`; success
/// appends the normalized rows and returns to the main flow at `synthesize`.
pub async fn execute_sql(
    ctx: NodeContext,
    state: AgentState,
) -> Result<NodeOutcome<AgentPatch>, NodeError> {
    let Some(service) = sql_service(&state) else {
        let mut patch = AgentPatch::new();
        patch.sql_errors = Some(Some(SqlError::Execution("no SQL service discovered".to_string())));
        return Ok(NodeOutcome::goto(patch, "generate_failure"));
    };

    let parameters = serde_json::json!({"query": state.sql_query});
    match ctx.mcp.invoke(service, "query", &parameters, ctx.mcp_call_timeout).await {
        Ok(raw) => {
            let rows_empty = raw
                .body
                .get("rows")
                .and_then(|r| r.as_array())
                .map(|rows| rows.is_empty())
                .unwrap_or(false);

            if rows_empty {
                let mut patch = AgentPatch::new();
                patch.sql_errors = Some(None);
                return Ok(NodeOutcome::goto(patch, "wider_search"));
            }

            let documents = crate::normalize::Normalizer::normalize(&raw);
            let mut patch = AgentPatch::new();
            patch.append_tool_results = documents;
            patch.sql_errors = Some(None);
            Ok(NodeOutcome::goto(patch, "synthesize"))
        }
        Err(err) => {
            let message = err.to_string();
            let mut patch = AgentPatch::new();
            if is_recoverable_execution_error(&message) {
                tracing::warn!(error = %message, "recoverable SQL execution error, refining");
                patch.sql_errors = Some(Some(SqlError::Execution(message)));
                Ok(NodeOutcome::goto(patch, "refine_sql"))
            } else {
                patch.sql_errors = Some(Some(SqlError::Execution(message.clone())));
                patch.fatal_error = Some(format!("SQL execution failed: {message}"));
                Ok(NodeOutcome::goto(patch, "generate_failure"))
            }
        }
    }
}

fn is_recoverable_execution_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("undefined table")
        || lower.contains("no such table")
        || lower.contains("does not exist")
        || lower.contains("unknown column")
}

/// `refine_sql` — a new LLM call given the original request, the failing query, the
/// error, and `previous_sql_queries`. Bounded by `ctx.max_sql_retries`.
pub async fn refine_sql(
    ctx: NodeContext,
    state: AgentState,
) -> Result<NodeOutcome<AgentPatch>, NodeError> {
    if state.previous_sql_queries.len() as u32 >= ctx.max_sql_retries {
        let mut patch = AgentPatch::new();
        patch.fatal_error = Some("SQL refinement retry cap reached".to_string());
        return Ok(NodeOutcome::goto(patch, "generate_failure"));
    }

    let error_description = describe_sql_error(&state);
    let history = state.previous_sql_queries.join("\n");
    let system = "The previous SQL query failed or was rejected. Given the original request, the \
failing query, the error, and every query already tried, write a corrected read-only SQL SELECT \
query that avoids repeating a prior attempt. Respond with a single JSON object: {\"sql\": string}.";
    let user = format!(
        "User request: {}\n\nFailing query: {}\n\nError: {}\n\nPreviously tried:\n{}",
        state.user_request, state.sql_query, error_description, history
    );

    let schema = serde_json::json!({"type": "object", "properties": {"sql": {"type": "string"}}});
    let response = ctx
        .llm
        .complete(Role::Sql, system, &user, Some(schema), ctx.llm_call_timeout)
        .await
        .map_err(|e| NodeError::Transient(e.to_string()))?;

    let query = extract_sql(&response);
    let mut patch = AgentPatch::new();
    patch.sql_query = Some(query);
    Ok(NodeOutcome::goto(patch, "validate_sql"))
}

/// `wider_search` — a broader SQL variant, marking `query_type = wider_search`. Bounded
/// by the same retry cap as `refine_sql`.
pub async fn wider_search(
    ctx: NodeContext,
    state: AgentState,
) -> Result<NodeOutcome<AgentPatch>, NodeError> {
    if state.previous_sql_queries.len() as u32 >= ctx.max_sql_retries {
        let mut patch = AgentPatch::new();
        patch.fatal_error = Some("SQL widening retry cap reached".to_string());
        return Ok(NodeOutcome::goto(patch, "generate_failure"));
    }

    let system = "The previous SQL query returned no rows. Given the original request and the \
query that returned nothing, write a broader read-only SQL SELECT query (fewer filters, wider \
ranges) likely to return results. Respond with a single JSON object: {\"sql\": string}.";
    let user = format!(
        "User request: {}\n\nQuery that returned no rows: {}",
        state.user_request, state.sql_query
    );

    let schema = serde_json::json!({"type": "object", "properties": {"sql": {"type": "string"}}});
    let response = ctx
        .llm
        .complete(Role::Sql, system, &user, Some(schema), ctx.llm_call_timeout)
        .await
        .map_err(|e| NodeError::Transient(e.to_string()))?;

    let query = extract_sql(&response);
    let mut patch = AgentPatch::new();
    patch.sql_query = Some(query);
    patch.query_type = Some(QueryType::WiderSearch);
    Ok(NodeOutcome::goto(patch, "validate_sql"))
}

fn extract_sql(response: &llm::LlmResponse) -> String {
    response
        .structured
        .as_ref()
        .and_then(|v| v.get("sql").and_then(|s| s.as_str()).map(str::to_string))
        .or_else(|| extract_json_object(&response.text).and_then(|v| v.get("sql").and_then(|s| s.as_str()).map(str::to_string)))
        .unwrap_or_else(|| response.text.trim().to_string())
}

fn describe_sql_error(state: &AgentState) -> String {
    match &state.sql_errors {
        Some(SqlError::Validation(reason)) => format!("rejected by safety validation: {}", describe_reason(reason)),
        Some(SqlError::Execution(msg)) => msg.clone(),
        Some(SqlError::Generation(msg)) => msg.clone(),
        None => "unknown error".to_string(),
    }
}

fn describe_reason(reason: &UnsafeReason) -> String {
    match reason {
        UnsafeReason::NotReadOnly => "query is not a read-only SELECT/WITH statement".to_string(),
        UnsafeReason::MultiStatement => "query contains multiple statements".to_string(),
        UnsafeReason::Comments => "query contains comment markers".to_string(),
        UnsafeReason::ForbiddenKeyword(kw) => format!("query contains forbidden keyword {kw}"),
        UnsafeReason::InjectionPattern(pattern) => format!("query matches injection pattern {pattern}"),
        UnsafeReason::LlmRejected(reason) => format!("rejected by LLM safety check ({reason})"),
    }
}
