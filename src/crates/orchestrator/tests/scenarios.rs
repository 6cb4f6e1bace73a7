//! End-to-end scenario tests driving `orchestrator::graph::run` against scripted LLM and MCP
//! doubles. Each test exercises one literal scenario: a direct answer with no tools, a single
//! RAG retrieval, mixed search+RAG source aggregation, SQL refinement on an undefined-table
//! error, SQL safety false-positive avoidance end to end, and the step-budget cap.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use llm::{LlmClient, Role};
use tooling::mcp::{McpError, McpTransport, Result as McpResult, ServiceDescriptor};

use common::{minimal_config, rag_service, search_service, sql_service, ScriptedModel, ScriptedTransport};
use orchestrator::state::RequestFlags;

fn answerer_model() -> ScriptedModel {
    ScriptedModel::new(|text: &str| {
        if text.contains("Retrieved context:") {
            r#"{"can_answer": true}"#.to_string()
        } else {
            "That's 4.".to_string()
        }
    })
}

#[tokio::test]
async fn s1_direct_answer_without_tools() {
    let config = minimal_config();
    let mcp_transport = Arc::new(ScriptedTransport::new(vec![]));
    let llm = Arc::new(
        LlmClient::new()
            .with_role(
                Role::Analyzer,
                Arc::new(ScriptedModel::constant(
                    r#"{"is_final_answer_possible_without_tools": true, "tool_calls": []}"#,
                )),
                true,
            )
            .with_role(Role::Answerer, Arc::new(answerer_model()), true),
    );

    let result = orchestrator::graph::run(
        "What is 2 plus 2?",
        RequestFlags::default(),
        &config,
        mcp_transport,
        llm,
        None,
    )
    .await
    .expect("run succeeds");

    assert!(result.tool_results.is_empty());
    assert!(!result.final_answer.is_empty());
    assert!(result.error.is_none());
}

#[tokio::test]
async fn s2_single_rag_retrieval() {
    let config = minimal_config();
    let mcp_transport = Arc::new(
        ScriptedTransport::new(vec![rag_service("rag-server")]).with_response(
            "rag-server",
            "query",
            serde_json::json!({
                "content": "GOST R 52633.3-2011 defines generation forecasting requirements.",
                "metadata": {"filename": "GOST_R_52633.3-2011"},
                "score": 0.9
            }),
        ),
    );
    let llm = Arc::new(
        LlmClient::new()
            .with_role(
                Role::Analyzer,
                Arc::new(ScriptedModel::constant(
                    r#"{"is_final_answer_possible_without_tools": false, "tool_calls": [
                        {"service_id": "rag-server", "action": "query", "parameters": {}}
                    ]}"#,
                )),
                true,
            )
            .with_role(Role::Answerer, Arc::new(answerer_model()), true),
    );

    let flags = RequestFlags { disable_response_stage: true, ..Default::default() };
    let result = orchestrator::graph::run(
        "What does GOST R 52633.3-2011 say about generation forecasting?",
        flags,
        &config,
        mcp_transport,
        llm,
        None,
    )
    .await
    .expect("run succeeds");

    assert_eq!(result.tool_results.len(), 1);
    assert_eq!(result.tool_results[0].source, "GOST_R_52633.3-2011");
    assert!(!result.final_answer.is_empty());
}

#[tokio::test]
async fn s3_mixed_search_and_rag_with_source_aggregation() {
    let config = minimal_config();
    let mcp_transport = Arc::new(
        ScriptedTransport::new(vec![search_service("search-server"), rag_service("rag-server")])
            .with_response(
                "search-server",
                "query",
                serde_json::json!({
                    "results": [
                        {"url": "https://docs.cntd.ru/a", "title": "A", "content": "..."},
                        {"url": "https://cyberleninka.ru/b", "title": "B", "content": "..."}
                    ]
                }),
            )
            .with_response(
                "rag-server",
                "query",
                serde_json::json!({
                    "content": "generation forecasting chunk",
                    "metadata": {"source": "GOST_R_52633.3-2011"}
                }),
            ),
    );
    let llm = Arc::new(
        LlmClient::new()
            .with_role(
                Role::Analyzer,
                Arc::new(ScriptedModel::constant(
                    r#"{"is_final_answer_possible_without_tools": false, "tool_calls": [
                        {"service_id": "search-server", "action": "query", "parameters": {}},
                        {"service_id": "rag-server", "action": "query", "parameters": {}}
                    ]}"#,
                )),
                true,
            )
            .with_role(Role::Answerer, Arc::new(answerer_model()), true),
    );

    let flags = RequestFlags { disable_response_stage: true, ..Default::default() };
    let result = orchestrator::graph::run(
        "Summarize what these sources say about generation forecasting.",
        flags,
        &config,
        mcp_transport,
        llm,
        None,
    )
    .await
    .expect("run succeeds");

    assert_eq!(result.tool_results.len(), 2);
    let search_doc = result.tool_results.iter().find(|d| d.source.starts_with("search:")).unwrap();
    assert_eq!(search_doc.source, "search: cyberleninka.ru, docs.cntd.ru");
    assert!(result.tool_results.iter().any(|d| d.source == "GOST_R_52633.3-2011"));
    assert!(result.final_answer.contains("search: cyberleninka.ru, docs.cntd.ru"));
    assert!(result.final_answer.contains("GOST_R_52633.3-2011"));
}

/// Fails the first SQL invocation with an undefined-table error, then succeeds, so the SQL
/// subgraph's refinement branch runs exactly once before the main flow resumes.
struct FlakySqlTransport {
    services: Vec<ServiceDescriptor>,
    calls: AtomicUsize,
}

#[async_trait]
impl McpTransport for FlakySqlTransport {
    async fn discover(&self, _registry_url: &str) -> McpResult<Vec<ServiceDescriptor>> {
        Ok(self.services.clone())
    }

    async fn invoke(
        &self,
        service: &ServiceDescriptor,
        _action: &str,
        parameters: &serde_json::Value,
    ) -> McpResult<serde_json::Value> {
        let call_index = self.calls.fetch_add(1, Ordering::SeqCst);
        if call_index == 0 {
            Err(McpError::ToolError {
                service_id: service.id.clone(),
                message: "undefined table \"contacts\"".to_string(),
            })
        } else {
            Ok(serde_json::json!({
                "query": parameters.get("query").cloned().unwrap_or_default(),
                "table": "contacts",
                "rows": [{"id": 1, "name": "Alice"}]
            }))
        }
    }
}

fn sql_model() -> ScriptedModel {
    ScriptedModel::new(|text: &str| {
        if text.contains("Failing query:") {
            r#"{"sql": "SELECT * FROM contacts WHERE id = 1"}"#.to_string()
        } else {
            r#"{"sql": "SELECT * FROM contacts"}"#.to_string()
        }
    })
}

#[tokio::test]
async fn s4_sql_refinement_on_undefined_table() {
    let config = minimal_config();
    let mcp_transport =
        Arc::new(FlakySqlTransport { services: vec![sql_service("sql-server")], calls: AtomicUsize::new(0) });
    let llm = Arc::new(
        LlmClient::new()
            .with_role(
                Role::Analyzer,
                Arc::new(ScriptedModel::constant(
                    r#"{"is_final_answer_possible_without_tools": false, "tool_calls": [
                        {"service_id": "sql-server", "action": "query", "parameters": {}}
                    ]}"#,
                )),
                true,
            )
            .with_role(Role::Sql, Arc::new(sql_model()), true)
            .with_role(Role::Answerer, Arc::new(answerer_model()), true),
    );

    let flags = RequestFlags { disable_response_stage: true, ..Default::default() };
    let result = orchestrator::graph::run(
        "List the contacts named Alice.",
        flags,
        &config,
        mcp_transport,
        llm,
        None,
    )
    .await
    .expect("run succeeds");

    let visited: Vec<&str> = result.visited_nodes.iter().map(|v| v.node_id.as_str()).collect();
    assert_eq!(visited.iter().filter(|&&n| n == "execute_sql").count(), 2);
    assert_eq!(visited.iter().filter(|&&n| n == "refine_sql").count(), 1);
    assert!(!visited.contains(&"generate_failure"));
    assert!(!result.tool_results.is_empty());
    assert!(result.error.is_none());
}

#[tokio::test]
async fn s5_sql_safety_false_positive_avoidance_end_to_end() {
    let config = minimal_config();
    let mcp_transport = Arc::new(
        ScriptedTransport::new(vec![sql_service("sql-server")]).with_response(
            "sql-server",
            "query",
            serde_json::json!({"table": "users", "rows": [{"id": 1, "created_at": "2024-01-01"}]}),
        ),
    );
    let llm = Arc::new(
        LlmClient::new()
            .with_role(
                Role::Analyzer,
                Arc::new(ScriptedModel::constant(
                    r#"{"is_final_answer_possible_without_tools": false, "tool_calls": [
                        {"service_id": "sql-server", "action": "query", "parameters": {}}
                    ]}"#,
                )),
                true,
            )
            .with_role(
                Role::Sql,
                Arc::new(ScriptedModel::constant(
                    r#"{"sql": "SELECT created_at FROM users WHERE id = 1;"}"#,
                )),
                true,
            )
            .with_role(Role::Answerer, Arc::new(answerer_model()), true),
    );

    let flags = RequestFlags { disable_response_stage: true, ..Default::default() };
    let result = orchestrator::graph::run(
        "When was user 1 created?",
        flags,
        &config,
        mcp_transport,
        llm,
        None,
    )
    .await
    .expect("run succeeds");

    let visited: Vec<&str> = result.visited_nodes.iter().map(|v| v.node_id.as_str()).collect();
    assert!(visited.contains(&"execute_sql"));
    assert!(!visited.contains(&"refine_sql"));
    assert!(!result.tool_results.is_empty());
}

#[tokio::test]
async fn s6_step_budget_cap() {
    let config = minimal_config();
    let mcp_transport = Arc::new(
        ScriptedTransport::new(vec![rag_service("rag-server")]).with_response(
            "rag-server",
            "query",
            serde_json::json!({"content": "some content", "metadata": {"source": "doc-1"}}),
        ),
    );
    let llm = Arc::new(LlmClient::new().with_role(
        Role::Analyzer,
        Arc::new(ScriptedModel::constant(
            r#"{"is_final_answer_possible_without_tools": false, "tool_calls": [
                {"service_id": "rag-server", "action": "query", "parameters": {}}
            ]}"#,
        )),
        true,
    ));

    let flags = RequestFlags {
        max_steps: Some(5),
        disable_response_stage: true,
        ..Default::default()
    };
    let result = orchestrator::graph::run("Tell me about doc 1.", flags, &config, mcp_transport, llm, None)
        .await
        .expect("run succeeds");

    assert_eq!(result.visited_nodes.len(), 5);
    assert!(result.final_answer.contains("step budget exhausted"));
    assert!(result.error.is_none());
}
