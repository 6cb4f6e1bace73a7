//! [`AgentState`] — the single record threaded through every node of the agent graph.
//!
//! The driver ([`langgraph_core::agent_graph::Graph`]) owns this value for the lifetime of a
//! run. Nodes never see `&mut AgentState`; they receive a read-only clone and return an
//! [`AgentPatch`] the driver merges via [`GraphState::merge`]. This keeps every branching
//! decision reproducible from a state snapshot and lets node logic be unit-tested in
//! isolation, without a running graph.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use langgraph_core::agent_graph::GraphState;
use serde::{Deserialize, Serialize};

use tooling::mcp::ServiceDescriptor;

/// A `(service_id, action, parameters)` triple addressed to a specific MCP service.
pub type ToolCall = tooling::mcp::ToolCall;

/// The unified schema every MCP result is reshaped into. The sole format downstream
/// nodes consume — no node reads a raw service-specific body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedDocument {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    pub source: String,
    pub source_type: SourceType,
    pub relevance_score: Option<f64>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub summary: Option<String>,
    pub full_content_available: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    WebSearch,
    LocalDocument,
    DownloadResult,
    SqlRow,
    DnsRecord,
    Other,
}

/// The three-way outcome of `validate_sql`: `disable_sql_blocking` always yields
/// `Safe` and rule 2/3/4 rejections are never overridden by the LLM check.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlSafety {
    Safe,
    Unsafe(UnsafeReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsafeReason {
    NotReadOnly,
    MultiStatement,
    Comments,
    ForbiddenKeyword(String),
    InjectionPattern(String),
    LlmRejected(String),
}

/// `AgentState.sql_errors` — tagged union over the three ways a SQL attempt can fail.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlError {
    Validation(UnsafeReason),
    Execution(String),
    Generation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    #[default]
    Initial,
    WiderSearch,
    Refined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CanAnswer {
    #[default]
    Unknown,
    Yes,
    No,
}

/// Request-scoped flags from `RequestFlags`, folded into `AgentState` at `initialize`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestFlags {
    pub disable_sql_blocking: bool,
    pub disable_databases: bool,
    pub disable_prompt_stage: bool,
    pub disable_response_stage: bool,
    pub return_mcp_response_to_llm: bool,
    pub max_iterations: Option<u32>,
    pub max_steps: Option<u32>,
}

/// A `{node_id, started_at, duration}` record the driver appends on every dispatch,
/// independent of node logic, so `FinalResult` can report a timing log for free.
#[derive(Debug, Clone)]
pub struct VisitedNode {
    pub node_id: String,
    pub started_at: Instant,
    pub duration: Duration,
}

/// The single record threaded through the graph.
#[derive(Debug, Clone)]
pub struct AgentState {
    pub user_request: String,

    pub iteration_count: u32,
    pub max_iterations: u32,
    pub step_count: u32,
    pub max_steps: u32,

    pub discovered_services: HashMap<String, ServiceDescriptor>,
    pub services_discovered: bool,

    pub planned_tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<NormalizedDocument>,

    pub previous_sql_queries: Vec<String>,
    pub sql_query: String,
    pub sql_errors: Option<SqlError>,
    pub query_type: QueryType,

    pub synthesized_context: String,
    pub can_answer: CanAnswer,
    pub final_answer: String,

    pub disable_sql_blocking: bool,
    pub disable_databases: bool,
    pub disable_prompt_stage: bool,
    pub disable_response_stage: bool,
    pub return_mcp_response_to_llm: bool,

    pub retry_counts: HashMap<String, u32>,
    pub visited_nodes: Vec<VisitedNode>,
    pub fatal_error: Option<String>,

    /// Set by `analyze_request` / `plan_refined_queries`: true once tool planning concluded
    /// that no tools are needed and the request is directly answerable.
    pub is_final_answer_possible_without_tools: bool,
}

impl AgentState {
    pub fn new(user_request: impl Into<String>, flags: RequestFlags) -> Self {
        Self {
            user_request: user_request.into(),
            iteration_count: 0,
            max_iterations: flags.max_iterations.unwrap_or(3),
            step_count: 0,
            max_steps: flags.max_steps.unwrap_or(30),
            discovered_services: HashMap::new(),
            services_discovered: false,
            planned_tool_calls: Vec::new(),
            tool_results: Vec::new(),
            previous_sql_queries: Vec::new(),
            sql_query: String::new(),
            sql_errors: None,
            query_type: QueryType::Initial,
            synthesized_context: String::new(),
            can_answer: CanAnswer::Unknown,
            final_answer: String::new(),
            disable_sql_blocking: flags.disable_sql_blocking,
            disable_databases: flags.disable_databases,
            disable_prompt_stage: flags.disable_prompt_stage,
            disable_response_stage: flags.disable_response_stage,
            return_mcp_response_to_llm: flags.return_mcp_response_to_llm,
            retry_counts: HashMap::new(),
            visited_nodes: Vec::new(),
            fatal_error: None,
            is_final_answer_possible_without_tools: false,
        }
    }

    /// Append `query` to the history iff it is non-empty and distinct from the last entry
    /// (the history-monotonicity invariant: strictly growing, never an empty string).
    pub fn push_sql_query(&mut self, query: String) {
        if query.is_empty() {
            return;
        }
        if self.previous_sql_queries.last() != Some(&query) {
            self.previous_sql_queries.push(query.clone());
        }
        self.sql_query = query;
    }

    pub fn budget_exhausted(&self) -> bool {
        self.iteration_count >= self.max_iterations
    }
}

/// The delta a node returns; the driver merges it into `AgentState` field by field
/// ownership rule: nodes never mutate state in place or share mutable references).
#[derive(Debug, Clone, Default)]
pub struct AgentPatch {
    pub discovered_services: Option<HashMap<String, ServiceDescriptor>>,
    pub planned_tool_calls: Option<Vec<ToolCall>>,
    pub append_tool_results: Vec<NormalizedDocument>,
    pub sql_query: Option<String>,
    pub sql_errors: Option<Option<SqlError>>,
    pub query_type: Option<QueryType>,
    pub synthesized_context: Option<String>,
    pub can_answer: Option<CanAnswer>,
    pub final_answer: Option<String>,
    pub increment_iteration: bool,
    pub is_final_answer_possible_without_tools: Option<bool>,
    pub fatal_error: Option<String>,
}

impl AgentPatch {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GraphState for AgentState {
    type Patch = AgentPatch;

    fn merge(&mut self, patch: AgentPatch) {
        if let Some(services) = patch.discovered_services {
            self.discovered_services = services;
            self.services_discovered = true;
        }
        if let Some(calls) = patch.planned_tool_calls {
            self.planned_tool_calls = calls;
        }
        self.tool_results.extend(patch.append_tool_results);
        if let Some(query) = patch.sql_query {
            self.push_sql_query(query);
        }
        if let Some(errors) = patch.sql_errors {
            self.sql_errors = errors;
        }
        if let Some(query_type) = patch.query_type {
            self.query_type = query_type;
        }
        if let Some(context) = patch.synthesized_context {
            self.synthesized_context = context;
        }
        if let Some(can_answer) = patch.can_answer {
            self.can_answer = can_answer;
        }
        if let Some(answer) = patch.final_answer {
            self.final_answer = answer;
        }
        if patch.increment_iteration {
            self.iteration_count += 1;
        }
        if let Some(flag) = patch.is_final_answer_possible_without_tools {
            self.is_final_answer_possible_without_tools = flag;
        }
        if let Some(fatal) = patch.fatal_error {
            self.fatal_error = Some(fatal);
        }
    }

    fn step_count(&self) -> u32 {
        self.step_count
    }

    fn increment_step(&mut self) {
        self.step_count += 1;
    }

    fn max_steps(&self) -> u32 {
        self.max_steps
    }

    fn retry_count(&self, node: &str) -> u32 {
        *self.retry_counts.get(node).unwrap_or(&0)
    }

    fn increment_retry(&mut self, node: &str) {
        *self.retry_counts.entry(node.to_string()).or_insert(0) += 1;
    }

    fn record_visit(&mut self, node: &str, started_at: Instant, duration: Duration) {
        self.visited_nodes.push(VisitedNode { node_id: node.to_string(), started_at, duration });
    }

    fn mark_budget_exhausted(&mut self, message: String) {
        if self.final_answer.is_empty() {
            self.final_answer = message;
        }
    }
}

/// What `Run` hands back to the caller.
#[derive(Debug, Clone)]
pub struct FinalResult {
    pub final_answer: String,
    pub visited_nodes: Vec<VisitedNode>,
    pub tool_results: Vec<NormalizedDocument>,
    pub error: Option<String>,
}

impl From<AgentState> for FinalResult {
    fn from(state: AgentState) -> Self {
        Self {
            final_answer: state.final_answer,
            visited_nodes: state.visited_nodes,
            tool_results: state.tool_results,
            error: state.fatal_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_sql_query_skips_empty_and_duplicate_entries() {
        let mut state = AgentState::new("q", RequestFlags::default());
        state.push_sql_query(String::new());
        assert!(state.previous_sql_queries.is_empty());

        state.push_sql_query("SELECT 1".to_string());
        state.push_sql_query("SELECT 1".to_string());
        assert_eq!(state.previous_sql_queries, vec!["SELECT 1".to_string()]);

        state.push_sql_query("SELECT 2".to_string());
        assert_eq!(state.previous_sql_queries.len(), 2);
    }

    #[test]
    fn merge_appends_tool_results_without_reordering() {
        let mut state = AgentState::new("q", RequestFlags::default());
        let doc = |id: &str| NormalizedDocument {
            id: id.to_string(),
            content: String::new(),
            title: String::new(),
            url: String::new(),
            source: "svc".into(),
            source_type: SourceType::Other,
            relevance_score: None,
            metadata: HashMap::new(),
            summary: None,
            full_content_available: false,
        };
        state.merge(AgentPatch { append_tool_results: vec![doc("a")], ..Default::default() });
        state.merge(AgentPatch { append_tool_results: vec![doc("b")], ..Default::default() });
        assert_eq!(state.tool_results.iter().map(|d| d.id.clone()).collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn discovered_services_set_exactly_once_is_enforced_by_caller_discipline() {
        let mut state = AgentState::new("q", RequestFlags::default());
        assert!(!state.services_discovered);
        state.merge(AgentPatch { discovered_services: Some(HashMap::new()), ..Default::default() });
        assert!(state.services_discovered);
    }

    #[test]
    fn budget_exhausted_reflects_iteration_cap() {
        let mut state = AgentState::new("q", RequestFlags { max_iterations: Some(1), ..Default::default() });
        assert!(!state.budget_exhausted());
        state.merge(AgentPatch { increment_iteration: true, ..Default::default() });
        assert!(state.budget_exhausted());
    }
}
