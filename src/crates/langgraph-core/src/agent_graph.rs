//! A typed driver for single-state agent graphs.
//!
//! [`graph`](crate::graph) and the `pregel` runtime model a generic, `serde_json::Value`-keyed
//! state with multiple channels and reducers — the right shape for a general workflow engine.
//! Agent-style graphs built on top of a single strongly-typed state record don't need channels,
//! checkpointing, or interrupts; they need a node registry, direct/conditional edges, a step
//! budget, and per-node retry. This module is that narrower driver.
//!
//! Nodes are `state -> (patch, next_hint)` functions (see [`NodeOutcome`]), mirroring
//! [`NodeResult`](crate::node_result::NodeResult)'s state/command split but without the
//! generic `Value` payload: the patch type is associated to the state via [`GraphState`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::retry::RetryPolicy;

pub const START: &str = "__start__";
pub const END: &str = "__end__";

/// A state record a [`Graph`] can drive.
///
/// The driver owns the state for the lifetime of a run. Nodes never see `&mut Self`; they
/// receive a read-only clone and return a `Patch` the driver merges via [`merge`](Self::merge).
/// Step/retry bookkeeping lives on the state itself (so it can be reported back to the caller)
/// but is mutated directly by the driver, never through a node-returned patch.
pub trait GraphState: Clone + Send + Sync + 'static {
    /// The delta type nodes return from a successful call.
    type Patch: Send + 'static;

    /// Apply a node's patch. Must not panic; unknown/conflicting fields are the node author's
    /// problem to avoid, not the driver's to detect.
    fn merge(&mut self, patch: Self::Patch);

    fn step_count(&self) -> u32;
    fn increment_step(&mut self);
    fn max_steps(&self) -> u32;

    fn retry_count(&self, node: &str) -> u32;
    fn increment_retry(&mut self, node: &str);

    /// Record a completed node dispatch for the visited-node timing log.
    fn record_visit(&mut self, node: &str, started_at: Instant, duration: Duration);

    /// Write a terminal, budget-exhausted answer. Called exactly once, by the driver, when
    /// `step_count` reaches `max_steps` with the graph not yet at its terminal node.
    fn mark_budget_exhausted(&mut self, message: String);
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum NodeError {
    /// Worth retrying (network blip, LLM timeout, transient tool failure).
    #[error("transient error in node: {0}")]
    Transient(String),
    /// Not worth retrying; the driver surfaces this as a graph-level fatal error.
    #[error("fatal error in node: {0}")]
    Fatal(String),
}

/// What a node returns: a state patch plus an optional hint for which successor to take.
///
/// `next_hint` is consulted only when the dispatching node has neither a static edge nor a
/// conditional edge registered — it lets a node pick among successors without the graph needing
/// a predicate for every branch (used by the SQL subgraph, whose branching is driven by node
/// logic rather than a pure function of state alone).
pub struct NodeOutcome<P> {
    pub patch: P,
    pub next_hint: Option<String>,
}

impl<P> NodeOutcome<P> {
    pub fn new(patch: P) -> Self {
        Self { patch, next_hint: None }
    }

    pub fn goto(patch: P, next: impl Into<String>) -> Self {
        Self { patch, next_hint: Some(next.into()) }
    }
}

type NodeFuture<P> = Pin<Box<dyn Future<Output = Result<NodeOutcome<P>, NodeError>> + Send>>;

/// A registered node handler. Takes a read-only state snapshot, returns a patch and routing hint.
pub type NodeHandler<S> =
    Arc<dyn Fn(S) -> NodeFuture<<S as GraphState>::Patch> + Send + Sync>;

struct NodeSpec<S: GraphState> {
    handler: NodeHandler<S>,
    timeout: Duration,
    retry_policy: RetryPolicy,
}

/// A pure routing predicate: reads state, returns a branch name. No I/O, no randomness — the
/// binding requirement is that the same state snapshot always yields the same branch.
pub type Predicate<S> = Arc<dyn Fn(&S) -> String + Send + Sync>;

pub enum Edge<S: GraphState> {
    Direct(String),
    Conditional { predicate: Predicate<S>, branches: HashMap<String, String> },
}

impl<S: GraphState> std::fmt::Debug for Edge<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Edge::Direct(to) => f.debug_tuple("Direct").field(to).finish(),
            Edge::Conditional { branches, .. } => {
                f.debug_struct("Conditional").field("branches", branches).finish()
            }
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum DriverError {
    #[error("node '{0}' is not registered")]
    UnknownNode(String),
    #[error("no entry point set")]
    NoEntry(String),
    #[error("node '{node}' has no outgoing edge and returned no next_hint")]
    NoSuccessor { node: String },
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error("node '{node}' timed out after {timeout_ms}ms")]
    NodeTimeout { node: String, timeout_ms: u64 },
}

/// A graph over a single typed state, with a static topology plus conditional branches.
///
/// Mirrors [`crate::graph::Graph`]'s node/edge shape (`Arc<dyn Fn>` executors, `Direct` /
/// `Conditional` edges, `START`/`END` sentinels) but drives one concrete `S` instead of a
/// generic, multi-channel `Value` state.
pub struct Graph<S: GraphState> {
    nodes: HashMap<String, NodeSpec<S>>,
    edges: HashMap<String, Edge<S>>,
    entry: Option<String>,
    terminal: String,
    default_node_timeout: Duration,
    default_retry_policy: RetryPolicy,
}

impl<S: GraphState> Default for Graph<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: GraphState> Graph<S> {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: HashMap::new(),
            entry: None,
            terminal: END.to_string(),
            default_node_timeout: Duration::from_secs(600),
            default_retry_policy: RetryPolicy::new(3),
        }
    }

    pub fn with_default_node_timeout(mut self, timeout: Duration) -> Self {
        self.default_node_timeout = timeout;
        self
    }

    pub fn with_default_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.default_retry_policy = policy;
        self
    }

    /// Register a node under `id`. Side-effecting (LLM/MCP calls) is expected inside `handler`;
    /// the handler itself must be pure with respect to graph bookkeeping — it only ever returns
    /// a patch, never mutates shared state.
    pub fn register_node<F, Fut>(&mut self, id: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(S) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<NodeOutcome<S::Patch>, NodeError>> + Send + 'static,
    {
        let id = id.into();
        self.nodes.insert(
            id,
            NodeSpec {
                handler: Arc::new(move |s| Box::pin(handler(s))),
                timeout: self.default_node_timeout,
                retry_policy: self.default_retry_policy.clone(),
            },
        );
        self
    }

    /// Like [`register_node`](Self::register_node) but with a node-specific timeout and retry
    /// policy (used by, e.g., `execute_tool_calls`'s longer download budget).
    pub fn register_node_with(
        &mut self,
        id: impl Into<String>,
        handler: NodeHandler<S>,
        timeout: Duration,
        retry_policy: RetryPolicy,
    ) -> &mut Self {
        self.nodes.insert(id.into(), NodeSpec { handler, timeout, retry_policy });
        self
    }

    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.edges.insert(from.into(), Edge::Direct(to.into()));
        self
    }

    pub fn add_conditional_edge(
        &mut self,
        from: impl Into<String>,
        predicate: Predicate<S>,
        branches: HashMap<String, String>,
    ) -> &mut Self {
        self.edges.insert(from.into(), Edge::Conditional { predicate, branches });
        self
    }

    pub fn set_entry(&mut self, id: impl Into<String>) -> &mut Self {
        self.entry = Some(id.into());
        self
    }

    pub fn set_terminal(&mut self, id: impl Into<String>) -> &mut Self {
        self.terminal = id.into();
        self
    }

    /// Validate that the entry point and every edge target a registered node.
    pub fn validate(&self) -> Result<(), DriverError> {
        let entry = self.entry.clone().ok_or_else(|| DriverError::NoEntry("no entry point set".into()))?;
        if !self.nodes.contains_key(&entry) {
            return Err(DriverError::UnknownNode(entry));
        }
        for edge in self.edges.values() {
            match edge {
                Edge::Direct(to) => {
                    if to != &self.terminal && !self.nodes.contains_key(to) {
                        return Err(DriverError::UnknownNode(to.clone()));
                    }
                }
                Edge::Conditional { branches, .. } => {
                    for to in branches.values() {
                        if to != &self.terminal && !self.nodes.contains_key(to) {
                            return Err(DriverError::UnknownNode(to.clone()));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Drive `state` from the entry point to the terminal node, per the binding algorithm:
    /// dispatch, merge patch, check budget, retry transient failures up to the node's cap,
    /// resolve the next node from a conditional edge, static edge, or `next_hint`.
    #[tracing::instrument(skip(self, state), fields(node_count = self.nodes.len()))]
    pub async fn run(&self, mut state: S) -> Result<S, DriverError> {
        self.validate()?;
        let mut current = self.entry.clone().expect("validated above");

        loop {
            if current == self.terminal {
                return Ok(state);
            }

            if state.step_count() >= state.max_steps() {
                tracing::warn!(node = %current, "step budget exhausted");
                state.mark_budget_exhausted(format!(
                    "step budget exhausted after {} steps",
                    state.step_count()
                ));
                return Ok(state);
            }

            let spec = self
                .nodes
                .get(&current)
                .ok_or_else(|| DriverError::UnknownNode(current.clone()))?;

            let next_hint = loop {
                let started_at = Instant::now();
                let call = (spec.handler)(state.clone());
                let outcome = tokio::time::timeout(spec.timeout, call).await;
                let duration = started_at.elapsed();
                state.record_visit(&current, started_at, duration);

                match outcome {
                    Err(_) => {
                        return Err(DriverError::NodeTimeout {
                            node: current.clone(),
                            timeout_ms: spec.timeout.as_millis() as u64,
                        });
                    }
                    Ok(Err(NodeError::Fatal(msg))) => {
                        return Err(DriverError::Node(NodeError::Fatal(msg)));
                    }
                    Ok(Err(NodeError::Transient(msg))) => {
                        let attempt = state.retry_count(&current);
                        if spec.retry_policy.should_retry(attempt as usize) {
                            tracing::warn!(node = %current, attempt, error = %msg, "retrying node");
                            state.increment_retry(&current);
                            let delay = spec.retry_policy.calculate_delay(attempt as usize);
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        return Err(DriverError::Node(NodeError::Transient(msg)));
                    }
                    Ok(Ok(NodeOutcome { patch, next_hint })) => {
                        state.merge(patch);
                        state.increment_step();
                        break next_hint;
                    }
                }
            };

            current = self.resolve_next(&current, &state, next_hint)?;
        }
    }

    fn resolve_next(
        &self,
        from: &str,
        state: &S,
        next_hint: Option<String>,
    ) -> Result<String, DriverError> {
        match self.edges.get(from) {
            Some(Edge::Direct(to)) => Ok(to.clone()),
            Some(Edge::Conditional { predicate, branches }) => {
                let branch = predicate(state);
                branches
                    .get(&branch)
                    .cloned()
                    .ok_or_else(|| DriverError::NoSuccessor { node: from.to_string() })
            }
            None => next_hint.ok_or_else(|| DriverError::NoSuccessor { node: from.to_string() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct CounterState {
        value: i64,
        step_count: u32,
        max_steps: u32,
        retries: HashMap<String, u32>,
        visited: Vec<String>,
        budget_message: Option<String>,
    }

    impl GraphState for CounterState {
        type Patch = i64;

        fn merge(&mut self, patch: i64) {
            self.value += patch;
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
            *self.retries.get(node).unwrap_or(&0)
        }

        fn increment_retry(&mut self, node: &str) {
            *self.retries.entry(node.to_string()).or_insert(0) += 1;
        }

        fn record_visit(&mut self, node: &str, _started_at: Instant, _duration: Duration) {
            self.visited.push(node.to_string());
        }

        fn mark_budget_exhausted(&mut self, message: String) {
            self.budget_message = Some(message);
        }
    }

    #[tokio::test]
    async fn direct_edges_run_to_completion() {
        let mut graph: Graph<CounterState> = Graph::new();
        graph.register_node("add_one", |s: CounterState| async move {
            Ok(NodeOutcome::new(1))
        });
        graph.register_node("add_two", |s: CounterState| async move {
            Ok(NodeOutcome::new(2))
        });
        graph.add_edge("add_one", "add_two");
        graph.add_edge("add_two", END);
        graph.set_entry("add_one");

        let state = CounterState { max_steps: 10, ..Default::default() };
        let result = graph.run(state).await.unwrap();
        assert_eq!(result.value, 3);
        assert_eq!(result.visited, vec!["add_one", "add_two"]);
    }

    #[tokio::test]
    async fn conditional_edge_picks_branch_from_state() {
        let mut graph: Graph<CounterState> = Graph::new();
        graph.register_node("decide", |s: CounterState| async move {
            Ok(NodeOutcome::new(if s.value == 0 { 5 } else { -5 }))
        });
        graph.register_node("high", |_s| async move { Ok(NodeOutcome::new(100)) });
        graph.register_node("low", |_s| async move { Ok(NodeOutcome::new(-100)) });

        let mut branches = HashMap::new();
        branches.insert("high".to_string(), "high".to_string());
        branches.insert("low".to_string(), "low".to_string());
        graph.add_conditional_edge(
            "decide",
            Arc::new(|s: &CounterState| if s.value >= 5 { "high".into() } else { "low".into() }),
            branches,
        );
        graph.add_edge("high", END);
        graph.add_edge("low", END);
        graph.set_entry("decide");

        let state = CounterState { max_steps: 10, ..Default::default() };
        let result = graph.run(state).await.unwrap();
        assert_eq!(result.value, 105);
    }

    #[tokio::test]
    async fn step_budget_terminates_without_crashing() {
        let mut graph: Graph<CounterState> = Graph::new();
        graph.register_node("loop_node", |_s| async move { Ok(NodeOutcome::new(1)) });
        graph.add_edge("loop_node", "loop_node");
        graph.set_entry("loop_node");

        let state = CounterState { max_steps: 3, ..Default::default() };
        let result = graph.run(state).await.unwrap();
        assert_eq!(result.step_count, 3);
        assert!(result.budget_message.is_some());
    }

    #[tokio::test]
    async fn transient_errors_retry_up_to_cap_then_fail() {
        let mut graph: Graph<CounterState> = Graph::new();
        graph.register_node("flaky", |_s| async move {
            Err(NodeError::Transient("boom".into()))
        });
        graph.add_edge("flaky", END);
        graph.set_entry("flaky");

        let graph = graph.with_default_retry_policy(RetryPolicy::new(2).with_initial_interval(0.001));
        let state = CounterState { max_steps: 10, ..Default::default() };
        let err = graph.run(state).await.unwrap_err();
        assert!(matches!(err, DriverError::Node(NodeError::Transient(_))));
    }

    #[tokio::test]
    async fn next_hint_used_when_no_edge_registered() {
        let mut graph: Graph<CounterState> = Graph::new();
        graph.register_node("branchy", |_s| async move {
            Ok(NodeOutcome::goto(1, "target"))
        });
        graph.register_node("target", |_s| async move { Ok(NodeOutcome::new(9)) });
        graph.add_edge("target", END);
        graph.set_entry("branchy");

        let state = CounterState { max_steps: 10, ..Default::default() };
        let result = graph.run(state).await.unwrap();
        assert_eq!(result.value, 10);
    }
}
