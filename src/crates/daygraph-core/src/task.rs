//! Scheduled work units and the per-invocation node context
//!
//! A [`Task`] is one unit of work in a superstep frontier. Routers decide the
//! shape explicitly when they create the task: a *full-state* task hands the
//! node the whole aggregate, a *private-payload* task hands it only a
//! sub-state the router constructed (the fan-out primitive). Payload shape is
//! never inferred from the receiving node.
//!
//! Every invocation also receives a [`NodeContext`] carrying the node name,
//! attempt number, run id, and a handle to the usage ledger.

use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::backend::Usage;
use crate::graph::NodeId;
use crate::ledger::{TokenLedger, TokenUsageRecord};

/// One scheduled node invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    /// The node receives a copy of the whole aggregate state.
    FullState(NodeId),
    /// The node receives only the payload the router built for it. Fields
    /// absent from its returned delta stay untouched on merge, like any
    /// other delta.
    PrivatePayload {
        /// Target node
        node: NodeId,
        /// Sub-state constructed by the router
        payload: Value,
    },
}

impl Task {
    /// A full-state task for `node`.
    pub fn full(node: impl Into<NodeId>) -> Self {
        Task::FullState(node.into())
    }

    /// A private-payload task for `node`.
    pub fn with_payload(node: impl Into<NodeId>, payload: Value) -> Self {
        Task::PrivatePayload {
            node: node.into(),
            payload,
        }
    }

    /// Target node name.
    pub fn node(&self) -> &str {
        match self {
            Task::FullState(node) => node,
            Task::PrivatePayload { node, .. } => node,
        }
    }

    /// Whether this task carries a private payload.
    pub fn is_private(&self) -> bool {
        matches!(self, Task::PrivatePayload { .. })
    }
}

/// What a conditional router decided.
///
/// Routers inspect the merged state and answer with one target, several
/// full-state targets, or an explicit task list (the only way to create
/// private-payload fan-out).
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// Continue to a single node (or the end sentinel).
    Node(NodeId),
    /// Continue to several nodes, each receiving the full state.
    Nodes(Vec<NodeId>),
    /// Continue with explicitly constructed tasks, which may mix full-state
    /// and private-payload work.
    Tasks(Vec<Task>),
}

impl RouteOutcome {
    /// Route the branch to the end sentinel.
    pub fn end() -> Self {
        RouteOutcome::Node(crate::graph::END.to_string())
    }
}

impl From<&str> for RouteOutcome {
    fn from(node: &str) -> Self {
        RouteOutcome::Node(node.to_string())
    }
}

impl From<String> for RouteOutcome {
    fn from(node: String) -> Self {
        RouteOutcome::Node(node)
    }
}

impl From<Vec<String>> for RouteOutcome {
    fn from(nodes: Vec<String>) -> Self {
        RouteOutcome::Nodes(nodes)
    }
}

impl From<Vec<&str>> for RouteOutcome {
    fn from(nodes: Vec<&str>) -> Self {
        RouteOutcome::Nodes(nodes.into_iter().map(String::from).collect())
    }
}

impl From<Task> for RouteOutcome {
    fn from(task: Task) -> Self {
        RouteOutcome::Tasks(vec![task])
    }
}

impl From<Vec<Task>> for RouteOutcome {
    fn from(tasks: Vec<Task>) -> Self {
        RouteOutcome::Tasks(tasks)
    }
}

/// Per-invocation context handed to every node body.
///
/// Carries identity (node name, attempt, run id) and the ledger handle nodes
/// use to meter their own resource consumption. The ledger sits outside the
/// rollback boundary: records appended by a failed attempt persist even
/// though the attempt's state delta is discarded.
#[derive(Clone)]
pub struct NodeContext {
    node: NodeId,
    attempt: usize,
    run_id: Uuid,
    namespace: String,
    ledger: TokenLedger,
}

impl NodeContext {
    /// Context for the first attempt of `node` within a run.
    pub fn new(node: impl Into<NodeId>, run_id: Uuid, ledger: TokenLedger) -> Self {
        Self {
            node: node.into(),
            attempt: 1,
            run_id,
            namespace: run_id.to_string(),
            ledger,
        }
    }

    /// Same context with the attempt counter replaced. The retry coordinator
    /// builds one of these per attempt.
    pub fn with_attempt(&self, attempt: usize) -> Self {
        let mut ctx = self.clone();
        ctx.attempt = attempt;
        ctx
    }

    /// Name of the node being invoked.
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Attempt number, 1-based.
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    /// Identifier of the enclosing run.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Direct handle to the usage ledger.
    pub fn ledger(&self) -> &TokenLedger {
        &self.ledger
    }

    /// Build a usage record attributed to this node and attempt.
    pub fn usage_record(&self, usage: Usage, search_count: u64) -> TokenUsageRecord {
        TokenUsageRecord {
            node: self.node.clone(),
            attempt: self.attempt,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            total_tokens: usage.total_tokens,
            search_count,
        }
    }

    /// Append a usage record for this invocation and return its ledger key.
    pub async fn record_usage(&self, usage: Usage, search_count: u64) -> String {
        self.ledger
            .append(&self.namespace, self.usage_record(usage, search_count))
            .await
    }
}

impl fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeContext")
            .field("node", &self.node)
            .field("attempt", &self.attempt)
            .field("run_id", &self.run_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_accessors() {
        let task = Task::full("classify");
        assert_eq!(task.node(), "classify");
        assert!(!task.is_private());

        let task = Task::with_payload("search", json!({"id": 7}));
        assert_eq!(task.node(), "search");
        assert!(task.is_private());
    }

    #[test]
    fn route_outcome_conversions() {
        assert_eq!(
            RouteOutcome::from("next"),
            RouteOutcome::Node("next".to_string())
        );
        assert_eq!(
            RouteOutcome::from(vec!["a", "b"]),
            RouteOutcome::Nodes(vec!["a".to_string(), "b".to_string()])
        );
        let outcome = RouteOutcome::from(vec![Task::full("a"), Task::with_payload("b", json!(1))]);
        match outcome {
            RouteOutcome::Tasks(tasks) => assert_eq!(tasks.len(), 2),
            other => panic!("expected Tasks, got {:?}", other),
        }
        assert_eq!(
            RouteOutcome::end(),
            RouteOutcome::Node(crate::graph::END.to_string())
        );
    }

    #[tokio::test]
    async fn context_records_usage_under_run_namespace() {
        let ledger = TokenLedger::new();
        let run_id = Uuid::new_v4();
        let ctx = NodeContext::new("classify", run_id, ledger.clone());

        let key = ctx
            .record_usage(
                Usage {
                    input_tokens: 10,
                    output_tokens: 5,
                    total_tokens: 15,
                },
                0,
            )
            .await;
        assert_eq!(key, format!("{}:0", run_id));

        let retry_ctx = ctx.with_attempt(2);
        assert_eq!(retry_ctx.attempt(), 2);
        retry_ctx.record_usage(Usage::default(), 1).await;

        let records = ledger.search(&run_id.to_string()).await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].1.attempt, 1);
        assert_eq!(records[1].1.attempt, 2);
        assert_eq!(records[1].1.search_count, 1);
    }
}
