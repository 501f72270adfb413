//! Superstep executor: barriered fan-out, reducer merge, retry, metering
//!
//! The [`Executor`] advances a validated [`Graph`] in synchronized
//! supersteps. Within one superstep every scheduled task runs concurrently;
//! the executor waits for all of them (success, exhausted-retry failure, or
//! cancellation) before folding their deltas into the aggregate and routing
//! the next frontier. No partial merge is ever visible: a node only observes
//! state committed at the start of its superstep.
//!
//! ```text
//!            ┌────────────── superstep N ──────────────┐
//!            │  task A ──┐                             │
//!   state ───┤  task B ──┼── barrier ── sort ── fold ──┼── state' ── route ── superstep N+1
//!            │  task C ──┘   (join)    (node, merged   │
//!            │                          index)         │
//!            └─────────────────────────────────────────┘
//! ```
//!
//! # Determinism
//!
//! Completed deltas are sorted by `(node name, task index)` before folding,
//! so order-sensitive reducers (keep-first) produce the same aggregate no
//! matter which sibling finished first. Routers then inspect the merged
//! state, and full-state tasks routed to the same node coalesce into one
//! invocation (the fan-in barrier); private-payload tasks never coalesce.
//!
//! # Failure containment
//!
//! A node that exhausts its retries kills only its own branch: the executor
//! records the failure in the [`RunReport`] and keeps going. The only
//! run-level errors are a malformed graph (build time), the superstep safety
//! limit, cancellation, and state machinery breaking mid-merge.
//!
//! # Metering
//!
//! Each run gets a fresh namespace (its run id) in the executor's
//! [`TokenLedger`]. Node bodies append usage records through their
//! [`NodeContext`]; the ledger sits outside the retry rollback boundary, so
//! failed attempts still meter. At completion the executor summarizes the
//! namespace per node, optionally folds the summary into a state field, and
//! drains every record to the configured [`UsageSink`] (sink failures are
//! logged, never fatal).
//!
//! # Examples
//!
//! ```rust
//! use daygraph_core::executor::Executor;
//! use daygraph_core::graph::{Graph, START, END};
//! use daygraph_core::state::{AppendReducer, StateSchema};
//! use serde_json::json;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let schema = StateSchema::new().with_field("events", Box::new(AppendReducer));
//! let mut graph = Graph::new(schema);
//! graph.add_node("record", |_state, _ctx| {
//!     Box::pin(async move { Ok(json!({"events": ["seen"]})) })
//! });
//! graph.add_edge(START, "record");
//! graph.add_edge("record", END);
//!
//! let outcome = Executor::new(graph).run(json!({"events": []})).await.unwrap();
//! assert_eq!(outcome.state["events"], json!(["seen"]));
//! assert!(outcome.report.all_succeeded());
//! # });
//! ```

use futures::future::join_all;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{ExecutorError, FailureKind, NodeFailure};
use crate::graph::{Edge, Graph, NodeId, END, START};
use crate::ledger::{TokenLedger, UsageSink, UsageTotals};
use crate::retry::{run_with_retry, RetryPolicy};
use crate::task::{NodeContext, RouteOutcome, Task};

/// Cooperative cancellation handle.
///
/// Cloning shares the flag. The executor checks it before each superstep and
/// again at the barrier; in-flight node calls finish, their deltas are
/// dropped, and the run returns [`ExecutorError::Cancelled`]. Ledger records
/// appended before cancellation persist.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// A fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Final outcome of one node invocation (after retries).
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    /// The node returned a delta that was folded into the aggregate.
    Succeeded,
    /// All attempts failed; the branch was dropped.
    Failed {
        /// Kind of the final failure
        kind: FailureKind,
        /// Message of the final failure
        message: String,
    },
    /// The node was never scheduled during the run.
    Skipped,
}

/// One node invocation as seen by the run report.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRun {
    /// Node name
    pub node: NodeId,
    /// Superstep the invocation ran in (0 for nodes never scheduled)
    pub superstep: usize,
    /// Attempts consumed (0 for nodes never scheduled)
    pub attempts: usize,
    /// Final outcome
    pub outcome: NodeOutcome,
}

/// Per-node account of a completed run.
///
/// Every registered node appears at least once: scheduled nodes with their
/// real outcome per invocation, unscheduled ones as [`NodeOutcome::Skipped`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    runs: Vec<NodeRun>,
    supersteps: usize,
}

impl RunReport {
    fn record(&mut self, run: NodeRun) {
        self.runs.push(run);
    }

    /// All invocations, in merge order.
    pub fn runs(&self) -> &[NodeRun] {
        &self.runs
    }

    /// Number of supersteps the run took.
    pub fn supersteps(&self) -> usize {
        self.supersteps
    }

    /// Outcome of the most recent invocation of `node`.
    pub fn outcome(&self, node: &str) -> Option<&NodeOutcome> {
        self.runs
            .iter()
            .rev()
            .find(|run| run.node == node)
            .map(|run| &run.outcome)
    }

    /// Invocations that ended in failure.
    pub fn failures(&self) -> impl Iterator<Item = &NodeRun> {
        self.runs
            .iter()
            .filter(|run| matches!(run.outcome, NodeOutcome::Failed { .. }))
    }

    /// Whether no invocation failed. Skipped nodes do not count against this.
    pub fn all_succeeded(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Everything a completed run produces.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Final aggregate state
    pub state: Value,
    /// Per-node outcome report
    pub report: RunReport,
    /// Usage totals per node, summarized from the run's ledger namespace
    pub usage: HashMap<String, UsageTotals>,
    /// Identifier of the run, which is also its ledger namespace
    pub run_id: Uuid,
}

struct TaskResult {
    index: usize,
    node: NodeId,
    attempts: usize,
    result: Result<Value, NodeFailure>,
}

/// Drives a graph to completion in supersteps.
pub struct Executor {
    graph: Graph,
    retry_policy: RetryPolicy,
    max_supersteps: usize,
    concurrency: Option<usize>,
    node_timeout: Option<Duration>,
    usage_field: Option<String>,
    sink: Option<Arc<dyn UsageSink>>,
    cancel: CancelToken,
    ledger: TokenLedger,
}

impl Executor {
    /// Executor over `graph` with default retry policy, a 64-superstep
    /// safety limit, unbounded concurrency, and no timeout.
    pub fn new(graph: Graph) -> Self {
        Self {
            graph,
            retry_policy: RetryPolicy::default(),
            max_supersteps: 64,
            concurrency: None,
            node_timeout: None,
            usage_field: None,
            sink: None,
            cancel: CancelToken::new(),
            ledger: TokenLedger::new(),
        }
    }

    /// Retry policy applied to every node invocation.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Superstep safety limit. Exceeding it aborts the run with
    /// [`ExecutorError::StepLimit`]; it exists to catch routing cycles, not
    /// to pace normal work.
    pub fn with_max_supersteps(mut self, limit: usize) -> Self {
        self.max_supersteps = limit;
        self
    }

    /// Bound concurrent node invocations per superstep. Size this to the
    /// external backend's concurrency limit.
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency = Some(limit.max(1));
        self
    }

    /// Time limit per node attempt. Expiry is a retryable
    /// [`Timeout`](FailureKind::Timeout) failure, subject to the retry
    /// policy like any other.
    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = Some(timeout);
        self
    }

    /// Fold the per-node usage summary into this state field at completion.
    /// The field must be declared in the schema; pair it with a reducer that
    /// adds numeric maps.
    pub fn with_usage_field(mut self, field: impl Into<String>) -> Self {
        self.usage_field = Some(field.into());
        self
    }

    /// Drain the run's ledger records to `sink` at completion, keyed by the
    /// run id. Sink failures are logged and swallowed.
    pub fn with_sink(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Use an externally held cancellation token.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Handle to the cancellation token of this executor.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Shared handle to the usage ledger. Survives the run, so records can
    /// be inspected even after cancellation.
    pub fn ledger(&self) -> TokenLedger {
        self.ledger.clone()
    }

    /// Run the graph over `initial` until every branch reaches [`END`] or
    /// exhausts its retries.
    ///
    /// # Errors
    ///
    /// - [`ExecutorError::Graph`] if the graph fails validation
    /// - [`ExecutorError::State`] if the initial state carries undeclared
    ///   fields, or a delta cannot be folded mid-run
    /// - [`ExecutorError::StepLimit`] when the superstep guard trips
    /// - [`ExecutorError::Cancelled`] when the token fires; deltas of the
    ///   interrupted superstep are dropped, ledger records persist
    pub async fn run(&self, initial: Value) -> Result<RunOutcome, ExecutorError> {
        self.graph.validate()?;
        self.graph.schema().validate_state(&initial)?;

        let run_id = Uuid::new_v4();
        let namespace = run_id.to_string();
        let mut state = initial;
        let mut report = RunReport::default();
        let mut step: usize = 0;

        let mut frontier = Vec::new();
        {
            let mut seen = HashSet::new();
            self.route_from(START, &state, 1, &mut report, &mut seen, &mut frontier);
        }

        while !frontier.is_empty() {
            if self.cancel.is_cancelled() {
                return Err(ExecutorError::Cancelled { completed_steps: step });
            }
            step += 1;
            if step > self.max_supersteps {
                return Err(ExecutorError::StepLimit {
                    limit: self.max_supersteps,
                });
            }
            debug!(run_id = %run_id, superstep = step, tasks = frontier.len(), "superstep starting");

            let results = self.run_superstep(&frontier, &state, run_id).await;

            // Barrier passed. Drop the whole superstep if cancellation
            // raced the in-flight tasks; their deltas must not merge.
            if self.cancel.is_cancelled() {
                return Err(ExecutorError::Cancelled {
                    completed_steps: step - 1,
                });
            }

            let mut succeeded: BTreeSet<String> = BTreeSet::new();
            for task_result in results {
                let TaskResult {
                    node,
                    attempts,
                    result,
                    ..
                } = task_result;
                match result {
                    Ok(delta) => {
                        if !delta.is_null() {
                            self.graph.schema().apply(&mut state, &delta)?;
                        }
                        succeeded.insert(node.clone());
                        report.record(NodeRun {
                            node,
                            superstep: step,
                            attempts,
                            outcome: NodeOutcome::Succeeded,
                        });
                    }
                    Err(failure) => {
                        error!(
                            node = %failure.node,
                            kind = ?failure.kind,
                            attempts,
                            error = %failure.message,
                            "branch failed after retries"
                        );
                        report.record(NodeRun {
                            node,
                            superstep: step,
                            attempts,
                            outcome: NodeOutcome::Failed {
                                kind: failure.kind,
                                message: failure.message,
                            },
                        });
                    }
                }
            }

            let mut next = Vec::new();
            let mut seen = HashSet::new();
            for source in &succeeded {
                self.route_from(source, &state, step + 1, &mut report, &mut seen, &mut next);
            }
            frontier = next;
        }

        report.supersteps = step;
        self.mark_unscheduled_skipped(&mut report);

        let usage = self.ledger.summarize(&namespace, "node").await?;
        if let Some(field) = &self.usage_field {
            if !usage.is_empty() {
                let mut delta = serde_json::Map::new();
                delta.insert(field.clone(), serde_json::to_value(&usage)?);
                self.graph.schema().apply(&mut state, &Value::Object(delta))?;
            }
        }

        if let Some(sink) = &self.sink {
            for (key, record) in self.ledger.search(&namespace).await {
                if let Err(err) = sink.upsert_usage(run_id, &record).await {
                    warn!(key = %key, error = %err, "usage sink rejected record");
                }
            }
        }

        info!(
            run_id = %run_id,
            supersteps = step,
            failures = report.failures().count(),
            "run completed"
        );

        Ok(RunOutcome {
            state,
            report,
            usage,
            run_id,
        })
    }

    /// Execute one frontier concurrently and return results sorted by
    /// `(node name, task index)` so the subsequent fold is deterministic.
    async fn run_superstep(&self, frontier: &[Task], state: &Value, run_id: Uuid) -> Vec<TaskResult> {
        let semaphore = self
            .concurrency
            .map(|limit| Arc::new(Semaphore::new(limit)));

        let futures: Vec<_> = frontier
            .iter()
            .enumerate()
            .map(|(index, task)| {
                let name = task.node().to_string();
                let input = match task {
                    Task::FullState(_) => state.clone(),
                    Task::PrivatePayload { payload, .. } => payload.clone(),
                };
                let node_fn = self.graph.node(&name).cloned();
                let ctx = NodeContext::new(name.clone(), run_id, self.ledger.clone());
                let semaphore = semaphore.clone();
                let policy = &self.retry_policy;
                let node_timeout = self.node_timeout;

                async move {
                    let _permit = match semaphore {
                        Some(sem) => sem.acquire_owned().await.ok(),
                        None => None,
                    };

                    let Some(node_fn) = node_fn else {
                        return TaskResult {
                            index,
                            node: name.clone(),
                            attempts: 0,
                            result: Err(NodeFailure::permanent(name, "node not registered")),
                        };
                    };

                    let mut attempts = 0;
                    let result = run_with_retry(policy, |attempt| {
                        attempts = attempt;
                        let fut = node_fn(input.clone(), ctx.with_attempt(attempt));
                        let node = name.clone();
                        async move {
                            match node_timeout {
                                Some(limit) => match tokio::time::timeout(limit, fut).await {
                                    Ok(result) => result,
                                    Err(_) => Err(NodeFailure::timeout(
                                        node,
                                        format!("invocation exceeded {} ms", limit.as_millis()),
                                    )),
                                },
                                None => fut.await,
                            }
                        }
                    })
                    .await;

                    TaskResult {
                        index,
                        node: name,
                        attempts,
                        result,
                    }
                }
            })
            .collect();

        let mut results = join_all(futures).await;
        results.sort_by(|a, b| a.node.cmp(&b.node).then(a.index.cmp(&b.index)));
        results
    }

    /// Evaluate the outgoing edges of `source` against the merged state and
    /// push the resulting tasks. Routing to an unregistered node fails that
    /// branch (recorded under the ghost target's name), never the run.
    fn route_from(
        &self,
        source: &str,
        state: &Value,
        superstep: usize,
        report: &mut RunReport,
        seen_full: &mut HashSet<String>,
        frontier: &mut Vec<Task>,
    ) {
        for edge in self.graph.edges_from(source) {
            match edge {
                Edge::Direct(target) => {
                    self.push_task(Task::full(target.clone()), source, superstep, report, seen_full, frontier);
                }
                Edge::Conditional { router, .. } => match router(state) {
                    RouteOutcome::Node(target) => {
                        self.push_task(Task::full(target), source, superstep, report, seen_full, frontier);
                    }
                    RouteOutcome::Nodes(targets) => {
                        for target in targets {
                            self.push_task(Task::full(target), source, superstep, report, seen_full, frontier);
                        }
                    }
                    RouteOutcome::Tasks(tasks) => {
                        for task in tasks {
                            self.push_task(task, source, superstep, report, seen_full, frontier);
                        }
                    }
                },
            }
        }
    }

    fn push_task(
        &self,
        task: Task,
        source: &str,
        superstep: usize,
        report: &mut RunReport,
        seen_full: &mut HashSet<String>,
        frontier: &mut Vec<Task>,
    ) {
        let target = task.node();
        if target == END {
            return;
        }
        if !self.graph.contains_node(target) {
            warn!(source, target, "router returned unregistered node, dropping branch");
            report.record(NodeRun {
                node: target.to_string(),
                superstep,
                attempts: 0,
                outcome: NodeOutcome::Failed {
                    kind: FailureKind::Permanent,
                    message: format!("router on '{source}' returned unregistered node"),
                },
            });
            return;
        }
        match &task {
            Task::FullState(node) => {
                if seen_full.insert(node.clone()) {
                    frontier.push(task);
                }
            }
            Task::PrivatePayload { .. } => frontier.push(task),
        }
    }

    fn mark_unscheduled_skipped(&self, report: &mut RunReport) {
        let mut names: Vec<&str> = self.graph.node_names().collect();
        names.sort_unstable();
        for name in names {
            if report.outcome(name).is_none() {
                report.record(NodeRun {
                    node: name.to_string(),
                    superstep: 0,
                    attempts: 0,
                    outcome: NodeOutcome::Skipped,
                });
            }
        }
    }
}
