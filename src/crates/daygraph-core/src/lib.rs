//! # daygraph-core
//!
//! Typed, stateful task-graph engine with superstep execution, per-field
//! reducer merges, bounded retry, and usage metering.
//!
//! A workflow is a [`Graph`] of named async nodes joined by fixed edges and
//! conditional routers. The [`Executor`] advances it in synchronized
//! supersteps: every task in the current frontier runs concurrently, a
//! barrier waits for all of them, their deltas fold into one aggregate state
//! through the [`StateSchema`]'s per-field reducers, and the routers of the
//! merged state decide the next frontier. Branches that fail after retries
//! are contained and reported; they never abort the run.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Executor                             │
//! │                                                              │
//! │   frontier ──► concurrent tasks ──► barrier ──► fold ──► route
//! │      ▲              │                             │          │
//! │      │              │ NodeContext                 │ reducers │
//! │      │              ▼                             ▼          │
//! │      │         TokenLedger                  StateSchema      │
//! │      │       (append-only usage,        (append / merge /    │
//! │      │        outside rollback)          keep-first / sum)   │
//! │      └───────────────── next superstep ──────────────────────┘
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`graph`] - graph definition, node/router function types, validation
//! - [`state`] - reducers and the per-field state schema
//! - [`executor`] - the superstep run loop, cancellation, run report
//! - [`task`] - scheduled work units and the per-invocation context
//! - [`retry`] - retry policy with exponential backoff and the coordinator
//! - [`ledger`] - append-only usage ledger and the persistence sink trait
//! - [`backend`] - chat-completion backend trait and message types
//! - [`error`] - build-time, run-level, and per-node error types
//!
//! # Quick start
//!
//! ```rust
//! use daygraph_core::{Executor, Graph, StateSchema, AppendReducer, START, END};
//! use serde_json::json;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let schema = StateSchema::new().with_field("events", Box::new(AppendReducer));
//! let mut graph = Graph::new(schema);
//!
//! graph.add_node("greet", |_state, _ctx| {
//!     Box::pin(async move { Ok(json!({"events": ["hello"]})) })
//! });
//! graph.add_edge(START, "greet");
//! graph.add_edge("greet", END);
//!
//! let outcome = Executor::new(graph).run(json!({"events": []})).await.unwrap();
//! assert_eq!(outcome.state["events"], json!(["hello"]));
//! # });
//! ```
//!
//! # Guarantees
//!
//! - **Isolation**: a node only observes state committed at the start of its
//!   superstep, never a sibling's uncommitted output.
//! - **Determinism**: deltas fold in `(node name, task index)` order, and
//!   every bundled reducer is associative and commutative, so fan-out merge
//!   results do not depend on completion order.
//! - **Containment**: node failures are branch-local; only a malformed
//!   graph, the superstep limit, cancellation, or broken state machinery
//!   end a run early.
//! - **Metering**: the ledger sits outside the retry rollback boundary, so
//!   every attempt's resource consumption is captured even when state
//!   reflects only the last success.

pub mod backend;
pub mod error;
pub mod executor;
pub mod graph;
pub mod ledger;
pub mod retry;
pub mod state;
pub mod task;

// Error types
pub use error::{ExecutorError, FailureKind, GraphError, NodeFailure};

// Graph construction
pub use graph::{Edge, Graph, NodeFn, NodeFuture, NodeId, RouterFn, END, START};

// State schema and reducers
pub use state::{
    AppendReducer, KeepFirstReducer, MergeReducer, OverwriteReducer, Reducer, ReducerError,
    StateSchema, SumReducer,
};

// Tasks and routing
pub use task::{NodeContext, RouteOutcome, Task};

// Retry
pub use retry::{run_with_retry, RetryPolicy};

// Execution
pub use executor::{CancelToken, Executor, NodeOutcome, NodeRun, RunOutcome, RunReport};

// Usage metering
pub use ledger::{LedgerError, SinkError, TokenLedger, TokenUsageRecord, UsageSink, UsageTotals};

// Completion backend
pub use backend::{BackendError, Completion, CompletionModel, Message, Role, Usage};
