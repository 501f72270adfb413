//! Graph definition and build-time validation
//!
//! A [`Graph`] names its processing nodes, wires them with fixed or
//! conditional edges, and carries the [`StateSchema`] that governs how node
//! deltas fold into the aggregate state. Construction is plain mutation;
//! [`Graph::validate`] then checks the whole structure once, before any run.
//! Validation failures are the only fatal errors in the system, and they can
//! only happen here.
//!
//! # Structure
//!
//! ```text
//! START ──► enrich ──► (router) ──┬──► classify_a ──► END
//!                                 └──► classify_b ──► END
//! ```
//!
//! Edges leave a node either as a single [`Edge::Direct`] hop or as one
//! [`Edge::Conditional`] router. A router inspects the merged state and
//! returns a [`RouteOutcome`]: one node, several full-state nodes, or an
//! explicit task list (fan-out with private payloads). The [`END`] sentinel
//! terminates a branch.
//!
//! # Examples
//!
//! ```rust
//! use daygraph_core::graph::{Graph, START, END};
//! use daygraph_core::state::{AppendReducer, StateSchema};
//! use serde_json::json;
//!
//! let schema = StateSchema::new().with_field("events", Box::new(AppendReducer));
//! let mut graph = Graph::new(schema);
//!
//! graph.add_node("record", |state, _ctx| {
//!     Box::pin(async move {
//!         let _ = state;
//!         Ok(json!({"events": ["seen"]}))
//!     })
//! });
//! graph.add_edge(START, "record");
//! graph.add_edge("record", END);
//!
//! assert!(graph.validate().is_ok());
//! ```

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::{GraphError, NodeFailure};
use crate::state::StateSchema;
use crate::task::{NodeContext, RouteOutcome};

/// Node identifier, unique within a graph.
pub type NodeId = String;

/// Virtual source node marking where execution begins.
///
/// `START` never executes; its outgoing edges are routed against the initial
/// state to build the first frontier.
pub const START: &str = "__start__";

/// Virtual sink node marking branch completion.
///
/// Routing a branch to `END` retires it. The run completes once every active
/// branch has reached `END`.
pub const END: &str = "__end__";

/// Future returned by a node body: a state delta, or a classified failure.
pub type NodeFuture = Pin<Box<dyn Future<Output = Result<Value, NodeFailure>> + Send>>;

/// A node body. Receives its input state (full aggregate or private payload)
/// and the invocation context, returns a delta to fold into the aggregate.
pub type NodeFn = Arc<dyn Fn(Value, NodeContext) -> NodeFuture + Send + Sync>;

/// A conditional router. Inspects the merged state, decides where the branch
/// goes next.
pub type RouterFn = Arc<dyn Fn(&Value) -> RouteOutcome + Send + Sync>;

/// One outgoing connection from a node.
#[derive(Clone)]
pub enum Edge {
    /// Unconditional hop to a single node (or [`END`]).
    Direct(NodeId),
    /// Dynamic routing through a router function.
    Conditional {
        /// Decides the next node(s) from the merged state.
        router: RouterFn,
        /// Every node the router may name, declared up front so validation
        /// can check them before any run.
        targets: Vec<NodeId>,
    },
}

impl fmt::Debug for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edge::Direct(node) => f.debug_tuple("Direct").field(node).finish(),
            Edge::Conditional { targets, .. } => f
                .debug_struct("Conditional")
                .field("router", &"<function>")
                .field("targets", targets)
                .finish(),
        }
    }
}

/// A named workflow graph plus its state schema.
///
/// Built by mutation, checked once with [`validate`](Self::validate), then
/// handed to an [`Executor`](crate::executor::Executor) to run.
pub struct Graph {
    nodes: HashMap<NodeId, NodeFn>,
    edges: HashMap<NodeId, Vec<Edge>>,
    schema: StateSchema,
}

impl Graph {
    /// An empty graph governed by `schema`.
    ///
    /// The schema is fixed at construction; every state field a run touches
    /// must resolve to one of its declared reducers.
    pub fn new(schema: StateSchema) -> Self {
        Self {
            nodes: HashMap::new(),
            edges: HashMap::new(),
            schema,
        }
    }

    /// Register a node body under `name`.
    pub fn add_node<F>(&mut self, name: impl Into<NodeId>, node: F) -> &mut Self
    where
        F: Fn(Value, NodeContext) -> NodeFuture + Send + Sync + 'static,
    {
        self.nodes.insert(name.into(), Arc::new(node));
        self
    }

    /// Add a fixed edge from `from` to `to`.
    ///
    /// Use [`START`] as the source to declare the entry point and [`END`] as
    /// the target to terminate a branch.
    pub fn add_edge(&mut self, from: impl Into<NodeId>, to: impl Into<NodeId>) -> &mut Self {
        self.edges
            .entry(from.into())
            .or_default()
            .push(Edge::Direct(to.into()));
        self
    }

    /// Add a conditional router leaving `from`.
    ///
    /// `targets` declares every node the router may return; routing to an
    /// undeclared node at run time fails that branch, never the build.
    /// [`END`] is always legal and does not need declaring.
    pub fn add_conditional_edge<R>(
        &mut self,
        from: impl Into<NodeId>,
        router: R,
        targets: impl IntoIterator<Item = impl Into<NodeId>>,
    ) -> &mut Self
    where
        R: Fn(&Value) -> RouteOutcome + Send + Sync + 'static,
    {
        self.edges.entry(from.into()).or_default().push(Edge::Conditional {
            router: Arc::new(router),
            targets: targets.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Node body registered under `name`, if any.
    pub fn node(&self, name: &str) -> Option<&NodeFn> {
        self.nodes.get(name)
    }

    /// Whether a node named `name` exists.
    pub fn contains_node(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Outgoing edges of `name` (empty for terminal or unknown nodes).
    pub fn edges_from(&self, name: &str) -> &[Edge] {
        self.edges.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The governing state schema.
    pub fn schema(&self) -> &StateSchema {
        &self.schema
    }

    /// Names of all registered nodes, unordered.
    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Structural validation. Checks, in order:
    ///
    /// - the schema declares at least one field (a run with no reducers can
    ///   never fold a delta);
    /// - [`START`] has at least one outgoing edge;
    /// - every edge source is [`START`] or a registered node;
    /// - every direct target and every declared conditional target is a
    ///   registered node or [`END`];
    /// - a source with a conditional router has no other edge (mixing a
    ///   router with fixed edges makes routing ambiguous);
    /// - every registered node has an outgoing edge, so no branch can stall
    ///   short of [`END`].
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Validation`] naming the first violated rule.
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.schema.is_empty() {
            return Err(GraphError::Validation(
                "state schema declares no fields".to_string(),
            ));
        }

        if self.edges_from(START).is_empty() {
            return Err(GraphError::Validation(
                "no entry point: add an edge from START".to_string(),
            ));
        }

        for (source, edges) in &self.edges {
            if source != START && !self.nodes.contains_key(source) {
                return Err(GraphError::Validation(format!(
                    "edge source '{source}' is not a registered node"
                )));
            }

            let has_router = edges.iter().any(|e| matches!(e, Edge::Conditional { .. }));
            if has_router && edges.len() > 1 {
                return Err(GraphError::Validation(format!(
                    "node '{source}' declares a conditional router alongside other edges"
                )));
            }

            for edge in edges {
                match edge {
                    Edge::Direct(target) => self.check_target(source, target)?,
                    Edge::Conditional { targets, .. } => {
                        for target in targets {
                            self.check_target(source, target)?;
                        }
                    }
                }
            }
        }

        for name in self.nodes.keys() {
            if self.edges_from(name).is_empty() {
                return Err(GraphError::Validation(format!(
                    "node '{name}' has no outgoing edge and can never reach END"
                )));
            }
        }

        Ok(())
    }

    fn check_target(&self, source: &str, target: &str) -> Result<(), GraphError> {
        if target != END && !self.nodes.contains_key(target) {
            return Err(GraphError::Validation(format!(
                "edge from '{source}' targets unknown node '{target}'"
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut nodes: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        nodes.sort_unstable();
        f.debug_struct("Graph")
            .field("nodes", &nodes)
            .field("edges", &self.edges.values().map(Vec::len).sum::<usize>())
            .field("schema", &self.schema)
            .finish()
    }
}
