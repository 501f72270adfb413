//! Error types for graph construction and execution
//!
//! Two families of errors live here. [`GraphError`] covers structural problems
//! caught at build/validation time; a malformed graph is the only condition
//! that is ever fatal before a run starts. [`ExecutorError`] covers run-level
//! failures: the superstep safety limit, cancellation, and state machinery
//! breaking mid-run.
//!
//! Individual node failures are deliberately *not* part of either enum. A node
//! that exhausts its retries aborts only its own branch; the run carries on
//! and the outcome is reported per node. [`NodeFailure`] is the value a node
//! body (or the retry coordinator on its behalf) produces, tagged with a
//! [`FailureKind`] that decides whether another attempt is worthwhile.
//!
//! # Examples
//!
//! ```rust
//! use daygraph_core::error::{FailureKind, NodeFailure};
//!
//! let failure = NodeFailure::transient("classify-batch", "backend returned 503");
//! assert!(failure.is_retryable());
//!
//! let failure = NodeFailure::permanent("classify-batch", "invalid API key");
//! assert!(!failure.is_retryable());
//! assert_eq!(failure.kind, FailureKind::Permanent);
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a node failure, used by the retry coordinator to decide
/// whether another attempt may succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Temporary condition (network hiccup, 5xx, rate limit). Retryable.
    Transient,
    /// The operation cannot succeed by repeating it (auth, validation). Not retryable.
    Permanent,
    /// The invocation exceeded its time limit. Retryable.
    Timeout,
}

impl FailureKind {
    /// Whether a failure of this kind is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::Transient | FailureKind::Timeout)
    }
}

/// A failed node invocation.
///
/// Produced by node bodies when an attempt fails and consumed by the retry
/// coordinator. After retries are exhausted (or immediately for a
/// [`FailureKind::Permanent`] failure) the executor records it in the run
/// report and drops the branch; it never aborts the run.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Node '{node}' failed ({kind:?}): {message}")]
pub struct NodeFailure {
    /// Name of the node that failed
    pub node: String,
    /// Whether the failure is worth retrying
    pub kind: FailureKind,
    /// Human-readable description
    pub message: String,
}

impl NodeFailure {
    /// Create a failure with an explicit kind.
    pub fn new(node: impl Into<String>, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            kind,
            message: message.into(),
        }
    }

    /// Create a retryable transient failure.
    pub fn transient(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(node, FailureKind::Transient, message)
    }

    /// Create a non-retryable permanent failure.
    pub fn permanent(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(node, FailureKind::Permanent, message)
    }

    /// Create a retryable timeout failure.
    pub fn timeout(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(node, FailureKind::Timeout, message)
    }

    /// Whether the retry coordinator may attempt this node again.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Errors raised while building or validating a graph.
///
/// Validation happens once, before any run. A graph that passes
/// [`Graph::validate`](crate::graph::Graph::validate) cannot produce a
/// `GraphError` at run time.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Graph structure is invalid: missing entry, unknown edge target,
    /// dead-end node, or conflicting edge declarations.
    #[error("Graph validation failed: {0}")]
    Validation(String),
}

/// Errors that abort an entire run.
///
/// Note that a failing node is *not* in this list; branch failures surface in
/// the run report instead.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The superstep safety limit was exceeded, usually a sign of a routing
    /// cycle that never reaches the end sentinel.
    #[error("Maximum supersteps ({limit}) exceeded")]
    StepLimit {
        /// Configured superstep limit
        limit: usize,
    },

    /// The run was cancelled through its [`CancelToken`](crate::executor::CancelToken).
    /// In-flight node calls were allowed to finish but their deltas were dropped.
    #[error("Run cancelled after {completed_steps} supersteps")]
    Cancelled {
        /// Number of supersteps whose merges completed before cancellation
        completed_steps: usize,
    },

    /// The graph failed validation at run start.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// A reducer could not fold a delta into the aggregate, or the aggregate
    /// does not match the declared schema.
    #[error("State error: {0}")]
    State(#[from] crate::state::ReducerError),

    /// The usage ledger could not be summarized at completion.
    #[error("Ledger error: {0}")]
    Ledger(#[from] crate::ledger::LedgerError),

    /// State could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_kind_retryability() {
        assert!(FailureKind::Transient.is_retryable());
        assert!(FailureKind::Timeout.is_retryable());
        assert!(!FailureKind::Permanent.is_retryable());
    }

    #[test]
    fn node_failure_constructors() {
        let f = NodeFailure::transient("fetch", "connection reset");
        assert_eq!(f.node, "fetch");
        assert_eq!(f.kind, FailureKind::Transient);
        assert!(f.is_retryable());

        let f = NodeFailure::permanent("fetch", "bad credentials");
        assert!(!f.is_retryable());

        let f = NodeFailure::timeout("fetch", "no reply in 30s");
        assert_eq!(f.kind, FailureKind::Timeout);
        assert!(f.is_retryable());
    }

    #[test]
    fn node_failure_display_includes_node_and_kind() {
        let f = NodeFailure::transient("classify", "503");
        let text = format!("{}", f);
        assert!(text.contains("classify"));
        assert!(text.contains("Transient"));
        assert!(text.contains("503"));
    }

    #[test]
    fn executor_error_from_graph_error() {
        let err: ExecutorError = GraphError::Validation("no entry point".to_string()).into();
        assert!(format!("{}", err).contains("no entry point"));
    }
}
