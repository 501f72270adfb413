//! Append-only token usage ledger
//!
//! The ledger meters externally billed resource consumption (LLM tokens,
//! search calls) per node invocation. It sits deliberately *outside* the
//! executor's rollback boundary: a failed attempt's state delta is discarded,
//! but the tokens it burned were real, so its usage record stays. Every
//! attempt appends its own record; nothing is ever overwritten.
//!
//! Records live under a namespace (the executor uses the run id), each keyed
//! `"{namespace}:{seq}"` from an atomic per-namespace counter, so concurrent
//! writers never collide.
//!
//! At run completion the executor summarizes a namespace grouped by node name
//! and, when a [`UsageSink`] is configured, drains the raw records to it keyed
//! by session id. Sink failures are logged and swallowed; metering must never
//! fail a run that otherwise succeeded.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Errors raised by ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// An explicit put targeted a key that already holds a record
    #[error("Key '{0}' already holds a record; the ledger never overwrites")]
    DuplicateKey(String),

    /// Summarize was asked to group by a field records do not carry
    #[error("Records have no groupable field '{0}'")]
    UnknownGroupKey(String),

    /// A record could not be serialized for grouping
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// One metered node invocation. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsageRecord {
    /// Node that performed the call
    pub node: String,
    /// Attempt number (1-based) within the retry loop
    pub attempt: usize,
    /// Tokens consumed by the prompt
    pub input_tokens: u64,
    /// Tokens produced by the completion
    pub output_tokens: u64,
    /// Total billed tokens
    pub total_tokens: u64,
    /// Number of external search calls performed during the invocation
    #[serde(default)]
    pub search_count: u64,
}

/// Aggregated usage for one summary group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub search_count: u64,
}

impl UsageTotals {
    /// Fold one record into the totals.
    pub fn absorb(&mut self, record: &TokenUsageRecord) {
        self.input_tokens = self.input_tokens.saturating_add(record.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(record.output_tokens);
        self.total_tokens = self.total_tokens.saturating_add(record.total_tokens);
        self.search_count = self.search_count.saturating_add(record.search_count);
    }
}

#[derive(Default)]
struct NamespaceState {
    seq: AtomicU64,
    records: RwLock<Vec<(String, TokenUsageRecord)>>,
}

/// In-memory append-only usage store.
///
/// Cloning is cheap and shares the underlying storage, so the executor can
/// hand a clone to every node context.
///
/// # Examples
///
/// ```rust
/// use daygraph_core::ledger::{TokenLedger, TokenUsageRecord};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let ledger = TokenLedger::new();
/// let key = ledger
///     .append("run-1", TokenUsageRecord {
///         node: "classify".to_string(),
///         attempt: 1,
///         input_tokens: 120,
///         output_tokens: 40,
///         total_tokens: 160,
///         search_count: 0,
///     })
///     .await;
/// assert_eq!(key, "run-1:0");
///
/// let summary = ledger.summarize("run-1", "node").await.unwrap();
/// assert_eq!(summary["classify"].total_tokens, 160);
/// # });
/// ```
#[derive(Clone, Default)]
pub struct TokenLedger {
    namespaces: Arc<RwLock<HashMap<String, Arc<NamespaceState>>>>,
}

impl TokenLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    async fn namespace(&self, namespace: &str) -> Arc<NamespaceState> {
        {
            let read = self.namespaces.read().await;
            if let Some(slot) = read.get(namespace) {
                return slot.clone();
            }
        }
        let mut write = self.namespaces.write().await;
        write.entry(namespace.to_string()).or_default().clone()
    }

    /// Append a record under a generated `"{namespace}:{seq}"` key and return
    /// the key. Safe to call from concurrent writers.
    pub async fn append(&self, namespace: &str, record: TokenUsageRecord) -> String {
        let slot = self.namespace(namespace).await;
        let seq = slot.seq.fetch_add(1, Ordering::SeqCst);
        let key = format!("{}:{}", namespace, seq);
        slot.records.write().await.push((key.clone(), record));
        key
    }

    /// Store a record under an explicit key. Fails if the key already holds a
    /// record; the ledger never overwrites.
    pub async fn put(&self, namespace: &str, key: &str, record: TokenUsageRecord) -> Result<()> {
        let slot = self.namespace(namespace).await;
        let mut records = slot.records.write().await;
        if records.iter().any(|(existing, _)| existing == key) {
            return Err(LedgerError::DuplicateKey(key.to_string()));
        }
        records.push((key.to_string(), record));
        Ok(())
    }

    /// All records in a namespace, in append order. An unknown namespace
    /// yields an empty list.
    pub async fn search(&self, namespace: &str) -> Vec<(String, TokenUsageRecord)> {
        let read = self.namespaces.read().await;
        match read.get(namespace) {
            Some(slot) => slot.records.read().await.clone(),
            None => Vec::new(),
        }
    }

    /// Number of records in a namespace.
    pub async fn len(&self, namespace: &str) -> usize {
        let read = self.namespaces.read().await;
        match read.get(namespace) {
            Some(slot) => slot.records.read().await.len(),
            None => 0,
        }
    }

    /// Aggregate a namespace's numeric fields, grouped by a record field
    /// (typically `"node"`).
    pub async fn summarize(
        &self,
        namespace: &str,
        group_by: &str,
    ) -> Result<HashMap<String, UsageTotals>> {
        let mut totals: HashMap<String, UsageTotals> = HashMap::new();
        for (_, record) in self.search(namespace).await {
            let value = serde_json::to_value(&record)?;
            let group = match value.get(group_by) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => return Err(LedgerError::UnknownGroupKey(group_by.to_string())),
            };
            totals.entry(group).or_default().absorb(&record);
        }
        Ok(totals)
    }
}

/// Errors raised by a persistence sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink could not be reached
    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    /// The sink rejected the record
    #[error("Sink rejected record: {0}")]
    Rejected(String),
}

/// Destination for usage records at run completion.
///
/// `upsert_usage` must be idempotent per session id; the executor may drain
/// the same run's records again after a partial failure.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn upsert_usage(
        &self,
        session: Uuid,
        record: &TokenUsageRecord,
    ) -> std::result::Result<(), SinkError>;
}
