//! Classification backend interface
//!
//! The engine never talks to a concrete LLM provider. Node bodies receive an
//! `Arc<dyn CompletionModel>` injected at construction time and call
//! [`CompletionModel::complete`] with an ordered message list; the reply
//! carries the text plus the token usage the call consumed.
//!
//! Backend failures are two-kinded on purpose: [`BackendError::Transient`]
//! maps to a retryable node failure, [`BackendError::Permanent`] aborts the
//! branch immediately.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{FailureKind, NodeFailure};

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in a completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Token consumption reported by the backend for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

/// A completed backend call: reply text plus metered usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    pub usage: Usage,
}

/// Errors a classification backend can produce.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    /// Network failure, 5xx, rate limiting. Worth retrying.
    #[error("Transient backend failure: {0}")]
    Transient(String),

    /// Authentication or request validation failure. Retrying cannot help.
    #[error("Permanent backend failure: {0}")]
    Permanent(String),
}

impl BackendError {
    /// The node failure kind this error maps to.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            BackendError::Transient(_) => FailureKind::Transient,
            BackendError::Permanent(_) => FailureKind::Permanent,
        }
    }

    /// Convert into a [`NodeFailure`] attributed to `node`.
    pub fn into_failure(self, node: impl Into<String>) -> NodeFailure {
        let kind = self.failure_kind();
        NodeFailure::new(node, kind, self.to_string())
    }
}

/// The classification backend consumed by node bodies.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    /// Submit an ordered message list and await the reply.
    async fn complete(&self, messages: Vec<Message>) -> Result<Completion, BackendError>;
}
