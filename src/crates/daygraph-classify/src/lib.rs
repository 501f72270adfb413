//! # daygraph-classify
//!
//! Behavior classification on top of the `daygraph-core` engine: activity-log
//! items fan out across parallel classification branches, partial results
//! merge per field, and every backend call is metered.
//!
//! A run takes log items, an app registry, the user's category tree, and
//! their goals. Single-purpose apps classify on the app alone; short
//! multi-purpose sessions classify on the window title; long multi-purpose
//! sessions first fan out into one title-research task per item, then
//! classify on the research. Whatever happens to individual branches, every
//! input item comes back exactly once - classification is best-effort
//! enrichment, and items the backend could not be asked about (or answered
//! uselessly about) return with null classification fields.
//!
//! # Workflow
//!
//! ```text
//! START ─► enrich-app-description ─► (purpose router)
//!             │                           │
//!             ▼                           ▼
//!   classify-single-purpose        duration-router
//!             │                     │           │
//!             ▼                     ▼           ▼ (one task per long item)
//!            END        classify-multi-purpose  search-title ×N
//!                                   │               │
//!                                   ▼               ▼
//!                                  END      classify-long-form ─► END
//! ```
//!
//! # Modules
//!
//! - [`model`] - `LogItem`, `AppInfo`, `Goal`, the category tree, and the
//!   aggregate [`ClassifyState`]
//! - [`batch`] - deterministic batch planning under count and size budgets
//! - [`parser`] - tolerant parsing of backend replies
//! - [`prompt`] - system prompts and deterministic prompt builders
//! - [`nodes`] - node bodies wired to the backend
//! - [`workflow`] - reducer schema, routers, and graph assembly
//! - [`classifier`] - the synchronous run surface
//! - [`config`] - TOML-loadable run configuration
//! - [`providers`] - consumed data-provider traits
//! - [`error`] - configuration and run errors
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//! use daygraph_classify::{Classifier, ClassifyConfig, CategoryTree, LogItem};
//! # use daygraph_core::{BackendError, Completion, CompletionModel, Message};
//! # struct MyBackend;
//! # #[async_trait::async_trait]
//! # impl CompletionModel for MyBackend {
//! #     async fn complete(&self, _: Vec<Message>) -> Result<Completion, BackendError> {
//! #         unimplemented!()
//! #     }
//! # }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let backend = Arc::new(MyBackend);
//! let classifier = Classifier::new(backend, ClassifyConfig::default()).unwrap();
//!
//! let items = vec![LogItem::new("1", "code", "main.rs", 120.0)];
//! let outcome = classifier
//!     .classify(items, BTreeMap::new(), vec![], CategoryTree::new())
//!     .await
//!     .unwrap();
//! assert_eq!(outcome.items().len(), 1);
//! # });
//! ```

pub mod batch;
pub mod classifier;
pub mod config;
pub mod error;
pub mod model;
pub mod nodes;
pub mod parser;
pub mod prompt;
pub mod providers;
pub mod workflow;

// Run surface
pub use classifier::{Classifier, ClassifyOutcome};

// Configuration
pub use config::ClassifyConfig;

// Errors
pub use error::{ClassifyError, ConfigError, Result};

// Domain model
pub use model::{
    AppInfo, CategoryTree, Classification, ClassifyState, Goal, LogItem, RawLogRecord,
};

// Batching
pub use batch::BatchLimits;

// Graph assembly
pub use nodes::ReferenceData;
pub use workflow::{build_graph, state_schema};

// Data providers
pub use providers::{
    AppRegistrySource, BehaviorLogSource, CategoryTreeSource, ClassifyInputs, GoalSource,
    ProviderError, TimeRange,
};
