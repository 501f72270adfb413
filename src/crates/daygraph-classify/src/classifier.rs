//! Synchronous run surface
//!
//! [`Classifier`] owns the backend handle, the configuration, and an
//! optional usage sink, and turns `(log_items, app_registry, goals,
//! category_tree)` into a completed [`ClassifyOutcome`]. One call, one run:
//! the graph is rebuilt per call so reference data stays immutable for the
//! run's lifetime.
//!
//! The run surface guarantees count parity: every input item comes back in
//! `result_items` exactly once, in input order. Items whose branch failed or
//! whose reply was unusable come back with null classification fields.

use std::collections::{BTreeMap, HashMap};
use std::mem;
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use daygraph_core::{CompletionModel, Executor, RunReport, UsageSink, UsageTotals};

use crate::config::ClassifyConfig;
use crate::error::Result;
use crate::model::{AppInfo, CategoryTree, ClassifyState, Goal, LogItem};
use crate::nodes::ReferenceData;
use crate::providers::ClassifyInputs;
use crate::workflow;

/// A completed classification run.
#[derive(Debug)]
pub struct ClassifyOutcome {
    /// Final aggregate state, with `result_items` restored to input order
    /// and padded to input count
    pub state: ClassifyState,
    /// Per-node usage totals drawn from the run's ledger
    pub token_summary: HashMap<String, UsageTotals>,
    /// Per-node outcome report
    pub report: RunReport,
    /// Run identifier, also the ledger namespace
    pub run_id: Uuid,
}

impl ClassifyOutcome {
    /// The classified items, one per input item, in input order.
    pub fn items(&self) -> &[LogItem] {
        &self.state.result_items
    }
}

/// Behavior-classification entry point.
pub struct Classifier {
    backend: Arc<dyn CompletionModel>,
    config: ClassifyConfig,
    sink: Option<Arc<dyn UsageSink>>,
}

impl Classifier {
    /// Create a classifier, rejecting invalid configuration up front.
    pub fn new(backend: Arc<dyn CompletionModel>, config: ClassifyConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            backend,
            config,
            sink: None,
        })
    }

    /// Drain usage records to `sink` when a run completes.
    pub fn with_sink(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Classify inputs gathered from data providers.
    pub async fn classify_inputs(&self, inputs: ClassifyInputs) -> Result<ClassifyOutcome> {
        self.classify(
            inputs.log_items,
            inputs.app_registry,
            inputs.goals,
            inputs.category_tree,
        )
        .await
    }

    /// Classify a set of log items against reference data.
    ///
    /// Runs the workflow graph to completion. Node failures never surface
    /// here; only run-level faults (step limit, cancellation, state
    /// conversion) return an error.
    pub async fn classify(
        &self,
        log_items: Vec<LogItem>,
        app_registry: BTreeMap<String, AppInfo>,
        goals: Vec<Goal>,
        category_tree: CategoryTree,
    ) -> Result<ClassifyOutcome> {
        info!(
            items = log_items.len(),
            apps = app_registry.len(),
            model = %self.config.model,
            "starting classification run"
        );

        let originals = log_items.clone();
        let reference = Arc::new(ReferenceData {
            goals,
            category_tree,
        });
        let graph = workflow::build_graph(self.backend.clone(), reference, &self.config);

        let initial = ClassifyState::new(log_items, app_registry).into_value()?;
        let mut executor = Executor::new(graph)
            .with_retry_policy(self.config.retry_policy())
            .with_concurrency(self.config.concurrency)
            .with_max_supersteps(self.config.max_supersteps)
            .with_usage_field(workflow::USAGE_FIELD);
        if let Some(sink) = &self.sink {
            executor = executor.with_sink(sink.clone());
        }

        let outcome = executor.run(initial).await?;
        let mut state = ClassifyState::from_value(outcome.state)?;
        state.result_items = finalize_results(mem::take(&mut state.result_items), &originals);

        info!(
            run_id = %outcome.run_id,
            items = state.result_items.len(),
            classified = state.result_items.iter().filter(|i| i.is_classified()).count(),
            supersteps = outcome.report.supersteps(),
            "classification run complete"
        );

        Ok(ClassifyOutcome {
            state,
            token_summary: outcome.usage,
            report: outcome.report,
            run_id: outcome.run_id,
        })
    }
}

/// Restore input order and count over the merged `result_items`.
///
/// Inputs that classification never reached come back unclassified; result
/// entries matching no input id are dropped.
fn finalize_results(results: Vec<LogItem>, originals: &[LogItem]) -> Vec<LogItem> {
    let mut classified: HashMap<String, LogItem> = HashMap::with_capacity(results.len());
    for item in results {
        classified.entry(item.id.clone()).or_insert(item);
    }

    let mut ordered = Vec::with_capacity(originals.len());
    for original in originals {
        match classified.remove(&original.id) {
            Some(item) => ordered.push(item),
            None => {
                warn!(id = %original.id, "item missed classification, returned unclassified");
                ordered.push(original.clone());
            }
        }
    }
    for id in classified.into_keys() {
        warn!(%id, "dropping result item with no matching input");
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClassifyError;
    use crate::model::Classification;
    use async_trait::async_trait;
    use daygraph_core::{BackendError, Completion, Message};

    struct NullModel;

    #[async_trait]
    impl CompletionModel for NullModel {
        async fn complete(
            &self,
            _messages: Vec<Message>,
        ) -> std::result::Result<Completion, BackendError> {
            Ok(Completion {
                content: "{}".to_string(),
                usage: Default::default(),
            })
        }
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let config = ClassifyConfig {
            max_items: 0,
            ..ClassifyConfig::default()
        };
        let result = Classifier::new(Arc::new(NullModel), config);
        assert!(matches!(result, Err(ClassifyError::Config(_))));
    }

    #[test]
    fn finalize_pads_missing_items_in_input_order() {
        let originals = vec![
            LogItem::new("1", "code", "main.rs", 60.0),
            LogItem::new("2", "chrome", "news", 30.0),
            LogItem::new("3", "chrome", "movie", 900.0),
        ];
        let mut classified = LogItem::new("3", "chrome", "movie", 900.0);
        classified.set_classification(Classification::new(
            Some("Leisure".into()),
            None,
            None,
        ));
        let mut also = LogItem::new("1", "code", "main.rs", 60.0);
        also.set_classification(Classification::new(Some("Work".into()), None, None));

        let finalized = finalize_results(vec![classified, also], &originals);

        let ids: Vec<&str> = finalized.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["1", "2", "3"]);
        assert_eq!(finalized[0].category.as_deref(), Some("Work"));
        assert!(finalized[1].category.is_none());
        assert_eq!(finalized[2].category.as_deref(), Some("Leisure"));
    }

    #[test]
    fn finalize_drops_results_without_matching_input() {
        let originals = vec![LogItem::new("1", "code", "main.rs", 60.0)];
        let results = vec![
            LogItem::new("1", "code", "main.rs", 60.0),
            LogItem::new("99", "ghost", "??", 1.0),
        ];

        let finalized = finalize_results(results, &originals);
        assert_eq!(finalized.len(), 1);
        assert_eq!(finalized[0].id, "1");
    }

    #[test]
    fn finalize_keeps_first_duplicate() {
        let originals = vec![LogItem::new("1", "code", "main.rs", 60.0)];
        let mut first = LogItem::new("1", "code", "main.rs", 60.0);
        first.set_classification(Classification::new(Some("Work".into()), None, None));
        let mut second = LogItem::new("1", "code", "main.rs", 60.0);
        second.set_classification(Classification::new(Some("Leisure".into()), None, None));

        let finalized = finalize_results(vec![first, second], &originals);
        assert_eq!(finalized.len(), 1);
        assert_eq!(finalized[0].category.as_deref(), Some("Work"));
    }
}
