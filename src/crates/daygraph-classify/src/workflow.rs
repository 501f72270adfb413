//! Workflow graph assembly
//!
//! Wires the node bodies from [`crate::nodes`] into the classification
//! graph:
//!
//! ```text
//! START -> enrich-app-description -> (purpose router)
//!     single-purpose items    -> classify-single-purpose -> END
//!     multi-purpose items     -> duration-router -> (duration router)
//!         under threshold     -> classify-multi-purpose -> END
//!         at/over threshold   -> search-title fan-out (one private-payload
//!                                task per long item)
//!     search-title -> classify-long-form -> END
//! ```
//!
//! Routers only ever look at the merged state; the duration router is the
//! one place private-payload tasks are constructed.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use daygraph_core::{
    AppendReducer, CompletionModel, Graph, KeepFirstReducer, RouteOutcome, StateSchema,
    SumReducer, Task, END, START,
};

use crate::config::ClassifyConfig;
use crate::model::{fields, ClassifyState};
use crate::nodes::{self, ReferenceData, TitleSearchPayload};

pub const ENRICH_APP_DESCRIPTION: &str = "enrich-app-description";
pub const CLASSIFY_SINGLE_PURPOSE: &str = "classify-single-purpose";
pub const DURATION_ROUTER: &str = "duration-router";
pub const CLASSIFY_MULTI_PURPOSE: &str = "classify-multi-purpose";
pub const SEARCH_TITLE: &str = "search-title";
pub const CLASSIFY_LONG_FORM: &str = "classify-long-form";

/// Engine state field folded with the per-node usage summary at completion.
pub const USAGE_FIELD: &str = fields::NODE_TOKEN_USAGE;

/// Reducer schema for [`ClassifyState`].
///
/// One field, one merge policy: the registry keeps the first non-empty
/// value per field, both item lists append, and usage totals add.
pub fn state_schema() -> StateSchema {
    StateSchema::new()
        .with_field(fields::APP_REGISTRY, Box::new(KeepFirstReducer))
        .with_field(fields::LOG_ITEMS, Box::new(AppendReducer))
        .with_field(fields::RESULT_ITEMS, Box::new(AppendReducer))
        .with_field(fields::NODE_TOKEN_USAGE, Box::new(SumReducer))
}

/// Assemble the classification graph.
///
/// The returned graph passes [`Graph::validate`]; the classifier still
/// validates before every run.
pub fn build_graph(
    backend: Arc<dyn CompletionModel>,
    reference: Arc<ReferenceData>,
    config: &ClassifyConfig,
) -> Graph {
    let limits = config.batch_limits();
    let threshold = config.long_form_threshold_secs;

    let mut graph = Graph::new(state_schema());
    graph
        .add_node(
            ENRICH_APP_DESCRIPTION,
            nodes::enrich_app_description(backend.clone(), limits),
        )
        .add_node(
            CLASSIFY_SINGLE_PURPOSE,
            nodes::classify_single_purpose(backend.clone(), reference.clone(), limits),
        )
        .add_node(DURATION_ROUTER, nodes::duration_router())
        .add_node(
            CLASSIFY_MULTI_PURPOSE,
            nodes::classify_multi_purpose(backend.clone(), reference.clone(), limits, threshold),
        )
        .add_node(SEARCH_TITLE, nodes::search_title(backend.clone()))
        .add_node(
            CLASSIFY_LONG_FORM,
            nodes::classify_long_form(backend, reference, limits),
        );

    graph
        .add_edge(START, ENRICH_APP_DESCRIPTION)
        .add_conditional_edge(
            ENRICH_APP_DESCRIPTION,
            move |state: &Value| purpose_route(state, threshold),
            [CLASSIFY_SINGLE_PURPOSE, DURATION_ROUTER],
        )
        .add_edge(CLASSIFY_SINGLE_PURPOSE, END)
        .add_conditional_edge(
            DURATION_ROUTER,
            move |state: &Value| duration_route(state, threshold),
            [CLASSIFY_MULTI_PURPOSE, SEARCH_TITLE],
        )
        .add_edge(CLASSIFY_MULTI_PURPOSE, END)
        .add_edge(SEARCH_TITLE, CLASSIFY_LONG_FORM)
        .add_edge(CLASSIFY_LONG_FORM, END);

    graph
}

/// Route items to the single-purpose branch, the multi-purpose branch, or
/// both, by what the log actually contains.
fn purpose_route(state: &Value, threshold_secs: f64) -> RouteOutcome {
    let Some(state) = decode(state) else {
        return RouteOutcome::end();
    };

    let mut targets = Vec::new();
    if !state.single_purpose_items().is_empty() {
        targets.push(CLASSIFY_SINGLE_PURPOSE);
    }
    let has_multi = !state.short_multi_purpose_items(threshold_secs).is_empty()
        || !state.long_multi_purpose_items(threshold_secs).is_empty();
    if has_multi {
        targets.push(DURATION_ROUTER);
    }

    if targets.is_empty() {
        return RouteOutcome::end();
    }
    RouteOutcome::from(targets)
}

/// Split the multi-purpose branch by duration.
///
/// Short items continue as one full-state task; each long item becomes its
/// own private-payload title-search task carrying the item and its registry
/// entry.
fn duration_route(state: &Value, threshold_secs: f64) -> RouteOutcome {
    let Some(state) = decode(state) else {
        return RouteOutcome::end();
    };

    let mut tasks = Vec::new();
    if !state.short_multi_purpose_items(threshold_secs).is_empty() {
        tasks.push(Task::full(CLASSIFY_MULTI_PURPOSE));
    }
    for item in state.long_multi_purpose_items(threshold_secs) {
        let payload = TitleSearchPayload {
            app_info: state.app_registry.get(&item.app).cloned(),
            item,
        };
        match serde_json::to_value(&payload) {
            Ok(value) => tasks.push(Task::with_payload(SEARCH_TITLE, value)),
            Err(error) => warn!(
                id = %payload.item.id,
                %error,
                "payload encode failed, item stays unclassified"
            ),
        }
    }

    if tasks.is_empty() {
        return RouteOutcome::end();
    }
    RouteOutcome::Tasks(tasks)
}

/// Decode the engine state inside a router, ending the branch on failure.
fn decode(state: &Value) -> Option<ClassifyState> {
    match ClassifyState::from_value(state.clone()) {
        Ok(state) => Some(state),
        Err(error) => {
            warn!(%error, "state decode failed in router, ending branch");
            None
        }
    }
}
