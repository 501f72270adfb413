//! Node bodies for the classification workflow
//!
//! Each constructor here returns a closure suitable for
//! [`Graph::add_node`](daygraph_core::Graph::add_node). The backend handle,
//! reference data, and batch limits are injected at assembly time; state
//! flows in as the engine value and flows out as a per-field delta. Nodes
//! never mutate state in place and never abort the run: a backend failure
//! fails only the invoking branch, and a garbled reply degrades to
//! unclassified items.
//!
//! Metering contract: every backend call appends a usage record through the
//! node context before the reply is even parsed, so retried and failed
//! attempts still count.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use daygraph_core::{CompletionModel, Message, NodeContext, NodeFailure, NodeFuture};

use crate::batch::{plan, BatchLimits};
use crate::model::{fields, AppInfo, CategoryTree, ClassifyState, Goal, LogItem};
use crate::parser;
use crate::prompt;

/// Read-only reference data baked into node closures at assembly time.
///
/// Goals and the category tree never change mid-run, so they live outside
/// the merged state entirely.
#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    pub goals: Vec<Goal>,
    pub category_tree: CategoryTree,
}

/// Private payload handed to one title-search task.
///
/// Carries the item plus the registry entry for its app so the node needs
/// nothing from the aggregate state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TitleSearchPayload {
    pub item: LogItem,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_info: Option<AppInfo>,
}

/// Fill missing app descriptions via the backend, batched per app.
///
/// The delta touches only the `description` field of apps the backend
/// described; keep-first merge semantics protect descriptions that already
/// exist.
pub fn enrich_app_description(
    backend: Arc<dyn CompletionModel>,
    limits: BatchLimits,
) -> impl Fn(Value, NodeContext) -> NodeFuture + Send + Sync + 'static {
    move |state, ctx| {
        let backend = backend.clone();
        Box::pin(async move {
            let state = decode_state(&ctx, state)?;
            let pending: Vec<(String, AppInfo)> = state
                .app_registry
                .iter()
                .filter(|(_, info)| info.needs_description())
                .map(|(app, info)| (app.clone(), info.clone()))
                .collect();
            if pending.is_empty() {
                debug!(node = ctx.node(), "every app already has a description");
                return Ok(Value::Null);
            }

            let mut described = serde_json::Map::new();
            for batch in plan(&pending, &limits) {
                let entries: Vec<(&str, &AppInfo)> = batch
                    .iter()
                    .map(|(app, info)| (app.as_str(), info))
                    .collect();
                let messages = prompt::enrichment_messages(&entries);
                let completion = backend
                    .complete(messages)
                    .await
                    .map_err(|error| error.into_failure(ctx.node()))?;
                ctx.record_usage(completion.usage, 0).await;

                for (app, description) in parser::parse_descriptions(&completion.content) {
                    if !state.app_registry.contains_key(&app) {
                        warn!(app, "reply describes an unknown app, ignoring");
                        continue;
                    }
                    let mut info = serde_json::Map::new();
                    info.insert("description".to_string(), Value::String(description));
                    described.insert(app, Value::Object(info));
                }
            }

            if described.is_empty() {
                return Ok(Value::Null);
            }
            Ok(delta(fields::APP_REGISTRY, Value::Object(described)))
        })
    }
}

/// Classify items from single-purpose apps.
pub fn classify_single_purpose(
    backend: Arc<dyn CompletionModel>,
    reference: Arc<ReferenceData>,
    limits: BatchLimits,
) -> impl Fn(Value, NodeContext) -> NodeFuture + Send + Sync + 'static {
    move |state, ctx| {
        let backend = backend.clone();
        let reference = reference.clone();
        Box::pin(async move {
            let state = decode_state(&ctx, state)?;
            let selected = state.single_purpose_items();
            classify_batches(
                &backend,
                &ctx,
                selected,
                &state.app_registry,
                &reference,
                &limits,
                prompt::single_purpose_messages,
            )
            .await
        })
    }
}

/// Classify short-duration items from multi-purpose apps.
pub fn classify_multi_purpose(
    backend: Arc<dyn CompletionModel>,
    reference: Arc<ReferenceData>,
    limits: BatchLimits,
    long_form_threshold_secs: f64,
) -> impl Fn(Value, NodeContext) -> NodeFuture + Send + Sync + 'static {
    move |state, ctx| {
        let backend = backend.clone();
        let reference = reference.clone();
        Box::pin(async move {
            let state = decode_state(&ctx, state)?;
            let selected = state.short_multi_purpose_items(long_form_threshold_secs);
            classify_batches(
                &backend,
                &ctx,
                selected,
                &state.app_registry,
                &reference,
                &limits,
                prompt::multi_purpose_messages,
            )
            .await
        })
    }
}

/// Classify title-analyzed long-form items.
pub fn classify_long_form(
    backend: Arc<dyn CompletionModel>,
    reference: Arc<ReferenceData>,
    limits: BatchLimits,
) -> impl Fn(Value, NodeContext) -> NodeFuture + Send + Sync + 'static {
    move |state, ctx| {
        let backend = backend.clone();
        let reference = reference.clone();
        Box::pin(async move {
            let state = decode_state(&ctx, state)?;
            let selected = state.analyzed_items();
            classify_batches(
                &backend,
                &ctx,
                selected,
                &state.app_registry,
                &reference,
                &limits,
                prompt::long_form_messages,
            )
            .await
        })
    }
}

/// Pass-through body for the duration branch point.
///
/// The real work happens in the conditional router on its outgoing edge;
/// the node itself proposes no delta.
pub fn duration_router() -> impl Fn(Value, NodeContext) -> NodeFuture + Send + Sync + 'static {
    |_state, ctx| {
        Box::pin(async move {
            debug!(node = ctx.node(), "branching on duration");
            Ok(Value::Null)
        })
    }
}

/// Research one long-session window title.
///
/// Receives a [`TitleSearchPayload`] rather than the aggregate state and
/// appends an analyzed copy of the item back to `log_items`. The usage
/// record carries `search_count = 1`, the metered external lookup.
pub fn search_title(
    backend: Arc<dyn CompletionModel>,
) -> impl Fn(Value, NodeContext) -> NodeFuture + Send + Sync + 'static {
    move |payload, ctx| {
        let backend = backend.clone();
        Box::pin(async move {
            let payload: TitleSearchPayload = serde_json::from_value(payload).map_err(|error| {
                NodeFailure::permanent(ctx.node(), format!("payload decode failed: {error}"))
            })?;
            let mut item = payload.item;

            let messages = prompt::title_analysis_messages(&item, payload.app_info.as_ref());
            let completion = backend
                .complete(messages)
                .await
                .map_err(|error| error.into_failure(ctx.node()))?;
            ctx.record_usage(completion.usage, 1).await;

            let analysis = completion.content.trim();
            if analysis.is_empty() {
                warn!(node = ctx.node(), id = %item.id, "backend returned an empty title analysis");
                return Ok(Value::Null);
            }
            item.title_analysis = Some(analysis.to_string());
            debug!(node = ctx.node(), id = %item.id, "title analyzed");

            let items = serde_json::to_value(vec![item])
                .map_err(|error| encode_failure(&ctx, error))?;
            Ok(delta(fields::LOG_ITEMS, items))
        })
    }
}

type ClassifyMessages =
    fn(&[&LogItem], &BTreeMap<String, AppInfo>, &CategoryTree, &[Goal]) -> Vec<Message>;

/// Shared batch loop for the three classification nodes.
///
/// Every selected item ends up in the delta, classified or not, so the
/// append into `result_items` preserves the input count even when a reply
/// parses to nothing.
async fn classify_batches(
    backend: &Arc<dyn CompletionModel>,
    ctx: &NodeContext,
    selected: Vec<LogItem>,
    registry: &BTreeMap<String, AppInfo>,
    reference: &ReferenceData,
    limits: &BatchLimits,
    build_messages: ClassifyMessages,
) -> Result<Value, NodeFailure> {
    if selected.is_empty() {
        debug!(node = ctx.node(), "no items to classify");
        return Ok(Value::Null);
    }

    let mut classified: Vec<LogItem> = Vec::with_capacity(selected.len());
    for batch in plan(&selected, limits) {
        let messages = build_messages(
            &batch,
            registry,
            &reference.category_tree,
            &reference.goals,
        );
        let completion = backend
            .complete(messages)
            .await
            .map_err(|error| error.into_failure(ctx.node()))?;
        ctx.record_usage(completion.usage, 0).await;

        let parsed = parser::parse_classifications(&completion.content);
        let mut items: Vec<LogItem> = batch.into_iter().cloned().collect();
        let applied = parser::apply_classifications(&mut items, &parsed);
        debug!(
            node = ctx.node(),
            items = items.len(),
            applied,
            "classified batch"
        );
        classified.extend(items);
    }

    let items = serde_json::to_value(classified).map_err(|error| encode_failure(ctx, error))?;
    Ok(delta(fields::RESULT_ITEMS, items))
}

fn decode_state(ctx: &NodeContext, value: Value) -> Result<ClassifyState, NodeFailure> {
    ClassifyState::from_value(value).map_err(|error| {
        NodeFailure::permanent(ctx.node(), format!("state decode failed: {error}"))
    })
}

fn encode_failure(ctx: &NodeContext, error: serde_json::Error) -> NodeFailure {
    NodeFailure::permanent(ctx.node(), format!("delta encode failed: {error}"))
}

/// A one-field delta object.
fn delta(field: &str, value: Value) -> Value {
    let mut map = serde_json::Map::new();
    map.insert(field.to_string(), value);
    Value::Object(map)
}
