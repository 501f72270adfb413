//! End-to-end workflow tests against a scripted backend.
//!
//! The scripted model recognizes each request kind by its system prompt and
//! answers in the reply format the parser expects, so these tests exercise
//! the real graph: enrichment, the purpose and duration routers, the
//! title-search fan-out, the barrier merge, and the run surface's count
//! guarantee.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use daygraph_classify::{
    AppInfo, CategoryTree, Classifier, ClassifyConfig, ClassifyOutcome, Goal, LogItem,
};
use daygraph_core::{
    BackendError, Completion, CompletionModel, Message, NodeOutcome, SinkError,
    TokenUsageRecord, Usage, UsageSink,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("daygraph_classify=debug,daygraph_core=debug")
        .with_test_writer()
        .try_init();
}

/// Backend double that answers every workflow request kind.
struct ScriptedModel {
    calls: Mutex<Vec<&'static str>>,
    fail_short_multi: bool,
    fail_next_enrichment: AtomicBool,
}

impl ScriptedModel {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_short_multi: false,
            fail_next_enrichment: AtomicBool::new(false),
        }
    }

    fn failing_short_multi() -> Self {
        Self {
            fail_short_multi: true,
            ..Self::new()
        }
    }

    fn failing_next_enrichment() -> Self {
        let model = Self::new();
        model.fail_next_enrichment.store(true, Ordering::SeqCst);
        model
    }

    fn calls_of(&self, kind: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == kind).count()
    }

    fn usage() -> Usage {
        Usage {
            input_tokens: 100,
            output_tokens: 20,
            total_tokens: 120,
        }
    }

    fn reply(content: String) -> Completion {
        Completion {
            content,
            usage: Self::usage(),
        }
    }
}

fn item_ids(prompt: &str) -> Vec<String> {
    prompt
        .split("\"id\":\"")
        .skip(1)
        .filter_map(|chunk| chunk.split('"').next())
        .map(String::from)
        .collect()
}

fn bullet_apps(prompt: &str) -> Vec<String> {
    prompt
        .lines()
        .filter_map(|line| line.strip_prefix("- "))
        .map(|rest| rest.split(" (").next().unwrap_or(rest).trim().to_string())
        .collect()
}

#[async_trait]
impl CompletionModel for ScriptedModel {
    async fn complete(&self, messages: Vec<Message>) -> Result<Completion, BackendError> {
        let system = messages.first().map(|m| m.content.as_str()).unwrap_or("");
        let user = messages.last().map(|m| m.content.as_str()).unwrap_or("");

        if system.contains("software catalog assistant") {
            self.calls.lock().unwrap().push("enrich");
            if self.fail_next_enrichment.swap(false, Ordering::SeqCst) {
                return Err(BackendError::Transient("503 from scripted backend".into()));
            }
            let mut reply = serde_json::Map::new();
            for app in bullet_apps(user) {
                reply.insert(app.clone(), json!(format!("Scripted description of {app}")));
            }
            return Ok(Self::reply(Value::Object(reply).to_string()));
        }

        if system.contains("research assistant") {
            self.calls.lock().unwrap().push("search");
            let title = user
                .lines()
                .find_map(|line| line.strip_prefix("Title: "))
                .unwrap_or("unknown");
            return Ok(Self::reply(format!("Looked up: {title}")));
        }

        // Classification. The long-form check comes first because its prompt
        // also mentions multi-purpose applications.
        let category = if user.contains("long-form sessions") {
            "Long"
        } else if user.contains("single-purpose applications") {
            "Single"
        } else {
            "Multi"
        };
        if category == "Multi" && self.fail_short_multi {
            self.calls.lock().unwrap().push("multi-rejected");
            return Err(BackendError::Permanent("scripted quota failure".into()));
        }
        self.calls.lock().unwrap().push(match category {
            "Single" => "single",
            "Multi" => "multi",
            _ => "long",
        });

        let mut reply = serde_json::Map::new();
        for id in item_ids(user) {
            reply.insert(id, json!([category, Value::Null, Value::Null]));
        }
        Ok(Self::reply(format!(
            "```json\n{}\n```",
            Value::Object(reply)
        )))
    }
}

struct RecordingSink {
    records: Mutex<Vec<(Uuid, TokenUsageRecord)>>,
}

impl RecordingSink {
    fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl UsageSink for RecordingSink {
    async fn upsert_usage(
        &self,
        session: Uuid,
        record: &TokenUsageRecord,
    ) -> Result<(), SinkError> {
        self.records.lock().unwrap().push((session, record.clone()));
        Ok(())
    }
}

fn registry() -> BTreeMap<String, AppInfo> {
    let mut registry = BTreeMap::new();
    registry.insert("code".to_string(), AppInfo::new("", false));
    registry.insert("terminal".to_string(), AppInfo::new("Terminal emulator", false));
    registry.insert("chrome".to_string(), AppInfo::new("", true));
    registry.insert("youtube".to_string(), AppInfo::new("Video site", true));
    registry
}

/// 5 single-purpose, 3 short multi-purpose, 4 long multi-purpose.
fn log_items() -> Vec<LogItem> {
    vec![
        LogItem::new("1", "code", "main.rs", 120.0),
        LogItem::new("2", "terminal", "htop", 900.0),
        LogItem::new("3", "code", "lib.rs", 45.0),
        LogItem::new("4", "terminal", "ssh prod", 60.0),
        LogItem::new("5", "code", "review.diff", 300.0),
        LogItem::new("6", "chrome", "news", 30.0),
        LogItem::new("7", "chrome", "mail", 120.0),
        LogItem::new("8", "chrome", "weather", 599.9),
        LogItem::new("9", "chrome", "rust conference talk", 600.0),
        LogItem::new("10", "youtube", "lofi stream", 900.0),
        LogItem::new("11", "chrome", "documentary", 1200.0),
        LogItem::new("12", "youtube", "lecture series", 3600.0),
    ]
}

fn tree() -> CategoryTree {
    let mut tree = CategoryTree::new();
    tree.insert("Single".to_string(), None);
    tree.insert("Multi".to_string(), None);
    tree.insert("Long".to_string(), None);
    tree
}

fn goals() -> Vec<Goal> {
    vec![Goal {
        goal: "Learn Rust".to_string(),
        category: "Single".to_string(),
        sub_category: None,
    }]
}

fn config() -> ClassifyConfig {
    ClassifyConfig {
        initial_interval: 0.01,
        jitter: false,
        ..ClassifyConfig::default()
    }
}

fn category_of<'a>(outcome: &'a ClassifyOutcome, id: &str) -> Option<&'a str> {
    outcome
        .items()
        .iter()
        .find(|item| item.id == id)
        .and_then(|item| item.category.as_deref())
}

fn item<'a>(outcome: &'a ClassifyOutcome, id: &str) -> &'a LogItem {
    outcome
        .items()
        .iter()
        .find(|item| item.id == id)
        .expect("item missing from outcome")
}

#[tokio::test]
async fn full_workflow_classifies_every_item() -> Result<()> {
    init_tracing();
    let model = Arc::new(ScriptedModel::new());
    let sink = Arc::new(RecordingSink::new());
    let classifier =
        Classifier::new(model.clone(), config())?.with_sink(sink.clone());

    let outcome = classifier
        .classify(log_items(), registry(), goals(), tree())
        .await?;

    // Count parity, input order.
    assert_eq!(outcome.items().len(), 12);
    let ids: Vec<&str> = outcome.items().iter().map(|i| i.id.as_str()).collect();
    assert_eq!(
        ids,
        ["1", "2", "3", "4", "5", "6", "7", "8", "9", "10", "11", "12"]
    );

    // Routing: each item classified by the branch its app and duration select.
    for id in ["1", "2", "3", "4", "5"] {
        assert_eq!(category_of(&outcome, id), Some("Single"), "item {id}");
    }
    for id in ["6", "7", "8"] {
        assert_eq!(category_of(&outcome, id), Some("Multi"), "item {id}");
    }
    for id in ["9", "10", "11", "12"] {
        assert_eq!(category_of(&outcome, id), Some("Long"), "item {id}");
    }

    // A long single-purpose session never fans out.
    assert_eq!(item(&outcome, "2").title_analysis, None);
    // Long multi-purpose items carry the research that classified them.
    for id in ["9", "10", "11", "12"] {
        let analysis = item(&outcome, id).title_analysis.as_deref().unwrap();
        assert!(analysis.starts_with("Looked up:"), "item {id}: {analysis}");
    }

    // Enrichment described the blank apps and kept existing descriptions.
    let registry = &outcome.state.app_registry;
    assert_eq!(
        registry["chrome"].description,
        "Scripted description of chrome"
    );
    assert_eq!(registry["code"].description, "Scripted description of code");
    assert_eq!(registry["terminal"].description, "Terminal emulator");
    assert!(registry["chrome"].is_multipurpose);

    // One backend call per batch, one per fan-out task.
    assert_eq!(model.calls_of("enrich"), 1);
    assert_eq!(model.calls_of("single"), 1);
    assert_eq!(model.calls_of("multi"), 1);
    assert_eq!(model.calls_of("search"), 4);
    assert_eq!(model.calls_of("long"), 1);

    // Report: every node succeeded, the fan-out ran four tasks.
    assert!(outcome.report.all_succeeded());
    assert_eq!(outcome.report.supersteps(), 4);
    let search_runs = outcome
        .report
        .runs()
        .iter()
        .filter(|run| run.node == "search-title")
        .count();
    assert_eq!(search_runs, 4);

    // Metering: totals per node, search count on the research branch.
    assert_eq!(outcome.token_summary["classify-single-purpose"].total_tokens, 120);
    assert_eq!(outcome.token_summary["search-title"].search_count, 4);
    assert_eq!(outcome.token_summary["search-title"].total_tokens, 480);
    assert!(!outcome.token_summary.contains_key("duration-router"));

    // The same totals folded into the aggregate state.
    assert_eq!(outcome.state.node_token_usage["search-title"].search_count, 4);

    // Every ledger record drained to the sink under the run id.
    let records = sink.records.lock().unwrap();
    assert_eq!(records.len(), 8);
    assert!(records.iter().all(|(session, _)| *session == outcome.run_id));

    Ok(())
}

#[tokio::test]
async fn failed_branch_returns_its_items_unclassified() -> Result<()> {
    init_tracing();
    let model = Arc::new(ScriptedModel::failing_short_multi());
    let classifier = Classifier::new(model.clone(), config())?;

    let outcome = classifier
        .classify(log_items(), registry(), goals(), tree())
        .await?;

    // The run completes and count parity holds.
    assert_eq!(outcome.items().len(), 12);

    // The short multi-purpose items come back unclassified.
    for id in ["6", "7", "8"] {
        assert_eq!(category_of(&outcome, id), None, "item {id}");
    }
    // Sibling branches were untouched.
    for id in ["1", "2", "3", "4", "5"] {
        assert_eq!(category_of(&outcome, id), Some("Single"), "item {id}");
    }
    for id in ["9", "10", "11", "12"] {
        assert_eq!(category_of(&outcome, id), Some("Long"), "item {id}");
    }

    // The failure is reported, permanent, and not retried.
    assert!(!outcome.report.all_succeeded());
    let failed = outcome
        .report
        .runs()
        .iter()
        .find(|run| run.node == "classify-multi-purpose")
        .expect("failed node missing from report");
    assert!(matches!(failed.outcome, NodeOutcome::Failed { .. }));
    assert_eq!(failed.attempts, 1);
    assert_eq!(model.calls_of("multi-rejected"), 1);

    Ok(())
}

#[tokio::test]
async fn transient_enrichment_failure_is_retried() -> Result<()> {
    init_tracing();
    let model = Arc::new(ScriptedModel::failing_next_enrichment());
    let classifier = Classifier::new(model.clone(), config())?;

    let outcome = classifier
        .classify(log_items(), registry(), goals(), tree())
        .await?;

    assert!(outcome.report.all_succeeded());
    let enrich = outcome
        .report
        .runs()
        .iter()
        .find(|run| run.node == "enrich-app-description")
        .expect("enrichment missing from report");
    assert_eq!(enrich.attempts, 2);
    assert_eq!(model.calls_of("enrich"), 2);

    // The retried attempt still enriched the registry.
    assert_eq!(
        outcome.state.app_registry["chrome"].description,
        "Scripted description of chrome"
    );
    assert_eq!(outcome.items().len(), 12);

    Ok(())
}
