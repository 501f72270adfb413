//! Domain data model for behavior classification
//!
//! A run classifies [`LogItem`]s (activity-log entries) against an
//! [`AppInfo`] registry, a category tree, and the user's goals. The
//! [`ClassifyState`] aggregate is what flows through the engine; goals and
//! the category tree are read-only reference data baked into the graph at
//! assembly time and never merged.

use chrono::{DateTime, Utc};
use daygraph_core::UsageTotals;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Category name mapped to its sub-categories, or `None` for a flat category.
pub type CategoryTree = BTreeMap<String, Option<Vec<String>>>;

/// State field names as declared in the engine schema.
///
/// Must match the serde field names of [`ClassifyState`].
pub mod fields {
    pub const APP_REGISTRY: &str = "app_registry";
    pub const LOG_ITEMS: &str = "log_items";
    pub const RESULT_ITEMS: &str = "result_items";
    pub const NODE_TOKEN_USAGE: &str = "node_token_usage";
}

/// One raw activity record as delivered by a behavior-log provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLogRecord {
    /// Stable record identifier
    pub id: String,
    /// Application name
    pub app: String,
    /// Window or document title
    pub title: String,
    /// Active duration in seconds
    pub duration: f64,
    /// When the activity began
    pub start_time: DateTime<Utc>,
    /// When the activity ended
    pub end_time: DateTime<Utc>,
}

/// The three classification fields assigned to an item.
///
/// `sub_category` only makes sense under a `category`; [`normalized`](Self::normalized)
/// enforces that, dropping an orphaned sub-category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: Option<String>,
    pub sub_category: Option<String>,
    pub link_to_goal: Option<String>,
}

impl Classification {
    pub fn new(
        category: Option<String>,
        sub_category: Option<String>,
        link_to_goal: Option<String>,
    ) -> Self {
        Self {
            category,
            sub_category,
            link_to_goal,
        }
        .normalized()
    }

    /// Drop a sub-category that arrived without a category.
    pub fn normalized(mut self) -> Self {
        if self.category.is_none() {
            self.sub_category = None;
        }
        self
    }

    /// Whether any field is set.
    pub fn is_empty(&self) -> bool {
        self.category.is_none() && self.sub_category.is_none() && self.link_to_goal.is_none()
    }
}

/// One activity-log item as it moves through the workflow.
///
/// Created at load from a [`RawLogRecord`], enriched by classification
/// nodes, never deleted mid-run. Unclassified items keep their
/// classification fields null; classification is best-effort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogItem {
    /// Stable item identifier, the key the backend's replies are matched on
    pub id: String,
    /// Application name
    pub app: String,
    /// Window or document title
    pub title: String,
    /// Active duration in seconds
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_to_goal: Option<String>,
    /// Filled by the title-search branch for long-form multipurpose items
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_analysis: Option<String>,
}

impl LogItem {
    pub fn new(
        id: impl Into<String>,
        app: impl Into<String>,
        title: impl Into<String>,
        duration: f64,
    ) -> Self {
        Self {
            id: id.into(),
            app: app.into(),
            title: title.into(),
            duration,
            category: None,
            sub_category: None,
            link_to_goal: None,
            title_analysis: None,
        }
    }

    /// Apply a classification, normalized so a sub-category never appears
    /// without its category.
    pub fn set_classification(&mut self, classification: Classification) {
        let classification = classification.normalized();
        self.category = classification.category;
        self.sub_category = classification.sub_category;
        self.link_to_goal = classification.link_to_goal;
    }

    /// Current classification fields as one value.
    pub fn classification(&self) -> Classification {
        Classification {
            category: self.category.clone(),
            sub_category: self.sub_category.clone(),
            link_to_goal: self.link_to_goal.clone(),
        }
    }

    /// Whether a category has been assigned.
    pub fn is_classified(&self) -> bool {
        self.category.is_some()
    }

    /// Whether this item's duration reaches the long-form threshold.
    pub fn is_long_form(&self, threshold_secs: f64) -> bool {
        self.duration >= threshold_secs
    }
}

impl From<RawLogRecord> for LogItem {
    fn from(record: RawLogRecord) -> Self {
        LogItem::new(record.id, record.app, record.title, record.duration)
    }
}

/// Registry entry describing one application.
///
/// `is_multipurpose` is fixed for the run; it drives the purpose router and
/// must not change once a run starts. An empty `description` means "not yet
/// described" and is what the enrichment node fills.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppInfo {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_multipurpose: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_titles: Option<Vec<String>>,
}

impl AppInfo {
    pub fn new(description: impl Into<String>, is_multipurpose: bool) -> Self {
        Self {
            description: description.into(),
            is_multipurpose,
            sample_titles: None,
        }
    }

    /// Whether the enrichment node still needs to describe this app.
    pub fn needs_description(&self) -> bool {
        self.description.trim().is_empty()
    }
}

/// A user goal, read-only reference data for the link-to-goal field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub goal: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_category: Option<String>,
}

/// The aggregate run state threaded through the graph.
///
/// Owned exclusively by the executor; nodes only ever see a copy and return
/// deltas. Constructed once from provider data, discarded at run completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifyState {
    /// App name to registry entry, merged keep-first-non-empty per field
    #[serde(default)]
    pub app_registry: BTreeMap<String, AppInfo>,
    /// Items to classify plus title-enriched copies appended mid-run
    #[serde(default)]
    pub log_items: Vec<LogItem>,
    /// Classified items, appended per branch
    #[serde(default)]
    pub result_items: Vec<LogItem>,
    /// Per-node usage totals, folded in by the executor at completion
    #[serde(default)]
    pub node_token_usage: BTreeMap<String, UsageTotals>,
}

impl ClassifyState {
    pub fn new(log_items: Vec<LogItem>, app_registry: BTreeMap<String, AppInfo>) -> Self {
        Self {
            app_registry,
            log_items,
            result_items: Vec::new(),
            node_token_usage: BTreeMap::new(),
        }
    }

    /// Serialize into the engine's state value.
    pub fn into_value(self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Deserialize back from the engine's state value.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Whether an item belongs to a multi-purpose app.
    ///
    /// Apps missing from the registry are treated as single-purpose.
    pub fn is_multi_purpose(&self, item: &LogItem) -> bool {
        self.app_registry
            .get(&item.app)
            .map(|info| info.is_multipurpose)
            .unwrap_or(false)
    }

    /// Items from single-purpose apps.
    pub fn single_purpose_items(&self) -> Vec<LogItem> {
        self.log_items
            .iter()
            .filter(|item| !self.is_multi_purpose(item))
            .cloned()
            .collect()
    }

    /// Multi-purpose items under the long-form threshold.
    pub fn short_multi_purpose_items(&self, threshold_secs: f64) -> Vec<LogItem> {
        self.log_items
            .iter()
            .filter(|item| self.is_multi_purpose(item) && !item.is_long_form(threshold_secs))
            .cloned()
            .collect()
    }

    /// Multi-purpose items at or over the long-form threshold that have not
    /// been title-analyzed yet.
    pub fn long_multi_purpose_items(&self, threshold_secs: f64) -> Vec<LogItem> {
        self.log_items
            .iter()
            .filter(|item| {
                self.is_multi_purpose(item)
                    && item.is_long_form(threshold_secs)
                    && item.title_analysis.is_none()
            })
            .cloned()
            .collect()
    }

    /// Items carrying a title analysis, ready for long-form classification.
    pub fn analyzed_items(&self) -> Vec<LogItem> {
        self.log_items
            .iter()
            .filter(|item| item.title_analysis.is_some())
            .cloned()
            .collect()
    }
}
