//! Consumed data-provider interfaces
//!
//! The workflow consumes four external data sources: the activity log, the
//! app registry, the category tree, and the user's goals. None of them are
//! implemented here; callers bring their own (SQLite, ActivityWatch, a
//! fixture) and [`ClassifyInputs::gather`] assembles a run's inputs from
//! them.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{AppInfo, CategoryTree, Goal, LogItem, RawLogRecord};

/// Errors a data provider can produce.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The underlying store could not be reached
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    /// The store answered with data the model cannot hold
    #[error("Provider returned invalid data: {0}")]
    InvalidData(String),
}

/// Half-open time range `[start, end)` to load activity for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

/// Source of raw activity records.
#[async_trait]
pub trait BehaviorLogSource: Send + Sync {
    async fn load_logs(&self, range: TimeRange) -> Result<Vec<RawLogRecord>, ProviderError>;
}

/// Source of registry entries for a set of app names.
#[async_trait]
pub trait AppRegistrySource: Send + Sync {
    async fn load_registry(
        &self,
        apps: &[String],
    ) -> Result<BTreeMap<String, AppInfo>, ProviderError>;
}

/// Source of the user's category tree.
#[async_trait]
pub trait CategoryTreeSource: Send + Sync {
    async fn load_category_tree(&self) -> Result<CategoryTree, ProviderError>;
}

/// Source of the user's goals.
#[async_trait]
pub trait GoalSource: Send + Sync {
    async fn load_goals(&self) -> Result<Vec<Goal>, ProviderError>;
}

/// Everything one classification run consumes.
#[derive(Debug, Clone, Default)]
pub struct ClassifyInputs {
    pub log_items: Vec<LogItem>,
    pub app_registry: BTreeMap<String, AppInfo>,
    pub goals: Vec<Goal>,
    pub category_tree: CategoryTree,
}

impl ClassifyInputs {
    /// Load a run's inputs from the four providers.
    ///
    /// The registry is asked only about apps that actually appear in the
    /// loaded window, deduplicated and in sorted order.
    pub async fn gather(
        logs: &dyn BehaviorLogSource,
        registry: &dyn AppRegistrySource,
        tree: &dyn CategoryTreeSource,
        goals: &dyn GoalSource,
        range: TimeRange,
    ) -> Result<Self, ProviderError> {
        let records = logs.load_logs(range).await?;
        let log_items: Vec<LogItem> = records.into_iter().map(LogItem::from).collect();

        let mut apps: Vec<String> = log_items.iter().map(|item| item.app.clone()).collect();
        apps.sort();
        apps.dedup();

        let (app_registry, category_tree, goals) = futures::try_join!(
            registry.load_registry(&apps),
            tree.load_category_tree(),
            goals.load_goals(),
        )?;

        Ok(Self {
            log_items,
            app_registry,
            goals,
            category_tree,
        })
    }
}
