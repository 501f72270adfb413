//! Batch planner
//!
//! Splits an ordered item collection into bounded batches for submission to
//! the classification backend. Bounds are by count (`max_items`) and by
//! estimated serialized size (`max_chars` minus a fixed prompt `overhead`).
//! Planning is a pure function of its inputs: identical input always yields
//! identical batches, and concatenating the batches in order reproduces the
//! input exactly, no duplication, no omission.
//!
//! A single item whose own serialized size already blows the budget still
//! gets its own one-item batch. Items are never dropped; an oversized batch
//! is the backend's problem to truncate, not the planner's to lose.

use serde::Serialize;
use tracing::debug;

/// Size and count bounds for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    /// Maximum entries per batch
    pub max_items: usize,
    /// Serialized-size budget per batch, in characters
    pub max_chars: usize,
    /// Prompt overhead charged against the budget
    pub overhead: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_items: 15,
            max_chars: 2000,
            overhead: 500,
        }
    }
}

impl BatchLimits {
    /// Characters left for items once the prompt overhead is paid.
    pub fn item_budget(&self) -> usize {
        self.max_chars.saturating_sub(self.overhead)
    }
}

/// Estimated serialized size of one item, in characters.
///
/// Counts `char`s rather than bytes so CJK-heavy titles are budgeted the
/// same way the backend's context window sees them.
pub fn estimated_chars<T: Serialize>(item: &T) -> usize {
    serde_json::to_string(item)
        .map(|s| s.chars().count())
        .unwrap_or(0)
}

/// Plan batches over `items` under `limits`.
///
/// Order is preserved; every item lands in exactly one batch.
pub fn plan<'a, T: Serialize>(items: &'a [T], limits: &BatchLimits) -> Vec<Vec<&'a T>> {
    let max_items = limits.max_items.max(1);
    let budget = limits.item_budget();

    let mut batches: Vec<Vec<&T>> = Vec::new();
    let mut current: Vec<&T> = Vec::new();
    let mut current_chars = 0usize;

    for item in items {
        let size = estimated_chars(item);
        let full = current.len() >= max_items || current_chars.saturating_add(size) > budget;
        if !current.is_empty() && full {
            batches.push(std::mem::take(&mut current));
            current_chars = 0;
        }
        current.push(item);
        current_chars = current_chars.saturating_add(size);
    }
    if !current.is_empty() {
        batches.push(current);
    }

    debug!(
        items = items.len(),
        batches = batches.len(),
        max_items,
        budget,
        "planned batches"
    );
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn limits(max_items: usize, max_chars: usize, overhead: usize) -> BatchLimits {
        BatchLimits {
            max_items,
            max_chars,
            overhead,
        }
    }

    #[test]
    fn empty_input_plans_no_batches() {
        let items: Vec<String> = vec![];
        assert!(plan(&items, &BatchLimits::default()).is_empty());
    }

    #[test]
    fn splits_on_item_count() {
        let items: Vec<u32> = (0..7).collect();
        let batches = plan(&items, &limits(3, 10_000, 0));
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[test]
    fn splits_on_char_budget() {
        // Each item serializes to 6 chars ("abcd" -> "\"abcd\"").
        let items = vec!["abcd".to_string(); 4];
        let batches = plan(&items, &limits(100, 15, 2));
        // Budget 13 fits two items (12 chars), not three.
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2]);
    }

    #[test]
    fn oversized_item_gets_its_own_batch() {
        let items = vec![
            "a".repeat(4),
            "x".repeat(500),
            "b".repeat(4),
        ];
        let batches = plan(&items, &limits(10, 100, 20));
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![1, 1, 1]);
        assert_eq!(batches[1][0].len(), 500);
    }

    #[test]
    fn planning_is_deterministic() {
        let items: Vec<String> = (0..40).map(|i| format!("item-{i}")).collect();
        let limits = BatchLimits::default();
        assert_eq!(plan(&items, &limits), plan(&items, &limits));
    }

    #[test]
    fn multibyte_titles_counted_in_chars() {
        // Ten CJK chars serialize to 12 chars, far fewer than their bytes.
        let item = "工作学习工作学习工作".to_string();
        assert_eq!(estimated_chars(&item), 12);
    }

    proptest! {
        #[test]
        fn concatenation_reproduces_input(
            items in proptest::collection::vec(".{0,40}", 0..120),
            max_items in 1usize..20,
            max_chars in 0usize..3000,
            overhead in 0usize..600,
        ) {
            let limits = limits(max_items, max_chars, overhead);
            let batches = plan(&items, &limits);

            let rebuilt: Vec<&String> = batches.iter().flatten().copied().collect();
            let expected: Vec<&String> = items.iter().collect();
            prop_assert_eq!(rebuilt, expected);
        }

        #[test]
        fn no_batch_exceeds_count_bound(
            items in proptest::collection::vec(".{0,40}", 0..120),
            max_items in 1usize..20,
        ) {
            let limits = limits(max_items, 2000, 500);
            for batch in plan(&items, &limits) {
                prop_assert!(batch.len() <= max_items);
            }
        }

        #[test]
        fn char_budget_holds_except_forced_singletons(
            items in proptest::collection::vec(".{0,80}", 0..80),
        ) {
            let limits = limits(15, 2000, 500);
            for batch in plan(&items, &limits) {
                let total: usize = batch.iter().map(|item| estimated_chars(item)).sum();
                if batch.len() > 1 {
                    prop_assert!(total <= limits.item_budget());
                }
            }
        }
    }
}
