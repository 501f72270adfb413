//! Prompt construction
//!
//! Builds the message sequences sent to the classification backend. Every
//! builder is deterministic: reference data renders in `BTreeMap` order and
//! items render in input order, so identical state always produces identical
//! prompts. Reply-format instructions live in the system prompts and match
//! what [`crate::parser`] accepts.

use std::collections::{BTreeMap, BTreeSet};

use daygraph_core::Message;

use crate::model::{AppInfo, CategoryTree, Goal, LogItem};

/// System prompt for the three classification nodes.
pub const CLASSIFY_SYSTEM_PROMPT: &str = r#"You are a time-tracking behavior classifier. You receive activity-log items (application, window title, duration in seconds) and assign each one a category from the user's category tree, an optional sub-category, and an optional link to one of the user's goals.

Rules:
- Only use categories and sub-categories from the provided category tree.
- Link an item to a goal only when the activity clearly serves that goal.
- When you cannot determine a field, use null.

Reply with a single JSON object mapping each item id to a 3-element array:

```json
{"<id>": ["<category>", "<sub_category>", "<link_to_goal>"]}
```

Use JSON null (or the string "null") for fields you cannot determine. Do not add any other text."#;

/// System prompt for the app-description enrichment node.
pub const ENRICH_SYSTEM_PROMPT: &str = r#"You are a software catalog assistant. You receive application names, optionally with recent window titles, and describe what each application is used for.

Reply with a single JSON object mapping each application name to a one-sentence description:

```json
{"<application>": "<description>"}
```

Do not add any other text."#;

/// System prompt for the title-research node.
pub const TITLE_ANALYSIS_SYSTEM_PROMPT: &str = r#"You are a research assistant. You receive one window title from a long multi-purpose application session and explain, in two or three plain sentences, what content or activity the title most likely refers to. Reply with plain text only, no JSON."#;

/// Messages asking the backend to describe a batch of apps.
pub fn enrichment_messages(apps: &[(&str, &AppInfo)]) -> Vec<Message> {
    let mut prompt = String::from("Describe what each of these applications is used for.\n\nApplications:\n");
    for (app, info) in apps {
        prompt.push_str(&format!("- {app}"));
        if let Some(titles) = &info.sample_titles {
            if !titles.is_empty() {
                prompt.push_str(&format!(" (recent window titles: {})", titles.join("; ")));
            }
        }
        prompt.push('\n');
    }
    vec![Message::system(ENRICH_SYSTEM_PROMPT), Message::user(prompt)]
}

/// Messages classifying a batch of single-purpose items.
pub fn single_purpose_messages(
    items: &[&LogItem],
    registry: &BTreeMap<String, AppInfo>,
    tree: &CategoryTree,
    goals: &[Goal],
) -> Vec<Message> {
    let prompt = classification_prompt(
        "Classify these items from single-purpose applications. The application itself determines the activity.",
        items,
        registry,
        tree,
        goals,
    );
    vec![Message::system(CLASSIFY_SYSTEM_PROMPT), Message::user(prompt)]
}

/// Messages classifying a batch of short multi-purpose items.
pub fn multi_purpose_messages(
    items: &[&LogItem],
    registry: &BTreeMap<String, AppInfo>,
    tree: &CategoryTree,
    goals: &[Goal],
) -> Vec<Message> {
    let prompt = classification_prompt(
        "Classify these items from multi-purpose applications. The window title, not the application, determines the activity.",
        items,
        registry,
        tree,
        goals,
    );
    vec![Message::system(CLASSIFY_SYSTEM_PROMPT), Message::user(prompt)]
}

/// Messages classifying a batch of long-form items.
///
/// Items carry a `title_analysis` field from the title-research fan-out;
/// it serializes inline with each item.
pub fn long_form_messages(
    items: &[&LogItem],
    registry: &BTreeMap<String, AppInfo>,
    tree: &CategoryTree,
    goals: &[Goal],
) -> Vec<Message> {
    let prompt = classification_prompt(
        "Classify these long-form sessions in multi-purpose applications. Each item includes a title_analysis field describing what the title refers to; weigh it over the raw title.",
        items,
        registry,
        tree,
        goals,
    );
    vec![Message::system(CLASSIFY_SYSTEM_PROMPT), Message::user(prompt)]
}

/// Messages asking the backend to analyze one long-session window title.
pub fn title_analysis_messages(item: &LogItem, info: Option<&AppInfo>) -> Vec<Message> {
    let mut prompt = format!(
        "Analyze this window title from a {:.0}-second session.\n\nApplication: {}\n",
        item.duration, item.app
    );
    if let Some(info) = info {
        if !info.description.trim().is_empty() {
            prompt.push_str(&format!("Application description: {}\n", info.description));
        }
    }
    prompt.push_str(&format!("Title: {}\n", item.title));
    vec![
        Message::system(TITLE_ANALYSIS_SYSTEM_PROMPT),
        Message::user(prompt),
    ]
}

fn classification_prompt(
    intro: &str,
    items: &[&LogItem],
    registry: &BTreeMap<String, AppInfo>,
    tree: &CategoryTree,
    goals: &[Goal],
) -> String {
    let mut prompt = String::from(intro);
    prompt.push_str("\n\nCategory tree:\n");
    prompt.push_str(&render_category_tree(tree));

    if !goals.is_empty() {
        prompt.push_str("\nGoals:\n");
        prompt.push_str(&render_goals(goals));
    }

    let context = render_app_context(items, registry);
    if !context.is_empty() {
        prompt.push_str("\nApplications:\n");
        prompt.push_str(&context);
    }

    prompt.push_str("\nItems:\n");
    prompt.push_str(&render_items(items));
    prompt
}

/// Category tree as a bullet list, one line per category.
fn render_category_tree(tree: &CategoryTree) -> String {
    let mut out = String::new();
    for (category, subs) in tree {
        match subs {
            Some(subs) if !subs.is_empty() => {
                out.push_str(&format!("- {category}: {}\n", subs.join(", ")));
            }
            _ => out.push_str(&format!("- {category}\n")),
        }
    }
    out
}

/// Goals as a bullet list with their category mapping.
fn render_goals(goals: &[Goal]) -> String {
    let mut out = String::new();
    for goal in goals {
        match &goal.sub_category {
            Some(sub) => out.push_str(&format!(
                "- {} -> {} / {}\n",
                goal.goal, goal.category, sub
            )),
            None => out.push_str(&format!("- {} -> {}\n", goal.goal, goal.category)),
        }
    }
    out
}

/// Descriptions for the apps the batch touches, in app-name order.
fn render_app_context(items: &[&LogItem], registry: &BTreeMap<String, AppInfo>) -> String {
    let apps: BTreeSet<&str> = items.iter().map(|item| item.app.as_str()).collect();
    let mut out = String::new();
    for app in apps {
        if let Some(info) = registry.get(app) {
            if !info.description.trim().is_empty() {
                out.push_str(&format!("- {app}: {}\n", info.description));
            }
        }
    }
    out
}

/// Items as one JSON object per line, in input order.
fn render_items(items: &[&LogItem]) -> String {
    let mut out = String::new();
    for item in items {
        if let Ok(line) = serde_json::to_string(item) {
            out.push_str(&line);
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use daygraph_core::Role;

    fn tree() -> CategoryTree {
        let mut tree = CategoryTree::new();
        tree.insert(
            "Work".to_string(),
            Some(vec!["Email".to_string(), "Coding".to_string()]),
        );
        tree.insert("Leisure".to_string(), None);
        tree
    }

    fn registry() -> BTreeMap<String, AppInfo> {
        let mut registry = BTreeMap::new();
        registry.insert("chrome".to_string(), AppInfo::new("Web browser", true));
        registry
    }

    #[test]
    fn classification_prompt_carries_ids_tree_and_goals() {
        let items = vec![
            LogItem::new("1", "chrome", "rust book", 120.0),
            LogItem::new("2", "chrome", "news", 30.0),
        ];
        let refs: Vec<&LogItem> = items.iter().collect();
        let goals = vec![Goal {
            goal: "Learn Rust".to_string(),
            category: "Work".to_string(),
            sub_category: Some("Coding".to_string()),
        }];

        let messages = multi_purpose_messages(&refs, &registry(), &tree(), &goals);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        let prompt = &messages[1].content;
        assert!(prompt.contains("\"id\":\"1\""));
        assert!(prompt.contains("\"id\":\"2\""));
        assert!(prompt.contains("- Work: Email, Coding"));
        assert!(prompt.contains("- Leisure"));
        assert!(prompt.contains("Learn Rust -> Work / Coding"));
        assert!(prompt.contains("- chrome: Web browser"));
    }

    #[test]
    fn prompts_are_deterministic() {
        let items = vec![LogItem::new("1", "chrome", "docs", 60.0)];
        let refs: Vec<&LogItem> = items.iter().collect();

        let first = single_purpose_messages(&refs, &registry(), &tree(), &[]);
        let second = single_purpose_messages(&refs, &registry(), &tree(), &[]);
        assert_eq!(first, second);
    }

    #[test]
    fn long_form_prompt_includes_title_analysis() {
        let mut item = LogItem::new("5", "chrome", "some stream", 900.0);
        item.title_analysis = Some("A live concert broadcast".to_string());
        let refs = vec![&item];

        let messages = long_form_messages(&refs, &registry(), &tree(), &[]);
        assert!(messages[1].content.contains("A live concert broadcast"));
        assert!(messages[1].content.contains("title_analysis"));
    }

    #[test]
    fn enrichment_prompt_lists_apps_and_sample_titles() {
        let mut info = AppInfo::new("", true);
        info.sample_titles = Some(vec!["inbox".to_string(), "compose".to_string()]);
        let apps = vec![("thunderbird", &info)];

        let messages = enrichment_messages(&apps);
        let prompt = &messages[1].content;
        assert!(prompt.contains("- thunderbird"));
        assert!(prompt.contains("inbox; compose"));
    }

    #[test]
    fn title_analysis_prompt_names_app_and_title() {
        let item = LogItem::new("9", "chrome", "ferris the crab", 700.0);
        let info = AppInfo::new("Web browser", true);

        let messages = title_analysis_messages(&item, Some(&info));
        let prompt = &messages[1].content;
        assert!(prompt.contains("Application: chrome"));
        assert!(prompt.contains("Title: ferris the crab"));
        assert!(prompt.contains("700-second session"));
        assert!(messages[0].content.contains("plain text"));
    }
}
