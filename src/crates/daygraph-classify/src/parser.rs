//! Backend reply parsing
//!
//! Maps raw completion text back onto item fields. Replies arrive as a JSON
//! object, usually wrapped in a Markdown code fence, mapping item id to a
//! three-element array `[category, sub_category, link_to_goal]`. Parsing is
//! best-effort by contract: malformed entries are logged and skipped, unknown
//! ids are logged and ignored, and a payload that fails to parse at all
//! yields an empty mapping. Classification is enrichment, not a requirement,
//! so nothing in here ever fails a batch.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;
use tracing::{debug, warn};

use crate::model::{Classification, LogItem};

/// Parse a classification reply into an id -> classification mapping.
///
/// The literal string `"null"` and JSON `null` both mean "field absent".
/// Returns an empty map when the payload cannot be parsed.
pub fn parse_classifications(response: &str) -> BTreeMap<String, Classification> {
    let Some(entries) = parse_object(response) else {
        return BTreeMap::new();
    };

    let mut parsed = BTreeMap::new();
    for (id, entry) in &entries {
        let Some(fields) = entry.as_array() else {
            warn!(id, "classification entry is not an array, skipping");
            continue;
        };
        if fields.len() != 3 {
            warn!(
                id,
                elements = fields.len(),
                "classification entry does not have 3 elements, skipping"
            );
            continue;
        }
        let (Some(category), Some(sub_category), Some(link_to_goal)) = (
            optional_text(&fields[0]),
            optional_text(&fields[1]),
            optional_text(&fields[2]),
        ) else {
            warn!(id, "classification entry has a non-string element, skipping");
            continue;
        };
        parsed.insert(
            id.clone(),
            Classification::new(category, sub_category, link_to_goal),
        );
    }

    debug!(entries = parsed.len(), "parsed classification reply");
    parsed
}

/// Parse an app-description reply into an app -> description mapping.
///
/// Empty and non-string descriptions are skipped so a later merge never
/// clobbers real data with a blank.
pub fn parse_descriptions(response: &str) -> BTreeMap<String, String> {
    let Some(entries) = parse_object(response) else {
        return BTreeMap::new();
    };

    let mut parsed = BTreeMap::new();
    for (app, entry) in &entries {
        match entry.as_str().map(str::trim) {
            Some(description) if !description.is_empty() => {
                parsed.insert(app.clone(), description.to_string());
            }
            _ => warn!(app, "description is not a non-empty string, skipping"),
        }
    }

    debug!(entries = parsed.len(), "parsed description reply");
    parsed
}

/// Fold a parsed mapping into the items it classifies.
///
/// Ids in the mapping that match no item are logged and dropped. Returns the
/// number of items that received a classification.
pub fn apply_classifications(
    items: &mut [LogItem],
    parsed: &BTreeMap<String, Classification>,
) -> usize {
    let known: HashSet<&str> = items.iter().map(|item| item.id.as_str()).collect();
    for id in parsed.keys() {
        if !known.contains(id.as_str()) {
            warn!(id, "reply references an unknown item id, ignoring");
        }
    }

    let mut applied = 0;
    for item in items.iter_mut() {
        if let Some(classification) = parsed.get(&item.id) {
            item.set_classification(classification.clone());
            applied += 1;
        }
    }
    applied
}

/// Extract and parse the JSON object embedded in a reply.
fn parse_object(response: &str) -> Option<serde_json::Map<String, Value>> {
    let Some(json) = extract_json(response) else {
        warn!("no JSON found in backend reply");
        return None;
    };
    let value: Value = match serde_json::from_str(json) {
        Ok(value) => value,
        Err(error) => {
            warn!(%error, "backend reply is not valid JSON");
            return None;
        }
    };
    match value {
        Value::Object(entries) => Some(entries),
        other => {
            warn!(
                kind = value_kind(&other),
                "backend reply is not a JSON object"
            );
            None
        }
    }
}

/// Extract JSON from a reply.
///
/// Looks for a ```json fenced block first, then a bare `{...}` span.
fn extract_json(text: &str) -> Option<&str> {
    for fence in ["```json", "```JSON"] {
        if let Some(start) = text.find(fence) {
            let content = &text[start + fence.len()..];
            if let Some(end) = content.find("```") {
                return Some(content[..end].trim());
            }
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        return Some(text[start..=end].trim());
    }
    None
}

/// One array element as an optional field value.
///
/// Returns `None` when the element is neither a string nor `null`, which
/// marks the whole entry malformed.
fn optional_text(value: &Value) -> Option<Option<String>> {
    match value {
        Value::Null => Some(None),
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
                Some(None)
            } else {
                Some(Some(trimmed.to_string()))
            }
        }
        _ => None,
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
