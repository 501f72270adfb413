//! State schema and reducer system
//!
//! The aggregate run state is a JSON object owned exclusively by the executor.
//! Node bodies never mutate it; they return a *delta* (a partial object), and
//! the executor folds each delta field into the aggregate through the reducer
//! declared for that field. When parallel branches each propose an update to
//! the same field, the reducer decides how the values combine.
//!
//! # Reducers
//!
//! | Reducer | Behavior | Use case |
//! |---------|----------|----------|
//! | [`AppendReducer`] | Concatenate arrays | item lists, event logs |
//! | [`MergeReducer`] | Map union, update wins | partial object updates |
//! | [`KeepFirstReducer`] | Map union, first non-empty value wins | enrichment that must not clobber |
//! | [`SumReducer`] | Add numbers, recursively for maps | counters, usage totals |
//! | [`OverwriteReducer`] | Replace outright | scalar status fields |
//!
//! Fan-out correctness depends on merge results being independent of branch
//! arrival order. The executor guarantees a deterministic fold order (by node
//! name, then task index), which is what makes order-sensitive reducers such
//! as [`KeepFirstReducer`] reproducible.
//!
//! # Examples
//!
//! ```rust
//! use daygraph_core::state::{AppendReducer, KeepFirstReducer, StateSchema};
//! use serde_json::json;
//!
//! let mut schema = StateSchema::new();
//! schema.add_field("log_items", Box::new(AppendReducer));
//! schema.add_field("app_registry", Box::new(KeepFirstReducer));
//!
//! let mut state = json!({
//!     "log_items": [],
//!     "app_registry": {"firefox": {"description": ""}}
//! });
//!
//! schema
//!     .apply(&mut state, &json!({
//!         "log_items": [{"id": 1}],
//!         "app_registry": {"firefox": {"description": "web browser"}}
//!     }))
//!     .unwrap();
//!
//! assert_eq!(state["log_items"].as_array().unwrap().len(), 1);
//! assert_eq!(state["app_registry"]["firefox"]["description"], "web browser");
//!
//! // A later empty value never clobbers the description.
//! schema
//!     .apply(&mut state, &json!({
//!         "app_registry": {"firefox": {"description": ""}}
//!     }))
//!     .unwrap();
//! assert_eq!(state["app_registry"]["firefox"]["description"], "web browser");
//! ```

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Errors raised while folding deltas into the aggregate state.
#[derive(Debug, Error)]
pub enum ReducerError {
    /// The aggregate state is not a JSON object
    #[error("State must be a JSON object, got {0}")]
    InvalidState(&'static str),

    /// A node delta is not a JSON object
    #[error("Update must be a JSON object, got {0}")]
    InvalidUpdate(&'static str),

    /// A delta names a field with no declared reducer
    #[error("No reducer declared for field '{0}'")]
    UnknownField(String),

    /// The declared reducer cannot combine the two values
    #[error("Reducer '{reducer}' cannot merge {current} with {update}")]
    Incompatible {
        /// Name of the reducer that rejected the merge
        reducer: String,
        /// JSON type of the current value
        current: &'static str,
        /// JSON type of the proposed update
        update: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, ReducerError>;

/// Short JSON type name, for error messages.
pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A pure function combining the current value of a state field with a delta
/// proposed by a branch.
///
/// Reducers must be deterministic. Because sibling branches merge in a
/// deterministic order, a reducer does not need to be commutative to be
/// reproducible, but append- and sum-style reducers are.
pub trait Reducer: Send + Sync {
    /// Fold `update` into `current`, producing the merged value.
    ///
    /// `current` is [`Value::Null`] the first time a field is written.
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value>;

    /// Human-readable name, used in error messages and debug output.
    fn name(&self) -> &str;
}

/// Replaces the current value with the update.
///
/// Order-sensitive by nature; only reproducible because the executor folds
/// deltas in a deterministic order. Suited to scalar fields written by a
/// single branch per superstep.
#[derive(Debug, Clone)]
pub struct OverwriteReducer;

impl Reducer for OverwriteReducer {
    fn reduce(&self, _current: &Value, update: &Value) -> Result<Value> {
        Ok(update.clone())
    }

    fn name(&self) -> &str {
        "overwrite"
    }
}

/// Concatenates arrays, preserving insertion order.
///
/// # Behavior
///
/// - Array + Array: concatenate
/// - Array + scalar: push the scalar
/// - Null + Array: adopt the array
/// - Null + scalar: single-element array
///
/// # Examples
///
/// ```rust
/// use daygraph_core::state::{AppendReducer, Reducer};
/// use serde_json::json;
///
/// let merged = AppendReducer.reduce(&json!([1, 2]), &json!([3])).unwrap();
/// assert_eq!(merged, json!([1, 2, 3]));
/// ```
#[derive(Debug, Clone)]
pub struct AppendReducer;

impl Reducer for AppendReducer {
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value> {
        match (current, update) {
            (Value::Array(cur), Value::Array(upd)) => {
                let mut merged = cur.clone();
                merged.extend(upd.iter().cloned());
                Ok(Value::Array(merged))
            }
            (Value::Null, Value::Array(upd)) => Ok(Value::Array(upd.clone())),
            (Value::Array(cur), other) => {
                let mut merged = cur.clone();
                merged.push(other.clone());
                Ok(Value::Array(merged))
            }
            (Value::Null, other) => Ok(Value::Array(vec![other.clone()])),
            (cur, upd) => Err(ReducerError::Incompatible {
                reducer: self.name().to_string(),
                current: json_type(cur),
                update: json_type(upd),
            }),
        }
    }

    fn name(&self) -> &str {
        "append"
    }
}

/// Shallow map union where the update's entries win on key collision.
#[derive(Debug, Clone)]
pub struct MergeReducer;

impl Reducer for MergeReducer {
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value> {
        match (current, update) {
            (Value::Object(cur), Value::Object(upd)) => {
                let mut merged = cur.clone();
                for (key, value) in upd {
                    merged.insert(key.clone(), value.clone());
                }
                Ok(Value::Object(merged))
            }
            (Value::Null, Value::Object(upd)) => Ok(Value::Object(upd.clone())),
            (cur, upd) => Err(ReducerError::Incompatible {
                reducer: self.name().to_string(),
                current: json_type(cur),
                update: json_type(upd),
            }),
        }
    }

    fn name(&self) -> &str {
        "merge"
    }
}

/// Map union that keeps the first non-empty value seen for every entry.
///
/// Objects merge recursively per field; scalars are kept unless the current
/// value is empty (null, empty string, empty object, or empty array). A
/// later empty value can never clobber an earlier non-empty one, which is
/// what enrichment fields need when several branches race to fill the same
/// registry entry.
#[derive(Debug, Clone)]
pub struct KeepFirstReducer;

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn keep_first(current: &Value, update: &Value) -> Value {
    if is_empty_value(current) {
        return update.clone();
    }
    match (current, update) {
        (Value::Object(cur), Value::Object(upd)) => {
            let mut merged = cur.clone();
            for (key, upd_value) in upd {
                let folded = match merged.get(key) {
                    Some(cur_value) => keep_first(cur_value, upd_value),
                    None => upd_value.clone(),
                };
                merged.insert(key.clone(), folded);
            }
            Value::Object(merged)
        }
        _ => current.clone(),
    }
}

impl Reducer for KeepFirstReducer {
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value> {
        Ok(keep_first(current, update))
    }

    fn name(&self) -> &str {
        "keep_first"
    }
}

/// Adds numbers; for maps, unions the keys and adds shared entries recursively.
///
/// Suited to usage totals keyed by node name, where sibling branches each
/// report their own consumption and the aggregate is the sum.
///
/// # Examples
///
/// ```rust
/// use daygraph_core::state::{Reducer, SumReducer};
/// use serde_json::json;
///
/// let merged = SumReducer
///     .reduce(
///         &json!({"classify": {"total_tokens": 40}}),
///         &json!({"classify": {"total_tokens": 15}, "search": {"total_tokens": 7}}),
///     )
///     .unwrap();
/// assert_eq!(merged["classify"]["total_tokens"], 55);
/// assert_eq!(merged["search"]["total_tokens"], 7);
/// ```
#[derive(Debug, Clone)]
pub struct SumReducer;

impl SumReducer {
    fn add_numbers(&self, current: &Value, update: &Value) -> Result<Value> {
        if let (Some(a), Some(b)) = (current.as_u64(), update.as_u64()) {
            return Ok(Value::from(a.saturating_add(b)));
        }
        if let (Some(a), Some(b)) = (current.as_i64(), update.as_i64()) {
            return Ok(Value::from(a.saturating_add(b)));
        }
        let incompatible = || ReducerError::Incompatible {
            reducer: "sum".to_string(),
            current: json_type(current),
            update: json_type(update),
        };
        let (a, b) = match (current.as_f64(), update.as_f64()) {
            (Some(a), Some(b)) => (a, b),
            _ => return Err(incompatible()),
        };
        serde_json::Number::from_f64(a + b)
            .map(Value::Number)
            .ok_or_else(incompatible)
    }
}

impl Reducer for SumReducer {
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value> {
        match (current, update) {
            (Value::Null, upd) => Ok(upd.clone()),
            (cur, Value::Null) => Ok(cur.clone()),
            (Value::Number(_), Value::Number(_)) => self.add_numbers(current, update),
            (Value::Object(cur), Value::Object(upd)) => {
                let mut merged = cur.clone();
                for (key, upd_value) in upd {
                    let folded = match merged.get(key) {
                        Some(cur_value) => self.reduce(cur_value, upd_value)?,
                        None => upd_value.clone(),
                    };
                    merged.insert(key.clone(), folded);
                }
                Ok(Value::Object(merged))
            }
            (cur, upd) => Err(ReducerError::Incompatible {
                reducer: self.name().to_string(),
                current: json_type(cur),
                update: json_type(upd),
            }),
        }
    }

    fn name(&self) -> &str {
        "sum"
    }
}

/// Declares the aggregate state's fields and the reducer folding each one.
///
/// Every field a delta may touch must be declared here; a delta naming an
/// undeclared field fails with [`ReducerError::UnknownField`]. There is no
/// default reducer on purpose: one field, one declared merge policy.
pub struct StateSchema {
    fields: HashMap<String, Box<dyn Reducer>>,
}

impl StateSchema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self {
            fields: HashMap::new(),
        }
    }

    /// Declare a field and its reducer. Redeclaring a field replaces the
    /// previous reducer.
    pub fn add_field(&mut self, name: impl Into<String>, reducer: Box<dyn Reducer>) {
        self.fields.insert(name.into(), reducer);
    }

    /// Builder-style [`add_field`](Self::add_field).
    pub fn with_field(mut self, name: impl Into<String>, reducer: Box<dyn Reducer>) -> Self {
        self.add_field(name, reducer);
        self
    }

    /// Reducer declared for `field`, if any.
    pub fn reducer(&self, field: &str) -> Option<&dyn Reducer> {
        self.fields.get(field).map(|r| r.as_ref())
    }

    /// Names of all declared fields, in no particular order.
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.keys().map(|k| k.as_str()).collect()
    }

    /// Number of declared fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the schema declares no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Check that `state` is an object and every field it carries resolves to
    /// a declared reducer. Run once at run start so misdeclared aggregates
    /// fail before the first superstep.
    pub fn validate_state(&self, state: &Value) -> Result<()> {
        let obj = state
            .as_object()
            .ok_or(ReducerError::InvalidState(json_type(state)))?;
        for field in obj.keys() {
            if !self.fields.contains_key(field) {
                return Err(ReducerError::UnknownField(field.clone()));
            }
        }
        Ok(())
    }

    /// Fold a delta into the aggregate, field by field, through each field's
    /// declared reducer.
    pub fn apply(&self, state: &mut Value, update: &Value) -> Result<()> {
        let upd_obj = update
            .as_object()
            .ok_or(ReducerError::InvalidUpdate(json_type(update)))?;
        if !state.is_object() {
            return Err(ReducerError::InvalidState(json_type(state)));
        }
        for (field, upd_value) in upd_obj {
            let reducer = self
                .fields
                .get(field)
                .ok_or_else(|| ReducerError::UnknownField(field.clone()))?;
            let current = state.get(field).cloned().unwrap_or(Value::Null);
            let merged = reducer.reduce(&current, upd_value)?;
            state[field.as_str()] = merged;
        }
        Ok(())
    }
}

impl Default for StateSchema {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StateSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields: Vec<(&str, &str)> = self
            .fields
            .iter()
            .map(|(name, reducer)| (name.as_str(), reducer.name()))
            .collect();
        fields.sort();
        f.debug_struct("StateSchema").field("fields", &fields).finish()
    }
}
