//! Model identity canonicalization.
//!
//! Events name their model through several optional fields. The routing key
//! and the display label are resolved here, once, in a fixed priority order:
//!
//! - key: `model_key`, then `model`
//! - label: `label`, then `display_name`, then `model`, then the resolved key
//!
//! Empty or non-string values count as absent.

use serde_json::{Map, Value};

const KEY_FIELDS: [&str; 2] = ["model_key", "model"];
const LABEL_FIELDS: [&str; 3] = ["label", "display_name", "model"];

/// The canonical identity of the model an event refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelIdentity {
    /// Stable routing key for the model job.
    pub key: String,
    /// Human-facing name; equals `key` when the event carried nothing richer.
    pub label: String,
}

impl ModelIdentity {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            label: key.clone(),
            key,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Whether the event supplied a label other than the bare key.
    pub fn has_rich_label(&self) -> bool {
        self.label != self.key
    }

    /// Resolves the identity of a decoded payload.
    ///
    /// Returns `None` when neither `model_key` nor `model` is present, which
    /// makes the event session-scoped.
    pub fn resolve(payload: &Map<String, Value>) -> Option<Self> {
        let key = first_string(payload, &KEY_FIELDS)?;
        let label = first_string(payload, &LABEL_FIELDS).unwrap_or_else(|| key.clone());
        Some(Self { key, label })
    }
}

fn first_string(payload: &Map<String, Value>, fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|field| {
        payload
            .get(*field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    })
}
