//! Maps decoded frame payloads onto the [`StreamEvent`] vocabulary.
//!
//! The explicit `type` field decides the event kind. Payloads without one
//! fall back to their `status` field, the shape emitted by older
//! dispatchers. Classification never fails: anything that does not fit is
//! returned as [`StreamEvent::Unrecognized`].

use serde_json::{Map, Value};

use super::event::{LegacyUpdate, StreamEvent};
use super::identity::ModelIdentity;
use super::job::ErrorKind;

const DEFAULT_ERROR_MESSAGE: &str = "Unknown error";
const NOT_DEPLOYED_MESSAGE: &str = "Model is not deployed";

/// Classifies one decoded frame payload.
pub fn classify(payload: &Value) -> StreamEvent {
    let Some(map) = payload.as_object() else {
        tracing::debug!("[Classifier] Ignoring non-object payload");
        return StreamEvent::Unrecognized {
            identity: None,
            update: LegacyUpdate::default(),
        };
    };

    let identity = ModelIdentity::resolve(map);
    let status = lowercase_field(map, "status");

    match lowercase_field(map, "type").as_deref() {
        Some("start") => StreamEvent::Start {
            models: roster(map),
        },
        Some("heartbeat") => StreamEvent::Heartbeat {
            timestamp: map.get("timestamp").cloned(),
        },
        Some("complete") => StreamEvent::Complete,
        Some("model_start") => match identity {
            Some(identity) => StreamEvent::ModelStart { identity },
            None => unattributable("model_start", map),
        },
        Some("chunk") => match identity {
            Some(identity) => StreamEvent::Chunk {
                identity,
                delta: string_field(map, "delta").unwrap_or_default(),
                provider: string_field(map, "provider"),
            },
            None => unattributable("chunk", map),
        },
        Some("result") => match identity {
            Some(identity) => match error_kind(map, status.as_deref()) {
                Some(kind) => model_error(identity, kind, map),
                None => result_event(identity, map),
            },
            None => unattributable("result", map),
        },
        Some("error" | "model_error") => match identity {
            Some(identity) => {
                let kind = error_kind(map, status.as_deref()).unwrap_or(ErrorKind::Generic);
                model_error(identity, kind, map)
            }
            None => unattributable("error", map),
        },
        Some(other) => {
            tracing::debug!("[Classifier] Unknown event type '{}', using legacy path", other);
            StreamEvent::Unrecognized {
                identity,
                update: legacy_update(map),
            }
        }
        None => classify_by_status(identity, status.as_deref(), map),
    }
}

/// Legacy compatibility path for payloads without a `type` field.
fn classify_by_status(
    identity: Option<ModelIdentity>,
    status: Option<&str>,
    map: &Map<String, Value>,
) -> StreamEvent {
    let Some(identity) = identity else {
        return StreamEvent::Unrecognized {
            identity: None,
            update: legacy_update(map),
        };
    };

    match status {
        Some("success") => result_event(identity, map),
        Some("error" | "not_deployed") => {
            let kind = error_kind(map, status).unwrap_or(ErrorKind::Generic);
            model_error(identity, kind, map)
        }
        _ => StreamEvent::Unrecognized {
            identity: Some(identity),
            update: legacy_update(map),
        },
    }
}

fn result_event(identity: ModelIdentity, map: &Map<String, Value>) -> StreamEvent {
    StreamEvent::Result {
        identity,
        result: map.get("result").cloned().unwrap_or(Value::Null),
        timestamp: timestamp_field(map),
    }
}

fn model_error(identity: ModelIdentity, kind: ErrorKind, map: &Map<String, Value>) -> StreamEvent {
    let message = error_message(map).unwrap_or_else(|| match kind {
        ErrorKind::DeploymentNeeded => NOT_DEPLOYED_MESSAGE.to_string(),
        ErrorKind::Generic => DEFAULT_ERROR_MESSAGE.to_string(),
    });
    StreamEvent::ModelError {
        identity,
        kind,
        message,
    }
}

fn unattributable(kind: &str, map: &Map<String, Value>) -> StreamEvent {
    tracing::debug!("[Classifier] '{}' event carries no model identity, ignoring", kind);
    StreamEvent::Unrecognized {
        identity: None,
        update: legacy_update(map),
    }
}

/// Error subtype requested by `status` or an explicit `error_type`/`code`.
fn error_kind(map: &Map<String, Value>, status: Option<&str>) -> Option<ErrorKind> {
    let declared = lowercase_field(map, "error_type").or_else(|| lowercase_field(map, "code"));
    match (status, declared.as_deref()) {
        (Some("not_deployed"), _) | (_, Some("not_deployed" | "deployment_needed")) => {
            Some(ErrorKind::DeploymentNeeded)
        }
        (Some("error" | "failed"), _) => Some(ErrorKind::Generic),
        _ => None,
    }
}

/// `error` as a string or `{ message }` object, then `message`.
fn error_message(map: &Map<String, Value>) -> Option<String> {
    let from_error = match map.get("error") {
        Some(Value::String(text)) if !text.trim().is_empty() => Some(text.clone()),
        Some(Value::Object(inner)) => string_field(inner, "message"),
        _ => None,
    };
    from_error.or_else(|| string_field(map, "message"))
}

fn legacy_update(map: &Map<String, Value>) -> LegacyUpdate {
    LegacyUpdate {
        status: string_field(map, "status"),
        processing_time: map.get("processing_time").and_then(Value::as_f64),
        result: map.get("result").filter(|value| !value.is_null()).cloned(),
        error: error_message(map).filter(|_| map.contains_key("error")),
        timestamp: timestamp_field(map),
    }
}

/// Model keys announced by a `start` frame; entries may be strings or objects.
fn roster(map: &Map<String, Value>) -> Vec<String> {
    map.get("models")
        .and_then(Value::as_array)
        .map(|models| {
            models
                .iter()
                .filter_map(|entry| match entry {
                    Value::String(key) => Some(key.clone()),
                    Value::Object(inner) => ModelIdentity::resolve(inner).map(|id| id.key),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn timestamp_field(map: &Map<String, Value>) -> Option<String> {
    match map.get("timestamp") {
        Some(Value::String(text)) => Some(text.clone()),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    }
}

fn string_field(map: &Map<String, Value>, field: &str) -> Option<String> {
    map.get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
        .map(str::to_string)
}

fn lowercase_field(map: &Map<String, Value>, field: &str) -> Option<String> {
    string_field(map, field).map(|value| value.trim().to_ascii_lowercase())
}
