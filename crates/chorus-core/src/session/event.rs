use serde_json::Value;

use super::identity::ModelIdentity;
use super::job::ErrorKind;

/// A classified event from the dispatcher stream.
///
/// Events are ephemeral: they are applied to the session and dropped.
/// `Start`, `Heartbeat` and `Complete` are session-scoped; every other
/// variant routes to one model job through its [`ModelIdentity`].
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Roster announcement at the start of a stream.
    Start { models: Vec<String> },
    ModelStart { identity: ModelIdentity },
    /// Keep-alive; carries no state.
    Heartbeat { timestamp: Option<Value> },
    Chunk {
        identity: ModelIdentity,
        delta: String,
        provider: Option<String>,
    },
    /// Final payload for one model. `result` is always a JSON object.
    Result {
        identity: ModelIdentity,
        result: Value,
        timestamp: Option<String>,
    },
    ModelError {
        identity: ModelIdentity,
        kind: ErrorKind,
        message: String,
    },
    /// The dispatcher declares the whole run finished.
    Complete,
    /// Anything else. With an identity, the loose fields are applied through
    /// the legacy update path; without one the event is ignored.
    Unrecognized {
        identity: Option<ModelIdentity>,
        update: LegacyUpdate,
    },
}

/// Loose fields a simpler, non-chunked backend reports per model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegacyUpdate {
    pub status: Option<String>,
    pub processing_time: Option<f64>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub timestamp: Option<String>,
}

impl StreamEvent {
    /// The model this event routes to, if any.
    pub fn identity(&self) -> Option<&ModelIdentity> {
        match self {
            StreamEvent::ModelStart { identity }
            | StreamEvent::Chunk { identity, .. }
            | StreamEvent::Result { identity, .. }
            | StreamEvent::ModelError { identity, .. } => Some(identity),
            StreamEvent::Unrecognized { identity, .. } => identity.as_ref(),
            StreamEvent::Start { .. } | StreamEvent::Heartbeat { .. } | StreamEvent::Complete => {
                None
            }
        }
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Start { .. } => "start",
            StreamEvent::ModelStart { .. } => "model_start",
            StreamEvent::Heartbeat { .. } => "heartbeat",
            StreamEvent::Chunk { .. } => "chunk",
            StreamEvent::Result { .. } => "result",
            StreamEvent::ModelError { .. } => "model_error",
            StreamEvent::Complete => "complete",
            StreamEvent::Unrecognized { .. } => "unrecognized",
        }
    }

    /// Whether the classifier understood the frame well enough to count as
    /// stream activity. Only identity-less unrecognized frames do not.
    pub fn is_classified(&self) -> bool {
        !matches!(self, StreamEvent::Unrecognized { identity: None, .. })
    }
}
