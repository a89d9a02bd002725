//! Per-model job state machine.
//!
//! A [`ModelJob`] moves forward through
//! `Waiting -> Processing -> Streaming -> Success | Error` and is frozen once
//! terminal. [`ModelJob::apply`] is the single reducer: one call per
//! classified event, no I/O, no clock access beyond the `now` it is given.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::Display;

use super::event::{LegacyUpdate, StreamEvent};
use super::identity::ModelIdentity;

const UNKNOWN_ERROR: &str = "Unknown error";

/// Lifecycle status of one model job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Waiting,
    Processing,
    Streaming,
    Success,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Error)
    }

    /// Position in the forward-only ordering of non-terminal states.
    fn rank(self) -> u8 {
        match self {
            JobStatus::Waiting => 0,
            JobStatus::Processing => 1,
            JobStatus::Streaming => 2,
            JobStatus::Success | JobStatus::Error => 3,
        }
    }
}

/// Distinguishes failures the operator can act on from generic ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Generic,
    /// The participant model is not provisioned; retrying will not help.
    DeploymentNeeded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    pub kind: ErrorKind,
}

/// What applying one event did to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobTransition {
    /// Nothing observable changed.
    Unchanged,
    /// Status, content or metadata changed; the job is still running.
    Updated,
    /// The job just reached `Success` or `Error`.
    Finished,
    /// The job was already terminal; the event was absorbed.
    IgnoredTerminal,
}

impl JobTransition {
    pub fn is_change(self) -> bool {
        matches!(self, JobTransition::Updated | JobTransition::Finished)
    }
}

/// Per-model progress record within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelJob {
    pub model_key: String,
    pub display_label: String,
    pub status: JobStatus,
    /// Streamed text received so far.
    #[serde(default)]
    pub partial_content: String,
    /// Final structured payload; present only when `status == Success`.
    #[serde(default)]
    pub result: Option<Value>,
    /// Present only when `status == Error`.
    #[serde(default)]
    pub error_info: Option<ErrorInfo>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub processing_time: Option<f64>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ModelJob {
    /// Creates a job in `Waiting` whose label defaults to its key.
    pub fn new(model_key: impl Into<String>) -> Self {
        let model_key = model_key.into();
        Self {
            display_label: model_key.clone(),
            model_key,
            status: JobStatus::Waiting,
            partial_content: String::new(),
            result: None,
            error_info: None,
            provider: None,
            processing_time: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Final text of a successful job, if the result carries any.
    pub fn content(&self) -> Option<&str> {
        self.result
            .as_ref()
            .and_then(|result| result.get("content"))
            .and_then(Value::as_str)
    }

    /// Applies one classified event addressed to this job.
    ///
    /// Session-scoped events are ignored. Once the job is terminal every
    /// event returns [`JobTransition::IgnoredTerminal`] and leaves it intact.
    pub fn apply(&mut self, event: &StreamEvent, now: DateTime<Utc>) -> JobTransition {
        if self.is_terminal() {
            return JobTransition::IgnoredTerminal;
        }

        match event {
            StreamEvent::ModelStart { identity } => {
                let relabelled = self.adopt_label(identity);
                let advanced = self.advance(JobStatus::Processing, now);
                changed(relabelled || advanced)
            }
            StreamEvent::Chunk {
                identity,
                delta,
                provider,
            } => {
                let mut dirty = self.adopt_label(identity);
                if let Some(provider) = provider.as_ref().filter(|p| !p.is_empty()) {
                    if self.provider.as_deref() != Some(provider.as_str()) {
                        self.provider = Some(provider.clone());
                        dirty = true;
                    }
                }
                if !delta.is_empty() {
                    self.partial_content.push_str(delta);
                    dirty = true;
                }
                dirty |= self.advance(JobStatus::Streaming, now);
                changed(dirty)
            }
            StreamEvent::Result {
                identity, result, ..
            } => {
                self.adopt_label(identity);
                self.succeed(result.clone(), now)
            }
            StreamEvent::ModelError {
                identity,
                kind,
                message,
            } => {
                self.adopt_label(identity);
                self.fail(*kind, message.clone(), now)
            }
            StreamEvent::Unrecognized {
                identity: Some(identity),
                update,
            } => {
                let relabelled = self.adopt_label(identity);
                match self.apply_legacy(update, now) {
                    JobTransition::Unchanged if relabelled => JobTransition::Updated,
                    transition => transition,
                }
            }
            StreamEvent::Start { .. }
            | StreamEvent::Heartbeat { .. }
            | StreamEvent::Complete
            | StreamEvent::Unrecognized { identity: None, .. } => JobTransition::Unchanged,
        }
    }

    /// Backward-compatibility path for backends that only report loose
    /// `status`/`result`/`error` fields per model.
    fn apply_legacy(&mut self, update: &LegacyUpdate, now: DateTime<Utc>) -> JobTransition {
        let mut dirty = false;
        if let Some(time) = update.processing_time {
            if self.processing_time != Some(time) {
                self.processing_time = Some(time);
                dirty = true;
            }
        }

        match LegacyStatus::infer(update) {
            LegacyStatus::Success => {
                self.succeed(update.result.clone().unwrap_or(Value::Null), now)
            }
            LegacyStatus::Failed(kind) => {
                let message = update
                    .error
                    .clone()
                    .unwrap_or_else(|| UNKNOWN_ERROR.to_string());
                self.fail(kind, message, now)
            }
            LegacyStatus::Running(target) => changed(self.advance(target, now) || dirty),
            LegacyStatus::Queued => changed(dirty),
        }
    }

    fn succeed(&mut self, result: Value, now: DateTime<Utc>) -> JobTransition {
        let mut result = into_result_object(result);
        if !has_inline_content(&result) && !self.partial_content.is_empty() {
            let content = std::mem::take(&mut self.partial_content);
            result.insert("content".to_string(), Value::String(content));
        }

        self.status = JobStatus::Success;
        self.result = Some(Value::Object(result));
        self.error_info = None;
        self.started_at.get_or_insert(now);
        self.completed_at = Some(now);
        JobTransition::Finished
    }

    fn fail(&mut self, kind: ErrorKind, message: String, now: DateTime<Utc>) -> JobTransition {
        self.status = JobStatus::Error;
        self.error_info = Some(ErrorInfo { message, kind });
        self.result = None;
        self.started_at.get_or_insert(now);
        self.completed_at = Some(now);
        JobTransition::Finished
    }

    /// Moves forward to `target`; never moves backward.
    fn advance(&mut self, target: JobStatus, now: DateTime<Utc>) -> bool {
        if target.rank() <= self.status.rank() {
            return false;
        }
        self.status = target;
        self.started_at.get_or_insert(now);
        true
    }

    fn adopt_label(&mut self, identity: &ModelIdentity) -> bool {
        if identity.has_rich_label() && self.display_label != identity.label {
            self.display_label = identity.label.clone();
            return true;
        }
        false
    }
}

fn changed(dirty: bool) -> JobTransition {
    if dirty {
        JobTransition::Updated
    } else {
        JobTransition::Unchanged
    }
}

/// Coerces a result payload into an object so content can be folded in.
fn into_result_object(result: Value) -> Map<String, Value> {
    match result {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        Value::String(text) => {
            let mut map = Map::new();
            map.insert("content".to_string(), Value::String(text));
            map
        }
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

fn has_inline_content(result: &Map<String, Value>) -> bool {
    match result.get("content") {
        None | Some(Value::Null) => false,
        Some(Value::String(text)) => !text.is_empty(),
        Some(_) => true,
    }
}

/// Status a legacy payload asks for.
enum LegacyStatus {
    Queued,
    Running(JobStatus),
    Success,
    Failed(ErrorKind),
}

impl LegacyStatus {
    fn infer(update: &LegacyUpdate) -> Self {
        match update.status.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("success" | "completed" | "complete" | "done") => LegacyStatus::Success,
            Some("error" | "failed") => LegacyStatus::Failed(ErrorKind::Generic),
            Some("not_deployed") => LegacyStatus::Failed(ErrorKind::DeploymentNeeded),
            Some("streaming") => LegacyStatus::Running(JobStatus::Streaming),
            Some("waiting" | "pending" | "queued") => LegacyStatus::Queued,
            Some(_) => LegacyStatus::Running(JobStatus::Processing),
            // No status: let the payload's own fields decide, so a job never
            // holds a result or error while non-terminal.
            None if update.error.is_some() => LegacyStatus::Failed(ErrorKind::Generic),
            None if update.result.is_some() => LegacyStatus::Success,
            None => LegacyStatus::Running(JobStatus::Processing),
        }
    }
}
