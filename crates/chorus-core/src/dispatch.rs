//! Request model sent to the dispatcher.
//!
//! The same body shape serves both the primary submission and the scoped
//! poll fallback; only `models` and `mode` differ.

use serde::{Deserialize, Serialize};
use strum::Display;

/// A file attached to the prompt, already base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    /// Base64 (standard alphabet) encoded file content
    pub data: String,
}

/// The multimodal prompt submitted to every participant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptPayload {
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl PromptPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.attachments.is_empty()
    }
}

/// Whether a request starts a run or re-derives state for unfinished jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DispatchMode {
    Full,
    Poll,
}

/// POST body for the dispatcher endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub session_id: String,
    pub models: Vec<String>,
    pub prompt: PromptPayload,
    pub mode: DispatchMode,
}

impl DispatchRequest {
    /// Builds the request that opens the primary stream for every participant.
    pub fn full(session_id: impl Into<String>, models: Vec<String>, prompt: PromptPayload) -> Self {
        Self {
            session_id: session_id.into(),
            models,
            prompt,
            mode: DispatchMode::Full,
        }
    }

    /// Builds a fallback request scoped to the given unfinished model keys.
    pub fn poll(session_id: impl Into<String>, models: Vec<String>, prompt: PromptPayload) -> Self {
        Self {
            session_id: session_id.into(),
            models,
            prompt,
            mode: DispatchMode::Poll,
        }
    }
}
