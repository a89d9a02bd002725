//! Session domain model.
//!
//! A [`Session`] is one submitted run: a fixed roster of participant models
//! and one [`ModelJob`] per participant. The session reducer
//! ([`Session::apply`]) routes each classified event to its job and derives
//! the overall status from the event and the jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use strum::Display;
use uuid::Uuid;

use super::event::StreamEvent;
use super::job::{JobTransition, ModelJob};
use super::progress::Progress;
use crate::dispatch::PromptPayload;
use crate::error::{ChorusError, Result};

/// Overall status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Connecting,
    Streaming,
    Completed,
    Error,
}

impl SessionStatus {
    /// `Completed` or `Error`; no further transitions happen.
    pub fn is_final(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Error)
    }
}

/// Result of applying one event to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The session is final or cancelled; nothing was touched.
    Ignored,
    Applied {
        /// Job the event was routed to, with what happened to it.
        job: Option<(String, JobTransition)>,
        /// Set when the session status moved, holding the previous status.
        status_change: Option<SessionStatus>,
    },
}

impl ApplyOutcome {
    pub fn status_changed(&self) -> bool {
        matches!(
            self,
            ApplyOutcome::Applied {
                status_change: Some(_),
                ..
            }
        )
    }

    pub fn job_finished(&self) -> bool {
        matches!(
            self,
            ApplyOutcome::Applied {
                job: Some((_, JobTransition::Finished)),
                ..
            }
        )
    }

    /// Whether anything observable changed.
    pub fn is_change(&self) -> bool {
        match self {
            ApplyOutcome::Ignored => false,
            ApplyOutcome::Applied { job, status_change } => {
                status_change.is_some()
                    || job
                        .as_ref()
                        .is_some_and(|(_, transition)| transition.is_change())
            }
        }
    }
}

/// One submitted evaluation run.
///
/// `jobs` always holds exactly one entry per participant; jobs are
/// transitioned, never added or removed, after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier (UUID format)
    pub id: String,
    /// Participant model keys in submission order
    pub participants: Vec<String>,
    pub status: SessionStatus,
    /// Jobs keyed by canonical model key
    pub jobs: HashMap<String, ModelJob>,
    /// Set by an explicit stop; the status is left where it was.
    #[serde(default)]
    pub cancelled: bool,
    /// Message of the transport failure that put the session into `Error`
    #[serde(default)]
    pub transport_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Creates an `Idle` session with every job `Waiting`.
    ///
    /// Duplicate participants are collapsed, keeping the first occurrence.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if no non-blank participant is given.
    pub fn new<I, S>(participants: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_id(Uuid::new_v4().to_string(), participants)
    }

    /// Same as [`Session::new`] with a caller-chosen identifier.
    pub fn with_id<I, S>(id: impl Into<String>, participants: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let participants: Vec<String> = participants
            .into_iter()
            .map(|key| key.into().trim().to_string())
            .filter(|key| !key.is_empty() && seen.insert(key.clone()))
            .collect();

        if participants.is_empty() {
            return Err(ChorusError::invalid_input(
                "at least one participant model is required",
            ));
        }

        let jobs = participants
            .iter()
            .map(|key| (key.clone(), ModelJob::new(key.clone())))
            .collect();
        let now = Utc::now();

        Ok(Self {
            id: id.into(),
            participants,
            status: SessionStatus::Idle,
            jobs,
            cancelled: false,
            transport_error: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Jobs in participant order.
    pub fn jobs_in_order(&self) -> impl Iterator<Item = &ModelJob> {
        self.participants.iter().filter_map(|key| self.jobs.get(key))
    }

    pub fn job(&self, model_key: &str) -> Option<&ModelJob> {
        self.jobs.get(model_key)
    }

    pub fn progress(&self) -> Progress {
        let terminal = self.jobs.values().filter(|job| job.is_terminal()).count();
        Progress::new(terminal, self.participants.len())
    }

    pub fn all_terminal(&self) -> bool {
        self.jobs.values().all(ModelJob::is_terminal)
    }

    /// Participant keys whose jobs are still running, in participant order.
    pub fn pending_keys(&self) -> Vec<String> {
        self.jobs_in_order()
            .filter(|job| !job.is_terminal())
            .map(|job| job.model_key.clone())
            .collect()
    }

    /// Whether no more events will be applied to this session.
    pub fn is_settled(&self) -> bool {
        self.cancelled || self.status.is_final()
    }

    /// Marks the transport as being opened.
    pub fn begin_connecting(&mut self) {
        if !self.is_settled() {
            self.set_status(SessionStatus::Connecting);
        }
    }

    /// Applies one classified event.
    ///
    /// The first classified event moves `Connecting` to `Streaming`.
    /// `Complete` finishes the session whatever the jobs say; otherwise the
    /// session finishes once every job is terminal.
    pub fn apply(&mut self, event: &StreamEvent, now: DateTime<Utc>) -> ApplyOutcome {
        if self.is_settled() {
            return ApplyOutcome::Ignored;
        }

        let before = self.status;
        if event.is_classified() && matches!(before, SessionStatus::Idle | SessionStatus::Connecting)
        {
            self.status = SessionStatus::Streaming;
        }

        let mut job = None;
        match event {
            StreamEvent::Complete => {
                self.status = SessionStatus::Completed;
            }
            _ => {
                if let Some(identity) = event.identity() {
                    match self.jobs.get_mut(&identity.key) {
                        Some(target) => {
                            let transition = target.apply(event, now);
                            tracing::debug!(
                                "[Session] {} -> {} ({}): {:?}",
                                event.name(),
                                identity.key,
                                target.status,
                                transition
                            );
                            job = Some((identity.key.clone(), transition));
                        }
                        None => {
                            tracing::debug!(
                                "[Session] Ignoring '{}' for non-participant model '{}'",
                                event.name(),
                                identity.key
                            );
                        }
                    }
                }
                if self.status == SessionStatus::Streaming && self.all_terminal() {
                    self.status = SessionStatus::Completed;
                }
            }
        }

        let status_change = (self.status != before).then_some(before);
        let outcome = ApplyOutcome::Applied { job, status_change };
        if outcome.is_change() {
            self.updated_at = now;
        }
        outcome
    }

    /// Records a transport-level failure.
    ///
    /// Returns `false` when the session had already settled; a completed
    /// session is never turned into an error afterwards.
    pub fn fail_transport(&mut self, message: impl Into<String>) -> bool {
        if self.is_settled() {
            return false;
        }
        self.transport_error = Some(message.into());
        self.set_status(SessionStatus::Error);
        true
    }

    /// Freezes the session without touching its status or its jobs.
    pub fn cancel(&mut self) {
        if !self.cancelled {
            self.cancelled = true;
            self.updated_at = Utc::now();
        }
    }

    fn set_status(&mut self, status: SessionStatus) {
        if self.status != status {
            self.status = status;
            self.updated_at = Utc::now();
        }
    }
}

/// Persistence unit: everything needed to resume a run after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session: Session,
    pub prompt: PromptPayload,
}
