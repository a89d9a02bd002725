//! Session domain module.
//!
//! This module contains the stream reconciliation engine: the event
//! vocabulary, the classifier that produces it, the per-model job state
//! machine and the session aggregate that owns the jobs.
//!
//! # Module Structure
//!
//! - `identity`: model key / display label canonicalization (`ModelIdentity`)
//! - `event`: classified event vocabulary (`StreamEvent`, `LegacyUpdate`)
//! - `classifier`: decoded payload -> `StreamEvent`
//! - `job`: per-model state machine (`ModelJob`, `JobStatus`, `ErrorInfo`)
//! - `model`: session aggregate (`Session`, `SessionStatus`, `SessionRecord`)
//! - `progress`: aggregate progress (`Progress`)
//! - `repository`: persistence trait (`SessionRepository`)
//!
//! # Usage
//!
//! ```
//! use chorus_core::session::{classify, JobStatus, Session, SessionStatus};
//! use serde_json::json;
//!
//! let mut session = Session::new(["m1"]).unwrap();
//! session.begin_connecting();
//! let event = classify(&json!({"type": "result", "model": "m1", "result": {"content": "hi"}}));
//! session.apply(&event, chrono::Utc::now());
//!
//! assert_eq!(session.job("m1").unwrap().status, JobStatus::Success);
//! assert_eq!(session.status, SessionStatus::Completed);
//! ```

mod classifier;
mod event;
mod identity;
mod job;
mod model;
mod progress;
mod repository;

// Re-export public API
pub use classifier::classify;
pub use event::{LegacyUpdate, StreamEvent};
pub use identity::ModelIdentity;
pub use job::{ErrorInfo, ErrorKind, JobStatus, JobTransition, ModelJob};
pub use model::{ApplyOutcome, Session, SessionRecord, SessionStatus};
pub use progress::Progress;
pub use repository::SessionRepository;
