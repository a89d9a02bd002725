//! Shared state of one submitted run.
//!
//! A run is driven by up to two read loops (primary stream and poll
//! fallback). Both funnel every payload through [`ActiveRun::apply_payload`].
//! Applying, persisting and publishing one change happen under a single
//! commit lock, so subscribers and the repository see changes in the order
//! they were applied.

use chorus_core::ChorusError;
use chorus_core::dispatch::PromptPayload;
use chorus_core::session::{Session, SessionRecord, SessionRepository, classify};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub(crate) type SessionUpdates = Arc<watch::Sender<Option<Session>>>;

#[derive(Clone)]
pub(crate) struct ActiveRun {
    session: Arc<RwLock<Session>>,
    prompt: Arc<PromptPayload>,
    cancel: CancellationToken,
    updates: SessionUpdates,
    repository: Option<Arc<dyn SessionRepository>>,
    /// Held from applying a change until it is persisted and published.
    commit: Arc<Mutex<()>>,
    /// When the primary stream last delivered a frame; `None` once it closed.
    last_primary_frame: Arc<Mutex<Option<Instant>>>,
}

impl ActiveRun {
    pub(crate) fn new(
        session: Session,
        prompt: PromptPayload,
        updates: SessionUpdates,
        repository: Option<Arc<dyn SessionRepository>>,
    ) -> Self {
        Self {
            session: Arc::new(RwLock::new(session)),
            prompt: Arc::new(prompt),
            cancel: CancellationToken::new(),
            updates,
            repository,
            commit: Arc::new(Mutex::new(())),
            last_primary_frame: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn prompt(&self) -> &PromptPayload {
        &self.prompt
    }

    pub(crate) async fn snapshot(&self) -> Session {
        self.session.read().await.clone()
    }

    /// Classifies and applies one payload.
    ///
    /// Returns `true` once the session has settled and the caller should
    /// stop reading.
    pub(crate) async fn apply_payload(&self, payload: &Value) -> bool {
        let event = classify(payload);
        let _commit = self.commit.lock().await;

        let (outcome, snapshot) = {
            let mut session = self.session.write().await;
            let outcome = session.apply(&event, Utc::now());
            let snapshot = outcome.is_change().then(|| session.clone());
            (outcome, snapshot)
        };

        if let Some(snapshot) = snapshot {
            let settled = snapshot.is_settled();
            if outcome.status_changed() {
                tracing::info!(
                    "[Session] {} is now {} (progress {})",
                    snapshot.id,
                    snapshot.status,
                    snapshot.progress()
                );
            }
            if outcome.status_changed() || outcome.job_finished() {
                self.persist(&snapshot).await;
            }
            self.publish(snapshot);
            return settled;
        }

        self.session.read().await.is_settled()
    }

    /// Moves the session to `Error` after a fatal transport failure.
    pub(crate) async fn fail_transport(&self, err: &ChorusError) {
        let _commit = self.commit.lock().await;
        let snapshot = {
            let mut session = self.session.write().await;
            if !session.fail_transport(err.to_string()) {
                return;
            }
            session.clone()
        };
        tracing::error!("[Session] {} failed: {}", snapshot.id, err);
        self.persist(&snapshot).await;
        self.publish(snapshot);
    }

    /// Freezes the session and stops both read loops.
    pub(crate) async fn cancel(&self) -> Session {
        self.cancel.cancel();
        let _commit = self.commit.lock().await;
        let snapshot = {
            let mut session = self.session.write().await;
            session.cancel();
            session.clone()
        };
        self.persist(&snapshot).await;
        snapshot
    }

    /// Publishes the current state to subscribers.
    pub(crate) async fn announce(&self) {
        let _commit = self.commit.lock().await;
        let snapshot = self.snapshot().await;
        self.persist(&snapshot).await;
        self.publish(snapshot);
    }

    pub(crate) async fn mark_primary_frame(&self) {
        *self.last_primary_frame.lock().await = Some(Instant::now());
    }

    pub(crate) async fn mark_primary_closed(&self) {
        *self.last_primary_frame.lock().await = None;
    }

    /// Whether the primary stream delivered a frame within `window`.
    pub(crate) async fn primary_is_live(&self, window: std::time::Duration) -> bool {
        self.last_primary_frame
            .lock()
            .await
            .is_some_and(|at| at.elapsed() < window)
    }

    fn publish(&self, snapshot: Session) {
        // A superseded run must not overwrite its successor's state.
        if self.cancel.is_cancelled() && !snapshot.cancelled {
            return;
        }
        self.updates.send_replace(Some(snapshot));
    }

    async fn persist(&self, snapshot: &Session) {
        let Some(repository) = &self.repository else {
            return;
        };
        let record = SessionRecord {
            session: snapshot.clone(),
            prompt: (*self.prompt).clone(),
        };
        if let Err(err) = repository.save(&record).await {
            tracing::warn!("[Session] Failed to persist {}: {:#}", snapshot.id, err);
        }
    }
}
