use chorus_core::Result;
use chorus_core::dispatch::{DispatchRequest, PromptPayload};
use chorus_core::session::{Progress, Session, SessionRecord, SessionRepository};
use chorus_interaction::{EventTransport, decode_frames};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, watch};

use super::pipeline::{StreamEnd, StreamOrigin, drive};
use super::poll::PollFallback;
use super::run::{ActiveRun, SessionUpdates};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Owns the active session and drives it from the dispatcher's streams.
///
/// `SessionController` is responsible for:
/// - Creating a session for each submitted prompt
/// - Reading the primary stream and applying its events in order
/// - Starting the poll fallback for jobs the stream leaves pending
/// - Publishing snapshots to subscribers
/// - Persisting the session when its state changes
///
/// Only one session is active at a time. Submitting again supersedes the
/// previous run: its reads are cancelled and its late events never reach
/// the new session.
pub struct SessionController {
    transport: Arc<dyn EventTransport>,
    repository: Option<Arc<dyn SessionRepository>>,
    poll_interval: Duration,
    /// Run currently owned by the controller
    current: Arc<RwLock<Option<ActiveRun>>>,
    /// Latest snapshot of the current session
    updates: SessionUpdates,
}

impl SessionController {
    /// Creates a controller without persistence.
    ///
    /// # Arguments
    ///
    /// * `transport` - Transport used for both the primary stream and polls
    pub fn new(transport: Arc<dyn EventTransport>) -> Self {
        let (updates, _) = watch::channel(None);
        Self {
            transport,
            repository: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            current: Arc::new(RwLock::new(None)),
            updates: Arc::new(updates),
        }
    }

    /// Persists every state change to `repository`.
    pub fn with_repository(mut self, repository: Arc<dyn SessionRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Sets the poll fallback interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Starts a new session for `participants` and dispatches `prompt`.
    ///
    /// Returns as soon as the session exists; the stream is read in the
    /// background. Use [`subscribe`](Self::subscribe) or
    /// [`wait_until_settled`](Self::wait_until_settled) to follow it.
    ///
    /// # Arguments
    ///
    /// * `participants` - Model keys to run; duplicates are collapsed
    /// * `prompt` - Prompt text and attachments
    ///
    /// # Returns
    ///
    /// The session snapshot in the `Connecting` state.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `participants` is empty.
    pub async fn submit<I, S>(&self, participants: I, prompt: PromptPayload) -> Result<Session>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut session = Session::new(participants)?;
        session.begin_connecting();

        tracing::info!(
            "[SessionController] Submitting session {} to {} models",
            session.id,
            session.participants.len()
        );

        let request = DispatchRequest::full(
            session.id.clone(),
            session.participants.clone(),
            prompt.clone(),
        );
        let run = self.install(session, prompt).await;

        let primary = run.clone();
        let transport = self.transport.clone();
        tokio::spawn(async move { read_primary(transport, request, primary).await });
        self.spawn_poll(run.clone());

        Ok(run.snapshot().await)
    }

    /// Continues a persisted session through the poll fallback.
    ///
    /// No primary stream is opened; the pending jobs are recovered by
    /// polling. A settled record is installed as-is and nothing runs.
    ///
    /// # Returns
    ///
    /// The resumed session snapshot.
    pub async fn resume(&self, record: SessionRecord) -> Result<Session> {
        let SessionRecord { session, prompt } = record;
        let settled = session.is_settled();

        tracing::info!(
            "[SessionController] Resuming session {} ({}, {} pending)",
            session.id,
            session.status,
            session.pending_keys().len()
        );

        let run = self.install(session, prompt).await;
        if !settled {
            self.spawn_poll(run.clone());
        }
        Ok(run.snapshot().await)
    }

    /// Cancels the active session.
    ///
    /// The session is frozen as it is: its status and jobs stay unchanged
    /// and no further events are applied.
    ///
    /// # Returns
    ///
    /// The frozen snapshot, or `None` if there is no session.
    pub async fn cancel(&self) -> Option<Session> {
        let run = self.current.read().await.clone()?;
        let snapshot = run.cancel().await;
        tracing::info!("[SessionController] Cancelled session {}", snapshot.id);
        self.updates.send_replace(Some(snapshot.clone()));
        Some(snapshot)
    }

    /// Returns a copy of the active session.
    pub async fn snapshot(&self) -> Option<Session> {
        let run = self.current.read().await.clone()?;
        Some(run.snapshot().await)
    }

    /// Returns the active session's progress.
    pub async fn progress(&self) -> Option<Progress> {
        self.snapshot().await.map(|session| session.progress())
    }

    /// Subscribes to session snapshots.
    ///
    /// The receiver sees the latest snapshot after every applied change;
    /// intermediate snapshots may be skipped by a slow reader.
    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.updates.subscribe()
    }

    /// Waits until the active session completes, fails, is cancelled or has
    /// no job left pending.
    ///
    /// # Returns
    ///
    /// The settled snapshot, or `None` if there is no session.
    pub async fn wait_until_settled(&self) -> Option<Session> {
        let mut updates = self.updates.subscribe();
        loop {
            {
                let latest = updates.borrow_and_update();
                match latest.as_ref() {
                    None => return None,
                    Some(session) if session.is_settled() || session.all_terminal() => {
                        return Some(session.clone());
                    }
                    Some(_) => {}
                }
            }
            if updates.changed().await.is_err() {
                return self.snapshot().await;
            }
        }
    }

    async fn install(&self, session: Session, prompt: PromptPayload) -> ActiveRun {
        let run = ActiveRun::new(session, prompt, self.updates.clone(), self.repository.clone());

        let previous = self.current.write().await.replace(run.clone());
        if let Some(previous) = previous {
            let superseded = previous.cancel().await;
            tracing::info!(
                "[SessionController] Session {} superseded by a new run",
                superseded.id
            );
        }

        run.announce().await;
        run
    }

    fn spawn_poll(&self, run: ActiveRun) {
        let poll = PollFallback::new(self.transport.clone(), self.poll_interval);
        tokio::spawn(async move { poll.run(run).await });
    }
}

async fn read_primary(transport: Arc<dyn EventTransport>, request: DispatchRequest, run: ActiveRun) {
    let token = run.cancel_token().clone();
    let opened = tokio::select! {
        biased;
        _ = token.cancelled() => return,
        opened = transport.open(&request) => opened,
    };

    let bytes = match opened {
        Ok(bytes) => bytes,
        Err(err) => {
            run.fail_transport(&err).await;
            return;
        }
    };

    match drive(decode_frames(bytes), &run, StreamOrigin::Primary).await {
        StreamEnd::TransportFailed(err) => run.fail_transport(&err).await,
        StreamEnd::Exhausted => {
            let session = run.snapshot().await;
            if !session.is_settled() {
                tracing::info!(
                    "[SessionController] Stream for {} closed with {} jobs pending; poll fallback takes over",
                    session.id,
                    session.pending_keys().len()
                );
            }
        }
        StreamEnd::Settled | StreamEnd::Cancelled => {}
    }
    run.mark_primary_closed().await;
}
