use async_trait::async_trait;
use bytes::Bytes;
use chorus_application::SessionController;
use chorus_core::dispatch::{DispatchMode, DispatchRequest, PromptPayload};
use chorus_core::session::{
    ErrorKind, JobStatus, Session, SessionRecord, SessionRepository, SessionStatus, classify,
};
use chorus_core::{ChorusError, Result};
use chorus_interaction::{ByteStream, EventTransport};
use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

enum Reply {
    /// Frames, then the server closes the stream.
    Frames(Vec<Value>),
    /// Frames, then the connection stays open without sending anything.
    Hang(Vec<Value>),
    /// Frames, a pause, more frames, then the connection stays open.
    Stalled {
        first: Vec<Value>,
        pause: Duration,
        later: Vec<Value>,
    },
    /// Frames, then the read fails.
    Broken(Vec<Value>),
    /// The request itself fails.
    Refused(ChorusError),
}

/// In-memory transport that replays scripted replies in order.
///
/// Requests past the end of the script receive an empty stream.
#[derive(Default)]
struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<DispatchRequest>>,
}

impl ScriptedTransport {
    fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<DispatchRequest> {
        self.requests.lock().unwrap().clone()
    }
}

fn frames(payloads: Vec<Value>) -> Vec<Result<Bytes>> {
    payloads
        .into_iter()
        .map(|payload| Ok(Bytes::from(format!("data: {payload}\n\n"))))
        .collect()
}

#[async_trait]
impl EventTransport for ScriptedTransport {
    async fn open(&self, request: &DispatchRequest) -> Result<ByteStream> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = self.replies.lock().unwrap().pop_front();

        let stream: ByteStream = match reply {
            None => Box::pin(futures::stream::empty()),
            Some(Reply::Frames(payloads)) => Box::pin(futures::stream::iter(frames(payloads))),
            Some(Reply::Hang(payloads)) => Box::pin(
                futures::stream::iter(frames(payloads)).chain(futures::stream::pending()),
            ),
            Some(Reply::Stalled {
                first,
                pause,
                later,
            }) => Box::pin(
                futures::stream::iter(frames(first))
                    .chain(
                        futures::stream::once(tokio::time::sleep(pause))
                            .flat_map(move |_| futures::stream::iter(frames(later.clone()))),
                    )
                    .chain(futures::stream::pending()),
            ),
            Some(Reply::Broken(payloads)) => {
                let mut chunks = frames(payloads);
                chunks.push(Err(ChorusError::transport("connection reset by peer")));
                Box::pin(futures::stream::iter(chunks))
            }
            Some(Reply::Refused(err)) => return Err(err),
        };
        Ok(stream)
    }
}

#[derive(Default)]
struct InMemorySessionRepository {
    records: Mutex<HashMap<String, SessionRecord>>,
    saves: Mutex<usize>,
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn find_by_id(&self, session_id: &str) -> anyhow::Result<Option<SessionRecord>> {
        Ok(self.records.lock().unwrap().get(session_id).cloned())
    }

    async fn save(&self, record: &SessionRecord) -> anyhow::Result<()> {
        *self.saves.lock().unwrap() += 1;
        self.records
            .lock()
            .unwrap()
            .insert(record.session.id.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> anyhow::Result<()> {
        self.records.lock().unwrap().remove(session_id);
        Ok(())
    }

    async fn list_all(&self) -> anyhow::Result<Vec<SessionRecord>> {
        Ok(self.records.lock().unwrap().values().cloned().collect())
    }
}

/// Repository whose saves take `delay` while `stall` holds for the record.
struct SlowSessionRepository {
    inner: InMemorySessionRepository,
    delay: Duration,
    stall: fn(&Session) -> bool,
}

impl SlowSessionRepository {
    fn new(delay: Duration, stall: fn(&Session) -> bool) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemorySessionRepository::default(),
            delay,
            stall,
        })
    }
}

#[async_trait]
impl SessionRepository for SlowSessionRepository {
    async fn find_by_id(&self, session_id: &str) -> anyhow::Result<Option<SessionRecord>> {
        self.inner.find_by_id(session_id).await
    }

    async fn save(&self, record: &SessionRecord) -> anyhow::Result<()> {
        if (self.stall)(&record.session) {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.save(record).await
    }

    async fn delete(&self, session_id: &str) -> anyhow::Result<()> {
        self.inner.delete(session_id).await
    }

    async fn list_all(&self) -> anyhow::Result<Vec<SessionRecord>> {
        self.inner.list_all().await
    }
}

fn first_done_second_pending(session: &Session) -> bool {
    session.job("m1").is_some_and(|job| job.is_terminal())
        && session.job("m2").is_some_and(|job| !job.is_terminal())
}

fn controller(transport: &Arc<ScriptedTransport>) -> SessionController {
    SessionController::new(transport.clone()).with_poll_interval(Duration::from_secs(5))
}

async fn wait_for(controller: &SessionController, predicate: impl Fn(&Session) -> bool) -> Session {
    let mut updates = controller.subscribe();
    loop {
        let latest = updates.borrow_and_update().clone();
        if let Some(session) = latest {
            if predicate(&session) {
                return session;
            }
        }
        updates.changed().await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_streamed_and_undeployed_models() {
    let transport = ScriptedTransport::new(vec![Reply::Frames(vec![
        json!({"type": "start", "models": ["m1", "m2"]}),
        json!({"type": "model_start", "model": "m1", "display_name": "Model One"}),
        json!({"type": "chunk", "model": "m1", "delta": "Hel"}),
        json!({"type": "chunk", "model": "m1", "delta": "lo"}),
        json!({"type": "result", "model": "m1", "result": {}}),
        json!({"status": "not_deployed", "model_key": "m2"}),
        json!({"type": "complete"}),
    ])]);
    let controller = controller(&transport);

    let submitted = controller
        .submit(["m1", "m2"], PromptPayload::text("hello"))
        .await
        .unwrap();
    assert_eq!(submitted.status, SessionStatus::Connecting);

    let session = controller.wait_until_settled().await.unwrap();
    assert_eq!(session.id, submitted.id);
    assert_eq!(session.status, SessionStatus::Completed);

    let m1 = session.job("m1").unwrap();
    assert_eq!(m1.status, JobStatus::Success);
    assert_eq!(m1.display_label, "Model One");
    assert_eq!(m1.content(), Some("Hello"));

    let m2 = session.job("m2").unwrap();
    assert_eq!(m2.status, JobStatus::Error);
    assert_eq!(m2.error_info.as_ref().unwrap().kind, ErrorKind::DeploymentNeeded);

    let progress = controller.progress().await.unwrap();
    assert_eq!(progress.percent(), 100);

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].mode, DispatchMode::Full);
    assert_eq!(requests[0].models, vec!["m1".to_string(), "m2".to_string()]);
    assert_eq!(requests[0].session_id, submitted.id);
}

#[tokio::test(start_paused = true)]
async fn test_empty_roster_is_rejected() {
    let transport = ScriptedTransport::new(vec![]);
    let controller = controller(&transport);

    let err = controller
        .submit(Vec::<String>::new(), PromptPayload::text("hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, ChorusError::InvalidInput(_)));
    assert!(transport.requests().is_empty());
    assert!(controller.snapshot().await.is_none());
    assert!(controller.wait_until_settled().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_refused_connection_fails_session() {
    let transport = ScriptedTransport::new(vec![Reply::Refused(ChorusError::http_status(
        503,
        "dispatcher overloaded",
    ))]);
    let controller = controller(&transport);

    controller
        .submit(["m1"], PromptPayload::text("hello"))
        .await
        .unwrap();
    let session = controller.wait_until_settled().await.unwrap();

    assert_eq!(session.status, SessionStatus::Error);
    assert!(session.transport_error.as_deref().unwrap().contains("503"));
    assert_eq!(session.job("m1").unwrap().status, JobStatus::Waiting);
}

#[tokio::test(start_paused = true)]
async fn test_mid_stream_failure_keeps_partial_content() {
    let transport = ScriptedTransport::new(vec![Reply::Broken(vec![
        json!({"type": "chunk", "model": "m1", "delta": "partial"}),
    ])]);
    let controller = controller(&transport);

    controller
        .submit(["m1"], PromptPayload::text("hello"))
        .await
        .unwrap();
    let session = controller.wait_until_settled().await.unwrap();

    assert_eq!(session.status, SessionStatus::Error);
    let m1 = session.job("m1").unwrap();
    assert_eq!(m1.status, JobStatus::Streaming);
    assert_eq!(m1.partial_content, "partial");
}

#[tokio::test(start_paused = true)]
async fn test_poll_recovers_job_left_pending_by_closed_stream() {
    let transport = ScriptedTransport::new(vec![
        Reply::Frames(vec![
            json!({"type": "start", "models": ["m1", "m2"]}),
            json!({"type": "result", "model": "m1", "result": {"content": "first"}}),
        ]),
        Reply::Frames(vec![
            json!({"type": "result", "model": "m2", "result": {"content": "second"}}),
        ]),
    ]);
    let controller = controller(&transport);

    let submitted = controller
        .submit(["m1", "m2"], PromptPayload::text("hello"))
        .await
        .unwrap();
    let session = controller.wait_until_settled().await.unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.job("m2").unwrap().content(), Some("second"));

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].mode, DispatchMode::Poll);
    assert_eq!(requests[1].session_id, submitted.id);
    assert_eq!(requests[1].models, vec!["m2".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_poll_does_not_resurrect_terminal_job() {
    let transport = ScriptedTransport::new(vec![
        Reply::Frames(vec![
            json!({"type": "result", "model": "m1", "result": {"content": "first"}}),
        ]),
        Reply::Frames(vec![
            json!({"type": "error", "model": "m1", "error": "late failure"}),
            json!({"type": "result", "model": "m2", "result": {"content": "second"}}),
        ]),
    ]);
    let controller = controller(&transport);

    controller
        .submit(["m1", "m2"], PromptPayload::text("hello"))
        .await
        .unwrap();
    let session = controller.wait_until_settled().await.unwrap();

    let m1 = session.job("m1").unwrap();
    assert_eq!(m1.status, JobStatus::Success);
    assert_eq!(m1.content(), Some("first"));
    assert!(m1.error_info.is_none());
    assert_eq!(session.progress().terminal, 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_poll_is_retried_without_failing_session() {
    let transport = ScriptedTransport::new(vec![
        Reply::Frames(vec![
            json!({"type": "result", "model": "m1", "result": {"content": "first"}}),
        ]),
        Reply::Refused(ChorusError::transport("connection refused")),
        Reply::Frames(vec![
            json!({"type": "result", "model": "m2", "result": {"content": "second"}}),
        ]),
    ]);
    let controller = controller(&transport);

    controller
        .submit(["m1", "m2"], PromptPayload::text("hello"))
        .await
        .unwrap();
    let session = controller.wait_until_settled().await.unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    assert!(session.transport_error.is_none());
    assert_eq!(transport.requests().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_complete_event_stops_polling() {
    let transport = ScriptedTransport::new(vec![Reply::Frames(vec![
        json!({"type": "model_start", "model": "m1"}),
        json!({"type": "complete"}),
    ])]);
    let controller = controller(&transport);

    controller
        .submit(["m1", "m2"], PromptPayload::text("hello"))
        .await
        .unwrap();
    let session = controller.wait_until_settled().await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.job("m1").unwrap().status, JobStatus::Processing);
    assert_eq!(session.job("m2").unwrap().status, JobStatus::Waiting);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_freezes_session() {
    let transport = ScriptedTransport::new(vec![Reply::Hang(vec![
        json!({"type": "start", "models": ["m1", "m2"]}),
        json!({"type": "model_start", "model": "m1"}),
    ])]);
    let controller = controller(&transport);

    controller
        .submit(["m1", "m2"], PromptPayload::text("hello"))
        .await
        .unwrap();
    wait_for(&controller, |session| {
        session
            .job("m1")
            .is_some_and(|job| job.status == JobStatus::Processing)
    })
    .await;

    let cancelled = controller.cancel().await.unwrap();
    assert!(cancelled.cancelled);
    assert_eq!(cancelled.status, SessionStatus::Streaming);
    assert_eq!(cancelled.job("m1").unwrap().status, JobStatus::Processing);
    assert_eq!(cancelled.job("m2").unwrap().status, JobStatus::Waiting);

    let settled = controller.wait_until_settled().await.unwrap();
    assert_eq!(settled, cancelled);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(controller.snapshot().await.unwrap(), cancelled);
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_new_submission_supersedes_active_run() {
    let transport = ScriptedTransport::new(vec![
        Reply::Hang(vec![json!({"type": "model_start", "model": "m1"})]),
        Reply::Frames(vec![
            json!({"type": "result", "model": "m3", "result": {"content": "third"}}),
        ]),
    ]);
    let repository = Arc::new(InMemorySessionRepository::default());
    let controller = controller(&transport).with_repository(repository.clone());

    let first = controller
        .submit(["m1"], PromptPayload::text("first"))
        .await
        .unwrap();
    wait_for(&controller, |session| {
        session
            .job("m1")
            .is_some_and(|job| job.status == JobStatus::Processing)
    })
    .await;

    let second = controller
        .submit(["m3"], PromptPayload::text("second"))
        .await
        .unwrap();

    let session = controller.wait_until_settled().await.unwrap();
    assert_eq!(session.id, second.id);
    assert_eq!(session.status, SessionStatus::Completed);

    let superseded = repository.find_by_id(&first.id).await.unwrap().unwrap();
    assert!(superseded.session.cancelled);
    assert_eq!(superseded.prompt.text, "first");
}

#[tokio::test(start_paused = true)]
async fn test_state_changes_are_persisted() {
    let transport = ScriptedTransport::new(vec![Reply::Frames(vec![
        json!({"type": "start", "models": ["m1"]}),
        json!({"type": "chunk", "model": "m1", "delta": "x"}),
        json!({"type": "chunk", "model": "m1", "delta": "y"}),
        json!({"type": "result", "model": "m1", "result": {}}),
    ])]);
    let repository = Arc::new(InMemorySessionRepository::default());
    let controller = controller(&transport).with_repository(repository.clone());

    let submitted = controller
        .submit(["m1"], PromptPayload::text("persist me"))
        .await
        .unwrap();
    controller.wait_until_settled().await.unwrap();

    let record = repository.find_by_id(&submitted.id).await.unwrap().unwrap();
    assert_eq!(record.session.status, SessionStatus::Completed);
    assert_eq!(record.session.job("m1").unwrap().content(), Some("xy"));
    assert_eq!(record.prompt.text, "persist me");

    // Connecting, Streaming, job finished / Completed. Chunks alone do not save.
    assert_eq!(*repository.saves.lock().unwrap(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_resume_polls_only_pending_jobs() {
    let mut session = Session::with_id("s-resume", ["m1", "m2"]).unwrap();
    session.begin_connecting();
    session.apply(
        &classify(&json!({"type": "result", "model": "m1", "result": {"content": "done"}})),
        chrono::Utc::now(),
    );
    session.apply(
        &classify(&json!({"type": "chunk", "model": "m2", "delta": "hal"})),
        chrono::Utc::now(),
    );
    assert_eq!(session.status, SessionStatus::Streaming);

    let transport = ScriptedTransport::new(vec![Reply::Frames(vec![
        json!({"type": "result", "model": "m2", "result": {"content": "half"}}),
    ])]);
    let controller = controller(&transport);

    let resumed = controller
        .resume(SessionRecord {
            session,
            prompt: PromptPayload::text("hello"),
        })
        .await
        .unwrap();
    assert_eq!(resumed.id, "s-resume");

    let settled = controller.wait_until_settled().await.unwrap();
    assert_eq!(settled.status, SessionStatus::Completed);
    assert_eq!(settled.job("m1").unwrap().content(), Some("done"));
    assert_eq!(settled.job("m2").unwrap().content(), Some("half"));

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].mode, DispatchMode::Poll);
    assert_eq!(requests[0].models, vec!["m2".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_resume_settled_record_opens_nothing() {
    let mut session = Session::with_id("s-done", ["m1"]).unwrap();
    session.apply(
        &classify(&json!({"type": "result", "model": "m1", "result": {"content": "done"}})),
        chrono::Utc::now(),
    );
    assert_eq!(session.status, SessionStatus::Completed);

    let transport = ScriptedTransport::new(vec![]);
    let controller = controller(&transport);
    controller
        .resume(SessionRecord {
            session,
            prompt: PromptPayload::text("hello"),
        })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(transport.requests().is_empty());
    assert_eq!(
        controller.wait_until_settled().await.unwrap().status,
        SessionStatus::Completed
    );
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_streams_publish_in_apply_order() {
    let transport = ScriptedTransport::new(vec![
        Reply::Stalled {
            first: vec![json!({"type": "result", "model": "m1", "result": {"content": "primary"}})],
            pause: Duration::from_secs(12),
            later: vec![
                json!({"type": "result", "model": "m1", "result": {"content": "late"}}),
                json!({"type": "error", "model": "m1", "error": "late failure"}),
            ],
        },
        Reply::Frames(vec![
            json!({"type": "result", "model": "m1", "result": {"content": "poll"}}),
            json!({"type": "result", "model": "m2", "result": {"content": "second"}}),
        ]),
    ]);
    let repository = SlowSessionRepository::new(Duration::from_secs(20), first_done_second_pending);
    let controller = controller(&transport).with_repository(repository.clone());

    let mut updates = controller.subscribe();
    let observed = Arc::new(Mutex::new(Vec::new()));
    let recorder = {
        let observed = observed.clone();
        tokio::spawn(async move {
            while updates.changed().await.is_ok() {
                let terminal = updates
                    .borrow_and_update()
                    .as_ref()
                    .map(|session| session.progress().terminal);
                if let Some(terminal) = terminal {
                    observed.lock().unwrap().push(terminal);
                }
            }
        })
    };

    let submitted = controller
        .submit(["m1", "m2"], PromptPayload::text("hello"))
        .await
        .unwrap();
    controller.wait_until_settled().await.unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;

    let live = controller.snapshot().await.unwrap();
    assert_eq!(live.status, SessionStatus::Completed);
    assert_eq!(live.job("m1").unwrap().content(), Some("primary"));
    assert!(live.job("m1").unwrap().error_info.is_none());
    assert_eq!(live.job("m2").unwrap().content(), Some("second"));

    let published = controller.subscribe().borrow().clone().unwrap();
    assert_eq!(published, live);

    let stored = repository.find_by_id(&submitted.id).await.unwrap().unwrap();
    assert_eq!(stored.session, live);

    let progress = observed.lock().unwrap().clone();
    assert!(progress.windows(2).all(|pair| pair[0] <= pair[1]), "{progress:?}");
    assert_eq!(progress.last(), Some(&2));

    let requests = transport.requests();
    assert_eq!(requests[1].mode, DispatchMode::Poll);
    assert_eq!(requests[1].models, vec!["m2".to_string()]);
    recorder.abort();
}

#[tokio::test(start_paused = true)]
async fn test_superseded_run_is_stored_cancelled_after_slow_save() {
    let transport = ScriptedTransport::new(vec![
        Reply::Hang(vec![json!({"type": "model_start", "model": "m1"})]),
        Reply::Frames(vec![
            json!({"type": "result", "model": "m3", "result": {"content": "third"}}),
        ]),
    ]);
    let repository = SlowSessionRepository::new(Duration::from_secs(20), |session| {
        !session.cancelled
            && session
                .job("m1")
                .is_some_and(|job| job.status == JobStatus::Processing)
    });
    let controller = controller(&transport).with_repository(repository.clone());

    let first = controller
        .submit(["m1"], PromptPayload::text("first"))
        .await
        .unwrap();
    // The first run is now inside its slow save of the Streaming state.
    tokio::time::sleep(Duration::from_secs(1)).await;

    let second = controller
        .submit(["m3"], PromptPayload::text("second"))
        .await
        .unwrap();
    let session = controller.wait_until_settled().await.unwrap();
    assert_eq!(session.id, second.id);
    tokio::time::sleep(Duration::from_secs(60)).await;

    let superseded = repository.find_by_id(&first.id).await.unwrap().unwrap();
    assert!(superseded.session.cancelled);
    assert_eq!(superseded.session.status, SessionStatus::Streaming);
    assert_eq!(controller.snapshot().await.unwrap().id, second.id);
}
