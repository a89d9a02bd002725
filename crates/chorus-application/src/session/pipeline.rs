//! Read loop shared by the primary stream and the poll fallback.

use chorus_core::ChorusError;
use chorus_interaction::FrameStream;
use futures::StreamExt;
use strum::Display;

use super::run::ActiveRun;

/// Which read produced a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum StreamOrigin {
    Primary,
    Poll,
}

/// Why a read loop stopped.
#[derive(Debug)]
pub(crate) enum StreamEnd {
    /// The server closed the stream.
    Exhausted,
    /// The session completed, failed or was cancelled by another path.
    Settled,
    /// The run's cancellation token fired.
    Cancelled,
    /// Reading failed partway through.
    TransportFailed(ChorusError),
}

/// Applies frames from `frames` one at a time until the stream ends,
/// the session settles or the run is cancelled.
///
/// Dropping `frames` on return closes the underlying read, so nothing
/// buffered after a cancel reaches the session.
pub(crate) async fn drive(mut frames: FrameStream, run: &ActiveRun, origin: StreamOrigin) -> StreamEnd {
    let token = run.cancel_token().clone();
    let mut applied = 0usize;

    let end = 'read: loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => break 'read StreamEnd::Cancelled,
            next = frames.next() => next,
        };

        match next {
            None => break StreamEnd::Exhausted,
            Some(Err(err)) => break StreamEnd::TransportFailed(err),
            Some(Ok(payload)) => {
                applied += 1;
                if origin == StreamOrigin::Primary {
                    run.mark_primary_frame().await;
                }
                if run.apply_payload(&payload).await {
                    break StreamEnd::Settled;
                }
            }
        }
    };

    tracing::debug!(
        "[Pipeline] {} stream stopped after {} frames: {:?}",
        origin,
        applied,
        end
    );
    end
}
