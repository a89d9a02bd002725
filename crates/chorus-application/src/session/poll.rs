//! Poll fallback.
//!
//! Recovers results the primary stream never delivered (a dropped
//! connection, a restart) by periodically asking the dispatcher for a
//! bounded stream scoped to the jobs that are still pending.

use chorus_core::dispatch::DispatchRequest;
use chorus_interaction::{EventTransport, decode_frames};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

use super::pipeline::{StreamEnd, StreamOrigin, drive};
use super::run::ActiveRun;

/// Periodic reconciliation of pending jobs.
///
/// Polls never fail the session: a poll that cannot connect is logged and
/// retried on the next tick. Only one poll read is in flight at a time;
/// ticks that arrive while a read is still running are delayed, not
/// bursted.
#[derive(Clone)]
pub(crate) struct PollFallback {
    transport: Arc<dyn EventTransport>,
    interval: Duration,
}

impl PollFallback {
    pub(crate) fn new(transport: Arc<dyn EventTransport>, interval: Duration) -> Self {
        Self {
            transport,
            interval,
        }
    }

    /// Runs until no job is pending, the session settles or the run is
    /// cancelled. The first poll fires one full interval after start.
    pub(crate) async fn run(&self, run: ActiveRun) {
        let token = run.cancel_token().clone();
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut polls = 0usize;
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let session = run.snapshot().await;
            if session.is_settled() {
                tracing::debug!("[PollFallback] {} settled; stopping", session.id);
                return;
            }
            let pending = session.pending_keys();
            if pending.is_empty() {
                tracing::debug!("[PollFallback] {} has no pending jobs; stopping", session.id);
                return;
            }
            if run.primary_is_live(self.interval).await {
                tracing::debug!("[PollFallback] Primary stream still live; skipping tick");
                continue;
            }

            polls += 1;
            tracing::info!(
                "[PollFallback] Poll #{} for {} ({} pending: {})",
                polls,
                session.id,
                pending.len(),
                pending.join(", ")
            );

            let request = DispatchRequest::poll(session.id.clone(), pending, run.prompt().clone());
            let opened = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                opened = self.transport.open(&request) => opened,
            };

            let bytes = match opened {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::warn!("[PollFallback] Poll failed, retrying next tick: {}", err);
                    continue;
                }
            };

            match drive(decode_frames(bytes), &run, StreamOrigin::Poll).await {
                StreamEnd::Settled | StreamEnd::Cancelled => return,
                StreamEnd::TransportFailed(err) => {
                    tracing::warn!("[PollFallback] Poll read failed, retrying next tick: {}", err);
                }
                StreamEnd::Exhausted => {}
            }
        }
    }
}
