//! Durable replay of mutations issued while offline.
//!
//! Actions replay one at a time in creation order. A network failure bumps
//! the action's attempt count and ends the pass, so a later action is never
//! sent ahead of an earlier one. A 4xx/5xx is a definitive rejection: the
//! action is dropped and reported. At the attempt ceiling the action is
//! marked exhausted and waits for a manual [`SyncQueue::retry`] or
//! [`SyncQueue::discard`].

use bytes::Bytes;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use shelf_core::{ActionState, CacheDb, Error, PendingAction};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use url::Url;

use super::invalidate::Invalidator;
use crate::fetch::{Origin, OriginRequest};

const EVENT_CAPACITY: usize = 64;

/// Outcome notification for a replayed action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncEvent {
    SyncSuccess { action_id: String },
    SyncFailed {
        action_id: String,
        reason: String,
        /// The action is retained for manual retry or discard.
        exhausted: bool,
    },
}

impl SyncEvent {
    pub fn action_id(&self) -> &str {
        match self {
            SyncEvent::SyncSuccess { action_id } | SyncEvent::SyncFailed { action_id, .. } => action_id,
        }
    }
}

/// Summary of one `replay_all` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub attempted: usize,
    pub succeeded: usize,
    /// Removed after a 4xx/5xx.
    pub rejected: usize,
    /// Reached the attempt ceiling during this pass.
    pub exhausted: usize,
    /// Pending actions left afterwards.
    pub remaining: u64,
    /// The pass ended on a network failure.
    pub stopped_early: bool,
    /// Another pass was already running; nothing was done.
    pub skipped: bool,
}

/// Clears the replaying flag when a pass ends, however it ends.
struct ReplayGuard(Arc<AtomicBool>);

impl Drop for ReplayGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Queue of mutations awaiting replay.
#[derive(Clone)]
pub struct SyncQueue {
    db: CacheDb,
    origin: Arc<dyn Origin>,
    invalidator: Invalidator,
    max_attempts: u32,
    events: broadcast::Sender<SyncEvent>,
    replaying: Arc<AtomicBool>,
}

impl SyncQueue {
    pub fn new(db: CacheDb, origin: Arc<dyn Origin>, invalidator: Invalidator, max_attempts: u32) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { db, origin, invalidator, max_attempts, events, replaying: Arc::new(AtomicBool::new(false)) }
    }

    /// Persist an action at the tail of the queue.
    pub async fn enqueue(&self, action: &PendingAction) -> Result<(), Error> {
        self.db.enqueue_action(action).await?;
        tracing::info!(action_id = %action.id, method = %action.method, url = %action.url, "queued for replay");
        Ok(())
    }

    /// Receive SYNC_SUCCESS / SYNC_FAILED notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Actions eligible for automatic replay, in FIFO order.
    pub async fn pending(&self) -> Result<Vec<PendingAction>, Error> {
        self.db.pending_actions().await
    }

    /// Every stored action, exhausted ones included.
    pub async fn all(&self) -> Result<Vec<PendingAction>, Error> {
        self.db.all_actions().await
    }

    pub fn is_replaying(&self) -> bool {
        self.replaying.load(Ordering::SeqCst)
    }

    /// Put an exhausted action back in line with a fresh attempt budget.
    pub async fn retry(&self, id: &str) -> Result<PendingAction, Error> {
        if !self.db.reset_action(id).await? {
            return Err(Error::NotFound(format!("pending action {id}")));
        }
        tracing::info!(action_id = id, "action reset for retry");
        self.db.get_action(id).await?.ok_or_else(|| Error::NotFound(format!("pending action {id}")))
    }

    /// Drop an action without replaying it.
    pub async fn discard(&self, id: &str) -> Result<(), Error> {
        if !self.db.remove_action(id).await? {
            return Err(Error::NotFound(format!("pending action {id}")));
        }
        tracing::info!(action_id = id, "action discarded");
        Ok(())
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Replay pending actions in FIFO order.
    ///
    /// Non-reentrant: a call made while a pass is running returns a report
    /// with `skipped` set and touches nothing.
    pub async fn replay_all(&self) -> Result<ReplayReport, Error> {
        if self.replaying.swap(true, Ordering::SeqCst) {
            tracing::debug!("replay already running, skipping");
            return Ok(ReplayReport { skipped: true, ..Default::default() });
        }
        let _guard = ReplayGuard(Arc::clone(&self.replaying));

        let mut report = ReplayReport::default();

        for action in self.db.pending_actions().await? {
            report.attempted += 1;
            match self.replay_one(&action).await? {
                Outcome::Succeeded => report.succeeded += 1,
                Outcome::Rejected => report.rejected += 1,
                Outcome::Failed { exhausted } => {
                    if exhausted {
                        report.exhausted += 1;
                    }
                    report.stopped_early = true;
                    break;
                }
            }
        }

        report.remaining = self.db.count_actions(ActionState::Pending).await?;

        if report.attempted > 0 {
            tracing::info!(
                attempted = report.attempted,
                succeeded = report.succeeded,
                rejected = report.rejected,
                exhausted = report.exhausted,
                remaining = report.remaining,
                stopped_early = report.stopped_early,
                "replay pass finished"
            );
        }

        Ok(report)
    }

    async fn replay_one(&self, action: &PendingAction) -> Result<Outcome, Error> {
        let request = match to_request(action) {
            Ok(request) => request,
            Err(reason) => return self.reject(action, reason).await,
        };

        let attempt = action.attempt_count + 1;
        tracing::debug!(action_id = %action.id, attempt, url = %action.url, "replaying action");

        // Anything the origin answered is final; only a missing response is retried.
        let (status, detail) = match self.origin.fetch(&request).await {
            Ok(response) => (response.status, String::from_utf8_lossy(&response.body).chars().take(200).collect()),
            Err(e) => match e.answered_status() {
                Some(status) => (status, e.to_string()),
                None if e.is_transient() => return self.record_failure(action, attempt, &e.to_string()).await,
                None => return self.reject(action, Error::from(e).to_string()).await,
            },
        };

        if !status.is_success() {
            let err = Error::OriginRejected { status: status.as_u16(), message: detail };
            return self.reject(action, err.to_string()).await;
        }

        // Removal happens first; only the caller that actually removed
        // the row runs side effects.
        if self.db.remove_action(&action.id).await? {
            if let Err(e) = self.invalidator.on_mutation_success(&request.url).await {
                tracing::warn!(action_id = %action.id, error = %e, "invalidation after replay failed");
            }
            tracing::info!(action_id = %action.id, attempt, status = status.as_u16(), "action replayed");
            self.emit(SyncEvent::SyncSuccess { action_id: action.id.clone() });
        }
        Ok(Outcome::Succeeded)
    }

    /// Drop an action for good and report why.
    async fn reject(&self, action: &PendingAction, reason: String) -> Result<Outcome, Error> {
        if self.db.remove_action(&action.id).await? {
            tracing::warn!(action_id = %action.id, %reason, "dropping action");
            self.emit(SyncEvent::SyncFailed { action_id: action.id.clone(), reason, exhausted: false });
        }
        Ok(Outcome::Rejected)
    }

    async fn record_failure(&self, action: &PendingAction, attempt: u32, error: &str) -> Result<Outcome, Error> {
        let updated = self.db.record_failed_attempt(&action.id, error, self.max_attempts).await?;
        let exhausted = updated.as_ref().is_some_and(|a| a.state == ActionState::Exhausted);
        if exhausted {
            let err = Error::ReplayExhausted { action_id: action.id.clone(), attempts: attempt };
            tracing::warn!(action_id = %action.id, attempt, %error, "action exhausted");
            self.emit(SyncEvent::SyncFailed { action_id: action.id.clone(), reason: err.to_string(), exhausted: true });
        } else {
            tracing::debug!(action_id = %action.id, attempt, %error, "replay failed, will retry");
        }
        Ok(Outcome::Failed { exhausted })
    }
}

enum Outcome {
    Succeeded,
    Rejected,
    Failed { exhausted: bool },
}

fn to_request(action: &PendingAction) -> Result<OriginRequest, String> {
    let url = Url::parse(&action.url).map_err(|e| format!("invalid URL {}: {e}", action.url))?;
    let method = Method::from_bytes(action.method.as_bytes()).map_err(|e| format!("invalid method {}: {e}", action.method))?;
    Ok(OriginRequest { method, url, headers: action.headers.clone(), body: Bytes::from(action.body.clone()) })
}
