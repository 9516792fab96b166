//! Connectivity signal and the tasks that react to it.
//!
//! The online/offline state lives in a `watch` channel. It is driven either
//! by the host (`Connectivity::set_online`) or by an optional probe that
//! polls the origin. The listener replays the sync queue on every
//! offline-to-online transition and, while online, retries a pass that ended
//! on a network failure after an exponential backoff.

use shelf_core::AppConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use url::Url;

use super::sync::SyncQueue;
use crate::fetch::{Origin, OriginRequest};

/// Shared online/offline state.
#[derive(Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Record the current state. Returns whether it changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
        if changed {
            tracing::info!(online, "connectivity changed");
        }
        changed
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Replay on reconnect, with backoff retries while online.
pub fn spawn_listener(connectivity: &Connectivity, queue: SyncQueue, config: AppConfig) -> JoinHandle<()> {
    let rx = connectivity.subscribe();
    tokio::spawn(listen(rx, queue, config))
}

async fn listen(mut rx: watch::Receiver<bool>, queue: SyncQueue, config: AppConfig) {
    let mut failures: u32 = 0;
    let mut retry: Option<Duration> = None;

    if *rx.borrow_and_update() {
        retry = replay_pass(&queue, &config, &mut failures).await;
    }

    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    tracing::debug!("connectivity channel closed, listener exiting");
                    break;
                }
                // Notifications only fire on a change, so `true` here is a reconnect.
                if *rx.borrow_and_update() {
                    failures = 0;
                    retry = replay_pass(&queue, &config, &mut failures).await;
                } else {
                    retry = None;
                }
            }
            _ = tokio::time::sleep(retry.unwrap_or_default()), if retry.is_some() => {
                retry = replay_pass(&queue, &config, &mut failures).await;
            }
        }
    }
}

/// Run one pass. Returns the delay before the next retry, if one is needed.
async fn replay_pass(queue: &SyncQueue, config: &AppConfig, failures: &mut u32) -> Option<Duration> {
    let needs_retry = match queue.replay_all().await {
        Ok(report) => report.stopped_early,
        Err(e) => {
            tracing::warn!(error = %e, "replay pass failed");
            true
        }
    };

    if !needs_retry {
        *failures = 0;
        return None;
    }

    let delay = config.retry_delay(*failures);
    *failures = failures.saturating_add(1);
    tracing::debug!(delay_ms = delay.as_millis() as u64, failures = *failures, "scheduling replay retry");
    Some(delay)
}

/// Poll `probe_url` every `interval`; any response means online.
pub fn spawn_probe(connectivity: &Connectivity, origin: Arc<dyn Origin>, probe_url: Url, interval: Duration) -> JoinHandle<()> {
    let connectivity = connectivity.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let reachable = match origin.fetch(&OriginRequest::get(probe_url.clone())).await {
                Ok(_) => true,
                Err(e) => e.answered_status().is_some(),
            };
            connectivity.set_online(reachable);
        }
    })
}
