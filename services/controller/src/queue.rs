//! Deduplicating, rate-limited work queue.
//!
//! A key is handed to at most one worker at a time. Adding a key that is
//! already queued is a no-op; adding a key that is being processed marks it
//! dirty so it runs exactly once more after [`WorkQueue::done`].
//!
//! Failed keys are re-added after a capped exponential delay that grows with
//! the number of consecutive failures, until [`WorkQueue::forget`] resets it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use fleetsplit_reconcile::BackoffPolicy;
use tokio::sync::{Mutex, Notify};
use tracing::trace;

#[derive(Default)]
struct QueueState {
    queue: VecDeque<String>,
    /// Keys waiting to be processed, queued or not.
    dirty: HashSet<String>,
    /// Keys currently held by a worker.
    processing: HashSet<String>,
    failures: HashMap<String, u32>,
    shutting_down: bool,
}

pub struct WorkQueue {
    name: String,
    state: Mutex<QueueState>,
    notify: Notify,
    backoff: BackoffPolicy,
}

impl WorkQueue {
    pub fn new(name: impl Into<String>, backoff: BackoffPolicy) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            backoff,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn add(&self, key: impl Into<String>) {
        let key = key.into();
        let mut state = self.state.lock().await;
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }

        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            trace!(queue = %self.name, key = %key, "Key in flight, marked dirty");
            return;
        }

        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Add `key` once `delay` has passed.
    pub fn add_after(self: &Arc<Self>, key: impl Into<String>, delay: Duration) {
        let key = key.into();
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            queue.add(key).await;
        });
    }

    /// Re-add `key` after its backoff delay and count the failure.
    pub async fn add_rate_limited(self: &Arc<Self>, key: &str) -> Duration {
        let attempt = {
            let mut state = self.state.lock().await;
            let failures = state.failures.entry(key.to_string()).or_insert(0);
            let attempt = *failures;
            *failures = failures.saturating_add(1);
            attempt
        };

        let delay = self.backoff.delay(attempt);
        self.add_after(key, delay);
        delay
    }

    /// Stop tracking failures for `key`.
    pub async fn forget(&self, key: &str) {
        self.state.lock().await.failures.remove(key);
    }

    /// Consecutive failures recorded for `key`.
    pub async fn num_requeues(&self, key: &str) -> u32 {
        self.state
            .lock()
            .await
            .failures
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Wait for the next key. Returns `None` once the queue is shut down and
    /// drained.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark `key` as no longer being processed.
    pub async fn done(&self, key: &str) {
        let mut state = self.state.lock().await;
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.to_string());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop accepting keys and wake every waiting worker.
    pub async fn shut_down(&self) {
        self.state.lock().await.shutting_down = true;
        self.notify.notify_waiters();
    }

    pub async fn is_shutting_down(&self) -> bool {
        self.state.lock().await.shutting_down
    }

    /// Keys waiting to be handed out.
    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
