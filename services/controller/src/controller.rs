//! Worker pool driving one reconciler.
//!
//! Workers pull keys off a shared [`WorkQueue`]. Retryable failures are
//! requeued with backoff; success and fatal failures reset the key's backoff.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ControllerSettings;
use crate::error::{ReconcileError, ReconcileResult};
use crate::queue::WorkQueue;

/// A level-triggered reconciler: given a key, converge the world for it.
#[async_trait]
pub trait Reconcile: Send + Sync {
    fn name(&self) -> &str;

    /// `cancel` flips to `true` when the pass should stop at the next
    /// destination boundary.
    async fn reconcile(&self, key: &str, cancel: &watch::Receiver<bool>) -> ReconcileResult<()>;
}

#[derive(Clone)]
pub struct Controller {
    reconciler: Arc<dyn Reconcile>,
    queue: Arc<WorkQueue>,
    workers: usize,
}

impl Controller {
    pub fn new(reconciler: Arc<dyn Reconcile>, settings: &ControllerSettings) -> Self {
        let queue = Arc::new(WorkQueue::new(reconciler.name(), settings.backoff.clone()));
        Self {
            reconciler,
            queue,
            workers: settings.workers.max(1),
        }
    }

    pub fn queue(&self) -> Arc<WorkQueue> {
        Arc::clone(&self.queue)
    }

    /// Run the workers until `shutdown` flips to `true`.
    #[instrument(skip_all, fields(controller = %self.reconciler.name()))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(workers = self.workers, "Starting controller");

        let mut workers = JoinSet::new();
        for _ in 0..self.workers {
            let controller = self.clone();
            let cancel = shutdown.clone();
            workers.spawn(async move { while controller.process_next_item(&cancel).await {} });
        }

        loop {
            if *shutdown.borrow() {
                break;
            }
            if shutdown.changed().await.is_err() {
                break;
            }
        }

        self.queue.shut_down().await;
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Worker task failed");
            }
        }
        info!("Controller stopped");
    }

    /// Process one key. Returns `false` once the queue has shut down.
    pub async fn process_next_item(&self, cancel: &watch::Receiver<bool>) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        match self.reconciler.reconcile(&key, cancel).await {
            Ok(()) => {
                debug!(key = %key, "Reconciled");
                self.queue.forget(&key).await;
            }
            Err(ReconcileError::Cancelled) => {
                debug!(key = %key, "Reconcile cancelled");
                self.queue.forget(&key).await;
            }
            Err(e) if e.is_retryable() => {
                let delay = self.queue.add_rate_limited(&key).await;
                warn!(
                    key = %key,
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "Reconcile failed, requeueing"
                );
            }
            Err(e) => {
                // Same inputs fail the same way; a change to them re-fires the key.
                error!(key = %key, error = %e, "Reconcile failed permanently");
                self.queue.forget(&key).await;
            }
        }

        self.queue.done(&key).await;
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use fleetsplit_id::NameError;
    use fleetsplit_reconcile::BackoffPolicy;

    use super::*;
    use crate::error::StoreError;

    /// Fails with a transient error a fixed number of times, then succeeds.
    struct Flaky {
        failures_left: AtomicUsize,
        calls: AtomicUsize,
        fatal: bool,
    }

    impl Flaky {
        fn new(failures: usize, fatal: bool) -> Arc<Self> {
            Arc::new(Self {
                failures_left: AtomicUsize::new(failures),
                calls: AtomicUsize::new(0),
                fatal,
            })
        }
    }

    #[async_trait]
    impl Reconcile for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn reconcile(&self, _key: &str, _cancel: &watch::Receiver<bool>) -> ReconcileResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fatal {
                return Err(ReconcileError::InvalidKey(NameError::Empty { kind: "source key" }));
            }
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::Unavailable("boom".into()).into());
            }
            Ok(())
        }
    }

    fn settings() -> ControllerSettings {
        ControllerSettings {
            workers: 1,
            backoff: BackoffPolicy::fixed(Duration::from_millis(5), Duration::from_millis(20)),
        }
    }

    #[tokio::test]
    async fn test_retryable_error_requeues_with_backoff() {
        let reconciler = Flaky::new(2, false);
        let controller = Controller::new(reconciler.clone(), &settings());
        let (_tx, cancel) = watch::channel(false);
        let queue = controller.queue();

        queue.add("default/web").await;
        assert!(controller.process_next_item(&cancel).await);
        assert_eq!(queue.num_requeues("default/web").await, 1);

        assert!(controller.process_next_item(&cancel).await);
        assert_eq!(queue.num_requeues("default/web").await, 2);

        assert!(controller.process_next_item(&cancel).await);
        assert_eq!(queue.num_requeues("default/web").await, 0);
        assert_eq!(reconciler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_requeued() {
        let reconciler = Flaky::new(0, true);
        let controller = Controller::new(reconciler.clone(), &settings());
        let (_tx, cancel) = watch::channel(false);
        let queue = controller.queue();

        queue.add("bad").await;
        assert!(controller.process_next_item(&cancel).await);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(queue.is_empty().await);
        assert_eq!(queue.num_requeues("bad").await, 0);
        assert_eq!(reconciler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let reconciler = Flaky::new(0, false);
        let controller = Controller::new(reconciler.clone(), &settings());
        let (tx, rx) = watch::channel(false);

        controller.queue().add("a").await;
        let handle = tokio::spawn({
            let controller = controller.clone();
            async move { controller.run(rx).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reconciler.calls.load(Ordering::SeqCst), 1);
    }
}
