//! Deduplicating, rate-limited work queue of reconciliation keys.
//!
//! The queue is the only place that serializes work on a key:
//! - a key that is already waiting is not queued twice
//! - a key that is being processed is parked ("dirty") and re-queued when
//!   its worker calls [`WorkQueue::mark_done`], so two workers never hold
//!   the same key at once
//! - failed keys come back after a per-key exponential backoff, up to a
//!   retry limit
//! - keys leave the queue no faster than the token bucket allows

use crate::backoff::ExponentialBackoff;
use crate::key::ReconcileKey;
use crate::metrics::Metrics;
use crate::rate_limit::TokenBucket;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Retry and throughput policy.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Per-key retry delays
    pub backoff: ExponentialBackoff,
    /// Retries allowed before a key is dropped
    pub max_retries: u32,
    /// Sustained dequeue rate
    pub qps: u32,
    /// Dequeues allowed back to back before pacing starts
    pub burst: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backoff: ExponentialBackoff::default(),
            max_retries: 15,
            qps: 10,
            burst: 100,
        }
    }
}

/// What [`WorkQueue::mark_failed`] did with a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// The key comes back after `delay`
    Scheduled {
        /// Consecutive failures so far
        attempt: u32,
        /// Backoff before it is queued again
        delay: Duration,
    },
    /// Retry limit exceeded, the key was forgotten
    GaveUp {
        /// Consecutive failures including this one
        attempts: u32,
    },
    /// The queue is shutting down, nothing was scheduled
    ShuttingDown,
}

#[derive(Debug, Default)]
struct QueueState {
    /// Keys ready to be taken, in order
    queue: VecDeque<ReconcileKey>,
    /// Keys that need processing (queued, or parked behind an in-flight run)
    dirty: HashSet<ReconcileKey>,
    /// Keys currently held by a worker
    processing: HashSet<ReconcileKey>,
    /// Consecutive failures per key
    failures: HashMap<ReconcileKey, u32>,
    shutting_down: bool,
}

struct Inner {
    state: Mutex<QueueState>,
    notify: Notify,
    limiter: TokenBucket,
    config: QueueConfig,
    shutdown: CancellationToken,
    metrics: Metrics,
}

/// Work queue shared by the event bridge and the worker pool.
///
/// Cloning is cheap; all clones refer to the same queue.
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("len", &self.len())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl WorkQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new(config: QueueConfig, metrics: Metrics) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                limiter: TokenBucket::new(config.qps, config.burst),
                config,
                shutdown: CancellationToken::new(),
                metrics,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue `key` unless it is already waiting.
    ///
    /// A key that is in flight is parked and re-queued once its current run
    /// is marked done. Returns `false` when the submission was absorbed by
    /// an existing entry or the queue is shutting down.
    pub fn submit(&self, key: ReconcileKey) -> bool {
        let mut state = self.state();
        if state.shutting_down || state.dirty.contains(&key) {
            return false;
        }
        state.dirty.insert(key.clone());
        self.inner.metrics.enqueued_total.inc();

        if state.processing.contains(&key) {
            debug!(key = %key, "Key in flight, parked until done");
            return true;
        }
        debug!(key = %key, "Key enqueued");
        state.queue.push_back(key);
        self.set_depth(&state);
        drop(state);
        self.inner.notify.notify_one();
        true
    }

    /// Wait for the next key.
    ///
    /// Returns `None` once the queue is shutting down. Every `Some` must be
    /// answered by exactly one [`WorkQueue::mark_done`].
    pub async fn take(&self) -> Option<ReconcileKey> {
        let key = loop {
            let notified = self.inner.notify.notified();
            {
                let mut state = self.state();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    self.set_depth(&state);
                    break key;
                }
            }
            notified.await;
        };
        self.inner.limiter.acquire().await;
        Some(key)
    }

    /// Release the in-flight hold on `key`, re-queueing it if it was
    /// submitted again meanwhile.
    pub fn mark_done(&self, key: &ReconcileKey) {
        let mut state = self.state();
        state.processing.remove(key);
        if state.shutting_down || !state.dirty.contains(key) {
            return;
        }
        state.queue.push_back(key.clone());
        self.set_depth(&state);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Schedule `key` again after its backoff, or drop it once it has used
    /// up its retries.
    pub fn mark_failed(&self, key: &ReconcileKey) -> Requeue {
        let (attempt, delay) = {
            let mut state = self.state();
            if state.shutting_down {
                return Requeue::ShuttingDown;
            }
            let failures = state.failures.entry(key.clone()).or_insert(0);
            *failures = failures.saturating_add(1);
            let attempt = *failures;
            if attempt > self.inner.config.max_retries {
                state.failures.remove(key);
                return Requeue::GaveUp { attempts: attempt };
            }
            (attempt, self.inner.config.backoff.delay_for(attempt))
        };

        self.inner.metrics.retries_total.inc();
        let queue = self.clone();
        let shutdown = self.inner.shutdown.clone();
        let key = key.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(delay) => {
                    queue.submit(key);
                }
                () = shutdown.cancelled() => {}
            }
        });
        Requeue::Scheduled { attempt, delay }
    }

    /// Forget the failure history of `key`.
    pub fn mark_succeeded(&self, key: &ReconcileKey) {
        self.state().failures.remove(key);
    }

    /// Consecutive failures recorded for `key`.
    #[must_use]
    pub fn num_requeues(&self, key: &ReconcileKey) -> u32 {
        self.state().failures.get(key).copied().unwrap_or(0)
    }

    /// Keys waiting to be taken.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    /// Whether no key is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop handing out keys and wake every blocked [`WorkQueue::take`].
    ///
    /// Pending backoff timers are cancelled. Calling it again is a no-op.
    pub fn shut_down(&self) {
        {
            let mut state = self.state();
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
        }
        debug!("Work queue shutting down");
        self.inner.shutdown.cancel();
        self.inner.notify.notify_waiters();
    }

    /// Whether [`WorkQueue::shut_down`] has been called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }

    fn set_depth(&self, state: &QueueState) {
        self.inner
            .metrics
            .queue_depth
            .set(i64::try_from(state.queue.len()).unwrap_or(i64::MAX));
    }
}
