//! Concurrent dispatch of shards to the worker pool.
//!
//! The dispatcher runs one coordination loop per worker slot. Each loop
//! pulls the next shard from the shared queue, invokes the runner
//! collaborator for every unit in it under the per-test deadline, releases
//! the slot, and routes each outcome through retry policy. Retries re-enter
//! the queue at the front as singleton shards so fail-fast ordering
//! survives re-execution.
//!
//! Shutdown is two-tiered. A build-level cancellation (external cancel or
//! build timeout) closes the queue so nothing new is dispatched, then the
//! drain watchdog waits out the grace period before firing the force
//! token, which propagates to every in-flight runner invocation. Units
//! interrupted that way never reach a terminal status here; the
//! orchestrator records them as aborted afterwards.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::aggregate::{ExecutionAttempt, FinalStatus, ResultAggregator};
use crate::catalog::{Catalog, TestUnit};
use crate::config::BuildConfig;
use crate::report::Reporter;
use crate::retry::{Decision, RetryManager, RetryStats};
use crate::runner::{AttemptOutcome, RunnerError, TestRunner};
use crate::sharding::Shard;
use crate::pool::WorkerPool;

/// FIFO shard queue shared by the worker loops.
///
/// Pops block while the queue is empty but open; a closed, empty queue
/// pops `None`, which is the workers' signal to stop. Retries push to the
/// front, fresh work to the back.
pub struct ShardQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

struct QueueInner {
    shards: VecDeque<Shard>,
    closed: bool,
}

impl ShardQueue {
    /// A queue seeded with the planned shards.
    pub fn new(shards: Vec<Shard>) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                shards: shards.into(),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Pushes a shard to the front of the queue (retry priority).
    ///
    /// Returns `false` if the queue is closed and the shard was refused.
    pub fn push_front(&self, shard: Shard) -> bool {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                return false;
            }
            inner.shards.push_front(shard);
        }
        self.notify.notify_one();
        true
    }

    /// Takes the next shard, waiting while the queue is empty but open.
    /// Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<Shard> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(shard) = inner.shards.pop_front() {
                    return Some(shard);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Closes the queue: refuses further pushes and wakes every blocked
    /// pop. Shards already queued are still handed out.
    pub fn close(&self) {
        self.inner.lock().unwrap().closed = true;
        self.notify.notify_waiters();
    }

    /// Shards currently queued.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Shared<R, Rp> {
    queue: ShardQueue,
    pool: WorkerPool,
    retry: RetryManager,
    aggregator: Arc<ResultAggregator>,
    catalog: Arc<Catalog>,
    runner: Arc<R>,
    reporter: Arc<Rp>,
    per_test_timeout: Duration,
    build_cancel: CancellationToken,
    force_cancel: CancellationToken,
    outstanding: AtomicUsize,
}

/// Drives the planned shards to completion across the worker pool.
pub struct Dispatcher<R, Rp> {
    shared: Arc<Shared<R, Rp>>,
    build_timeout: Option<Duration>,
    drain_timeout: Duration,
}

impl<R, Rp> Dispatcher<R, Rp>
where
    R: TestRunner + 'static,
    Rp: Reporter + 'static,
{
    /// Creates a dispatcher over the planned shards.
    ///
    /// `cancel` is the caller's build-level token; cancelling it stops new
    /// dispatch and begins the drain.
    pub fn new(
        config: &BuildConfig,
        build_id: &str,
        shards: Vec<Shard>,
        catalog: Arc<Catalog>,
        runner: Arc<R>,
        reporter: Arc<Rp>,
        cancel: CancellationToken,
    ) -> Self {
        let total: usize = shards.iter().map(Shard::len).sum();
        let queue = ShardQueue::new(shards);
        if total == 0 {
            queue.close();
        }

        Self {
            shared: Arc::new(Shared {
                queue,
                pool: WorkerPool::new(config.concurrency),
                retry: RetryManager::new(config.max_retries),
                aggregator: Arc::new(ResultAggregator::new(build_id, total)),
                catalog,
                runner,
                reporter,
                per_test_timeout: config.per_test_timeout(),
                build_cancel: cancel.child_token(),
                force_cancel: CancellationToken::new(),
                outstanding: AtomicUsize::new(total),
            }),
            build_timeout: config.build_timeout(),
            drain_timeout: config.drain_timeout(),
        }
    }

    /// The aggregator collecting this build's outcomes. Safe to snapshot
    /// concurrently with [`run`](Self::run).
    pub fn aggregator(&self) -> Arc<ResultAggregator> {
        Arc::clone(&self.shared.aggregator)
    }

    /// Retry statistics observed so far.
    pub fn retry_stats(&self) -> RetryStats {
        self.shared.retry.stats()
    }

    /// Runs every worker loop to completion.
    ///
    /// Returns once all units are terminal or the drain has finished after
    /// a cancellation/build timeout. Per-attempt problems never surface
    /// here; they are folded into outcomes.
    pub async fn run(&self) {
        let build_timer = self.build_timeout.map(|timeout| {
            let cancel = self.shared.build_cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {
                        warn!("build timeout reached, entering drain");
                        cancel.cancel();
                    }
                    _ = cancel.cancelled() => {}
                }
            })
        });

        let drain_watchdog = {
            let shared = Arc::clone(&self.shared);
            let drain = self.drain_timeout;
            tokio::spawn(async move {
                shared.build_cancel.cancelled().await;
                shared.queue.close();
                shared.pool.close();
                tokio::time::sleep(drain).await;
                debug!("drain timeout elapsed, force-cancelling in-flight attempts");
                shared.force_cancel.cancel();
            })
        };

        let workers: Vec<_> = (0..self.shared.pool.size())
            .map(|worker| {
                let shared = Arc::clone(&self.shared);
                tokio::spawn(worker_loop(shared, worker))
            })
            .collect();

        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                warn!("worker loop aborted: {e}");
            }
        }

        drain_watchdog.abort();
        if let Some(timer) = build_timer {
            timer.abort();
        }
    }
}

async fn worker_loop<R, Rp>(shared: Arc<Shared<R, Rp>>, worker: usize)
where
    R: TestRunner,
    Rp: Reporter,
{
    loop {
        let slot = match shared.pool.acquire(&shared.build_cancel).await {
            Ok(slot) => slot,
            Err(_) => break,
        };

        let Some(shard) = shared.queue.pop().await else {
            shared.pool.release(slot);
            break;
        };

        debug!(worker, slot = slot.id(), units = shard.len(), "shard dispatched");

        for unit in &shard.units {
            if shared.build_cancel.is_cancelled() {
                break;
            }
            run_attempt(&shared, unit).await;
        }

        shared.pool.release(slot);
    }

    debug!(worker, "worker loop stopped");
}

async fn run_attempt<R, Rp>(shared: &Shared<R, Rp>, unit: &TestUnit)
where
    R: TestRunner,
    Rp: Reporter,
{
    let key = unit.qualified_id();
    let attempt_number = shared.retry.begin_attempt(&key);

    shared.aggregator.attempt_started();
    shared.reporter.on_attempt_start(unit, attempt_number).await;

    let started_at = Utc::now();
    let attempt_token = shared.force_cancel.child_token();
    let result = tokio::time::timeout(
        shared.per_test_timeout,
        shared.runner.run(&attempt_token, unit, attempt_number),
    )
    .await;

    let (outcome, artifact_refs, interrupted) = match result {
        Err(_) => {
            warn!(unit = %key, attempt = attempt_number, "per-test timeout expired");
            (AttemptOutcome::TimedOut, Vec::new(), false)
        }
        Ok(Ok(response)) => (response.outcome, response.artifact_refs, false),
        Ok(Err(RunnerError::Cancelled)) => (AttemptOutcome::Error, Vec::new(), true),
        Ok(Err(e)) => {
            warn!(unit = %key, attempt = attempt_number, "runner error: {e}");
            (AttemptOutcome::Error, Vec::new(), false)
        }
    };

    let attempt = ExecutionAttempt {
        unit_id: unit.id.clone(),
        matrix_key: unit.matrix_key.clone(),
        attempt_number,
        started_at,
        finished_at: Utc::now(),
        outcome,
        artifact_refs,
    };
    let duration_ms = attempt.duration_ms();

    shared.aggregator.attempt_finished(attempt.clone());
    shared.reporter.on_attempt_complete(&attempt).await;

    if interrupted {
        // Forced drain cut the attempt short: no outcome was observed, so
        // neither history nor a terminal status is recorded. The
        // orchestrator marks the unit aborted after the drain.
        return;
    }

    shared.catalog.record_outcome(&unit.id, outcome, duration_ms);

    match shared.retry.decide(&attempt) {
        Decision::Retry => {
            debug!(unit = %key, attempt = attempt_number, "re-enqueueing for retry");
            if !shared.queue.push_front(Shard::singleton(unit.clone())) {
                debug!(unit = %key, "queue closed, retry refused during drain");
            }
        }
        Decision::Terminal(status) => finalize_unit(shared, &key, status).await,
    }
}

async fn finalize_unit<R, Rp>(shared: &Shared<R, Rp>, key: &str, status: FinalStatus)
where
    R: TestRunner,
    Rp: Reporter,
{
    if !shared.aggregator.record(key, status) {
        return;
    }
    shared.reporter.on_unit_finalized(key, status).await;

    if shared.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
        // Last unit reached a terminal status: wake idle workers so the
        // loops can exit.
        shared.queue.close();
        shared.pool.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn shard(id: &str) -> Shard {
        Shard::singleton(TestUnit::new(id))
    }

    #[tokio::test]
    async fn test_queue_pop_in_order() {
        let queue = ShardQueue::new(vec![shard("a"), shard("b")]);
        assert_eq!(queue.pop().await.unwrap().units[0].id, "a");
        assert_eq!(queue.pop().await.unwrap().units[0].id, "b");
    }

    #[tokio::test]
    async fn test_retries_jump_the_queue() {
        let queue = ShardQueue::new(vec![shard("a")]);
        assert!(queue.push_front(shard("retry")));
        assert_eq!(queue.pop().await.unwrap().units[0].id, "retry");
        assert_eq!(queue.pop().await.unwrap().units[0].id, "a");
    }

    #[tokio::test]
    async fn test_closed_queue_refuses_push_and_pops_none() {
        let queue = ShardQueue::new(vec![shard("a")]);
        queue.close();

        assert!(!queue.push_front(shard("b")));
        // Already-queued work still drains.
        assert_eq!(queue.pop().await.unwrap().units[0].id, "a");
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn test_pop_blocks_until_push() {
        let queue = Arc::new(ShardQueue::new(Vec::new()));

        let popper = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!popper.is_finished());

        queue.push_front(shard("late"));
        let popped = popper.await.unwrap().unwrap();
        assert_eq!(popped.units[0].id, "late");
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_pop() {
        let queue = Arc::new(ShardQueue::new(Vec::new()));

        let popper = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();
        assert!(popper.await.unwrap().is_none());
    }
}
