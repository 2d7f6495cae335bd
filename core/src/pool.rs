//! Bounded, fail-fast, order-preserving task group.
//!
//! Every unit runs as its own tokio task behind a semaphore sized to the
//! hardware parallelism (capped at the unit count). The supervisor wakes on
//! each completion and on a fixed poll interval; the first failure, or
//! cancellation of the caller's token, tears down every outstanding unit.

use crate::log::Logger;
use crate::{log_debug, log_error, log_trace, PipelineError, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct WorkerPool {
    concurrency: usize,
    poll_interval: Duration,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerPool {
    pub fn new() -> Self {
        let hw = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        WorkerPool { concurrency: hw, poll_interval: DEFAULT_POLL_INTERVAL }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn workers_for(&self, items: usize) -> usize {
        self.concurrency.min(items).max(1)
    }

    /// Maps `f` over `items`, returning results in submission order.
    ///
    /// `f` receives the unit index, the item and the group's cancellation token.
    /// The returned future is not polled until a worker slot frees up.
    pub async fn run<I, T, F, Fut>(
        &self,
        items: Vec<I>,
        cancel: &CancellationToken,
        logger: &dyn Logger,
        mut f: F,
    ) -> Result<Vec<T>>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: FnMut(usize, I, CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let total = items.len();
        if total == 0 {
            return Ok(Vec::new());
        }
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let workers = self.workers_for(total);
        log_debug!(logger, "worker pool: {} units over {} workers", total, workers);

        let group = cancel.child_token();
        let permits = Arc::new(Semaphore::new(workers));
        let mut set = JoinSet::new();
        for (index, item) in items.into_iter().enumerate() {
            let unit = f(index, item, group.clone());
            let permits = permits.clone();
            let token = group.clone();
            set.spawn(async move {
                let outcome = tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(PipelineError::Cancelled),
                    res = run_unit(permits, unit) => res,
                };
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<T>> = (0..total).map(|_| None).collect();
        let mut finished = 0usize;
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let failure = loop {
            tokio::select! {
                joined = set.join_next() => match joined {
                    None => break None,
                    Some(Ok((index, Ok(value)))) => {
                        slots[index] = Some(value);
                        finished += 1;
                    }
                    Some(Ok((index, Err(e)))) => {
                        break Some(if cancel.is_cancelled() {
                            PipelineError::Cancelled
                        } else {
                            PipelineError::TaskFailed { index, source: Box::new(e) }
                        });
                    }
                    Some(Err(join_err)) => {
                        break Some(PipelineError::Internal(format!("worker task aborted: {join_err}")));
                    }
                },
                _ = ticker.tick() => {
                    if cancel.is_cancelled() {
                        break Some(PipelineError::Cancelled);
                    }
                    log_trace!(logger, "worker pool: {}/{} units finished", finished, total);
                }
            }
        };

        if let Some(err) = failure {
            group.cancel();
            let outstanding = set.len();
            set.abort_all();
            while set.join_next().await.is_some() {}
            log_error!(logger, "worker pool torn down: {} ({} outstanding units cancelled)", err, outstanding);
            return Err(err);
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| slot.ok_or_else(|| PipelineError::Internal(format!("work unit {i} produced no result"))))
            .collect()
    }
}

async fn run_unit<T, Fut>(permits: Arc<Semaphore>, unit: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    let _permit = permits.acquire_owned().await.map_err(|_| PipelineError::Cancelled)?;
    unit.await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::NoOpLogger;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;
    use tokio::time::sleep;

    fn pool() -> WorkerPool {
        WorkerPool::new().with_concurrency(4).with_poll_interval(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn preserves_submission_order() {
        let items: Vec<u64> = (0..8).collect();
        let out = pool()
            .run(items, &CancellationToken::new(), &NoOpLogger, |_, n, _| async move {
                sleep(Duration::from_millis(5 * (8 - n))).await;
                Ok(n * 10)
            })
            .await
            .unwrap();
        assert_eq!(out, vec![0, 10, 20, 30, 40, 50, 60, 70]);
    }

    #[tokio::test]
    async fn bounds_concurrency() {
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let p = WorkerPool::new().with_concurrency(2).with_poll_interval(Duration::from_millis(20));
        p.run((0..6).collect::<Vec<_>>(), &CancellationToken::new(), &NoOpLogger, |_, _, _| {
            let live = live.clone();
            let peak = peak.clone();
            async move {
                let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(20)).await;
                live.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn workers_capped_at_item_count() {
        let p = WorkerPool::new().with_concurrency(16);
        assert_eq!(p.workers_for(3), 3);
        assert_eq!(p.workers_for(0), 1);
    }

    #[tokio::test]
    async fn first_failure_cancels_the_rest() {
        let completed = Arc::new(AtomicUsize::new(0));
        let started = Instant::now();
        let res = pool()
            .run((0..6).collect::<Vec<usize>>(), &CancellationToken::new(), &NoOpLogger, |_, n, _| {
                let completed = completed.clone();
                async move {
                    if n == 1 {
                        return Err(PipelineError::ExternalToolFailure { target: "t1".into(), reason: "boom".into() });
                    }
                    sleep(Duration::from_secs(10)).await;
                    completed.fetch_add(1, Ordering::SeqCst);
                    Ok(n)
                }
            })
            .await;
        match res {
            Err(PipelineError::TaskFailed { index, source }) => {
                assert_eq!(index, 1);
                assert!(matches!(*source, PipelineError::ExternalToolFailure { .. }));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(completed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn external_interrupt_tears_down() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let res = pool()
            .run((0..3).collect::<Vec<usize>>(), &cancel, &NoOpLogger, |_, n, _| async move {
                sleep(Duration::from_secs(10)).await;
                Ok(n)
            })
            .await;
        assert!(matches!(res, Err(PipelineError::Cancelled)));
    }

    #[tokio::test]
    async fn already_cancelled_runs_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let res = pool().run(vec![1], &cancel, &NoOpLogger, |_, n, _| async move { Ok(n) }).await;
        assert!(matches!(res, Err(PipelineError::Cancelled)));
    }

    #[tokio::test]
    async fn empty_input_is_ok() {
        let out: Vec<u8> = pool()
            .run(Vec::<u8>::new(), &CancellationToken::new(), &NoOpLogger, |_, n, _| async move { Ok(n) })
            .await
            .unwrap();
        assert!(out.is_empty());
    }
}
