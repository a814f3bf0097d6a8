//! Autoscaling worker pool: drives a task function under a concurrency
//! bound derived from observed system load.

mod token_bucket;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::{Mutex, oneshot};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::error::CrawlError;
use crate::system_status::{SystemStatus, SystemStatusConfig};
use crate::snapshotter::Snapshotter;
use token_bucket::TokenBucket;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone)]
pub struct AutoscaledPoolConfig {
    pub min_concurrency: usize,
    pub max_concurrency: usize,
    pub desired_concurrency_ratio: f64,
    pub scale_up_step_ratio: f64,
    pub scale_down_step_ratio: f64,
    pub maybe_run_interval: Duration,
    pub scale_interval: Duration,
    pub max_tasks_per_minute: Option<u32>,
}

impl Default for AutoscaledPoolConfig {
    fn default() -> Self {
        AutoscaledPoolConfig {
            min_concurrency: 1,
            max_concurrency: 200,
            desired_concurrency_ratio: 0.95,
            scale_up_step_ratio: 0.05,
            scale_down_step_ratio: 0.05,
            maybe_run_interval: Duration::from_millis(500),
            scale_interval: Duration::from_secs(10),
            max_tasks_per_minute: None,
        }
    }
}

/// Why a run finished.
#[derive(Debug)]
pub enum PoolOutcome {
    Finished,
    Aborted(String),
    TaskError(CrawlError),
}

/// Live counters exposed while a run is in flight.
#[derive(Debug, Default)]
pub struct PoolStats {
    pub running_count: AtomicUsize,
    pub current_concurrency: AtomicUsize,
}

/// Handle to an in-flight [`AutoscaledPool::run`] invocation.
pub struct PoolHandle {
    done: oneshot::Receiver<PoolOutcome>,
    cancellation: CancellationToken,
    pub stats: Arc<PoolStats>,
}

impl PoolHandle {
    /// Signals every running task to unwind at its next suspension point and
    /// resolves the run with `PoolOutcome::Aborted`.
    pub fn abort(&self, reason: impl Into<String>) {
        let _ = reason.into();
        self.cancellation.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub async fn wait(self) -> PoolOutcome {
        self.done
            .await
            .unwrap_or_else(|_| PoolOutcome::Aborted("scheduler task dropped".to_string()))
    }
}

/// Drives `run_task_function` concurrently, scaling `current_concurrency`
/// between `min_concurrency` and `max_concurrency` from [`SystemStatus`].
pub struct AutoscaledPool {
    config: AutoscaledPoolConfig,
}

impl AutoscaledPool {
    pub fn new(config: AutoscaledPoolConfig) -> Self {
        AutoscaledPool { config }
    }

    /// Starts the scheduler loop as a background task and returns a handle
    /// to observe/abort it.
    ///
    /// `run_task_function` is called whenever capacity and the token bucket
    /// both allow a new task; it should return `None` when there is
    /// currently no work to hand out (distinct from `is_finished_function`,
    /// which means there will never be more work).
    pub fn run<Ready, Finished, RunTask, RunFut>(
        &self,
        snapshotter: Arc<Snapshotter>,
        is_task_ready_function: Ready,
        is_finished_function: Finished,
        run_task_function: RunTask,
    ) -> PoolHandle
    where
        Ready: Fn() -> bool + Send + Sync + 'static,
        Finished: Fn() -> bool + Send + Sync + 'static,
        RunTask: Fn(CancellationToken) -> RunFut + Send + Sync + 'static,
        RunFut: Future<Output = Result<(), CrawlError>> + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let cancellation = CancellationToken::new();
        let stats = Arc::new(PoolStats::default());
        stats
            .current_concurrency
            .store(self.config.min_concurrency, Ordering::SeqCst);

        let handle = PoolHandle {
            done: done_rx,
            cancellation: cancellation.clone(),
            stats: stats.clone(),
        };

        let config = self.config.clone();
        let token_bucket = config
            .max_tasks_per_minute
            .map(|limit| Arc::new(TokenBucket::new(limit)));

        tokio::spawn(Self::scheduler_loop(
            config,
            snapshotter,
            cancellation,
            stats,
            token_bucket,
            Arc::new(is_task_ready_function),
            Arc::new(is_finished_function),
            Arc::new(run_task_function),
            done_tx,
        ));

        handle
    }

    #[allow(clippy::too_many_arguments)]
    async fn scheduler_loop<Ready, Finished, RunTask, RunFut>(
        config: AutoscaledPoolConfig,
        snapshotter: Arc<Snapshotter>,
        cancellation: CancellationToken,
        stats: Arc<PoolStats>,
        token_bucket: Option<Arc<TokenBucket>>,
        is_task_ready_function: Arc<Ready>,
        is_finished_function: Arc<Finished>,
        run_task_function: Arc<RunTask>,
        done_tx: oneshot::Sender<PoolOutcome>,
    ) where
        Ready: Fn() -> bool + Send + Sync + 'static,
        Finished: Fn() -> bool + Send + Sync + 'static,
        RunTask: Fn(CancellationToken) -> RunFut + Send + Sync + 'static,
        RunFut: Future<Output = Result<(), CrawlError>> + Send + 'static,
    {
        let mut ticker = interval(config.maybe_run_interval);
        let mut scale_ticker = interval(config.scale_interval);
        let mut running: FuturesUnordered<BoxFuture<'static, Result<(), CrawlError>>> =
            FuturesUnordered::new();
        let finishing_lock = Arc::new(Mutex::new(()));

        let outcome = loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    break PoolOutcome::Aborted("abort() called".to_string());
                }
                _ = ticker.tick() => {
                    if let Some(outcome) = Self::maybe_schedule_and_finish(
                        &config,
                        &cancellation,
                        &stats,
                        &token_bucket,
                        &is_task_ready_function,
                        &is_finished_function,
                        &run_task_function,
                        &mut running,
                        &finishing_lock,
                    ).await {
                        break outcome;
                    }
                }
                _ = scale_ticker.tick() => {
                    Self::autoscale(&config, &snapshotter, &stats);
                }
                Some(result) = running.next() => {
                    stats.running_count.fetch_sub(1, Ordering::SeqCst);
                    if let Err(error) = result {
                        if error.is_critical() {
                            break PoolOutcome::TaskError(error);
                        }
                    }
                }
            }
        };

        let _ = done_tx.send(outcome);
    }

    #[allow(clippy::too_many_arguments)]
    async fn maybe_schedule_and_finish<Ready, Finished, RunTask, RunFut>(
        config: &AutoscaledPoolConfig,
        cancellation: &CancellationToken,
        stats: &Arc<PoolStats>,
        token_bucket: &Option<Arc<TokenBucket>>,
        is_task_ready_function: &Arc<Ready>,
        is_finished_function: &Arc<Finished>,
        run_task_function: &Arc<RunTask>,
        running: &mut FuturesUnordered<BoxFuture<'static, Result<(), CrawlError>>>,
        finishing_lock: &Arc<Mutex<()>>,
    ) -> Option<PoolOutcome>
    where
        Ready: Fn() -> bool + Send + Sync + 'static,
        Finished: Fn() -> bool + Send + Sync + 'static,
        RunTask: Fn(CancellationToken) -> RunFut + Send + Sync + 'static,
        RunFut: Future<Output = Result<(), CrawlError>> + Send + 'static,
    {
        let current_concurrency = stats.current_concurrency.load(Ordering::SeqCst);
        let running_count = stats.running_count.load(Ordering::SeqCst);

        if running_count < current_concurrency {
            let bucket_allows = token_bucket.as_ref().map(|b| b.try_take()).unwrap_or(true);
            if bucket_allows && is_task_ready_function() {
                let task_token = cancellation.clone();
                let task = (run_task_function)(task_token);
                running.push(Box::pin(task));
                stats.running_count.fetch_add(1, Ordering::SeqCst);
                return None;
            }
        }

        if running.is_empty() {
            let _guard = finishing_lock.try_lock();
            if _guard.is_ok() && is_finished_function() {
                return Some(PoolOutcome::Finished);
            }
        }

        None
    }

    fn autoscale(config: &AutoscaledPoolConfig, snapshotter: &Arc<Snapshotter>, stats: &Arc<PoolStats>) {
        let status = SystemStatus::new(snapshotter, SystemStatusConfig::default());
        let short = status.short();
        let long = status.long();
        let current = stats.current_concurrency.load(Ordering::SeqCst);
        let running = stats.running_count.load(Ordering::SeqCst);

        let next = if !short.is_ok {
            let scaled = (current as f64 * (1.0 - config.scale_down_step_ratio)).floor() as usize;
            scaled.max(config.min_concurrency)
        } else if long.is_ok
            && current > 0
            && (running as f64 / current as f64) >= config.desired_concurrency_ratio
        {
            let scaled = (current as f64 * (1.0 + config.scale_up_step_ratio)).ceil() as usize;
            scaled.min(config.max_concurrency)
        } else {
            current
        };

        stats.current_concurrency.store(next, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn runs_all_tasks_and_finishes() {
        let pool = AutoscaledPool::new(AutoscaledPoolConfig {
            min_concurrency: 1,
            max_concurrency: 1,
            maybe_run_interval: Duration::from_millis(10),
            scale_interval: Duration::from_secs(30),
            ..AutoscaledPoolConfig::default()
        });
        let snapshotter = Arc::new(Snapshotter::new(crate::snapshotter::SnapshotterConfig::default()));

        let remaining = Arc::new(AtomicUsize::new(5));
        let completed = Arc::new(AtomicU32::new(0));

        let r1 = remaining.clone();
        let is_ready = move || r1.load(Ordering::SeqCst) > 0;

        let r2 = remaining.clone();
        let is_finished = move || r2.load(Ordering::SeqCst) == 0;

        let r3 = remaining.clone();
        let c1 = completed.clone();
        let run_task = move |_token: CancellationToken| {
            let r3 = r3.clone();
            let c1 = c1.clone();
            async move {
                r3.fetch_sub(1, Ordering::SeqCst);
                c1.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        };

        let handle = pool.run(snapshotter, is_ready, is_finished, run_task);
        let outcome = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("pool did not finish in time");

        assert!(matches!(outcome, PoolOutcome::Finished));
        assert_eq!(completed.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn abort_resolves_the_handle() {
        let pool = AutoscaledPool::new(AutoscaledPoolConfig::default());
        let snapshotter = Arc::new(Snapshotter::new(crate::snapshotter::SnapshotterConfig::default()));

        let is_ready = || false;
        let is_finished = || false;
        let run_task = |_token: CancellationToken| async { Ok(()) };

        let handle = pool.run(snapshotter, is_ready, is_finished, run_task);
        handle.abort("test abort");
        let outcome = tokio::time::timeout(Duration::from_secs(2), handle.wait())
            .await
            .expect("abort did not resolve the handle in time");
        assert!(matches!(outcome, PoolOutcome::Aborted(_)));
    }
}
