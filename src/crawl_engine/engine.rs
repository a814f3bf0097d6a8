//! Wires the request queue, session pool, browser pool and context pipeline
//! together behind [`AutoscaledPool`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;

use crate::autoscaled_pool::{AutoscaledPool, AutoscaledPoolConfig, PoolHandle};
use crate::browser_pool::BrowserPool;
use crate::config::EngineConfig;
use crate::context_pipeline::{ContextPipeline, PipelineError, PipelineOutcome};
use crate::error::CrawlError;
use crate::request_queue::{Request, RequestQueue};
use crate::session_pool::SessionPool;
use crate::snapshotter::Snapshotter;

use super::context::{CrawlContext, EnqueueLinksCache, build_pipeline, resolve_proxy};
use super::handler::{ErrorHandler, FailedRequestHandler, RequestHandler};

/// Owns every long-lived piece of a crawl run and drives it under
/// [`AutoscaledPool`].
pub struct CrawlEngine {
    config: EngineConfig,
    queue: Arc<RequestQueue>,
    session_pool: Option<Arc<SessionPool>>,
    browser_pool: Option<Arc<BrowserPool>>,
    pipeline: Arc<ContextPipeline<CrawlContext>>,
    link_cache: Arc<EnqueueLinksCache>,
    snapshotter: Arc<Snapshotter>,
    keep_alive: AtomicBool,
}

impl CrawlEngine {
    pub fn new(config: EngineConfig, queue: Arc<RequestQueue>, snapshotter: Arc<Snapshotter>) -> Self {
        let session_pool = if config.use_session_pool() {
            let mut pool = SessionPool::new(config.session_pool_options().clone());
            if let Some(bus) = config.event_bus() {
                pool = pool.with_event_bus(Arc::clone(bus));
            }
            Some(Arc::new(pool))
        } else {
            None
        };

        let keep_alive = AtomicBool::new(config.keep_alive());

        CrawlEngine {
            config,
            queue,
            session_pool,
            browser_pool: None,
            pipeline: Arc::new(build_pipeline(None)),
            link_cache: Arc::new(EnqueueLinksCache::default()),
            snapshotter,
            keep_alive,
        }
    }

    /// Switches the engine into browser mode: every request gets a page
    /// acquired from `pool` ahead of the request handler.
    #[must_use]
    pub fn with_browser_pool(mut self, pool: Arc<BrowserPool>) -> Self {
        self.pipeline = Arc::new(build_pipeline(Some(Arc::clone(&pool))));
        self.browser_pool = Some(pool);
        self
    }

    pub fn queue(&self) -> &Arc<RequestQueue> {
        &self.queue
    }

    pub fn session_pool(&self) -> Option<&Arc<SessionPool>> {
        self.session_pool.as_ref()
    }

    /// Ends keep-alive mode: once the queue drains, the run finishes instead
    /// of waiting indefinitely for more requests to be injected.
    pub fn teardown(&self) {
        self.keep_alive.store(false, Ordering::SeqCst);
    }

    fn cap_exhausted(&self) -> bool {
        match self.config.max_requests_per_crawl() {
            Some(max) => self.queue.handled_count() as u64 >= max,
            None => false,
        }
    }

    /// Starts the autoscaled run.
    ///
    /// `error_handler` runs once per failing attempt ahead of the
    /// retry/terminal decision; `failed_request_handler` runs once a request
    /// is abandoned (retry budget exhausted or a non-retryable error).
    pub fn run(
        self: Arc<Self>,
        handler: Arc<dyn RequestHandler>,
        error_handler: Option<Arc<dyn ErrorHandler>>,
        failed_request_handler: Option<Arc<dyn FailedRequestHandler>>,
    ) -> PoolHandle {
        let pool_config = AutoscaledPoolConfig {
            min_concurrency: self.config.min_concurrency(),
            max_concurrency: self.config.max_concurrency(),
            desired_concurrency_ratio: self.config.desired_concurrency_ratio(),
            max_tasks_per_minute: self.config.max_tasks_per_minute(),
            ..AutoscaledPoolConfig::default()
        };
        let pool = AutoscaledPool::new(pool_config);
        let snapshotter = Arc::clone(&self.snapshotter);

        let ready_engine = Arc::clone(&self);
        let is_task_ready = move || !ready_engine.queue.is_empty() && !ready_engine.cap_exhausted();

        let finished_engine = Arc::clone(&self);
        let is_finished = move || {
            if finished_engine.keep_alive.load(Ordering::SeqCst) {
                return false;
            }
            finished_engine.queue.is_finished() || finished_engine.cap_exhausted()
        };

        let task_engine = self;
        let run_task = move |cancellation: CancellationToken| {
            let engine = Arc::clone(&task_engine);
            let handler = Arc::clone(&handler);
            let error_handler = error_handler.clone();
            let failed_request_handler = failed_request_handler.clone();
            async move {
                engine
                    .run_one_task(cancellation, handler, error_handler, failed_request_handler)
                    .await
            }
        };

        pool.run(snapshotter, is_task_ready, is_finished, run_task)
    }

    async fn run_one_task(
        &self,
        cancellation: CancellationToken,
        handler: Arc<dyn RequestHandler>,
        error_handler: Option<Arc<dyn ErrorHandler>>,
        failed_request_handler: Option<Arc<dyn FailedRequestHandler>>,
    ) -> Result<(), CrawlError> {
        let Some(mut request) = self.queue.fetch_next_request() else {
            return Ok(());
        };

        let session = self.session_pool.as_ref().map(|pool| pool.get_session());
        let proxy_info = resolve_proxy(self.config.proxy_configuration(), session.as_ref());
        let ctx = CrawlContext::new(
            request.clone(),
            session.clone(),
            proxy_info,
            cancellation,
            Arc::clone(&self.queue),
            Arc::clone(&self.link_cache),
        );

        let timeout = self.config.request_handler_timeout();
        let outcome = tokio::time::timeout(
            timeout,
            self.pipeline.call(ctx, |ctx| {
                let handler = Arc::clone(&handler);
                async move { handler.handle(ctx).await.map_err(anyhow::Error::from) }
            }),
        )
        .await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(_elapsed) => {
                let error = CrawlError::TimeoutError(timeout);
                return self
                    .handle_failure(&mut request, session, error, error_handler, failed_request_handler)
                    .await;
            }
        };

        match outcome {
            PipelineOutcome::Completed(ctx) => {
                self.queue.mark_request_handled(&ctx.request);
                if let Some(session) = &ctx.session {
                    session.mark_good();
                }
                Ok(())
            }
            PipelineOutcome::Interrupted => {
                // Cooperative halt (e.g. a cancelled run): give the request
                // back rather than counting it as handled or failed.
                self.queue.reclaim_request(&request, true);
                Ok(())
            }
            PipelineOutcome::Failed(PipelineError::RequestHandlerError { source }) => {
                let error = source
                    .downcast::<CrawlError>()
                    .unwrap_or_else(|e| CrawlError::NonRetryableError(e));
                if matches!(error, CrawlError::InterruptedError) {
                    self.queue.reclaim_request(&request, true);
                    return Ok(());
                }
                self.handle_failure(&mut request, session, error, error_handler, failed_request_handler)
                    .await
            }
            PipelineOutcome::Failed(PipelineError::InitializationError { source, .. }) => {
                self.handle_failure(
                    &mut request,
                    session,
                    CrawlError::NonRetryableError(source),
                    error_handler,
                    failed_request_handler,
                )
                .await
            }
        }
    }

    async fn handle_failure(
        &self,
        request: &mut Request,
        session: Option<Arc<crate::session_pool::Session>>,
        error: CrawlError,
        error_handler: Option<Arc<dyn ErrorHandler>>,
        failed_request_handler: Option<Arc<dyn FailedRequestHandler>>,
    ) -> Result<(), CrawlError> {
        if let Some(session) = &session {
            session.mark_bad();
        }

        if error.is_critical() {
            self.queue.mark_request_handled(request);
            return Err(error);
        }

        let rotate_session = error.requires_session_rotation();
        if rotate_session {
            request.session_rotation_count += 1;
        }

        let terminal = !error.is_retryable()
            || request.is_retry_budget_exhausted(self.config.max_request_retries())
            || (rotate_session && request.session_rotation_count > self.config.max_session_rotations());

        if let Some(handler) = &error_handler {
            handler.handle(request, &error);
        }
        request.push_error(error.to_string());

        if terminal || request.no_retry {
            if let Some(handler) = &failed_request_handler {
                handler.handle(request, &error);
            }
            self.queue.mark_request_handled(request);
            return Ok(());
        }

        request.retry_count += 1;
        self.queue.reclaim_request(request, rotate_session);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    use crate::autoscaled_pool::PoolOutcome;
    use crate::snapshotter::{Snapshotter, SnapshotterConfig};

    fn engine(config: EngineConfig) -> Arc<CrawlEngine> {
        let queue = Arc::new(RequestQueue::new());
        let snapshotter = Arc::new(Snapshotter::new(SnapshotterConfig::default()));
        Arc::new(CrawlEngine::new(config, queue, snapshotter))
    }

    #[tokio::test]
    async fn successful_handler_marks_request_done() {
        let engine = engine(EngineConfig::builder().max_concurrency(1).build().unwrap());
        engine.queue.add_request(Request::new("https://example.com".to_string()), false);

        let seen = Arc::new(AtomicU32::new(0));
        let seen_clone = seen.clone();
        let handler: Arc<dyn RequestHandler> = Arc::new(move |_ctx: &mut CrawlContext| {
            let seen_clone = seen_clone.clone();
            Box::pin(async move {
                seen_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }) as super::super::handler::BoxFuture<'_, Result<(), CrawlError>>
        });

        let handle = engine.clone().run(handler, None, None);
        let outcome = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("run did not finish in time");

        assert!(matches!(outcome, PoolOutcome::Finished));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(engine.queue.handled_count(), 1);
    }

    #[tokio::test]
    async fn retryable_failure_is_retried_until_budget_exhausted() {
        let config = EngineConfig::builder()
            .max_concurrency(1)
            .max_request_retries(2)
            .build()
            .unwrap();
        let engine = engine(config);
        engine.queue.add_request(Request::new("https://example.com".to_string()), false);

        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();
        let handler: Arc<dyn RequestHandler> = Arc::new(move |_ctx: &mut CrawlContext| {
            let attempts_clone = attempts_clone.clone();
            Box::pin(async move {
                attempts_clone.fetch_add(1, Ordering::SeqCst);
                Err(CrawlError::NavigationError {
                    url: "https://example.com".to_string(),
                    source: anyhow::anyhow!("connection refused"),
                })
            }) as super::super::handler::BoxFuture<'_, Result<(), CrawlError>>
        });

        let failed = Arc::new(AtomicU32::new(0));
        let failed_clone = failed.clone();
        let failed_handler: Arc<dyn FailedRequestHandler> =
            Arc::new(move |request: &Request, _error: &CrawlError| {
                failed_clone.fetch_add(1, Ordering::SeqCst);
                assert_eq!(request.error_messages.len(), 3);
            });

        let handle = engine.clone().run(handler, None, Some(failed_handler));
        let outcome = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("run did not finish in time");

        assert!(matches!(outcome, PoolOutcome::Finished));
        // initial attempt + 2 retries = 3
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(failed.load(Ordering::SeqCst), 1);
        assert_eq!(engine.queue.handled_count(), 1);
    }

    #[tokio::test]
    async fn critical_error_aborts_the_run() {
        let engine = engine(EngineConfig::builder().max_concurrency(1).build().unwrap());
        engine.queue.add_request(Request::new("https://example.com".to_string()), false);

        let handler: Arc<dyn RequestHandler> = Arc::new(move |_ctx: &mut CrawlContext| {
            Box::pin(async move {
                Err(CrawlError::CriticalError(anyhow::anyhow!("disk full")))
            }) as super::super::handler::BoxFuture<'_, Result<(), CrawlError>>
        });

        let handle = engine.clone().run(handler, None, None);
        let outcome = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("run did not finish in time");

        assert!(matches!(outcome, PoolOutcome::TaskError(CrawlError::CriticalError(_))));
    }

    #[tokio::test]
    async fn content_type_error_is_never_retried() {
        let config = EngineConfig::builder()
            .max_concurrency(1)
            .max_request_retries(5)
            .build()
            .unwrap();
        let engine = engine(config);
        engine.queue.add_request(Request::new("https://example.com".to_string()), false);

        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();
        let handler: Arc<dyn RequestHandler> = Arc::new(move |_ctx: &mut CrawlContext| {
            let attempts_clone = attempts_clone.clone();
            Box::pin(async move {
                attempts_clone.fetch_add(1, Ordering::SeqCst);
                Err(CrawlError::ContentTypeError {
                    url: "https://example.com".to_string(),
                    content_type: "application/pdf".to_string(),
                })
            }) as super::super::handler::BoxFuture<'_, Result<(), CrawlError>>
        });

        let failed = Arc::new(AtomicU32::new(0));
        let failed_clone = failed.clone();
        let failed_handler: Arc<dyn FailedRequestHandler> =
            Arc::new(move |_request: &Request, _error: &CrawlError| {
                failed_clone.fetch_add(1, Ordering::SeqCst);
            });

        let handle = engine.clone().run(handler, None, Some(failed_handler));
        let outcome = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("run did not finish in time");

        assert!(matches!(outcome, PoolOutcome::Finished));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(failed.load(Ordering::SeqCst), 1);
        assert_eq!(engine.queue.handled_count(), 1);
    }
}
