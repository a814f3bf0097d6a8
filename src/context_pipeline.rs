//! Ordered middleware chain with guaranteed, reverse-order cleanup.

use std::future::Future;
use std::pin::Pin;

/// What happened when a pipeline ran to completion.
#[derive(Debug)]
pub enum PipelineOutcome<Ctx> {
    Completed(Ctx),
    /// A middleware action cooperatively halted the pipeline; no terminal
    /// consumer was invoked, but cleanups of completed stages still ran.
    Interrupted,
    Failed(PipelineError),
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("middleware {stage} failed to initialize: {source}")]
    InitializationError {
        stage: usize,
        #[source]
        source: anyhow::Error,
    },
    #[error("request handler failed: {source}")]
    RequestHandlerError {
        #[source]
        source: anyhow::Error,
    },
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Either a normal outcome from an `action`/terminal consumer, or a
/// cooperative, silent halt.
pub enum StageOutcome<T> {
    Continue(T),
    Interrupted,
}

/// A single pipeline stage: an initializer plus an optional cleanup run on
/// every exit path once the initializer has completed successfully.
pub struct Middleware<Ctx> {
    pub name: &'static str,
    action: Box<dyn for<'a> Fn(&'a mut Ctx) -> BoxFuture<'a, Result<StageOutcome<()>, anyhow::Error>> + Send + Sync>,
    cleanup: Option<
        Box<dyn for<'a> Fn(&'a mut Ctx, Option<&'a PipelineError>) -> BoxFuture<'a, ()> + Send + Sync>,
    >,
}

impl<Ctx> Middleware<Ctx> {
    pub fn new<A, AFut>(name: &'static str, action: A) -> Self
    where
        A: for<'a> Fn(&'a mut Ctx) -> AFut + Send + Sync + 'static,
        AFut: Future<Output = Result<StageOutcome<()>, anyhow::Error>> + Send + 'static,
    {
        Middleware {
            name,
            action: Box::new(move |ctx| Box::pin(action(ctx))),
            cleanup: None,
        }
    }

    pub fn with_cleanup<C, CFut>(mut self, cleanup: C) -> Self
    where
        C: for<'a> Fn(&'a mut Ctx, Option<&'a PipelineError>) -> CFut + Send + Sync + 'static,
        CFut: Future<Output = ()> + Send + 'static,
    {
        self.cleanup = Some(Box::new(move |ctx, err| Box::pin(cleanup(ctx, err))));
        self
    }
}

/// Runs an ordered list of [`Middleware`] around a terminal consumer,
/// guaranteeing that the cleanup of every successfully-initialized
/// middleware runs exactly once, in reverse order, on every exit path.
pub struct ContextPipeline<Ctx> {
    middlewares: Vec<Middleware<Ctx>>,
}

impl<Ctx> ContextPipeline<Ctx> {
    pub fn new(middlewares: Vec<Middleware<Ctx>>) -> Self {
        ContextPipeline { middlewares }
    }

    pub async fn call<F, Fut>(&self, mut ctx: Ctx, terminal: F) -> PipelineOutcome<Ctx>
    where
        F: FnOnce(&mut Ctx) -> Fut,
        Fut: Future<Output = Result<(), anyhow::Error>>,
    {
        let mut completed: Vec<usize> = Vec::new();

        for (index, middleware) in self.middlewares.iter().enumerate() {
            match (middleware.action)(&mut ctx).await {
                Ok(StageOutcome::Continue(())) => {
                    completed.push(index);
                }
                Ok(StageOutcome::Interrupted) => {
                    completed.push(index);
                    self.run_cleanups(&mut ctx, &completed, None).await;
                    return PipelineOutcome::Interrupted;
                }
                Err(source) => {
                    let error = PipelineError::InitializationError {
                        stage: index,
                        source,
                    };
                    self.run_cleanups(&mut ctx, &completed, Some(&error)).await;
                    return PipelineOutcome::Failed(error);
                }
            }
        }

        match terminal(&mut ctx).await {
            Ok(()) => {
                self.run_cleanups(&mut ctx, &completed, None).await;
                PipelineOutcome::Completed(ctx)
            }
            Err(source) => {
                let error = PipelineError::RequestHandlerError { source };
                self.run_cleanups(&mut ctx, &completed, Some(&error)).await;
                PipelineOutcome::Failed(error)
            }
        }
    }

    async fn run_cleanups(&self, ctx: &mut Ctx, completed: &[usize], error: Option<&PipelineError>) {
        for &index in completed.iter().rev() {
            if let Some(cleanup) = &self.middlewares[index].cleanup {
                (cleanup)(ctx, error).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Mutex;

    #[tokio::test]
    async fn middleware_b_throws_runs_only_a_cleanup() {
        let log = Arc::new(Mutex::new(Vec::<&'static str>::new()));

        let log_a = log.clone();
        let a = Middleware::<Vec<&'static str>>::new("a", move |_ctx| {
            let log_a = log_a.clone();
            async move {
                log_a.lock().unwrap().push("a:action");
                Ok(StageOutcome::Continue(()))
            }
        })
        .with_cleanup({
            let log_a = log.clone();
            move |_ctx, _err| {
                let log_a = log_a.clone();
                async move {
                    log_a.lock().unwrap().push("a:cleanup");
                }
            }
        });

        let b = Middleware::<Vec<&'static str>>::new("b", |_ctx| async move {
            Err(anyhow::anyhow!("b failed"))
        });

        let log_c = log.clone();
        let c = Middleware::<Vec<&'static str>>::new("c", move |_ctx| {
            let log_c = log_c.clone();
            async move {
                log_c.lock().unwrap().push("c:action");
                Ok(StageOutcome::Continue(()))
            }
        });

        let pipeline = ContextPipeline::new(vec![a, b, c]);
        let outcome = pipeline
            .call(Vec::new(), |_ctx| async move { Ok(()) })
            .await;

        match outcome {
            PipelineOutcome::Failed(PipelineError::InitializationError { stage, .. }) => {
                assert_eq!(stage, 1);
            }
            _ => panic!("expected InitializationError at stage 1"),
        }

        let events = log.lock().unwrap().clone();
        assert_eq!(events, vec!["a:action", "a:cleanup"]);
    }

    #[tokio::test]
    async fn terminal_error_runs_all_cleanups_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::<&'static str>::new()));

        let mk = |name: &'static str, log: Arc<Mutex<Vec<&'static str>>>| {
            let log_action = log.clone();
            Middleware::<Vec<&'static str>>::new(name, move |_ctx| {
                let log_action = log_action.clone();
                async move {
                    log_action.lock().unwrap().push(name);
                    Ok(StageOutcome::Continue(()))
                }
            })
            .with_cleanup(move |_ctx, _err| {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push(name);
                }
            })
        };

        let pipeline = ContextPipeline::new(vec![
            mk("a", log.clone()),
            mk("b", log.clone()),
        ]);

        let outcome = pipeline
            .call(Vec::new(), |_ctx| async move { Err(anyhow::anyhow!("boom")) })
            .await;

        assert!(matches!(
            outcome,
            PipelineOutcome::Failed(PipelineError::RequestHandlerError { .. })
        ));
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "b", "a"]);
    }

    #[tokio::test]
    async fn successful_run_completes_and_cleans_up() {
        let pipeline: ContextPipeline<Vec<&'static str>> = ContextPipeline::new(vec![
            Middleware::new("only", |_ctx| async move { Ok(StageOutcome::Continue(())) }),
        ]);
        let outcome = pipeline
            .call(Vec::new(), |_ctx| async move { Ok(()) })
            .await;
        assert!(matches!(outcome, PipelineOutcome::Completed(_)));
    }
}
