//! User-supplied request and error handling hooks.

use std::future::Future;
use std::pin::Pin;

use crate::error::CrawlError;
use crate::request_queue::Request;

use super::context::CrawlContext;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The caller's per-request logic. Implementations typically close over
/// whatever state (a parser, a store) the crawl needs.
pub trait RequestHandler: Send + Sync {
    fn handle<'a>(&'a self, ctx: &'a mut CrawlContext) -> BoxFuture<'a, Result<(), CrawlError>>;
}

impl<F> RequestHandler for F
where
    F: for<'a> Fn(&'a mut CrawlContext) -> BoxFuture<'a, Result<(), CrawlError>> + Send + Sync,
{
    fn handle<'a>(&'a self, ctx: &'a mut CrawlContext) -> BoxFuture<'a, Result<(), CrawlError>> {
        (self)(ctx)
    }
}

/// Called once per failing attempt, before the retry/terminal decision is
/// finalized. May set `request.no_retry` to force a terminal outcome.
pub trait ErrorHandler: Send + Sync {
    fn handle(&self, request: &mut Request, error: &CrawlError);
}

impl<F> ErrorHandler for F
where
    F: Fn(&mut Request, &CrawlError) + Send + Sync,
{
    fn handle(&self, request: &mut Request, error: &CrawlError) {
        (self)(request, error)
    }
}

/// Called once a request has exhausted its retry budget or failed terminally.
pub trait FailedRequestHandler: Send + Sync {
    fn handle(&self, request: &Request, error: &CrawlError);
}

impl<F> FailedRequestHandler for F
where
    F: Fn(&Request, &CrawlError) + Send + Sync,
{
    fn handle(&self, request: &Request, error: &CrawlError) {
        (self)(request, error)
    }
}
