//! Crawl engine: wires the request queue, session pool, browser pool and
//! context pipeline into a single autoscaled run.

pub mod context;
pub mod engine;
pub mod handler;
pub mod page_timeout;
pub mod progress;

pub use context::{CrawlContext, EnqueueLinksCache, build_pipeline, resolve_proxy};
pub use engine::CrawlEngine;
pub use handler::{BoxFuture, ErrorHandler, FailedRequestHandler, RequestHandler};
pub use page_timeout::with_page_timeout;
pub use progress::{NoOpProgress, ProgressReporter};
