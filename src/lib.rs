//! A polite, fault-tolerant, autoscaling web-crawling runtime.
//!
//! Wires an [`autoscaled_pool::AutoscaledPool`] worker loop to a
//! deduplicating [`request_queue::RequestQueue`], a rotating
//! [`session_pool::SessionPool`], and an optional [`browser_pool::BrowserPool`]
//! behind a middleware [`context_pipeline::ContextPipeline`]. See
//! [`crawl_engine::CrawlEngine`] for the entry point.

pub mod autoscaled_pool;
pub mod browser_pool;
pub mod browser_profile;
pub mod browser_setup;
pub mod config;
pub mod context_pipeline;
pub mod crawl_engine;
pub mod crawl_events;
pub mod error;
pub mod proxy_configuration;
pub mod request_queue;
pub mod session_pool;
pub mod snapshotter;
pub mod system_status;
pub mod utils;

pub use autoscaled_pool::{AutoscaledPool, AutoscaledPoolConfig, PoolHandle, PoolOutcome};
pub use browser_pool::{BrowserPool, BrowserPoolOptions, PooledPage};
pub use browser_profile::{
    BrowserProfile, cleanup_stale_lock, cleanup_stale_profiles, create_unique_profile,
    create_unique_profile_with_prefix, is_singleton_lock_stale,
};
pub use browser_setup::{download_managed_browser, find_browser_executable, launch_browser};
pub use config::{EngineConfig, EngineConfigBuilder};
pub use context_pipeline::{ContextPipeline, Middleware, PipelineError, PipelineOutcome};
pub use crawl_engine::{CrawlContext, CrawlEngine, ErrorHandler, FailedRequestHandler, RequestHandler};
pub use crawl_events::{CrawlEvent, CrawlEventBus};
pub use error::{ConfigError, CrawlError, CrawlResult};
pub use proxy_configuration::{ProxyConfiguration, ProxyInfo};
pub use request_queue::{AddRequestResult, Request, RequestQueue, RequestState};
pub use session_pool::{Session, SessionOptions, SessionPool, SessionPoolOptions};
pub use snapshotter::{Snapshot, Snapshotter, SnapshotterConfig};
