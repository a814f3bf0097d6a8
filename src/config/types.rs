//! Core configuration type for the crawl engine.

use std::sync::Arc;
use std::time::Duration;

use crate::browser_pool::BrowserPoolOptions;
use crate::crawl_events::CrawlEventBus;
use crate::proxy_configuration::ProxyConfiguration;
use crate::session_pool::SessionPoolOptions;

/// Top-level configuration for a [`crate::crawl_engine::CrawlEngine`] run.
///
/// Build one with [`EngineConfig::builder`]; every field has a sane default,
/// so nothing named here is mandatory.
#[derive(Clone)]
pub struct EngineConfig {
    pub(crate) min_concurrency: usize,
    pub(crate) max_concurrency: usize,
    pub(crate) desired_concurrency_ratio: f64,
    pub(crate) max_request_retries: u32,
    pub(crate) max_session_rotations: u32,
    pub(crate) max_requests_per_crawl: Option<u64>,
    pub(crate) request_handler_timeout: Duration,
    pub(crate) navigation_timeout: Duration,
    pub(crate) use_session_pool: bool,
    pub(crate) session_pool_options: SessionPoolOptions,
    pub(crate) persist_cookies_per_session: bool,
    pub(crate) proxy_configuration: Option<Arc<ProxyConfiguration>>,
    pub(crate) additional_http_error_status_codes: Vec<u16>,
    pub(crate) ignore_http_error_status_codes: Vec<u16>,
    pub(crate) browser_pool_options: BrowserPoolOptions,
    pub(crate) keep_alive: bool,
    pub(crate) max_tasks_per_minute: Option<u32>,
    pub(crate) event_bus: Option<Arc<CrawlEventBus>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            min_concurrency: 1,
            max_concurrency: 200,
            desired_concurrency_ratio: 0.95,
            max_request_retries: 3,
            max_session_rotations: 10,
            max_requests_per_crawl: None,
            request_handler_timeout: Duration::from_secs(60),
            navigation_timeout: Duration::from_secs(30),
            use_session_pool: true,
            session_pool_options: SessionPoolOptions::default(),
            persist_cookies_per_session: true,
            proxy_configuration: None,
            additional_http_error_status_codes: Vec::new(),
            ignore_http_error_status_codes: Vec::new(),
            browser_pool_options: BrowserPoolOptions::default(),
            keep_alive: false,
            max_tasks_per_minute: None,
            event_bus: None,
        }
    }
}
