//! Accessor methods for [`EngineConfig`].

use std::sync::Arc;
use std::time::Duration;

use crate::browser_pool::BrowserPoolOptions;
use crate::crawl_events::CrawlEventBus;
use crate::proxy_configuration::ProxyConfiguration;
use crate::session_pool::SessionPoolOptions;

use super::types::EngineConfig;

impl EngineConfig {
    #[must_use]
    pub fn min_concurrency(&self) -> usize {
        self.min_concurrency
    }

    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    #[must_use]
    pub fn desired_concurrency_ratio(&self) -> f64 {
        self.desired_concurrency_ratio
    }

    #[must_use]
    pub fn max_request_retries(&self) -> u32 {
        self.max_request_retries
    }

    #[must_use]
    pub fn max_session_rotations(&self) -> u32 {
        self.max_session_rotations
    }

    #[must_use]
    pub fn max_requests_per_crawl(&self) -> Option<u64> {
        self.max_requests_per_crawl
    }

    #[must_use]
    pub fn request_handler_timeout(&self) -> Duration {
        self.request_handler_timeout
    }

    #[must_use]
    pub fn navigation_timeout(&self) -> Duration {
        self.navigation_timeout
    }

    #[must_use]
    pub fn use_session_pool(&self) -> bool {
        self.use_session_pool
    }

    #[must_use]
    pub fn session_pool_options(&self) -> &SessionPoolOptions {
        &self.session_pool_options
    }

    #[must_use]
    pub fn persist_cookies_per_session(&self) -> bool {
        self.persist_cookies_per_session
    }

    #[must_use]
    pub fn proxy_configuration(&self) -> Option<&Arc<ProxyConfiguration>> {
        self.proxy_configuration.as_ref()
    }

    #[must_use]
    pub fn additional_http_error_status_codes(&self) -> &[u16] {
        &self.additional_http_error_status_codes
    }

    #[must_use]
    pub fn ignore_http_error_status_codes(&self) -> &[u16] {
        &self.ignore_http_error_status_codes
    }

    #[must_use]
    pub fn browser_pool_options(&self) -> &BrowserPoolOptions {
        &self.browser_pool_options
    }

    #[must_use]
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    #[must_use]
    pub fn max_tasks_per_minute(&self) -> Option<u32> {
        self.max_tasks_per_minute
    }

    #[must_use]
    pub fn event_bus(&self) -> Option<&Arc<CrawlEventBus>> {
        self.event_bus.as_ref()
    }
}
