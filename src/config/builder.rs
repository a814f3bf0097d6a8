//! Fluent builder for [`EngineConfig`].
//!
//! A plain builder, not a typestated one: every field has a usable default,
//! so there is no required-field ordering to enforce at the type level.

use std::sync::Arc;
use std::time::Duration;

use crate::browser_pool::BrowserPoolOptions;
use crate::crawl_events::CrawlEventBus;
use crate::error::ConfigError;
use crate::proxy_configuration::ProxyConfiguration;
use crate::session_pool::SessionPoolOptions;

use super::types::EngineConfig;

#[derive(Clone, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfig {
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }
}

impl EngineConfigBuilder {
    #[must_use]
    pub fn min_concurrency(mut self, n: usize) -> Self {
        self.config.min_concurrency = n;
        self
    }

    #[must_use]
    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.config.max_concurrency = n;
        self
    }

    #[must_use]
    pub fn desired_concurrency_ratio(mut self, ratio: f64) -> Self {
        self.config.desired_concurrency_ratio = ratio;
        self
    }

    #[must_use]
    pub fn max_request_retries(mut self, n: u32) -> Self {
        self.config.max_request_retries = n;
        self
    }

    #[must_use]
    pub fn max_session_rotations(mut self, n: u32) -> Self {
        self.config.max_session_rotations = n;
        self
    }

    #[must_use]
    pub fn max_requests_per_crawl(mut self, n: u64) -> Self {
        self.config.max_requests_per_crawl = Some(n);
        self
    }

    #[must_use]
    pub fn request_handler_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_handler_timeout = timeout;
        self
    }

    #[must_use]
    pub fn navigation_timeout(mut self, timeout: Duration) -> Self {
        self.config.navigation_timeout = timeout;
        self
    }

    #[must_use]
    pub fn use_session_pool(mut self, enabled: bool) -> Self {
        self.config.use_session_pool = enabled;
        self
    }

    #[must_use]
    pub fn session_pool_options(mut self, options: SessionPoolOptions) -> Self {
        self.config.session_pool_options = options;
        self
    }

    #[must_use]
    pub fn persist_cookies_per_session(mut self, enabled: bool) -> Self {
        self.config.persist_cookies_per_session = enabled;
        self
    }

    #[must_use]
    pub fn proxy_configuration(mut self, proxy: Arc<ProxyConfiguration>) -> Self {
        self.config.proxy_configuration = Some(proxy);
        self
    }

    #[must_use]
    pub fn additional_http_error_status_codes(mut self, codes: Vec<u16>) -> Self {
        self.config.additional_http_error_status_codes = codes;
        self
    }

    #[must_use]
    pub fn ignore_http_error_status_codes(mut self, codes: Vec<u16>) -> Self {
        self.config.ignore_http_error_status_codes = codes;
        self
    }

    #[must_use]
    pub fn browser_pool_options(mut self, options: BrowserPoolOptions) -> Self {
        self.config.browser_pool_options = options;
        self
    }

    #[must_use]
    pub fn keep_alive(mut self, enabled: bool) -> Self {
        self.config.keep_alive = enabled;
        self
    }

    #[must_use]
    pub fn max_tasks_per_minute(mut self, n: u32) -> Self {
        self.config.max_tasks_per_minute = Some(n);
        self
    }

    #[must_use]
    pub fn event_bus(mut self, bus: Arc<CrawlEventBus>) -> Self {
        self.config.event_bus = Some(bus);
        self
    }

    /// Validates cross-field invariants and produces the final config.
    pub fn build(self) -> Result<EngineConfig, ConfigError> {
        let config = self.config;

        if config.min_concurrency > config.max_concurrency {
            return Err(ConfigError::ConcurrencyBoundsInverted {
                min: config.min_concurrency,
                max: config.max_concurrency,
            });
        }

        if config.persist_cookies_per_session && !config.use_session_pool {
            return Err(ConfigError::CookiePersistenceNeedsSessionPool);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_inverted_concurrency_bounds() {
        let result = EngineConfig::builder()
            .min_concurrency(10)
            .max_concurrency(5)
            .build();
        assert!(matches!(
            result,
            Err(ConfigError::ConcurrencyBoundsInverted { min: 10, max: 5 })
        ));
    }

    #[test]
    fn rejects_cookie_persistence_without_session_pool() {
        let result = EngineConfig::builder()
            .use_session_pool(false)
            .persist_cookies_per_session(true)
            .build();
        assert!(matches!(
            result,
            Err(ConfigError::CookiePersistenceNeedsSessionPool)
        ));
    }

    #[test]
    fn defaults_build_successfully() {
        assert!(EngineConfig::builder().build().is_ok());
    }
}
