//! Per-request context threaded through the middleware pipeline.

use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::browser_pool::{BrowserPool, PooledPage};
use crate::context_pipeline::{ContextPipeline, Middleware, StageOutcome};
use crate::proxy_configuration::{ProxyConfiguration, ProxyInfo};
use crate::request_queue::{Request, RequestQueue};
use crate::session_pool::Session;
use crate::utils::ENQUEUE_LINKS_CACHE_CAPACITY;

/// Bounded dedup cache backing [`CrawlContext::enqueue_links`], independent
/// of the request queue's own permanent `seen` set so memory stays capped
/// across very large crawls.
pub struct EnqueueLinksCache {
    seen: Mutex<LruCache<u64, ()>>,
}

impl EnqueueLinksCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        EnqueueLinksCache {
            seen: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns `true` if `key` was newly inserted (i.e. not seen recently).
    fn insert_if_new(&self, key: u64) -> bool {
        let mut seen = self.seen.lock();
        if seen.get(&key).is_some() {
            false
        } else {
            seen.put(key, ());
            true
        }
    }
}

impl Default for EnqueueLinksCache {
    fn default() -> Self {
        EnqueueLinksCache::new(ENQUEUE_LINKS_CACHE_CAPACITY)
    }
}

fn url_fingerprint(url: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    url.hash(&mut hasher);
    hasher.finish()
}

/// Everything a request handler or middleware stage needs.
///
/// `page` is `None` in pure-HTTP mode (no [`BrowserPool`] configured); the
/// `acquire_page` middleware is simply omitted from the pipeline in that
/// case, so handlers written against `ctx.page.as_ref().expect(..)` are only
/// ever registered for a browser-mode engine.
pub struct CrawlContext {
    pub request: Request,
    pub session: Option<Arc<Session>>,
    pub proxy_info: Option<ProxyInfo>,
    pub page: Option<PooledPage>,
    pub user_data: Value,
    pub cancellation: CancellationToken,
    queue: Arc<RequestQueue>,
    link_cache: Arc<EnqueueLinksCache>,
}

impl CrawlContext {
    pub fn new(
        request: Request,
        session: Option<Arc<Session>>,
        proxy_info: Option<ProxyInfo>,
        cancellation: CancellationToken,
        queue: Arc<RequestQueue>,
        link_cache: Arc<EnqueueLinksCache>,
    ) -> Self {
        let user_data = request.user_data.clone();
        CrawlContext {
            request,
            session,
            proxy_info,
            page: None,
            user_data,
            cancellation,
            queue,
            link_cache,
        }
    }

    /// Enqueues freshly discovered URLs, deduplicating against both the
    /// recent-links cache and the queue's own unique-key index. Returns the
    /// number actually added.
    pub fn enqueue_links(&self, urls: impl IntoIterator<Item = String>, forefront: bool) -> usize {
        let mut added = 0;
        for url in urls {
            if !self.link_cache.insert_if_new(url_fingerprint(&url)) {
                continue;
            }
            let result = self.queue.add_request(Request::new(url), forefront);
            if !result.was_already_present {
                added += 1;
            }
        }
        added
    }
}

/// Builds the fixed middleware chain run ahead of every request handler
/// invocation. Currently just page acquisition/release; additional stages
/// (cookie sync, request signing) compose the same way.
pub fn build_pipeline(browser_pool: Option<Arc<BrowserPool>>) -> ContextPipeline<CrawlContext> {
    let mut middlewares = Vec::new();

    if let Some(pool) = browser_pool {
        middlewares.push(
            Middleware::new("acquire_page", move |ctx: &mut CrawlContext| {
                let pool = pool.clone();
                async move {
                    if ctx.cancellation.is_cancelled() {
                        return Ok(StageOutcome::Interrupted);
                    }
                    let session_id = ctx.session.as_ref().map(|s| s.id);
                    let page = pool
                        .acquire_page(session_id)
                        .await
                        .map_err(anyhow::Error::from)?;
                    ctx.page = Some(page);
                    Ok(StageOutcome::Continue(()))
                }
            })
            .with_cleanup(move |ctx: &mut CrawlContext, _err| {
                let _ = ctx.page.take();
                async move {}
            }),
        );
    }

    ContextPipeline::new(middlewares)
}

/// Resolves the proxy for a session, if a [`ProxyConfiguration`] is set.
pub fn resolve_proxy(
    proxy_configuration: Option<&Arc<ProxyConfiguration>>,
    session: Option<&Arc<Session>>,
) -> Option<ProxyInfo> {
    proxy_configuration.and_then(|p| p.new_proxy_info(session.map(|s| s.id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(queue: Arc<RequestQueue>, link_cache: Arc<EnqueueLinksCache>) -> CrawlContext {
        CrawlContext::new(
            Request::new("https://example.com/seed".to_string()),
            None,
            None,
            CancellationToken::new(),
            queue,
            link_cache,
        )
    }

    #[test]
    fn enqueue_links_dedups_within_cache_capacity() {
        let queue = Arc::new(RequestQueue::new());
        let link_cache = Arc::new(EnqueueLinksCache::new(10));
        let ctx = ctx(queue.clone(), link_cache);

        let added = ctx.enqueue_links(
            vec![
                "https://example.com/a".to_string(),
                "https://example.com/b".to_string(),
                "https://example.com/a".to_string(),
            ],
            false,
        );

        assert_eq!(added, 2);
        assert_eq!(queue.handled_count(), 0);
    }

    #[test]
    fn enqueue_links_beyond_cache_capacity_evicts_oldest() {
        let queue = Arc::new(RequestQueue::new());
        let link_cache = Arc::new(EnqueueLinksCache::new(1));
        let ctx = ctx(queue.clone(), link_cache);

        ctx.enqueue_links(vec!["https://example.com/a".to_string()], false);
        ctx.enqueue_links(vec!["https://example.com/b".to_string()], false);
        // "a" has fallen out of the size-1 cache, so re-enqueueing it is
        // counted as new by the cache (the queue's own seen-set still
        // prevents it from being duplicated).
        let added = ctx.enqueue_links(vec!["https://example.com/a".to_string()], false);
        assert_eq!(added, 0);
    }
}
