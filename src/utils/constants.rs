//! Shared constants used throughout the crawl engine.

/// Chrome user agent string sent by launched browser instances.
pub const CHROME_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.6834.160 Safari/537.36";

/// Capacity of the `enqueue_links` dedup cache, bounding its memory
/// footprint independently of the request queue's own `seen` set.
pub const ENQUEUE_LINKS_CACHE_CAPACITY: usize = 1000;
