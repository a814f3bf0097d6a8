//! Pool of Chrome instances with a per-instance lifecycle, separate from the
//! simpler fixed-size pre-warmed pool this module replaces.
//!
//! Each [`BrowserInstance`] tracks how many pages it currently has open and
//! how many it has served in total. Once an instance crosses
//! `retire_instance_after_request_count` it is marked `Retired`: it keeps
//! serving any pages already open on it, but is never handed out for a new
//! page. A background sweep transitions `Retired` instances with no open
//! pages (or that have sat idle past `kill_instance_after`) to `Killed`,
//! closing the browser process and recycling its disk cache directory.

mod disk_cache_ring;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chromiumoxide::browser::Browser;
use chromiumoxide::page::Page as CdpPage;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::browser_profile::{self, BrowserProfile};
use crate::browser_setup;
use crate::crawl_events::{CrawlEvent, CrawlEventBus};
use crate::error::CrawlError;
use crate::proxy_configuration::{ProxyConfiguration, ProxyInfo};
use disk_cache_ring::DiskCacheRing;

const STATE_ACTIVE: u8 = 0;
const STATE_RETIRED: u8 = 1;
const STATE_KILLED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Active,
    Retired,
    Killed,
}

impl From<u8> for InstanceState {
    fn from(v: u8) -> Self {
        match v {
            STATE_ACTIVE => InstanceState::Active,
            STATE_RETIRED => InstanceState::Retired,
            _ => InstanceState::Killed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrowserPoolOptions {
    pub max_open_pages_per_instance: usize,
    pub retire_instance_after_request_count: u64,
    pub instance_killer_interval: Duration,
    pub kill_instance_after: Duration,
    pub use_incognito_pages: bool,
    pub recycle_disk_cache: bool,
    pub disk_cache_ring_capacity: usize,
    pub headless: bool,
}

impl Default for BrowserPoolOptions {
    fn default() -> Self {
        BrowserPoolOptions {
            max_open_pages_per_instance: 50,
            retire_instance_after_request_count: 100,
            instance_killer_interval: Duration::from_secs(10),
            kill_instance_after: Duration::from_secs(60),
            use_incognito_pages: true,
            recycle_disk_cache: true,
            disk_cache_ring_capacity: 16,
            headless: true,
        }
    }
}

/// Hook point for fronting an authenticated upstream proxy with a local
/// anonymizing forward proxy: `--proxy-server` takes no inline credentials,
/// so a proxy with `username`/`password` needs something local to absorb the
/// auth handshake. Spawning the forwarder itself is out of scope; this
/// records that one would be needed here and gives the disconnect path a
/// place to run its cleanup.
struct AnonymizingProxyHandle {
    upstream: ProxyInfo,
}

impl AnonymizingProxyHandle {
    /// Returns `None` for proxies with no inline auth, since those forward
    /// to Chrome's `--proxy-server` directly.
    fn spawn_for(proxy: &ProxyInfo) -> Option<Self> {
        if proxy.username.is_none() && proxy.password.is_none() {
            return None;
        }
        // TODO: spawn a local forwarding proxy that injects the upstream
        // Proxy-Authorization header and hand its `127.0.0.1:<port>` back
        // as the proxy_server instead of `proxy.url`.
        debug!(hostname = %proxy.hostname, "authenticated proxy in use, no local forwarder spawned");
        Some(AnonymizingProxyHandle {
            upstream: proxy.clone(),
        })
    }

    fn cleanup(&self) {
        debug!(hostname = %self.upstream.hostname, "releasing anonymizing proxy hook on instance disconnect");
    }
}

/// One launched Chrome process and its bookkeeping.
pub struct BrowserInstance {
    id: u64,
    browser: Browser,
    handler: JoinHandle<()>,
    // Held only for its RAII cleanup on drop; never read directly.
    _profile: BrowserProfile,
    disk_cache_dir: Option<PathBuf>,
    state: AtomicU8,
    active_pages: AtomicUsize,
    total_pages: AtomicU64,
    last_activity_ms: AtomicU64,
    /// The session this instance was launched on behalf of, if any; used to
    /// retire the instance when that session is retired.
    session_ref: RwLock<Option<Uuid>>,
    anonymizing_proxy: Option<AnonymizingProxyHandle>,
}

impl BrowserInstance {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> InstanceState {
        InstanceState::from(self.state.load(Ordering::Acquire))
    }

    pub fn active_pages(&self) -> usize {
        self.active_pages.load(Ordering::Acquire)
    }

    pub fn total_pages(&self) -> u64 {
        self.total_pages.load(Ordering::Acquire)
    }

    pub fn session_ref(&self) -> Option<Uuid> {
        *self.session_ref.read()
    }

    fn touch(&self) {
        self.last_activity_ms.store(now_ms(), Ordering::Release);
    }

    fn idle_for(&self) -> Duration {
        let last = self.last_activity_ms.load(Ordering::Acquire);
        Duration::from_millis(now_ms().saturating_sub(last))
    }

    fn retire(&self) {
        let _ = self.state.compare_exchange(
            STATE_ACTIVE,
            STATE_RETIRED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    fn is_assignable(&self, max_open_pages: usize) -> bool {
        self.state() == InstanceState::Active && self.active_pages() < max_open_pages
    }
}

/// Monotonic millis since this process's first call, used only for relative
/// idle-time comparisons (never serialized, so `SystemTime` would add
/// nothing but clock-skew risk).
fn now_ms() -> u64 {
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    let start = *START.get_or_init(Instant::now);
    Instant::now().saturating_duration_since(start).as_millis() as u64
}

/// A checked-out page. Dropping it closes the underlying CDP page and
/// decrements the owning instance's open-page count; it holds the instance
/// directly rather than the whole pool, so releasing a page never needs to
/// touch the pool's instance list.
pub struct PooledPage {
    instance: Arc<BrowserInstance>,
    page: Option<CdpPage>,
}

impl PooledPage {
    pub fn instance_id(&self) -> u64 {
        self.instance.id
    }

    pub fn page(&self) -> &CdpPage {
        self.page.as_ref().expect("page taken twice")
    }
}

impl Drop for PooledPage {
    fn drop(&mut self) {
        self.instance.active_pages.fetch_sub(1, Ordering::AcqRel);
        if let Some(page) = self.page.take() {
            tokio::spawn(async move {
                if let Err(e) = page.close().await {
                    debug!("error closing pooled page: {e}");
                }
            });
        }
    }
}

pub struct BrowserPool {
    options: BrowserPoolOptions,
    proxy_configuration: Option<Arc<ProxyConfiguration>>,
    event_bus: Option<Arc<CrawlEventBus>>,
    instances: RwLock<Vec<Arc<BrowserInstance>>>,
    next_id: AtomicU64,
    disk_cache_ring: DiskCacheRing,
    shutting_down: std::sync::atomic::AtomicBool,
}

impl BrowserPool {
    pub fn new(
        options: BrowserPoolOptions,
        proxy_configuration: Option<Arc<ProxyConfiguration>>,
        event_bus: Option<Arc<CrawlEventBus>>,
    ) -> Arc<Self> {
        let ring_capacity = options.disk_cache_ring_capacity;
        Arc::new(BrowserPool {
            options,
            proxy_configuration,
            event_bus,
            instances: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            disk_cache_ring: DiskCacheRing::new(ring_capacity),
            shutting_down: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// Spawns the background instance-killer sweep, plus (if an event bus is
    /// configured) a watcher that retires instances bound to a session once
    /// the session pool reports it retired. The sweep's task handle is
    /// returned; the watcher is detached, same as other event-bus listeners
    /// in this crate.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        if let Some(bus) = self.event_bus.clone() {
            let watcher_pool = Arc::clone(self);
            let mut rx = bus.subscribe();
            tokio::spawn(async move {
                while let Ok(event) = rx.recv().await {
                    if let CrawlEvent::SessionRetired { session_id, .. } = event {
                        watcher_pool.retire_instances_for_session(session_id);
                    }
                }
            });
        }

        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(pool.options.instance_killer_interval);
            loop {
                ticker.tick().await;
                if pool.shutting_down.load(Ordering::Acquire) {
                    break;
                }
                pool.sweep_retired_instances().await;
            }
        })
    }

    /// Retires every ACTIVE instance bound to `session_id`. Called when the
    /// session pool reports that session as retired (§4.7 "Rotation with
    /// sessions").
    fn retire_instances_for_session(&self, session_id: Uuid) {
        let instances = self.instances.read();
        for instance in instances.iter() {
            if instance.session_ref() == Some(session_id) {
                instance.retire();
            }
        }
    }

    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        let instances: Vec<_> = self.instances.write().drain(..).collect();
        for instance in instances {
            self.kill_instance(instance).await;
        }
    }

    pub fn instance_count(&self) -> usize {
        self.instances.read().len()
    }

    /// Checks out a page, launching a new browser instance if none of the
    /// existing ones has spare capacity.
    pub async fn acquire_page(&self, session_id: Option<Uuid>) -> Result<PooledPage, CrawlError> {
        let instance = self.find_or_launch_instance(session_id).await?;

        let page = instance
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| CrawlError::NavigationError {
                url: "about:blank".to_string(),
                source: anyhow::anyhow!(e.to_string()),
            })?;

        instance.active_pages.fetch_add(1, Ordering::AcqRel);
        let served = instance.total_pages.fetch_add(1, Ordering::AcqRel) + 1;
        instance.touch();

        if served >= self.options.retire_instance_after_request_count {
            instance.retire();
        }

        Ok(PooledPage {
            instance,
            page: Some(page),
        })
    }

    async fn find_or_launch_instance(
        &self,
        session_id: Option<Uuid>,
    ) -> Result<Arc<BrowserInstance>, CrawlError> {
        {
            let instances = self.instances.read();
            if let Some(instance) = instances
                .iter()
                .find(|i| i.is_assignable(self.options.max_open_pages_per_instance))
            {
                return Ok(Arc::clone(instance));
            }
        }

        let proxy = self
            .proxy_configuration
            .as_ref()
            .and_then(|p| p.new_proxy_info(session_id));

        let instance = self
            .launch_instance(proxy.as_ref(), session_id)
            .await
            .map_err(CrawlError::CriticalError)?;

        self.instances.write().push(Arc::clone(&instance));
        Ok(instance)
    }

    async fn launch_instance(
        &self,
        proxy: Option<&ProxyInfo>,
        session_id: Option<Uuid>,
    ) -> anyhow::Result<Arc<BrowserInstance>> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let anonymizing_proxy = proxy.and_then(AnonymizingProxyHandle::spawn_for);
        let proxy_server = proxy.map(|p| p.url.as_str());

        let profile = browser_profile::create_unique_profile_with_prefix("crawlrunner_chrome_pool")?;
        let profile_path = profile.path().to_path_buf();

        let disk_cache_dir = if self.options.recycle_disk_cache {
            Some(
                self.disk_cache_ring
                    .take()
                    .unwrap_or_else(|| std::env::temp_dir().join(format!("crawlrunner_chrome_cache_{id}"))),
            )
        } else {
            None
        };
        if let Some(dir) = &disk_cache_dir {
            std::fs::create_dir_all(dir)?;
        }

        let (browser, handler, _user_data_dir) = browser_setup::launch_browser(
            self.options.headless,
            Some(profile_path),
            proxy_server,
            disk_cache_dir.as_deref(),
        )
        .await?;

        info!(instance_id = id, "launched browser instance");

        Ok(Arc::new(BrowserInstance {
            id,
            browser,
            handler,
            _profile: profile,
            disk_cache_dir,
            state: AtomicU8::new(STATE_ACTIVE),
            active_pages: AtomicUsize::new(0),
            total_pages: AtomicU64::new(0),
            last_activity_ms: AtomicU64::new(now_ms()),
            session_ref: RwLock::new(session_id),
            anonymizing_proxy,
        }))
    }

    async fn sweep_retired_instances(&self) {
        let candidates: Vec<Arc<BrowserInstance>> = {
            let instances = self.instances.read();
            instances
                .iter()
                .filter(|i| {
                    i.state() == InstanceState::Retired
                        && (i.active_pages() == 0 || i.idle_for() >= self.options.kill_instance_after)
                })
                .cloned()
                .collect()
        };

        if candidates.is_empty() {
            return;
        }

        let killed = candidates.len();
        for instance in candidates {
            let id = instance.id;
            self.instances.write().retain(|i| i.id != id);
            self.kill_instance(instance).await;
        }

        debug!(killed, "instance-killer sweep retired browser instances");
    }

    async fn kill_instance(&self, instance: Arc<BrowserInstance>) {
        instance.state.store(STATE_KILLED, Ordering::Release);
        instance.handler.abort();

        if let Some(proxy) = &instance.anonymizing_proxy {
            proxy.cleanup();
        }

        if let Some(dir) = &instance.disk_cache_dir {
            if self.options.recycle_disk_cache {
                self.disk_cache_ring.give_back(dir.clone());
            } else {
                let _ = std::fs::remove_dir_all(dir);
            }
        }

        // Dropping the last `Arc` here drops `_profile` (removes the
        // user-data dir) and the `Browser` handle (closes the CDP
        // connection). Any lingering child process is reaped by the OS
        // when this process exits.
        debug!(instance_id = instance.id, "killed browser instance");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_state_transitions() {
        let state = AtomicU8::new(STATE_ACTIVE);
        assert_eq!(InstanceState::from(state.load(Ordering::Acquire)), InstanceState::Active);
        state.store(STATE_RETIRED, Ordering::Release);
        assert_eq!(InstanceState::from(state.load(Ordering::Acquire)), InstanceState::Retired);
        state.store(STATE_KILLED, Ordering::Release);
        assert_eq!(InstanceState::from(state.load(Ordering::Acquire)), InstanceState::Killed);
    }

    #[test]
    fn default_options_are_sane() {
        let opts = BrowserPoolOptions::default();
        assert!(opts.max_open_pages_per_instance > 0);
        assert!(opts.retire_instance_after_request_count > 0);
    }
}
