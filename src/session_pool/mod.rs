//! Pool of rotating "identities": cookies, usage accounting, error scoring.

mod cookie;

pub use cookie::{Cookie, CookieJar};

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::crawl_events::CrawlEventBus;
use crate::crawl_events::types::CrawlEvent;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub max_usage_count: u32,
    pub max_error_score: u32,
    pub max_age: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            max_usage_count: 50,
            max_error_score: 3,
            max_age: Duration::from_secs(3000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionPoolOptions {
    pub max_pool_size: usize,
    pub session_options: SessionOptions,
    pub persist_state_key: String,
}

impl Default for SessionPoolOptions {
    fn default() -> Self {
        SessionPoolOptions {
            max_pool_size: 1000,
            session_options: SessionOptions::default(),
            persist_state_key: "CRAWLRUNNER_SESSION_POOL_STATE".to_string(),
        }
    }
}

/// A rotating identity: cookies plus usage/error accounting.
///
/// `usage_count` and `error_score` are atomics so `mark_good`/`mark_bad` can
/// be called without taking the pool-wide lock.
pub struct Session {
    pub id: Uuid,
    pub cookies: RwLock<CookieJar>,
    usage_count: AtomicU32,
    error_score: AtomicU32,
    max_usage_count: u32,
    max_error_score: u32,
    created_at: Instant,
    max_age: Duration,
    retired: std::sync::atomic::AtomicBool,
    pub user_data: RwLock<Value>,
}

impl Session {
    fn new(options: &SessionOptions) -> Self {
        Session {
            id: Uuid::new_v4(),
            cookies: RwLock::new(CookieJar::new()),
            usage_count: AtomicU32::new(0),
            error_score: AtomicU32::new(0),
            max_usage_count: options.max_usage_count,
            max_error_score: options.max_error_score,
            created_at: Instant::now(),
            max_age: options.max_age,
            retired: std::sync::atomic::AtomicBool::new(false),
            user_data: RwLock::new(Value::Null),
        }
    }

    pub fn mark_good(&self) {
        self.usage_count.fetch_add(1, Ordering::SeqCst);
        let _ = self
            .error_score
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |score| {
                Some(score.saturating_sub(1))
            });
    }

    pub fn mark_bad(&self) {
        self.usage_count.fetch_add(1, Ordering::SeqCst);
        let new_score = self.error_score.fetch_add(1, Ordering::SeqCst) + 1;
        if new_score >= self.max_error_score {
            self.retired.store(true, Ordering::SeqCst);
        }
    }

    pub fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    pub fn is_usable(&self) -> bool {
        !self.retired.load(Ordering::SeqCst)
            && self.usage_count.load(Ordering::SeqCst) < self.max_usage_count
            && self.created_at.elapsed() < self.max_age
    }

    pub fn error_score(&self) -> u32 {
        self.error_score.load(Ordering::SeqCst)
    }

    pub fn usage_count(&self) -> u32 {
        self.usage_count.load(Ordering::SeqCst)
    }
}

/// Persisted shape of a session, for the key-value state store.
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedSession {
    pub id: Uuid,
    pub cookies: CookieJar,
    pub usage_count: u32,
    pub error_score: u32,
}

/// Pool of up to `max_pool_size` [`Session`]s, sampled uniformly at random
/// once the pool is at capacity.
pub struct SessionPool {
    options: SessionPoolOptions,
    sessions: RwLock<Vec<Arc<Session>>>,
    event_bus: Option<Arc<CrawlEventBus>>,
}

impl SessionPool {
    pub fn new(options: SessionPoolOptions) -> Self {
        SessionPool {
            options,
            sessions: RwLock::new(Vec::new()),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<CrawlEventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Purges unusable sessions, then either creates a fresh one (pool below
    /// capacity) or returns a uniformly sampled existing one.
    pub fn get_session(&self) -> Arc<Session> {
        self.purge_unusable();

        let mut sessions = self.sessions.write();
        if sessions.len() < self.options.max_pool_size {
            let session = Arc::new(Session::new(&self.options.session_options));
            sessions.push(session.clone());
            return session;
        }

        let mut rng = rand::rng();
        sessions
            .choose(&mut rng)
            .cloned()
            .unwrap_or_else(|| {
                let session = Arc::new(Session::new(&self.options.session_options));
                sessions.push(session.clone());
                session
            })
    }

    fn purge_unusable(&self) {
        let mut sessions = self.sessions.write();
        let mut retired_ids = Vec::new();
        sessions.retain(|s| {
            if s.is_usable() {
                true
            } else {
                retired_ids.push(s.id);
                false
            }
        });
        drop(sessions);

        if !retired_ids.is_empty() {
            if let Some(bus) = self.event_bus.clone() {
                tokio::spawn(async move {
                    for session_id in retired_ids {
                        let _ = bus.publish(CrawlEvent::session_retired(session_id)).await;
                    }
                });
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn persist_state(&self) -> Vec<PersistedSession> {
        self.sessions
            .read()
            .iter()
            .map(|s| PersistedSession {
                id: s.id,
                cookies: s.cookies.read().clone(),
                usage_count: s.usage_count(),
                error_score: s.error_score(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_bad_four_times_retires_session_at_max_score_three() {
        let pool = SessionPool::new(SessionPoolOptions {
            max_pool_size: 1,
            session_options: SessionOptions {
                max_error_score: 3,
                ..SessionOptions::default()
            },
            ..SessionPoolOptions::default()
        });
        let session = pool.get_session();
        let original_id = session.id;
        session.mark_bad();
        session.mark_bad();
        session.mark_bad();
        session.mark_bad();
        assert!(!session.is_usable());

        let next = pool.get_session();
        assert_ne!(next.id, original_id);
    }

    #[test]
    fn mark_good_decays_error_score() {
        let options = SessionOptions::default();
        let session = Session::new(&options);
        session.mark_bad();
        session.mark_bad();
        assert_eq!(session.error_score(), 2);
        session.mark_good();
        assert_eq!(session.error_score(), 1);
    }

    #[test]
    fn pool_respects_max_size() {
        let pool = SessionPool::new(SessionPoolOptions {
            max_pool_size: 2,
            ..SessionPoolOptions::default()
        });
        let a = pool.get_session();
        let b = pool.get_session();
        assert_ne!(a.id, b.id);
        assert_eq!(pool.len(), 2);
        let _c = pool.get_session();
        assert_eq!(pool.len(), 2);
    }
}
