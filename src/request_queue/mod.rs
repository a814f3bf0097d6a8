//! Deduplicating, retry-aware request queue.

mod request;

pub use request::{Request, RequestState};

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

/// Outcome of [`RequestQueue::add_request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddRequestResult {
    pub id: Uuid,
    pub was_already_present: bool,
}

/// A durable (within process lifetime), deduplicating queue of [`Request`]s.
///
/// Ordering among pending entries is FIFO except for `forefront` inserts,
/// which jump to the head. `fetch_next_request` marks a request in-flight so
/// two concurrent fetchers never observe the same request.
pub struct RequestQueue {
    /// Insertion-ordered ids of pending (not in-flight, not handled) requests.
    pending: Mutex<VecDeque<Uuid>>,
    /// All requests ever added, keyed by id. Entries remain after handling so
    /// callers can still look a request up by id.
    requests: DashMap<Uuid, Request>,
    /// Unique-key fingerprints ever seen, for idempotent `add_request`.
    seen: Mutex<HashSet<u64>>,
    in_flight: DashMap<Uuid, ()>,
    handled_count: std::sync::atomic::AtomicUsize,
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestQueue {
    pub fn new() -> Self {
        RequestQueue {
            pending: Mutex::new(VecDeque::new()),
            requests: DashMap::new(),
            seen: Mutex::new(HashSet::new()),
            in_flight: DashMap::new(),
            handled_count: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn add_request(&self, mut request: Request, forefront: bool) -> AddRequestResult {
        request.sync_id();
        let key = request.fingerprint();
        let mut seen = self.seen.lock();
        if seen.contains(&key) {
            return AddRequestResult {
                id: request.id,
                was_already_present: true,
            };
        }
        seen.insert(key);
        drop(seen);

        request.state = RequestState::Unprocessed;
        let id = request.id;
        self.requests.insert(id, request);

        let mut pending = self.pending.lock();
        if forefront {
            pending.push_front(id);
        } else {
            pending.push_back(id);
        }

        AddRequestResult {
            id,
            was_already_present: false,
        }
    }

    /// Pops the oldest pending request not currently in-flight and marks it
    /// in-flight.
    pub fn fetch_next_request(&self) -> Option<Request> {
        let id = {
            let mut pending = self.pending.lock();
            pending.pop_front()?
        };
        self.in_flight.insert(id, ());
        self.requests.get(&id).map(|r| r.clone())
    }

    /// Returns an in-flight request back to pending without touching its
    /// retry count; callers decide that themselves.
    pub fn reclaim_request(&self, request: &Request, forefront: bool) {
        self.in_flight.remove(&request.id);
        if let Some(mut entry) = self.requests.get_mut(&request.id) {
            *entry = request.clone();
        }
        let mut pending = self.pending.lock();
        if forefront {
            pending.push_front(request.id);
        } else {
            pending.push_back(request.id);
        }
    }

    /// Marks a request as terminally handled (done or failed); it leaves
    /// both the pending queue and the in-flight set permanently.
    pub fn mark_request_handled(&self, request: &Request) {
        self.in_flight.remove(&request.id);
        if let Some(mut entry) = self.requests.get_mut(&request.id) {
            *entry = request.clone();
        }
        self.handled_count
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.is_empty() && self.in_flight.is_empty()
    }

    pub fn handled_count(&self) -> usize {
        self.handled_count.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn get(&self, id: Uuid) -> Option<Request> {
        self.requests.get(&id).map(|r| r.clone())
    }
}

pub type SharedRequestQueue = Arc<RequestQueue>;

#[cfg(test)]
mod tests {
    use super::*;

    fn req(url: &str) -> Request {
        Request::new(url.to_string())
    }

    #[test]
    fn add_request_is_idempotent_by_unique_key() {
        let q = RequestQueue::new();
        let first = q.add_request(req("https://example.com/a"), false);
        let second = q.add_request(req("https://example.com/a"), false);
        assert!(!first.was_already_present);
        assert!(second.was_already_present);
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn fifo_order_preserved() {
        let q = RequestQueue::new();
        q.add_request(req("https://example.com/1"), false);
        q.add_request(req("https://example.com/2"), false);
        let first = q.fetch_next_request().unwrap();
        assert_eq!(first.url, "https://example.com/1");
    }

    #[test]
    fn forefront_reclaim_is_served_next() {
        let q = RequestQueue::new();
        q.add_request(req("https://example.com/1"), false);
        q.add_request(req("https://example.com/2"), false);
        let r1 = q.fetch_next_request().unwrap();
        q.reclaim_request(&r1, true);
        let next = q.fetch_next_request().unwrap();
        assert_eq!(next.url, "https://example.com/1");
    }

    #[test]
    fn is_finished_requires_empty_and_no_in_flight() {
        let q = RequestQueue::new();
        q.add_request(req("https://example.com/1"), false);
        assert!(!q.is_finished());
        let r = q.fetch_next_request().unwrap();
        assert!(q.is_empty());
        assert!(!q.is_finished());
        q.mark_request_handled(&r);
        assert!(q.is_finished());
    }
}
