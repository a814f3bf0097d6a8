//! Lock-free-ish token bucket bounding tasks started per minute.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

const WINDOW_MS: u64 = 60_000;

/// Bounds the rate of `try_take` successes to `limit` per rolling minute.
///
/// Implemented as a fixed window rather than a continuous refill: simpler,
/// and sufficient since the autoscaler's own concurrency bound is the
/// primary throttle, this is just a hard backstop.
pub struct TokenBucket {
    limit: u32,
    window_start_ms: AtomicU64,
    taken_in_window: AtomicU64,
}

impl TokenBucket {
    pub fn new(limit: u32) -> Self {
        TokenBucket {
            limit,
            window_start_ms: AtomicU64::new(now_ms()),
            taken_in_window: AtomicU64::new(0),
        }
    }

    pub fn try_take(&self) -> bool {
        let now = now_ms();
        let window_start = self.window_start_ms.load(Ordering::SeqCst);
        if now.saturating_sub(window_start) >= WINDOW_MS {
            // Roll the window over. A race here just means two callers both
            // reset the counter; harmless, it self-corrects next window.
            self.window_start_ms.store(now, Ordering::SeqCst);
            self.taken_in_window.store(0, Ordering::SeqCst);
        }

        let taken = self.taken_in_window.fetch_add(1, Ordering::SeqCst);
        if taken < self.limit as u64 {
            true
        } else {
            self.taken_in_window.fetch_sub(1, Ordering::SeqCst);
            false
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_blocks() {
        let bucket = TokenBucket::new(3);
        assert!(bucket.try_take());
        assert!(bucket.try_take());
        assert!(bucket.try_take());
        assert!(!bucket.try_take());
    }
}
