//! Event type definitions for the crawl event system.

use serde::{Deserialize, Serialize};

/// Reason for event bus shutdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ShutdownReason {
    /// The run finished (queue drained, or `max_requests_per_crawl` reached).
    RunCompleted,
    /// The run was aborted by a critical error.
    Error(String),
    /// The run was aborted by an explicit `abort()` call.
    Cancelled,
}

/// Events emitted by the engine's components onto the shared [`super::CrawlEventBus`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CrawlEvent {
    /// Periodic tick asking every stateful component to dump its state to
    /// the key-value store.
    PersistState {
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    /// A browser instance is migrating its session to a new instance (e.g.
    /// ahead of a planned retirement).
    Migrating {
        session_id: uuid::Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    /// The pool is unwinding due to `abort()`.
    Aborting {
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    /// A session was purged from the pool as unusable. Published once per
    /// retired session so subscribers (e.g. [`crate::browser_pool::BrowserPool`])
    /// can retire anything bound to that specific session id.
    SessionRetired {
        session_id: uuid::Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    /// A periodic memory/CPU snapshot, for external observability.
    SystemInfo {
        mem_used_ratio: f64,
        cpu_used_ratio: f64,
        current_concurrency: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    /// Signals that the event bus is shutting down.
    ///
    /// Subscribers should exit their event loops when receiving this event.
    Shutdown {
        reason: ShutdownReason,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Result of publishing a batch of events.
///
/// Unlike a `Result` type, this always represents successful execution of
/// the batch operation itself - the fields indicate how many individual
/// events succeeded or failed within the batch (best-effort delivery: a
/// failure just means no active subscribers were listening).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPublishResult {
    pub total: usize,
    pub published: usize,
    pub failed: usize,
    pub max_subscribers: usize,
}

impl BatchPublishResult {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.published == self.total && self.failed == 0
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.published as f64 / self.total as f64) * 100.0
    }
}

impl CrawlEvent {
    #[must_use]
    pub fn persist_state() -> Self {
        Self::PersistState {
            timestamp: chrono::Utc::now(),
        }
    }

    #[must_use]
    pub fn migrating(session_id: uuid::Uuid) -> Self {
        Self::Migrating {
            session_id,
            timestamp: chrono::Utc::now(),
        }
    }

    #[must_use]
    pub fn aborting(reason: impl Into<String>) -> Self {
        Self::Aborting {
            reason: reason.into(),
            timestamp: chrono::Utc::now(),
        }
    }

    #[must_use]
    pub fn session_retired(session_id: uuid::Uuid) -> Self {
        Self::SessionRetired {
            session_id,
            timestamp: chrono::Utc::now(),
        }
    }

    #[must_use]
    pub fn system_info(mem_used_ratio: f64, cpu_used_ratio: f64, current_concurrency: usize) -> Self {
        Self::SystemInfo {
            mem_used_ratio,
            cpu_used_ratio,
            current_concurrency,
            timestamp: chrono::Utc::now(),
        }
    }

    #[must_use]
    pub fn shutdown(reason: ShutdownReason) -> Self {
        Self::Shutdown {
            reason,
            timestamp: chrono::Utc::now(),
        }
    }
}
