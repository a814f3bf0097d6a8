//! Periodic memory/CPU sampling with a bounded history window.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use sysinfo::System;
use tokio::task::JoinHandle;
use tokio::time::interval;

/// A single memory/CPU observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    /// Milliseconds since the Unix epoch.
    pub t_ms: u64,
    pub mem_used_ratio: f64,
    pub cpu_used_ratio: f64,
    pub overloaded: bool,
}

#[derive(Debug, Clone)]
pub struct SnapshotterConfig {
    pub mem_sample_interval: Duration,
    pub max_history: Duration,
    pub mem_overload_threshold: f64,
    pub cpu_overload_threshold: f64,
}

impl Default for SnapshotterConfig {
    fn default() -> Self {
        SnapshotterConfig {
            mem_sample_interval: Duration::from_secs(1),
            max_history: Duration::from_secs(60),
            mem_overload_threshold: 0.9,
            cpu_overload_threshold: 0.95,
        }
    }
}

struct Inner {
    system: System,
    history: VecDeque<Snapshot>,
}

/// Samples memory/CPU on a fixed cadence and retains a bounded history.
///
/// Fails open: a probe error is logged and skipped rather than surfaced to
/// callers, since a missed sample should never stall the autoscaler.
pub struct Snapshotter {
    config: SnapshotterConfig,
    inner: Arc<Mutex<Inner>>,
}

impl Snapshotter {
    pub fn new(config: SnapshotterConfig) -> Self {
        Snapshotter {
            config,
            inner: Arc::new(Mutex::new(Inner {
                system: System::new(),
                history: VecDeque::new(),
            })),
        }
    }

    /// Spawns the background sampling task. The returned handle is owned by
    /// the caller (typically `CrawlEngine`); dropping it does not stop the
    /// task, abort it explicitly if needed.
    pub fn spawn(&self) -> JoinHandle<()> {
        let inner = self.inner.clone();
        let interval_duration = self.config.mem_sample_interval;
        let max_history = self.config.max_history;
        let mem_threshold = self.config.mem_overload_threshold;
        let cpu_threshold = self.config.cpu_overload_threshold;

        tokio::spawn(async move {
            let mut ticker = interval(interval_duration);
            loop {
                ticker.tick().await;
                let mut guard = inner.lock();
                guard.system.refresh_memory();
                guard.system.refresh_cpu_usage();

                let total_mem = guard.system.total_memory();
                let used_mem = guard.system.used_memory();
                let mem_used_ratio = if total_mem == 0 {
                    0.0
                } else {
                    used_mem as f64 / total_mem as f64
                };
                let cpu_used_ratio = guard.system.global_cpu_usage() as f64 / 100.0;

                let t_ms = now_ms();
                let overloaded =
                    mem_used_ratio >= mem_threshold || cpu_used_ratio >= cpu_threshold;
                guard.history.push_back(Snapshot {
                    t_ms,
                    mem_used_ratio,
                    cpu_used_ratio,
                    overloaded,
                });

                let cutoff = t_ms.saturating_sub(max_history.as_millis() as u64);
                while matches!(guard.history.front(), Some(s) if s.t_ms < cutoff) {
                    guard.history.pop_front();
                }
            }
        })
    }

    /// Snapshots taken within the last `since`.
    pub fn history_since(&self, since: Duration) -> Vec<Snapshot> {
        let cutoff = now_ms().saturating_sub(since.as_millis() as u64);
        let guard = self.inner.lock();
        guard
            .history
            .iter()
            .filter(|s| s.t_ms >= cutoff)
            .copied()
            .collect()
    }

    pub fn latest(&self) -> Option<Snapshot> {
        self.inner.lock().history.back().copied()
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
    fn history_since_filters_by_age() {
        let inner = Inner {
            system: System::new(),
            history: VecDeque::new(),
        };
        let mutex = Mutex::new(inner);
        let now = now_ms();
        {
            let mut g = mutex.lock();
            g.history.push_back(Snapshot {
                t_ms: now - 100_000,
                mem_used_ratio: 0.1,
                cpu_used_ratio: 0.1,
                overloaded: false,
            });
            g.history.push_back(Snapshot {
                t_ms: now,
                mem_used_ratio: 0.95,
                cpu_used_ratio: 0.95,
                overloaded: true,
            });
        }
        let snap = Snapshotter {
            config: SnapshotterConfig::default(),
            inner: Arc::new(mutex),
        };
        let recent = snap.history_since(Duration::from_secs(5));
        assert_eq!(recent.len(), 1);
        assert!(recent[0].overloaded);
    }
}
