//! Overload classification derived from recent [`Snapshotter`] history.

use std::time::Duration;

use crate::snapshotter::Snapshotter;

#[derive(Debug, Clone)]
pub struct SystemStatusConfig {
    pub short_window: Duration,
    pub long_window: Duration,
    pub max_overloaded_ratio: f64,
}

impl Default for SystemStatusConfig {
    fn default() -> Self {
        SystemStatusConfig {
            short_window: Duration::from_secs(5),
            long_window: Duration::from_secs(60),
            max_overloaded_ratio: 0.0,
        }
    }
}

/// Result of classifying a window of snapshots.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStatus {
    pub is_ok: bool,
    pub overloaded_ratio: f64,
}

/// Classifies whether the system is currently overloaded, looking at both a
/// short and a long trailing window.
///
/// This is the sole scaling authority for [`crate::autoscaled_pool`]: no
/// other signal (e.g. raw memory pressure) feeds the autoscaling decision.
pub struct SystemStatus<'a> {
    snapshotter: &'a Snapshotter,
    config: SystemStatusConfig,
}

impl<'a> SystemStatus<'a> {
    pub fn new(snapshotter: &'a Snapshotter, config: SystemStatusConfig) -> Self {
        SystemStatus {
            snapshotter,
            config,
        }
    }

    pub fn short(&self) -> WindowStatus {
        self.window(self.config.short_window)
    }

    pub fn long(&self) -> WindowStatus {
        self.window(self.config.long_window)
    }

    fn window(&self, span: Duration) -> WindowStatus {
        let samples = self.snapshotter.history_since(span);
        if samples.is_empty() {
            return WindowStatus {
                is_ok: true,
                overloaded_ratio: 0.0,
            };
        }
        let overloaded_count = samples.iter().filter(|s| s.overloaded).count();
        let overloaded_ratio = overloaded_count as f64 / samples.len() as f64;
        WindowStatus {
            is_ok: overloaded_ratio <= self.config.max_overloaded_ratio,
            overloaded_ratio,
        }
    }
}
