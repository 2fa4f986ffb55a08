use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

use crate::config::FIVE_HOUR_WINDOW_SECS;

/// The window every quota decision keys on.
pub const WINDOW_FIVE_HOUR: &str = "five_hour";

/// One accounting window as reported by the upstream usage endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowUsage {
    /// Percent of the window's allowance consumed. May exceed 100 when
    /// upstream clocks drift.
    pub utilization: f64,
    pub resets_at: Option<DateTime<Utc>>,
}

/// Per-credential usage snapshot, replaced atomically on refresh.
#[derive(Debug, Clone)]
pub struct UsageSnapshot {
    pub windows: HashMap<String, WindowUsage>,
    pub fetched_at: Instant,
}

impl UsageSnapshot {
    pub fn new(windows: HashMap<String, WindowUsage>) -> Self {
        Self {
            windows,
            fetched_at: Instant::now(),
        }
    }

    pub fn five_hour(&self) -> Option<&WindowUsage> {
        self.windows.get(WINDOW_FIVE_HOUR)
    }

    /// Five-hour utilization, clamped to [0, 100]. Unknown reads as 0 so a
    /// fresh credential sorts first.
    pub fn five_hour_utilization(&self) -> f64 {
        self.five_hour()
            .map(|w| w.utilization.clamp(0.0, 100.0))
            .unwrap_or(0.0)
    }

    pub fn age(&self) -> std::time::Duration {
        self.fetched_at.elapsed()
    }

    /// Utilization divided by the percentage of the five-hour window already
    /// elapsed. A credential burning quota faster than the clock scores
    /// higher. When the elapsed share is unknown or not yet positive, the
    /// raw utilization stands in.
    pub fn usage_to_time_ratio(&self, now: DateTime<Utc>) -> f64 {
        let Some(window) = self.five_hour() else {
            return 0.0;
        };
        let utilization = window.utilization.clamp(0.0, 100.0);
        let Some(resets_at) = window.resets_at else {
            return utilization;
        };

        let remaining = (resets_at - now).num_seconds();
        let elapsed = FIVE_HOUR_WINDOW_SECS - remaining;
        let elapsed_pct = (elapsed as f64 * 100.0 / FIVE_HOUR_WINDOW_SECS as f64).min(100.0);
        if elapsed_pct <= 0.0 {
            return utilization;
        }
        utilization / elapsed_pct
    }
}
