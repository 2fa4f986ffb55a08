//! Per-credential health tracking — passive circuit breaking driven by real
//! request outcomes and quota snapshots. No test pings.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

use ccrelay_core::config::BreakerConfig;
use ccrelay_core::usage::UsageSnapshot;
use ccrelay_upstream::FailureKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Tripped,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Tripped => write!(f, "tripped"),
        }
    }
}

/// Mutable health state for one credential.
///
/// Invariant: `state == Tripped` exactly while `now < cooldown_until`; reads
/// heal an expired trip before answering.
#[derive(Debug, Clone)]
pub struct HealthRecord {
    pub state: HealthState,
    pub consecutive_failures: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub usage: Option<UsageSnapshot>,
}

impl Default for HealthRecord {
    fn default() -> Self {
        Self {
            state: HealthState::Healthy,
            consecutive_failures: 0,
            cooldown_until: None,
            usage: None,
        }
    }
}

impl HealthRecord {
    fn expire_trip(&mut self, now: DateTime<Utc>) {
        if self.state == HealthState::Tripped
            && self.cooldown_until.is_none_or(|until| now >= until)
        {
            self.state = HealthState::Healthy;
            self.cooldown_until = None;
        }
    }
}

/// Concurrent health map for the whole credential pool. Records are owned
/// here; the selector only reads.
pub struct HealthMonitor {
    records: DashMap<String, HealthRecord>,
    breaker: BreakerConfig,
}

impl HealthMonitor {
    pub fn new(breaker: BreakerConfig) -> Self {
        Self {
            records: DashMap::new(),
            breaker,
        }
    }

    pub fn breaker(&self) -> &BreakerConfig {
        &self.breaker
    }

    fn key(id: &str) -> String {
        id.to_ascii_lowercase()
    }

    pub fn update_usage(&self, id: &str, snapshot: UsageSnapshot) {
        let mut record = self.records.entry(Self::key(id)).or_default();
        record.usage = Some(snapshot);
    }

    pub fn record_success(&self, id: &str) {
        let now = Utc::now();
        let mut record = self.records.entry(Self::key(id)).or_default();
        record.consecutive_failures = 0;
        if record.cooldown_until.is_none_or(|until| until <= now) {
            record.state = HealthState::Healthy;
            record.cooldown_until = None;
        }
    }

    pub fn record_failure(&self, id: &str, kind: FailureKind) {
        let now = Utc::now();
        let mut record = self.records.entry(Self::key(id)).or_default();

        match kind {
            FailureKind::QuotaExhausted => {
                // Prefer the window's own reset instant; a stale or missing
                // snapshot falls back to the flat rate-limit cooldown.
                let until = record
                    .usage
                    .as_ref()
                    .and_then(|u| u.five_hour())
                    .and_then(|w| w.resets_at)
                    .filter(|t| *t > now)
                    .unwrap_or_else(|| now + self.breaker.rate_limit_cooldown());
                record.cooldown_until = Some(until);
                record.state = HealthState::Tripped;
                warn!(credential = %id, until = %until, "credential tripped: quota exhausted");
            }
            FailureKind::RateLimited => {
                let until = now + self.breaker.rate_limit_cooldown();
                record.cooldown_until = Some(until);
                record.state = HealthState::Tripped;
                warn!(credential = %id, until = %until, "credential tripped: rate limited");
            }
            FailureKind::Generic => {
                record.consecutive_failures += 1;
                if record.consecutive_failures >= self.breaker.failure_threshold {
                    let until = now + self.breaker.generic_cooldown();
                    record.cooldown_until = Some(until);
                    record.state = HealthState::Tripped;
                    warn!(
                        credential = %id,
                        failures = record.consecutive_failures,
                        "credential tripped: failure threshold reached"
                    );
                } else {
                    record.state = HealthState::Degraded;
                    info!(
                        credential = %id,
                        failures = record.consecutive_failures,
                        "credential degraded"
                    );
                }
            }
        }
    }

    /// Current record with lazy trip expiry applied. Unknown credentials
    /// read as a fresh healthy record.
    pub fn get(&self, id: &str) -> HealthRecord {
        let now = Utc::now();
        let mut record = self.records.entry(Self::key(id)).or_default();
        record.expire_trip(now);
        record.clone()
    }

    pub fn is_available(&self, id: &str) -> bool {
        self.get(id).state != HealthState::Tripped
    }

    /// True when no snapshot exists or the snapshot outlived the staleness
    /// threshold.
    pub fn is_usage_stale(&self, id: &str) -> bool {
        match self.records.get(&Self::key(id)) {
            Some(record) => match &record.usage {
                Some(snapshot) => snapshot.age() > self.breaker.usage_staleness(),
                None => true,
            },
            None => true,
        }
    }

    /// Snapshot of every tracked credential, trips expired, sorted by id.
    pub fn snapshot(&self) -> Vec<(String, HealthRecord)> {
        let now = Utc::now();
        let mut entries: Vec<(String, HealthRecord)> = self
            .records
            .iter_mut()
            .map(|mut entry| {
                entry.value_mut().expire_trip(now);
                (entry.key().clone(), entry.value().clone())
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccrelay_core::usage::{WindowUsage, WINDOW_FIVE_HOUR};
    use chrono::Duration;
    use std::collections::HashMap;

    fn monitor() -> HealthMonitor {
        HealthMonitor::new(BreakerConfig::default())
    }

    fn monitor_with(breaker: BreakerConfig) -> HealthMonitor {
        HealthMonitor::new(breaker)
    }

    fn snapshot_resetting_at(resets_at: DateTime<Utc>) -> UsageSnapshot {
        let mut windows = HashMap::new();
        windows.insert(
            WINDOW_FIVE_HOUR.to_string(),
            WindowUsage {
                utilization: 95.0,
                resets_at: Some(resets_at),
            },
        );
        UsageSnapshot::new(windows)
    }

    #[test]
    fn fresh_credential_is_healthy() {
        let m = monitor();
        let record = m.get("acct");
        assert_eq!(record.state, HealthState::Healthy);
        assert_eq!(record.consecutive_failures, 0);
        assert!(m.is_available("acct"));
    }

    #[test]
    fn quota_failure_cools_down_until_reset() {
        let m = monitor();
        let resets_at = Utc::now() + Duration::hours(2);
        m.update_usage("acct", snapshot_resetting_at(resets_at));
        m.record_failure("acct", FailureKind::QuotaExhausted);

        let record = m.get("acct");
        assert_eq!(record.state, HealthState::Tripped);
        assert_eq!(record.cooldown_until, Some(resets_at));
        assert!(!m.is_available("acct"));
    }

    #[test]
    fn quota_failure_without_snapshot_uses_rate_limit_cooldown() {
        let m = monitor();
        m.record_failure("acct", FailureKind::QuotaExhausted);
        let record = m.get("acct");
        assert_eq!(record.state, HealthState::Tripped);
        let until = record.cooldown_until.unwrap();
        assert!(until > Utc::now() + Duration::seconds(590));
    }

    #[test]
    fn generic_failures_trip_at_threshold() {
        let m = monitor();
        m.record_failure("acct", FailureKind::Generic);
        assert_eq!(m.get("acct").state, HealthState::Degraded);
        m.record_failure("acct", FailureKind::Generic);
        assert_eq!(m.get("acct").state, HealthState::Degraded);
        m.record_failure("acct", FailureKind::Generic);

        let record = m.get("acct");
        assert_eq!(record.state, HealthState::Tripped);
        assert_eq!(record.consecutive_failures, 3);
        assert!(record.cooldown_until.is_some());
    }

    #[test]
    fn success_resets_failures() {
        let m = monitor();
        m.record_failure("acct", FailureKind::Generic);
        m.record_failure("acct", FailureKind::Generic);
        m.record_success("acct");

        let record = m.get("acct");
        assert_eq!(record.state, HealthState::Healthy);
        assert_eq!(record.consecutive_failures, 0);
    }

    #[test]
    fn success_does_not_clear_active_cooldown() {
        let m = monitor();
        m.record_failure("acct", FailureKind::RateLimited);
        m.record_success("acct");
        assert_eq!(m.get("acct").state, HealthState::Tripped);
    }

    #[test]
    fn expired_trip_heals_on_read() {
        let mut breaker = BreakerConfig::default();
        breaker.rate_limit_cooldown_secs = 0;
        let m = monitor_with(breaker);
        m.record_failure("acct", FailureKind::RateLimited);

        let record = m.get("acct");
        assert_eq!(record.state, HealthState::Healthy);
        assert!(record.cooldown_until.is_none());
        assert!(m.is_available("acct"));
    }

    #[test]
    fn usage_staleness() {
        let mut breaker = BreakerConfig::default();
        breaker.usage_staleness_secs = 0;
        let m = monitor_with(breaker);
        assert!(m.is_usage_stale("acct"));

        m.update_usage("acct", snapshot_resetting_at(Utc::now() + Duration::hours(1)));
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(m.is_usage_stale("acct"));

        let m = monitor();
        m.update_usage("acct", snapshot_resetting_at(Utc::now() + Duration::hours(1)));
        assert!(!m.is_usage_stale("acct"));
    }

    #[test]
    fn ids_compare_case_insensitively() {
        let m = monitor();
        m.record_failure("Acct", FailureKind::RateLimited);
        assert!(!m.is_available("acct"));
        assert!(!m.is_available("ACCT"));
    }

    #[test]
    fn snapshot_is_sorted() {
        let m = monitor();
        m.record_success("beta");
        m.record_success("alpha");
        let ids: Vec<String> = m.snapshot().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["alpha", "beta"]);
    }
}
