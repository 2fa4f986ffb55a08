use async_trait::async_trait;
use chrono::Utc;
use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use tracing::{debug, warn};

use ccrelay_core::credential::{Credential, CredentialPool};
use ccrelay_core::usage::UsageSnapshot;
use ccrelay_upstream::{classify, CcapiClient, UpstreamError};

use crate::health::HealthMonitor;

/// Where usage snapshots come from. The production impl is the upstream
/// client; tests substitute an in-memory fake.
#[async_trait]
pub trait UsageSource: Send + Sync {
    async fn fetch_usage(&self, cred: &Credential) -> Result<UsageSnapshot, UpstreamError>;
}

#[async_trait]
impl UsageSource for CcapiClient {
    async fn fetch_usage(&self, cred: &Credential) -> Result<UsageSnapshot, UpstreamError> {
        CcapiClient::fetch_usage(self, cred).await
    }
}

/// How the returned credential was chosen — logged per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    HealthAware,
    RoundRobin,
}

impl fmt::Display for RouteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HealthAware => write!(f, "health-aware"),
            Self::RoundRobin => write!(f, "round-robin"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Selection {
    pub credential: Credential,
    pub route: RouteKind,
}

/// Picks the best credential for the next request. Health records are read
/// through the monitor; usage refreshes go through the [`UsageSource`] seam.
pub struct Selector {
    monitor: Arc<HealthMonitor>,
    source: Arc<dyn UsageSource>,
    round_robin: AtomicUsize,
}

impl Selector {
    pub fn new(monitor: Arc<HealthMonitor>, source: Arc<dyn UsageSource>) -> Self {
        Self {
            monitor,
            source,
            round_robin: AtomicUsize::new(0),
        }
    }

    /// Select a credential from the pool, or `None` when nothing is active.
    ///
    /// With the breaker enabled: filter to available credentials, refresh
    /// stale usage, sort by (five-hour utilization, usage-to-time ratio,
    /// tier descending) and take the head. An empty candidate set — or a
    /// disabled breaker — falls back to round-robin across all active
    /// credentials.
    pub async fn select(&self, pool: &CredentialPool) -> Option<Selection> {
        let active = pool.active();
        if active.is_empty() {
            return None;
        }

        if !self.monitor.breaker().enabled {
            return self.pick_round_robin(&active);
        }

        let mut candidates: Vec<&Credential> = active
            .iter()
            .copied()
            .filter(|c| self.monitor.is_available(&c.id))
            .collect();

        self.refresh_stale(&mut candidates).await;

        if candidates.is_empty() {
            return self.pick_round_robin(&active);
        }

        let now = Utc::now();
        let mut scored: Vec<(f64, f64, u8, &Credential)> = candidates
            .into_iter()
            .map(|c| {
                let usage = self.monitor.get(&c.id).usage;
                let utilization = usage
                    .as_ref()
                    .map(|u| u.five_hour_utilization())
                    .unwrap_or(0.0);
                let ratio = usage
                    .as_ref()
                    .map(|u| u.usage_to_time_ratio(now))
                    .unwrap_or(0.0);
                (utilization, ratio, c.tier, c)
            })
            .collect();

        scored.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(Ordering::Equal)
                .then(a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
                .then(b.2.cmp(&a.2))
        });

        let (utilization, _, _, best) = scored.first()?;
        debug!(credential = %best.id, utilization, "selected credential");
        Some(Selection {
            credential: (*best).clone(),
            route: RouteKind::HealthAware,
        })
    }

    /// Refresh any candidate whose snapshot is stale; a failed refresh is
    /// classified, recorded, and may knock the candidate out of this pass.
    async fn refresh_stale(&self, candidates: &mut Vec<&Credential>) {
        let refresh: Vec<&Credential> = candidates
            .iter()
            .copied()
            .filter(|c| c.track_usage && self.monitor.is_usage_stale(&c.id))
            .collect();

        for cred in refresh {
            match self.source.fetch_usage(cred).await {
                Ok(snapshot) => self.monitor.update_usage(&cred.id, snapshot),
                Err(e) => {
                    warn!(credential = %cred.id, err = %e, "usage refresh failed");
                    self.monitor.record_failure(&cred.id, classify(&e));
                }
            }
        }

        candidates.retain(|c| self.monitor.is_available(&c.id));
    }

    /// Wrap-around counter over the active set. Usable even while every
    /// credential is cooling down — somebody has to take the request.
    fn pick_round_robin(&self, active: &[&Credential]) -> Option<Selection> {
        if active.is_empty() {
            return None;
        }
        let idx = self.round_robin.fetch_add(1, AtomicOrdering::Relaxed) % active.len();
        Some(Selection {
            credential: active[idx].clone(),
            route: RouteKind::RoundRobin,
        })
    }
}
