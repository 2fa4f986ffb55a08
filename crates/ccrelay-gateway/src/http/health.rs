use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::sync::Arc;

use crate::app::AppState;

/// GET /health — liveness probe with pool metadata.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let pool = state.pool.load_full();
    let active: Vec<String> = pool
        .active()
        .iter()
        .map(|c| c.id.clone())
        .collect();

    Json(json!({
        "status": "ok",
        "service": "ccrelay",
        "version": env!("CARGO_PKG_VERSION"),
        "active_credentials": active,
        "credential_count": pool.len(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// GET /health/accounts — human-readable per-credential health summary.
pub async fn accounts_handler(State(state): State<Arc<AppState>>) -> String {
    let pool = state.pool.load_full();
    let now = chrono::Utc::now();

    let mut out = String::from("credential health\n=================\n");
    for cred in pool.all() {
        let record = state.health.get(&cred.id);
        let _ = writeln!(
            out,
            "\n{} ({})",
            cred.id,
            if cred.active { "active" } else { "inactive" }
        );
        let _ = writeln!(out, "  state: {}", record.state);
        let _ = writeln!(out, "  consecutive failures: {}", record.consecutive_failures);

        if let Some(until) = record.cooldown_until {
            let remaining = (until - now).num_seconds().max(0);
            let _ = writeln!(out, "  cooldown: {}s remaining (until {})", remaining, until);
        }
        match record.usage.as_ref().and_then(|u| u.five_hour().cloned()) {
            Some(window) => {
                let _ = write!(out, "  five-hour window: {:.1}% used", window.utilization);
                if let Some(resets) = window.resets_at {
                    let _ = write!(out, ", resets {}", resets);
                }
                out.push('\n');
            }
            None => {
                let _ = writeln!(out, "  five-hour window: no usage data");
            }
        }
    }
    out
}
