use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use ccrelay_core::config::RelayConfig;
use ccrelay_pool::{HealthMonitor, PoolHandle, Selector};
use ccrelay_upstream::CcapiClient;

use crate::txlog::TxLogger;

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: RelayConfig,
    /// Current credential pool; handlers snapshot it once per request.
    pub pool: PoolHandle,
    pub health: Arc<HealthMonitor>,
    pub selector: Selector,
    pub client: Arc<CcapiClient>,
    /// Per-transaction file dumps, present only when enabled in config.
    pub txlog: Option<TxLogger>,
}

impl AppState {
    pub fn new(config: RelayConfig, pool: PoolHandle) -> Self {
        let client = Arc::new(CcapiClient::new(&config.upstream));
        let health = Arc::new(HealthMonitor::new(config.breaker.clone()));
        let selector = Selector::new(health.clone(), client.clone());
        let txlog = TxLogger::create(config.txlog.enabled);
        Self {
            config,
            pool,
            health,
            selector,
            client,
            txlog,
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/messages", post(crate::http::messages::messages_handler))
        .route("/v1/complete", post(crate::http::messages::complete_handler))
        .route("/health", get(crate::http::health::health_handler))
        .route(
            "/health/accounts",
            get(crate::http::health::accounts_handler),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
