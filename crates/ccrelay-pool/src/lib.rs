pub mod health;
pub mod reload;
pub mod selector;

pub use health::{HealthMonitor, HealthRecord, HealthState};
pub use reload::{new_handle, watch_credentials, PoolHandle};
pub use selector::{RouteKind, Selection, Selector, UsageSource};
